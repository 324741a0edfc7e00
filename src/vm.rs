//! # Dispatch Loop (Runtime)
//!
//! Executes compiled Karel bytecode against a [`World`](crate::world::World).
//!
//! ## High-level model
//! - **Program counter (`pc`)**: byte offset into the bytecode buffer.
//! - **Call stack (`call_stack`)**: return addresses pushed by
//!   `BRANCH_LINKED`, popped by `RETN`. Strict program nesting lets it
//!   double as the saved-origin stack for nested `REPEAT` loops — see
//!   the `Repeat` arm below.
//! - **Repeat stack (`repeat_stack`)**: saved iteration counts for
//!   whichever `REPEAT` loop is not the innermost active one.
//! - **Current repeat registers**: `cur_repeat_origin`/`cur_repeat_remaining`
//!   track the loop presently being iterated, if any.
//!
//! The loop is deterministic and fails fast: any instruction error returns
//! immediately with the offending [`RuntimeError`], leaving the world in
//! whatever state it reached.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::bytecode::{branch_target, decode_header, repeat_fields, Opcode};
use crate::error::RuntimeError;
use crate::world::{World, MAX_FLAGS};

mod condition;
mod stacks;

use stacks::Stack;

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub instructions_executed: u64,
}

/// Execute the symbol whose entry point is `start` against `world`,
/// checking `cancel` once per dispatched instruction.
///
/// `bytecode` is assumed to be well-formed compiler output — malformed
/// headers or truncated operands are a programmer error, not a runtime
/// condition this function recovers from.
pub fn run_symbol_at(
    bytecode: &[u8],
    world: &World,
    start: u32,
    cancel: &AtomicBool,
) -> Result<RunStats, RuntimeError> {
    let mut pc = start;
    let mut call_stack: Stack<u32> = Stack::new();
    let mut repeat_stack: Stack<u16> = Stack::new();
    let mut cur_repeat_origin: Option<u32> = None;
    let mut cur_repeat_remaining: Option<u16> = None;
    let mut instructions_executed: u64 = 0;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(RuntimeError::Cancelled);
        }

        let header = decode_header(bytecode[pc as usize]).expect("malformed compiler output");
        instructions_executed += 1;

        match header.opcode {
            Opcode::Step => match world.pose.step_target() {
                Some((x, y)) if !world.city.is_wall(x, y) => {
                    world.pose.set_position(x, y);
                    pc += 1;
                }
                _ => return Err(RuntimeError::StepOutOfBounds),
            },
            Opcode::Left => {
                world.pose.turn_left();
                pc += 1;
            }
            Opcode::PickUp => {
                let (x, y) = (world.pose.x(), world.pose.y());
                let count = world.city.get(x, y);
                if count == 0 {
                    return Err(RuntimeError::PickupZeroFlags);
                }
                world.city.set(x, y, count - 1);
                pc += 1;
            }
            Opcode::Place => {
                let (x, y) = (world.pose.x(), world.pose.y());
                let count = world.city.get(x, y);
                if count >= MAX_FLAGS {
                    return Err(RuntimeError::PlaceMaxFlags);
                }
                world.city.set(x, y, count + 1);
                pc += 1;
            }
            Opcode::Retn => match call_stack.pop() {
                Some(ret) => pc = ret,
                None => return Ok(RunStats { instructions_executed }),
            },
            Opcode::Stop => return Err(RuntimeError::StopEncountered),
            Opcode::Branch => {
                let target = branch_target(bytecode, pc).expect("malformed compiler output");
                if condition::eval(world, header.condition, header.inverted) {
                    pc = target;
                } else {
                    pc += Opcode::Branch.size() as u32;
                }
            }
            Opcode::BranchLinked => {
                let target = branch_target(bytecode, pc).expect("malformed compiler output");
                call_stack.push(pc + Opcode::BranchLinked.size() as u32);
                pc = target;
            }
            Opcode::Repeat => {
                let (count, loop_top) = repeat_fields(bytecode, pc).expect("malformed compiler output");

                if cur_repeat_origin != Some(pc) {
                    if let (Some(origin), Some(remaining)) = (cur_repeat_origin, cur_repeat_remaining) {
                        call_stack.push(origin);
                        repeat_stack.push(remaining);
                    }
                    cur_repeat_origin = Some(pc);
                    cur_repeat_remaining = Some(count);
                }

                let remaining = cur_repeat_remaining.expect("repeat registers set above");
                if remaining <= 1 {
                    if !repeat_stack.is_empty() {
                        cur_repeat_remaining = repeat_stack.pop();
                        cur_repeat_origin = call_stack.pop();
                    } else {
                        cur_repeat_origin = None;
                        cur_repeat_remaining = None;
                    }
                    pc += Opcode::Repeat.size() as u32;
                } else {
                    cur_repeat_remaining = Some(remaining - 1);
                    pc = loop_top;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, ByteSliceLines};
    use crate::world::{Direction, World};

    fn run(src: &str, world: &World) -> Result<RunStats, RuntimeError> {
        let mut lines = ByteSliceLines::new(src.as_bytes());
        let (bytecode, symbols) = compile(&mut lines).expect("compile");
        let cancel = AtomicBool::new(false);
        run_symbol_at(&bytecode, world, symbols["TEST"], &cancel)
    }

    #[test]
    fn step_then_turn_then_step() {
        let world = World::new();
        run("TEST\n  STEP\n  LEFT\n  STEP\nEND\n", &world).unwrap();
        assert_eq!((world.pose.x(), world.pose.y()), (1, 1));
        assert_eq!(world.pose.direction(), Direction::East);
    }

    #[test]
    fn step_into_wall_is_an_error() {
        let world = World::new();
        world.city.set(0, 1, crate::world::WALL);
        let err = run("TEST\n  STEP\nEND\n", &world).unwrap_err();
        assert_eq!(err, RuntimeError::StepOutOfBounds);
        assert_eq!((world.pose.x(), world.pose.y()), (0, 0));
    }

    #[test]
    fn place_and_pick_up_round_trip() {
        let world = World::new();
        world.pose.set_position(5, 5);
        run("TEST\n  PLACE\n  PLACE\n  PICK\nEND\n", &world).unwrap();
        assert_eq!(world.city.get(5, 5), 1);
    }

    #[test]
    fn pick_up_on_empty_square_is_an_error() {
        let world = World::new();
        let err = run("TEST\n  PICK\nEND\n", &world).unwrap_err();
        assert_eq!(err, RuntimeError::PickupZeroFlags);
    }

    #[test]
    fn until_wall_walks_to_the_edge() {
        let world = World::new();
        run("TEST\n  UNTIL IS WALL\n    STEP\n  END\n  LEFT\nEND\n", &world).unwrap();
        assert_eq!((world.pose.x(), world.pose.y()), (0, 19));
        assert_eq!(world.pose.direction(), Direction::East);
    }

    #[test]
    fn nested_repeat_places_six_flags() {
        let world = World::new();
        let src = "TEST\n  REPEAT 2-TIMES\n    REPEAT 3-TIMES\n      PLACE\n    END\n    LEFT\n  END\nEND\n";
        run(src, &world).unwrap();
        assert_eq!(world.city.get(0, 0), 6);
        assert_eq!(world.pose.direction(), Direction::South);
    }

    #[test]
    fn undefined_symbol_call_is_a_no_op() {
        let world = World::new();
        run("TEST\n  NOSUCH\n  STEP\nEND\n", &world).unwrap();
        assert_eq!((world.pose.x(), world.pose.y()), (0, 1));
    }

    #[test]
    fn cancellation_is_observed_before_the_next_instruction() {
        let mut lines = ByteSliceLines::new(b"TEST\n  STEP\n  STEP\nEND\n");
        let (bytecode, symbols) = compile(&mut lines).expect("compile");
        let world = World::new();
        let cancel = AtomicBool::new(true);
        let err = run_symbol_at(&bytecode, &world, symbols["TEST"], &cancel).unwrap_err();
        assert_eq!(err, RuntimeError::Cancelled);
    }
}
