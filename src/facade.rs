//! # VM Facade
//!
//! The single entry point a host embeds: owns the compiled bytecode, the
//! symbol table, and the world, and sequences load/run/read calls safely
//! across threads.
//!
//! Rather than a process-wide global singleton, [`Vm`] is an ordinary handle
//! a host constructs; a process that wants exactly one instance layers a
//! `static`/`OnceLock<Vm>` on top at its own embedding boundary.
//!
//! Two different synchronization strategies cover the two different access
//! patterns in play:
//! - The bytecode buffer, symbol table, and validity flags live behind a
//!   single [`Mutex`] (`inner`), because `load`/`load_world` must replace
//!   them as one atomic unit and `run_symbol` must see a consistent
//!   "what to execute" snapshot for its whole run. Holding that lock for the
//!   run's duration is what makes a concurrent `load` block rather than race
//!   it, matching the authoritative blocking behavior.
//! - World state lives in its own independent atomics (see
//!   [`crate::world`]) reachable without `inner`, so `read_world` never
//!   waits on an in-progress run — it is the tear-tolerant reader the
//!   concurrency model calls for.
//! - `status` and the cancellation flag are separate atomics again, so a
//!   host polling `status()` or calling `short_circuit()` from another
//!   thread never blocks on `inner`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};

use crate::compiler::{compile, ByteSliceLines, LineSource};
use crate::error::ResultCode;
use crate::vm::run_symbol_at;
use crate::world::{City, Direction, World, GRID_SIZE};

struct Inner {
    bytecode: Vec<u8>,
    symbols: HashMap<String, u32>,
    bytecode_valid: bool,
    world_valid: bool,
}

impl Inner {
    fn empty() -> Self {
        Inner {
            bytecode: Vec::new(),
            symbols: HashMap::new(),
            bytecode_valid: false,
            world_valid: false,
        }
    }
}

/// A handle owning one compiled program and one world. See the module
/// documentation for the concurrency model.
pub struct Vm {
    inner: Mutex<Inner>,
    world: World,
    status: AtomicU8,
    cancel: AtomicBool,
    run_done: Mutex<()>,
    run_done_cv: Condvar,
}

impl Vm {
    /// Create an idle VM: no program loaded, no world loaded.
    pub fn new() -> Self {
        log::info!("initializing karel vm");
        Vm {
            inner: Mutex::new(Inner::empty()),
            world: World::new(),
            status: AtomicU8::new(ResultCode::Success as u8),
            cancel: AtomicBool::new(false),
            run_done: Mutex::new(()),
            run_done_cv: Condvar::new(),
        }
    }

    /// Explicit release, provided for symmetry with the embedding surface.
    /// Ordinary `Drop` already reclaims every owned buffer.
    pub fn deinit(self) {
        log::info!("deinitializing karel vm");
    }

    /// Compile `source` and, on success, replace the loaded program.
    pub fn load(&self, source: &[u8]) -> ResultCode {
        let mut lines = ByteSliceLines::new(source);
        self.load_from(&mut lines)
    }

    /// Convenience wrapper reading `path` then compiling it. This is the
    /// only filesystem access in the crate.
    pub fn load_file(&self, path: &Path) -> ResultCode {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("source file not found: {} ({})", path.display(), err);
                return ResultCode::FileNotFound;
            }
        };
        self.load(&bytes)
    }

    fn load_from(&self, source: &mut dyn LineSource) -> ResultCode {
        let mut guard = self.inner.lock().expect("vm mutex poisoned");
        match compile(source) {
            Ok((bytecode, symbols)) => {
                log::info!("loaded program with {} symbols", symbols.len());
                guard.bytecode = bytecode;
                guard.symbols = symbols;
                guard.bytecode_valid = true;
                ResultCode::Success
            }
            Err(err) => {
                log::warn!("compile error: {}", err);
                guard.bytecode.clear();
                guard.symbols.clear();
                guard.bytecode_valid = false;
                ResultCode::from(err)
            }
        }
    }

    /// Load Karel's pose and the city. `city_bytes` is row-major, one byte
    /// per square (`0..=8` flag count, `255` wall). `karel` is
    /// `[x, y, dir, home_x, home_y]`.
    ///
    /// Takes the same lock `run_symbol` holds for its duration, so a
    /// concurrent run blocks this call rather than racing it.
    pub fn load_world(&self, city_bytes: &[u8; 400], karel: &[u8; 5]) -> ResultCode {
        let mut guard = self.inner.lock().expect("vm mutex poisoned");
        let loaded = City::from_bytes(city_bytes);
        for y in 0..GRID_SIZE {
            for x in 0..GRID_SIZE {
                self.world.city.set(x, y, loaded.get(x, y));
            }
        }
        self.world.pose.set_position(karel[0], karel[1]);
        self.world.pose.set_direction(Direction::from_u8(karel[2]));
        self.world.pose.set_home(karel[3], karel[4]);
        guard.world_valid = true;
        log::info!("loaded world state");
        ResultCode::Success
    }

    /// Best-effort snapshot of the current world. May tear against a
    /// concurrently running symbol; see the module documentation.
    pub fn read_world(&self) -> ([u8; 400], [u8; 5]) {
        let bytes = self.world.city.to_bytes();
        let mut city_out = [0u8; 400];
        city_out.copy_from_slice(&bytes);
        let (hx, hy) = self.world.pose.home();
        let karel_out = [
            self.world.pose.x(),
            self.world.pose.y(),
            self.world.pose.direction() as u8,
            hx,
            hy,
        ];
        (city_out, karel_out)
    }

    /// Run the symbol named `name` to completion (or failure, or
    /// cancellation). Blocks `load`/`load_world` on other threads for the
    /// duration of the run.
    pub fn run_symbol(&self, name: &str) -> ResultCode {
        let guard = self.inner.lock().expect("vm mutex poisoned");
        if !guard.bytecode_valid || !guard.world_valid {
            return ResultCode::StateNotValid;
        }
        let start = match guard.symbols.get(name) {
            Some(addr) => *addr,
            None => return ResultCode::SymbolNotFound,
        };

        self.cancel.store(false, Ordering::Relaxed);
        self.status.store(ResultCode::InProgress as u8, Ordering::Relaxed);
        log::info!("running symbol '{}'", name);

        let outcome = run_symbol_at(&guard.bytecode, &self.world, start, &self.cancel);
        drop(guard);

        let code = match outcome {
            Ok(stats) => {
                log::info!("run finished after {} instructions", stats.instructions_executed);
                ResultCode::Success
            }
            Err(err) => {
                log::warn!("run failed: {}", err);
                ResultCode::from(err)
            }
        };
        self.status.store(code as u8, Ordering::Relaxed);

        let _lock = self.run_done.lock().expect("run_done mutex poisoned");
        self.run_done_cv.notify_all();
        code
    }

    /// Request cancellation of an in-progress run and block until `status`
    /// leaves `in_progress`. A no-op (returns immediately) if no run is
    /// active.
    pub fn short_circuit(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        let guard = self.run_done.lock().expect("run_done mutex poisoned");
        let _guard = self
            .run_done_cv
            .wait_while(guard, |_| self.status.load(Ordering::Relaxed) == ResultCode::InProgress as u8)
            .expect("run_done condvar poisoned");
    }

    /// The current status: `in_progress` while a run is underway, otherwise
    /// the result code of the most recently completed run (or `success` if
    /// none has run yet).
    pub fn status(&self) -> ResultCode {
        ResultCode::from_u8(self.status.load(Ordering::Relaxed))
    }

    /// Diagnostic dump of every loaded symbol and its bytecode address,
    /// ordered by address.
    pub fn dump_loaded_symbols(&self) -> Vec<(String, u32)> {
        let guard = self.inner.lock().expect("vm mutex poisoned");
        let mut out: Vec<(String, u32)> = guard.symbols.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by_key(|(_, addr)| *addr);
        out
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_world() -> ([u8; 400], [u8; 5]) {
        ([0u8; 400], [0, 0, 0, 0, 0])
    }

    #[test]
    fn run_before_loading_world_is_state_not_valid() {
        let vm = Vm::new();
        vm.load(b"TEST\n  STEP\nEND\n");
        assert_eq!(vm.run_symbol("TEST"), ResultCode::StateNotValid);
    }

    #[test]
    fn load_run_read_round_trip() {
        let vm = Vm::new();
        assert_eq!(vm.load(b"TEST\n  STEP\n  LEFT\n  STEP\nEND\n"), ResultCode::Success);
        let (city, karel) = empty_world();
        assert_eq!(vm.load_world(&city, &karel), ResultCode::Success);
        assert_eq!(vm.run_symbol("TEST"), ResultCode::Success);
        assert_eq!(vm.status(), ResultCode::Success);
        let (_, karel_out) = vm.read_world();
        assert_eq!(karel_out, [1, 1, 1, 0, 0]);
    }

    #[test]
    fn unknown_symbol_is_reported() {
        let vm = Vm::new();
        vm.load(b"TEST\nEND\n");
        let (city, karel) = empty_world();
        vm.load_world(&city, &karel);
        assert_eq!(vm.run_symbol("NOPE"), ResultCode::SymbolNotFound);
    }

    #[test]
    fn bad_source_reports_compilation_error_and_clears_state() {
        let vm = Vm::new();
        assert_eq!(vm.load(b"TEST\n  REPEAT many-TIMES\n  END\nEND\n"), ResultCode::CompilationError);
        let (city, karel) = empty_world();
        vm.load_world(&city, &karel);
        assert_eq!(vm.run_symbol("TEST"), ResultCode::StateNotValid);
    }

    #[test]
    fn short_circuit_with_no_run_in_progress_returns_immediately() {
        let vm = Vm::new();
        vm.short_circuit();
        assert_eq!(vm.status(), ResultCode::Success);
    }

    #[test]
    fn dump_loaded_symbols_is_sorted_by_address() {
        let vm = Vm::new();
        vm.load(b"SECOND\n  STEP\nEND\nFIRST\nEND\n");
        let dump = vm.dump_loaded_symbols();
        assert_eq!(dump.len(), 2);
        assert!(dump[0].1 < dump[1].1);
    }
}
