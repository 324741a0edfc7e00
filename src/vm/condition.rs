//! Sense-predicate evaluation for `BRANCH`/`BRANCH_LINKED` headers.

use crate::bytecode::Condition;
use crate::world::World;

/// Evaluate `condition` against `world`, then apply `inverted` as an XOR.
pub fn eval(world: &World, condition: Condition, inverted: bool) -> bool {
    let truth = match condition {
        Condition::None => true,
        Condition::IsWall => match world.pose.step_target() {
            None => true,
            Some((x, y)) => world.city.is_wall(x, y),
        },
        Condition::IsFlag => world.city.get(world.pose.x(), world.pose.y()) >= 1,
        Condition::IsHome => world.pose.is_home(),
        Condition::IsNorth => matches!(world.pose.direction(), crate::world::Direction::North),
        Condition::IsEast => matches!(world.pose.direction(), crate::world::Direction::East),
        Condition::IsSouth => matches!(world.pose.direction(), crate::world::Direction::South),
        Condition::IsWest => matches!(world.pose.direction(), crate::world::Direction::West),
    };
    truth ^ inverted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Direction;

    #[test]
    fn is_wall_true_at_grid_edge() {
        let world = World::new();
        world.pose.set_direction(Direction::West);
        assert!(eval(&world, Condition::IsWall, false));
    }

    #[test]
    fn inversion_flips_the_result() {
        let world = World::new();
        assert!(eval(&world, Condition::IsHome, false));
        assert!(!eval(&world, Condition::IsHome, true));
    }

    #[test]
    fn is_flag_reflects_current_square() {
        let world = World::new();
        assert!(!eval(&world, Condition::IsFlag, false));
        world.city.set(0, 0, 1);
        assert!(eval(&world, Condition::IsFlag, false));
    }
}
