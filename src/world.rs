//! # World State
//!
//! Karel's pose and the city grid, stored as independent atomic cells so a
//! reader (`read_world` on the facade) can take a best-effort snapshot while
//! a run is mutating the world on another thread. Tearing across fields is
//! an accepted property, not a bug: see the facade's concurrency notes.

use std::sync::atomic::{AtomicU8, Ordering};

/// Width and height of the city; Karel only ever operates on square cities
/// of this size.
pub const GRID_SIZE: u8 = 20;
/// 4-bit sentinel stored in a packed cell to mark it as a wall.
pub const WALL: u8 = 15;
/// Maximum flag count a non-wall square may hold.
pub const MAX_FLAGS: u8 = 8;

/// Compass direction, numbered so that `LEFT` is the cyclic successor:
/// `North -> East -> South -> West -> North`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Direction {
    pub fn from_u8(v: u8) -> Self {
        match v & 0x03 {
            0 => Direction::North,
            1 => Direction::East,
            2 => Direction::South,
            _ => Direction::West,
        }
    }

    /// The cyclic successor, i.e. what a `LEFT` instruction turns into.
    pub fn left(self) -> Self {
        Direction::from_u8((self as u8 + 1) % 4)
    }

    /// Coordinate delta for a single step while facing this direction.
    /// North and East are the positive-growth directions.
    fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::East => (1, 0),
            Direction::South => (0, -1),
            Direction::West => (-1, 0),
        }
    }
}

/// Karel's position, home, and facing. Each field is an independent atomic
/// byte so reads never block on a run in progress.
#[derive(Debug)]
pub struct Pose {
    x: AtomicU8,
    y: AtomicU8,
    dir: AtomicU8,
    home_x: AtomicU8,
    home_y: AtomicU8,
}

impl Pose {
    pub fn new(x: u8, y: u8, dir: Direction, home_x: u8, home_y: u8) -> Self {
        Pose {
            x: AtomicU8::new(x),
            y: AtomicU8::new(y),
            dir: AtomicU8::new(dir as u8),
            home_x: AtomicU8::new(home_x),
            home_y: AtomicU8::new(home_y),
        }
    }

    pub fn x(&self) -> u8 {
        self.x.load(Ordering::Relaxed)
    }

    pub fn y(&self) -> u8 {
        self.y.load(Ordering::Relaxed)
    }

    pub fn direction(&self) -> Direction {
        Direction::from_u8(self.dir.load(Ordering::Relaxed))
    }

    pub fn home(&self) -> (u8, u8) {
        (self.home_x.load(Ordering::Relaxed), self.home_y.load(Ordering::Relaxed))
    }

    pub fn is_home(&self) -> bool {
        (self.x(), self.y()) == self.home()
    }

    pub fn set_position(&self, x: u8, y: u8) {
        self.x.store(x, Ordering::Relaxed);
        self.y.store(y, Ordering::Relaxed);
    }

    pub fn turn_left(&self) {
        let next = self.direction().left();
        self.dir.store(next as u8, Ordering::Relaxed);
    }

    pub fn set_direction(&self, dir: Direction) {
        self.dir.store(dir as u8, Ordering::Relaxed);
    }

    pub fn set_home(&self, home_x: u8, home_y: u8) {
        self.home_x.store(home_x, Ordering::Relaxed);
        self.home_y.store(home_y, Ordering::Relaxed);
    }

    /// The square one step ahead of Karel's current facing, or `None` if
    /// that would leave the grid. Does not consult wall state; callers
    /// decide what to do with the coordinate once they have it.
    pub fn step_target(&self) -> Option<(u8, u8)> {
        let (dx, dy) = self.direction().delta();
        let nx = self.x() as i32 + dx;
        let ny = self.y() as i32 + dy;
        if nx < 0 || ny < 0 || nx >= GRID_SIZE as i32 || ny >= GRID_SIZE as i32 {
            None
        } else {
            Some((nx as u8, ny as u8))
        }
    }
}

/// The 20x20 grid, packed two squares per byte.
#[derive(Debug)]
pub struct City {
    cells: Vec<AtomicU8>,
}

impl City {
    /// A fresh, empty (all-zero flag count) city.
    pub fn empty() -> Self {
        let len = (GRID_SIZE as usize * GRID_SIZE as usize) / 2;
        City { cells: (0..len).map(|_| AtomicU8::new(0)).collect() }
    }

    fn index(x: u8, y: u8) -> (usize, bool) {
        let linear = x as usize + y as usize * GRID_SIZE as usize;
        (linear / 2, linear % 2 == 0)
    }

    /// Flag count (0-8) or [`WALL`] at `(x, y)`.
    ///
    /// `x` and `y` must be `< GRID_SIZE`; this is a programmer contract, not
    /// recoverable input, so it is checked with a debug assertion rather
    /// than returning a `Result`.
    pub fn get(&self, x: u8, y: u8) -> u8 {
        debug_assert!(x < GRID_SIZE && y < GRID_SIZE, "square out of bounds");
        let (byte_idx, low_nibble) = Self::index(x, y);
        let byte = self.cells[byte_idx].load(Ordering::Relaxed);
        if low_nibble {
            byte & 0x0F
        } else {
            (byte >> 4) & 0x0F
        }
    }

    pub fn is_wall(&self, x: u8, y: u8) -> bool {
        self.get(x, y) == WALL
    }

    /// Store `value` (0-8 flag count, or [`WALL`]) at `(x, y)`.
    pub fn set(&self, x: u8, y: u8, value: u8) {
        debug_assert!(x < GRID_SIZE && y < GRID_SIZE, "square out of bounds");
        debug_assert!(value <= MAX_FLAGS || value == WALL, "invalid packed square value");
        let (byte_idx, low_nibble) = Self::index(x, y);
        let cell = &self.cells[byte_idx];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let updated = if low_nibble {
                (current & 0xF0) | (value & 0x0F)
            } else {
                (current & 0x0F) | ((value & 0x0F) << 4)
            };
            match cell.compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Copy the whole city out as one byte per square: `0..=8` flag count,
    /// `255` for a wall. This is the external (unpacked) representation
    /// used by `load_world`/`read_world`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(GRID_SIZE as usize * GRID_SIZE as usize);
        for y in 0..GRID_SIZE {
            for x in 0..GRID_SIZE {
                let v = self.get(x, y);
                out.push(if v == WALL { 255 } else { v });
            }
        }
        out
    }

    /// Load from the external one-byte-per-square representation.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let city = City::empty();
        for y in 0..GRID_SIZE {
            for x in 0..GRID_SIZE {
                let idx = x as usize + y as usize * GRID_SIZE as usize;
                let raw = bytes[idx];
                city.set(x, y, if raw == 255 { WALL } else { raw.min(MAX_FLAGS) });
            }
        }
        city
    }
}

/// Karel plus the city it occupies.
#[derive(Debug)]
pub struct World {
    pub pose: Pose,
    pub city: City,
}

impl World {
    pub fn new() -> Self {
        World {
            pose: Pose::new(0, 0, Direction::North, 0, 0),
            city: City::empty(),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_left_cycles_through_all_four() {
        let mut d = Direction::North;
        let seq = [Direction::East, Direction::South, Direction::West, Direction::North];
        for expected in seq {
            d = d.left();
            assert_eq!(d, expected);
        }
    }

    #[test]
    fn step_target_respects_grid_edges() {
        let pose = Pose::new(0, 0, Direction::South, 0, 0);
        assert_eq!(pose.step_target(), None);
        let pose = Pose::new(0, 0, Direction::North, 0, 0);
        assert_eq!(pose.step_target(), Some((0, 1)));
    }

    #[test]
    fn city_packs_two_squares_per_byte_independently() {
        let city = City::empty();
        city.set(0, 0, 3);
        city.set(1, 0, WALL);
        assert_eq!(city.get(0, 0), 3);
        assert_eq!(city.get(1, 0), WALL);
        assert!(city.is_wall(1, 0));
        assert!(!city.is_wall(0, 0));
    }

    #[test]
    fn city_round_trips_through_external_bytes() {
        let city = City::empty();
        city.set(5, 5, 4);
        city.set(0, 1, WALL);
        let bytes = city.to_bytes();
        let restored = City::from_bytes(&bytes);
        assert_eq!(restored.get(5, 5), 4);
        assert_eq!(restored.get(0, 1), WALL);
    }

    #[test]
    fn is_home_tracks_position_against_home() {
        let pose = Pose::new(3, 3, Direction::North, 3, 3);
        assert!(pose.is_home());
        pose.set_position(3, 4);
        assert!(!pose.is_home());
    }
}
