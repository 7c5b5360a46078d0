// Core types shared across the engine.
//
// Defines spatial coordinates (`VoxelCoord`), the small float vector used for
// positions and velocities (`Vec3`), axis directions (`Direction`), entity
// identifiers (integer-backed arena handles) and the voxel material enum.
// All types derive `Serialize` and `Deserialize` so configs, traces and test
// fixtures can be written as JSON.
//
// **Critical constraint: determinism.** Entity IDs are plain integers handed
// out by the host world in creation order. Nothing here touches OS entropy or
// wall-clock time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A cell in the 3D voxel grid. Each component is in voxel units.
///
/// The coordinate system uses right-handed conventions:
/// - X: east  (positive) / west  (negative)
/// - Y: up    (positive) / down  (negative)
/// - Z: south (positive) / north (negative)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The cell containing a world-space position.
    pub fn containing(pos: Vec3) -> Self {
        Self::new(pos.x.floor() as i32, pos.y.floor() as i32, pos.z.floor() as i32)
    }

    /// Manhattan distance between two coordinates.
    pub fn manhattan_distance(self, other: Self) -> u32 {
        ((self.x - other.x).unsigned_abs())
            + ((self.y - other.y).unsigned_abs())
            + ((self.z - other.z).unsigned_abs())
    }

    /// Squared distance in the XZ plane.
    pub fn horizontal_distance_sq(self, other: Self) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dz * dz
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub const fn up(self, n: i32) -> Self {
        self.offset(0, n, 0)
    }

    pub const fn down(self, n: i32) -> Self {
        self.offset(0, -n, 0)
    }

    /// The neighbor one cell away in `dir`.
    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy, dz) = dir.offset();
        self.offset(dx, dy, dz)
    }

    /// Same column (x, z), ignoring height.
    pub fn same_column(self, other: Self) -> bool {
        self.x == other.x && self.z == other.z
    }

    /// World-space point at the middle of the cell's floor, where the feet of
    /// an agent standing in this cell rest.
    pub fn feet_center(self) -> Vec3 {
        Vec3::new(self.x as f32 + 0.5, self.y as f32, self.z as f32 + 0.5)
    }

    /// World-space center of the cell.
    pub fn center(self) -> Vec3 {
        Vec3::new(self.x as f32 + 0.5, self.y as f32 + 0.5, self.z as f32 + 0.5)
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A world-space vector: positions, velocities and impulses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Length of the XZ projection.
    pub fn horizontal_length(self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    /// The XZ projection (y zeroed).
    pub fn horizontal(self) -> Self {
        Self::new(self.x, 0.0, self.z)
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Unit vector in the same direction, or zero for a (near-)zero vector.
    pub fn normalized_or_zero(self) -> Self {
        let len = self.length();
        if len <= f32::EPSILON {
            Self::ZERO
        } else {
            self * (1.0 / len)
        }
    }

    /// Scale down to at most `max` length. Direction is preserved.
    pub fn clamp_length(self, max: f32) -> Self {
        let len = self.length();
        if len > max && len > f32::EPSILON {
            self * (max / len)
        } else {
            self
        }
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// One of the six axis directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    /// -Z
    North,
    /// +X
    East,
    /// +Z
    South,
    /// -X
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// Horizontal directions in clockwise order (viewed from above).
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub const fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::North => (0, 0, -1),
            Direction::East => (1, 0, 0),
            Direction::South => (0, 0, 1),
            Direction::West => (-1, 0, 0),
            Direction::Up => (0, 1, 0),
            Direction::Down => (0, -1, 0),
        }
    }

    pub fn as_vec3(self) -> Vec3 {
        let (x, y, z) = self.offset();
        Vec3::new(x as f32, y as f32, z as f32)
    }

    pub const fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    /// Rotate 90° clockwise around the Y axis. Vertical directions are fixed.
    pub const fn rotate_cw(self) -> Self {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
            other => other,
        }
    }

    /// Rotate 90° counter-clockwise around the Y axis.
    pub const fn rotate_ccw(self) -> Self {
        match self {
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
            Direction::East => Direction::North,
            other => other,
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// The horizontal direction of the dominant axis of `(dx, dz)`. Ties go to
    /// the X axis; a zero vector maps to `East`.
    pub fn toward_horizontal(dx: f32, dz: f32) -> Self {
        if dx.abs() >= dz.abs() {
            if dx >= 0.0 { Direction::East } else { Direction::West }
        } else if dz >= 0.0 {
            Direction::South
        } else {
            Direction::North
        }
    }

    /// The horizontal direction of the minor axis of `(dx, dz)`, the second
    /// choice when the dominant direction is unusable.
    pub fn secondary_horizontal(dx: f32, dz: f32) -> Self {
        if dx.abs() >= dz.abs() {
            if dz >= 0.0 { Direction::South } else { Direction::North }
        } else if dx >= 0.0 {
            Direction::East
        } else {
            Direction::West
        }
    }
}

// ---------------------------------------------------------------------------
// Entity IDs
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

entity_id!(/// Stable identity of a carving agent.
AgentId);
entity_id!(/// Stable identity of a pursuable entity (player or mob).
TargetId);

// ---------------------------------------------------------------------------
// Voxel types
// ---------------------------------------------------------------------------

/// The material of a single voxel in the world grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoxelType {
    #[default]
    Air,
    Water,
    Grass,
    Dirt,
    Sand,
    Gravel,
    Stone,
    Log,
    Planks,
    Leaves,
    Obsidian,
    /// World floor and out-of-bounds filler.
    Bedrock,
}

impl VoxelType {
    /// Whether the voxel blocks movement and can be stood on.
    pub const fn is_solid(self) -> bool {
        !matches!(self, VoxelType::Air | VoxelType::Water)
    }

    /// Whether an agent may break this voxel at all.
    pub const fn is_breakable(self) -> bool {
        self.is_solid() && !matches!(self, VoxelType::Obsidian | VoxelType::Bedrock)
    }

    /// Mining effort needed to break the voxel, in hardness units. `None` for
    /// voxels that cannot be broken.
    pub const fn hardness(self) -> Option<f32> {
        match self {
            VoxelType::Air | VoxelType::Water => None,
            VoxelType::Obsidian | VoxelType::Bedrock => None,
            VoxelType::Leaves => Some(0.2),
            VoxelType::Grass | VoxelType::Dirt | VoxelType::Sand => Some(0.5),
            VoxelType::Gravel => Some(0.6),
            VoxelType::Log | VoxelType::Planks => Some(2.0),
            VoxelType::Stone => Some(1.5),
        }
    }
}

/// World difficulty, supplied by the host. Scales how aggressive agents are
/// (see `DifficultyScaling` in `config.rs`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Peaceful,
    Easy,
    Normal,
    Hard,
}

/// Game mode of a player target. Only combat modes can be pursued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    Survival,
    Adventure,
    Creative,
    Spectator,
}

impl GameMode {
    pub const fn is_combat(self) -> bool {
        matches!(self, GameMode::Survival | GameMode::Adventure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_coord_manhattan_distance() {
        let a = VoxelCoord::new(0, 0, 0);
        let b = VoxelCoord::new(3, 4, 5);
        assert_eq!(a.manhattan_distance(b), 12);
        assert_eq!(b.manhattan_distance(a), 12);
    }

    #[test]
    fn voxel_coord_ordering() {
        // VoxelCoord needs a total order for BTreeMap keys.
        let a = VoxelCoord::new(0, 0, 0);
        let b = VoxelCoord::new(1, 0, 0);
        assert!(a < b);
    }

    #[test]
    fn containing_floors_negative_positions() {
        let c = VoxelCoord::containing(Vec3::new(-0.5, 10.0, 3.99));
        assert_eq!(c, VoxelCoord::new(-1, 10, 3));
    }

    #[test]
    fn clockwise_rotation_cycles_through_all_horizontals() {
        let mut d = Direction::North;
        for expected in [Direction::East, Direction::South, Direction::West, Direction::North] {
            d = d.rotate_cw();
            assert_eq!(d, expected);
        }
        assert_eq!(Direction::East.rotate_cw().rotate_ccw(), Direction::East);
        assert_eq!(Direction::Up.rotate_cw(), Direction::Up);
    }

    #[test]
    fn toward_horizontal_picks_dominant_axis() {
        assert_eq!(Direction::toward_horizontal(3.0, 1.0), Direction::East);
        assert_eq!(Direction::toward_horizontal(-3.0, 1.0), Direction::West);
        assert_eq!(Direction::toward_horizontal(0.5, 2.0), Direction::South);
        assert_eq!(Direction::toward_horizontal(0.5, -2.0), Direction::North);
        assert_eq!(Direction::secondary_horizontal(3.0, -1.0), Direction::North);
    }

    #[test]
    fn clamp_length_preserves_direction() {
        let v = Vec3::new(3.0, 0.0, 4.0).clamp_length(1.0);
        assert!((v.length() - 1.0).abs() < 1e-5);
        assert!((v.x - 0.6).abs() < 1e-5);
        let short = Vec3::new(0.1, 0.0, 0.0);
        assert_eq!(short.clamp_length(1.0), short);
    }

    #[test]
    fn bedrock_and_obsidian_are_unbreakable() {
        assert!(VoxelType::Bedrock.is_solid());
        assert!(!VoxelType::Bedrock.is_breakable());
        assert!(!VoxelType::Obsidian.is_breakable());
        assert!(VoxelType::Stone.is_breakable());
        assert!(!VoxelType::Water.is_solid());
        assert_eq!(VoxelType::Air.hardness(), None);
    }

    #[test]
    fn only_combat_modes_are_pursuable() {
        assert!(GameMode::Survival.is_combat());
        assert!(!GameMode::Creative.is_combat());
        assert!(!GameMode::Spectator.is_combat());
    }
}
