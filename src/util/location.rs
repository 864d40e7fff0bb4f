use serde::{Deserialize, Serialize};
use std::fmt;

/// World identifier as configured by the host
pub type WorldKey = String;

/// Integer block coordinate inside a world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    #[inline]
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn above(&self, dy: i32) -> Self {
        Self {
            x: self.x,
            y: self.y + dy,
            z: self.z,
        }
    }

    #[inline]
    pub fn below(&self) -> Self {
        self.above(-1)
    }
}

/// Precise position in a world (block centre is at +0.5)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldKey,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<WorldKey>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Standing position on top of a surface block
    pub fn standing_on(world: impl Into<WorldKey>, surface: BlockPos) -> Self {
        Self::new(
            world,
            surface.x as f64 + 0.5,
            surface.y as f64 + 1.0,
            surface.z as f64 + 0.5,
        )
    }

    /// Block the feet occupy
    #[inline]
    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    /// True if both locations are in the same world and block
    pub fn same_block(&self, other: &Location) -> bool {
        self.world == other.world && self.block() == other.block()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:.1}, {:.1}, {:.1})", self.world, self.x, self.y, self.z)
    }
}

/// Axis-aligned spatial bounds of a zone (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl Bounds {
    pub fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32, min_y: i32, max_y: i32) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
            min_y,
            max_y,
        }
    }

    /// Clamp a height into [min_y, max_y]
    #[inline]
    pub fn clamp_y(&self, y: i32) -> i32 {
        y.clamp(self.min_y, self.max_y)
    }

    /// Horizontal containment check for a precise location
    pub fn contains(&self, location: &Location) -> bool {
        let block = location.block();
        (self.min_x..=self.max_x).contains(&block.x)
            && (self.min_z..=self.max_z).contains(&block.z)
    }

    pub fn is_well_formed(&self) -> bool {
        self.min_x <= self.max_x && self.min_z <= self.max_z && self.min_y <= self.max_y
    }
}
