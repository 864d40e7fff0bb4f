//! Shared value types

pub mod location;

pub use location::{BlockPos, Bounds, Location, WorldKey};
