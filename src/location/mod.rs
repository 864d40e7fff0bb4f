//! Safe destination search and caching

pub mod cache;
pub mod finder;
pub mod safety;

pub use cache::LocationCache;
pub use finder::{BatchReport, FinderEvent, LocationFinder, Resolution, SearchFailure};
pub use safety::SafetyRules;
