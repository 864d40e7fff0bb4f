//! RTP Queue dispatch core
//!
//! Players queue for a world, are matched into groups, count down together
//! and are relocated as one group to a random safe destination inside the
//! world's zone. The host server supplies the world, the players and the
//! clock through the capability traits in [`host`]; [`engine::Dispatcher`]
//! owns all queue and session state and is driven from a single tick loop.

pub mod config;
pub mod cooldown;
pub mod driver;
pub mod engine;
pub mod host;
pub mod location;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod util;

pub use config::DispatchConfig;
pub use engine::{Dispatcher, JoinError, JoinOutcome, ParticipantStatus};
