//! Waiting lists and group formation

pub mod matchmaker;
pub mod store;

pub use matchmaker::Matchmaker;
pub use store::{QueueEntry, QueueStore};
