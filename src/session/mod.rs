pub mod manager;
pub mod teleport;

pub use manager::{DispatchCtx, SessionManager};
pub use teleport::{CancelReason, SessionId, SessionState, TeleportSession};
