use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::host::{ParticipantId, TaskHandle};
use crate::util::{Location, WorldKey};

pub type SessionId = Uuid;

/// Session lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Just created
    Forming,
    /// Counting down before departure
    Countdown,
    /// Waiting for a destination
    Locating,
    /// Relocating participants
    Dispatching,
    Completed,
    Cancelled,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::Forming => 0,
            SessionState::Countdown => 1,
            SessionState::Locating => 2,
            SessionState::Dispatching => 3,
            SessionState::Completed | SessionState::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }
}

/// Why a session or a participant's place in it was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    Moved,
    Damaged,
    Chatted,
    Disconnected,
    Kicked,
    /// Participant used the cancel command
    Command,
    NotEnough,
    Timeout,
    NoSafeLocations,
    InvalidWorld,
    Reloaded,
    Shutdown,
}

impl CancelReason {
    /// Notification template for this reason
    pub fn notice_key(self) -> &'static str {
        match self {
            CancelReason::Moved => "cancel.moved",
            CancelReason::Damaged => "cancel.damaged",
            CancelReason::Chatted => "cancel.chat",
            CancelReason::Disconnected => "cancel.disconnected",
            CancelReason::Kicked => "cancel.kicked",
            CancelReason::Command => "cancel.command",
            CancelReason::NotEnough => "cancel.not-enough",
            CancelReason::Timeout => "cancel.timeout",
            CancelReason::NoSafeLocations => "cancel.no-safe-locations",
            CancelReason::InvalidWorld => "cancel.invalid-world",
            CancelReason::Reloaded => "cancel.reloaded",
            CancelReason::Shutdown => "cancel.shutdown",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CancelReason::Moved => "moved",
            CancelReason::Damaged => "damaged",
            CancelReason::Chatted => "chatted",
            CancelReason::Disconnected => "disconnected",
            CancelReason::Kicked => "kicked",
            CancelReason::Command => "cancelled",
            CancelReason::NotEnough => "not-enough",
            CancelReason::Timeout => "timeout",
            CancelReason::NoSafeLocations => "no-safe-locations",
            CancelReason::InvalidWorld => "invalid-world",
            CancelReason::Reloaded => "reloaded",
            CancelReason::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// A matched group on its way to a destination
#[derive(Debug, Clone)]
pub struct TeleportSession {
    pub id: SessionId,
    pub world: WorldKey,
    pub created_at: Instant,
    state: SessionState,
    participants: Vec<ParticipantId>,
    pub(crate) countdown: Option<TaskHandle>,
    pub(crate) remaining_secs: u32,
    pub(crate) cancel_reason: Option<CancelReason>,
    pub(crate) destination: Option<Location>,
}

impl TeleportSession {
    pub fn new(world: WorldKey, participants: Vec<ParticipantId>, countdown_secs: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            world,
            created_at: Instant::now(),
            state: SessionState::Forming,
            participants,
            countdown: None,
            remaining_secs: countdown_secs,
            cancel_reason: None,
            destination: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to a later state. Returns false (and changes nothing) otherwise.
    pub(crate) fn advance(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    /// Participants in group order
    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    /// Owned copy of the participant set
    pub fn snapshot(&self) -> Vec<ParticipantId> {
        self.participants.clone()
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.participants.contains(&participant)
    }

    pub fn size(&self) -> usize {
        self.participants.len()
    }

    pub(crate) fn remove_participant(&mut self, participant: ParticipantId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| *p != participant);
        self.participants.len() != before
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    pub fn destination(&self) -> Option<&Location> {
        self.destination.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
