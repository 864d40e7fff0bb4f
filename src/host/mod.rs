//! Capabilities supplied by the host server
//!
//! The dispatch core never talks to the world, the players or the clock
//! directly. Everything goes through the traits in this module, which the
//! host implements and hands to [`crate::engine::Dispatcher`] at construction.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::session::SessionId;
use crate::util::{BlockPos, Bounds, Location, WorldKey};

/// Participant identifier (stable across reconnects)
pub type ParticipantId = Uuid;

/// Template placeholders passed to the notifier
pub type Placeholders<'a> = [(&'a str, String)];

/// Named world region with search parameters, owned by the host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldZone {
    pub world: WorldKey,
    #[serde(default)]
    pub display_name: Option<String>,
    pub bounds: Bounds,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub unsafe_surfaces: HashSet<String>,
}

fn default_max_attempts() -> u32 {
    50
}

impl WorldZone {
    pub fn new(world: impl Into<WorldKey>, bounds: Bounds, max_attempts: u32) -> Self {
        Self {
            world: world.into(),
            display_name: None,
            bounds,
            max_attempts,
            permission: None,
            unsafe_surfaces: HashSet::new(),
        }
    }

    pub fn with_unsafe_surfaces<I, S>(mut self, surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsafe_surfaces = surfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.world)
    }
}

/// Zone table lookup
pub trait WorldCatalog: Send + Sync {
    fn zone_for(&self, world: &str) -> Option<WorldZone>;
    fn all_zone_keys(&self) -> Vec<WorldKey>;
    fn display_name(&self, world: &str) -> String;
    /// Replace the whole zone table from the host's configuration source
    fn reload(&self) {}
}

/// What occupies a block, as far as destination safety is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Air,
    Liquid(String),
    /// Non-colliding blocks (tall grass, flowers, ...)
    Passable(String),
    Solid(String),
}

impl Block {
    pub fn is_passable(&self) -> bool {
        matches!(self, Block::Air | Block::Passable(_))
    }

    pub fn material(&self) -> &str {
        match self {
            Block::Air => "air",
            Block::Liquid(name) | Block::Passable(name) | Block::Solid(name) => name,
        }
    }
}

/// World geometry queries. Must be callable from background workers.
pub trait Terrain: Send + Sync {
    fn is_region_loaded(&self, world: &str, x: i32, z: i32) -> bool;
    /// Height of the highest solid block in the column, if any
    fn highest_solid_y(&self, world: &str, x: i32, z: i32) -> Option<i32>;
    fn block_at(&self, world: &str, pos: BlockPos) -> Block;
    fn spawn_location(&self, world: &str) -> Option<Location>;
}

/// Claim-checker internal failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("claim lookup failed: {0}")]
pub struct ClaimError(pub String);

/// Third-party land-claim integration
pub trait ClaimChecker: Send + Sync {
    fn name(&self) -> &str;
    fn is_claimed(&self, location: &Location) -> Result<bool, ClaimError>;
}

/// All active claim integrations, composed at startup
#[derive(Clone, Default)]
pub struct ClaimCheckers {
    checkers: Vec<Arc<dyn ClaimChecker>>,
}

impl ClaimCheckers {
    pub fn new(checkers: Vec<Arc<dyn ClaimChecker>>) -> Self {
        Self { checkers }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// True if any integration reports the location as claimed.
    /// A failing integration counts as "not claimed".
    pub fn is_claimed(&self, location: &Location) -> bool {
        self.checkers.iter().any(|checker| match checker.is_claimed(location) {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!("Claim checker '{}' failed at {}: {}", checker.name(), location, e);
                false
            }
        })
    }
}

/// Player-facing feedback. Keys are template names resolved by the host.
pub trait Notifier: Send + Sync {
    fn send_message(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders);
    fn send_title(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders);
    fn send_action_bar(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders);
    fn play_sound(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders);
    fn spawn_effect(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders);
}

/// Host relocation failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("relocation failed: {0}")]
pub struct RelocateError(pub String);

/// Live player state
pub trait Presence: Send + Sync {
    fn is_online(&self, participant: ParticipantId) -> bool;
    fn location_of(&self, participant: ParticipantId) -> Option<Location>;
    fn relocate(&self, participant: ParticipantId, location: &Location) -> Result<(), RelocateError>;
    fn display_name(&self, participant: ParticipantId) -> String;
    fn has_permission(&self, participant: ParticipantId, permission: &str) -> bool;
}

/// Work the scheduler hands back to the primary context when it falls due
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// One countdown interval elapsed for a session
    CountdownTick(SessionId),
    /// Pace tick for the background search of a world
    SearchStep(WorldKey),
    /// Offline sweep and cooldown garbage collection
    Maintenance,
}

/// Handle to a scheduled task
pub type TaskHandle = u64;

/// Timer and worker capability
pub trait Scheduler: Send + Sync {
    fn run_once(&self, delay: Duration, task: Task) -> TaskHandle;
    fn run_repeating(&self, delay: Duration, interval: Duration, task: Task) -> TaskHandle;
    fn cancel(&self, handle: TaskHandle);
    /// Run a job off the primary context
    fn run_async(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Discrete events delivered by host listeners
#[derive(Debug, Clone)]
pub enum HostEvent {
    Moved {
        participant: ParticipantId,
        from: Location,
        to: Location,
    },
    Damaged {
        participant: ParticipantId,
    },
    Chatted {
        participant: ParticipantId,
    },
    Disconnected {
        participant: ParticipantId,
    },
    Kicked {
        participant: ParticipantId,
    },
}

impl HostEvent {
    pub fn participant(&self) -> ParticipantId {
        match self {
            HostEvent::Moved { participant, .. }
            | HostEvent::Damaged { participant }
            | HostEvent::Chatted { participant }
            | HostEvent::Disconnected { participant }
            | HostEvent::Kicked { participant } => *participant,
        }
    }
}

/// Everything the core consumes from the host, bundled for injection
#[derive(Clone)]
pub struct Host {
    pub catalog: Arc<dyn WorldCatalog>,
    pub terrain: Arc<dyn Terrain>,
    pub claims: ClaimCheckers,
    pub notifier: Arc<dyn Notifier>,
    pub presence: Arc<dyn Presence>,
    pub scheduler: Arc<dyn Scheduler>,
}
