//! In-memory host
//!
//! A self-contained implementation of every host capability, used by the demo
//! binary, the benchmarks and the tests. Worlds are flat: stone below a
//! configurable surface layer, air above, with per-block overrides.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::host::{
    Block, ClaimChecker, ClaimCheckers, ClaimError, Host, Notifier, ParticipantId, Placeholders,
    Presence, RelocateError, Scheduler, Terrain, WorldCatalog, WorldZone,
};
use crate::util::{BlockPos, Bounds, Location, WorldKey};

/// Lowest block height scanned for solid ground
const MIN_Y: i32 = -64;

#[derive(Debug, Clone)]
pub struct FlatWorld {
    pub surface_y: i32,
    pub surface: Block,
    pub loaded: bool,
    pub spawn: BlockPos,
    overrides: HashMap<BlockPos, Block>,
}

impl FlatWorld {
    pub fn new(surface_y: i32, surface: Block) -> Self {
        Self {
            surface_y,
            surface,
            loaded: true,
            spawn: BlockPos::new(0, surface_y, 0),
            overrides: HashMap::new(),
        }
    }

    pub fn set(&mut self, pos: BlockPos, block: Block) {
        self.overrides.insert(pos, block);
    }

    fn block(&self, pos: BlockPos) -> Block {
        if let Some(block) = self.overrides.get(&pos) {
            return block.clone();
        }
        match pos.y.cmp(&self.surface_y) {
            std::cmp::Ordering::Less => Block::Solid("stone".into()),
            std::cmp::Ordering::Equal => self.surface.clone(),
            std::cmp::Ordering::Greater => Block::Air,
        }
    }

    fn highest_solid(&self, x: i32, z: i32) -> Option<i32> {
        let top = self
            .overrides
            .keys()
            .filter(|p| p.x == x && p.z == z)
            .map(|p| p.y)
            .max()
            .unwrap_or(self.surface_y)
            .max(self.surface_y);

        (MIN_Y..=top)
            .rev()
            .find(|y| matches!(self.block(BlockPos::new(x, *y, z)), Block::Solid(_)))
    }
}

/// Which notifier channel a notice went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Message,
    Title,
    ActionBar,
    Sound,
    Effect,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub participant: ParticipantId,
    pub channel: Channel,
    pub key: String,
    pub placeholders: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Participant {
    name: String,
    location: Location,
    online: bool,
    permissions: HashSet<String>,
    fail_relocation: bool,
    relocations: usize,
}

#[derive(Default)]
pub struct MemoryHost {
    worlds: RwLock<HashMap<WorldKey, FlatWorld>>,
    zones: RwLock<HashMap<WorldKey, WorldZone>>,
    zones_file: RwLock<Option<PathBuf>>,
    participants: RwLock<HashMap<ParticipantId, Participant>>,
    notices: Mutex<Vec<Notice>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this host's capabilities for the dispatcher
    pub fn bundle(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>, claims: ClaimCheckers) -> Host {
        Host {
            catalog: self.clone(),
            terrain: self.clone(),
            claims,
            notifier: self.clone(),
            presence: self.clone(),
            scheduler,
        }
    }

    // Worlds

    pub fn add_world(&self, name: &str, world: FlatWorld) {
        self.worlds.write().insert(name.to_string(), world);
    }

    pub fn with_world<F: FnOnce(&mut FlatWorld)>(&self, name: &str, f: F) {
        if let Some(world) = self.worlds.write().get_mut(name) {
            f(world);
        }
    }

    pub fn set_block(&self, world: &str, pos: BlockPos, block: Block) {
        self.with_world(world, |w| w.set(pos, block));
    }

    pub fn spawn_of(&self, world: &str) -> Option<Location> {
        self.spawn_location(world)
    }

    // Zones

    pub fn add_zone(&self, zone: WorldZone) {
        self.zones.write().insert(zone.world.clone(), zone);
    }

    /// Replace the zone table from a JSON array of zones
    pub fn load_zones_json(&self, raw: &str) -> Result<usize, ConfigError> {
        let zones: Vec<WorldZone> = serde_json::from_str(raw)?;
        if let Some(bad) = zones.iter().find(|z| !z.bounds.is_well_formed()) {
            return Err(ConfigError::Invalid(format!(
                "zone '{}' has inverted bounds",
                bad.world
            )));
        }

        let count = zones.len();
        *self.zones.write() = zones.into_iter().map(|z| (z.world.clone(), z)).collect();
        Ok(count)
    }

    /// Load zones from a file and remember it for [`WorldCatalog::reload`]
    pub fn load_zones_file(&self, path: impl AsRef<Path>) -> Result<usize, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let count = self.load_zones_json(&raw)?;
        *self.zones_file.write() = Some(path.as_ref().to_path_buf());
        Ok(count)
    }

    // Participants

    /// Add an online participant standing at the world's spawn
    pub fn spawn_participant(&self, name: &str, world: &str) -> ParticipantId {
        let id = Uuid::new_v4();
        let location = self
            .spawn_location(world)
            .unwrap_or_else(|| Location::new(world, 0.5, 65.0, 0.5));
        self.participants.write().insert(
            id,
            Participant {
                name: name.to_string(),
                location,
                online: true,
                permissions: HashSet::new(),
                fail_relocation: false,
                relocations: 0,
            },
        );
        id
    }

    pub fn set_online(&self, id: ParticipantId, online: bool) {
        if let Some(p) = self.participants.write().get_mut(&id) {
            p.online = online;
        }
    }

    pub fn grant(&self, id: ParticipantId, permission: &str) {
        if let Some(p) = self.participants.write().get_mut(&id) {
            p.permissions.insert(permission.to_string());
        }
    }

    /// Make every future relocation of this participant fail
    pub fn fail_relocation(&self, id: ParticipantId) {
        if let Some(p) = self.participants.write().get_mut(&id) {
            p.fail_relocation = true;
        }
    }

    /// Move a participant without going through relocation. Returns the old location.
    pub fn move_participant(&self, id: ParticipantId, to: Location) -> Option<Location> {
        let mut participants = self.participants.write();
        let p = participants.get_mut(&id)?;
        Some(std::mem::replace(&mut p.location, to))
    }

    pub fn location_of_participant(&self, id: ParticipantId) -> Option<Location> {
        self.participants.read().get(&id).map(|p| p.location.clone())
    }

    /// Successful relocations of a participant
    pub fn relocations(&self, id: ParticipantId) -> usize {
        self.participants.read().get(&id).map_or(0, |p| p.relocations)
    }

    // Notices

    pub fn notices(&self, id: ParticipantId) -> Vec<Notice> {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.participant == id)
            .cloned()
            .collect()
    }

    pub fn has_notice(&self, id: ParticipantId, key: &str) -> bool {
        self.count_notices(id, key) > 0
    }

    /// Notices with this key, across all channels
    pub fn count_notices(&self, id: ParticipantId, key: &str) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.participant == id && n.key == key)
            .count()
    }

    pub fn clear_notices(&self) {
        self.notices.lock().clear();
    }

    fn record(&self, participant: ParticipantId, channel: Channel, key: &str, placeholders: &Placeholders) {
        self.notices.lock().push(Notice {
            participant,
            channel,
            key: key.to_string(),
            placeholders: placeholders
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });
    }
}

impl WorldCatalog for MemoryHost {
    fn zone_for(&self, world: &str) -> Option<WorldZone> {
        self.zones.read().get(world).cloned()
    }

    fn all_zone_keys(&self) -> Vec<WorldKey> {
        let mut keys: Vec<WorldKey> = self.zones.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn display_name(&self, world: &str) -> String {
        self.zones
            .read()
            .get(world)
            .map_or_else(|| world.to_string(), |z| z.name().to_string())
    }

    fn reload(&self) {
        let Some(path) = self.zones_file.read().clone() else {
            return;
        };
        match std::fs::read_to_string(&path)
            .map_err(ConfigError::from)
            .and_then(|raw| self.load_zones_json(&raw))
        {
            Ok(count) => info!("Reloaded {} zones from {:?}", count, path),
            Err(e) => warn!("Failed to reload zones from {:?}: {}", path, e),
        }
    }
}

impl Terrain for MemoryHost {
    fn is_region_loaded(&self, world: &str, _x: i32, _z: i32) -> bool {
        self.worlds.read().get(world).is_some_and(|w| w.loaded)
    }

    fn highest_solid_y(&self, world: &str, x: i32, z: i32) -> Option<i32> {
        self.worlds.read().get(world)?.highest_solid(x, z)
    }

    fn block_at(&self, world: &str, pos: BlockPos) -> Block {
        self.worlds
            .read()
            .get(world)
            .map_or(Block::Air, |w| w.block(pos))
    }

    fn spawn_location(&self, world: &str) -> Option<Location> {
        let worlds = self.worlds.read();
        let w = worlds.get(world)?;
        Some(Location::standing_on(world, w.spawn))
    }
}

impl Notifier for MemoryHost {
    fn send_message(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders) {
        self.record(participant, Channel::Message, key, placeholders);
    }

    fn send_title(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders) {
        self.record(participant, Channel::Title, key, placeholders);
    }

    fn send_action_bar(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders) {
        self.record(participant, Channel::ActionBar, key, placeholders);
    }

    fn play_sound(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders) {
        self.record(participant, Channel::Sound, key, placeholders);
    }

    fn spawn_effect(&self, participant: ParticipantId, key: &str, placeholders: &Placeholders) {
        self.record(participant, Channel::Effect, key, placeholders);
    }
}

impl Presence for MemoryHost {
    fn is_online(&self, participant: ParticipantId) -> bool {
        self.participants
            .read()
            .get(&participant)
            .is_some_and(|p| p.online)
    }

    fn location_of(&self, participant: ParticipantId) -> Option<Location> {
        self.location_of_participant(participant)
    }

    fn relocate(&self, participant: ParticipantId, location: &Location) -> Result<(), RelocateError> {
        let mut participants = self.participants.write();
        let p = participants
            .get_mut(&participant)
            .ok_or_else(|| RelocateError(format!("unknown participant {}", participant)))?;

        if !p.online {
            return Err(RelocateError(format!("{} is offline", p.name)));
        }
        if p.fail_relocation {
            return Err(RelocateError(format!("{} could not be moved", p.name)));
        }

        p.location = location.clone();
        p.relocations += 1;
        Ok(())
    }

    fn display_name(&self, participant: ParticipantId) -> String {
        self.participants
            .read()
            .get(&participant)
            .map_or_else(|| participant.to_string(), |p| p.name.clone())
    }

    fn has_permission(&self, participant: ParticipantId, permission: &str) -> bool {
        self.participants
            .read()
            .get(&participant)
            .is_some_and(|p| p.permissions.contains(permission) || p.permissions.contains("*"))
    }
}

/// Rectangular land claims
#[derive(Default)]
pub struct RegionClaims {
    regions: RwLock<Vec<(WorldKey, Bounds)>>,
}

impl RegionClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, world: &str, bounds: Bounds) {
        self.regions.write().push((world.to_string(), bounds));
    }

    pub fn unclaim_all(&self) {
        self.regions.write().clear();
    }
}

impl ClaimChecker for RegionClaims {
    fn name(&self) -> &str {
        "regions"
    }

    fn is_claimed(&self, location: &Location) -> Result<bool, ClaimError> {
        Ok(self
            .regions
            .read()
            .iter()
            .any(|(world, bounds)| *world == location.world && bounds.contains(location)))
    }
}
