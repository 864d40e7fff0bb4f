//! Cooldowns for join, leave and post-dispatch actions
//!
//! Purely temporal gating. Records expire on their own and are removed
//! lazily on lookup or by [`CooldownGate::sweep`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CooldownConfig;
use crate::host::ParticipantId;
use crate::util::WorldKey;

/// Gated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKind {
    Join,
    Leave,
    PostDispatch,
}

impl fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownKind::Join => write!(f, "join"),
            CooldownKind::Leave => write!(f, "leave"),
            CooldownKind::PostDispatch => write!(f, "post-dispatch"),
        }
    }
}

/// Predicate for participants exempt from all cooldowns
pub type BypassPredicate = Arc<dyn Fn(ParticipantId) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    participant: ParticipantId,
    kind: CooldownKind,
    world: Option<WorldKey>,
}

/// Rate-limits queue actions per participant (and per world for joins)
pub struct CooldownGate {
    config: CooldownConfig,
    /// Expiry per record
    records: HashMap<RecordKey, Instant>,
    bypass: BypassPredicate,
}

impl CooldownGate {
    pub fn new(config: CooldownConfig, bypass: BypassPredicate) -> Self {
        Self {
            config,
            records: HashMap::new(),
            bypass,
        }
    }

    /// Gate with no privileged participants
    pub fn without_bypass(config: CooldownConfig) -> Self {
        Self::new(config, Arc::new(|_| false))
    }

    pub fn set_config(&mut self, config: CooldownConfig) {
        self.config = config;
    }

    pub fn set_bypass(&mut self, bypass: BypassPredicate) {
        self.bypass = bypass;
    }

    fn duration_for(&self, kind: CooldownKind, world: Option<&str>) -> Option<Duration> {
        match kind {
            CooldownKind::Join => self.config.join_for(world),
            CooldownKind::Leave => CooldownConfig::to_duration(self.config.leave_secs),
            CooldownKind::PostDispatch => {
                CooldownConfig::to_duration(self.config.post_dispatch_secs)
            }
        }
    }

    /// Joins are tracked per world only for worlds with their own duration
    fn key(&self, participant: ParticipantId, kind: CooldownKind, world: Option<&str>) -> RecordKey {
        let world = match (kind, world) {
            (CooldownKind::Join, Some(w)) if self.config.join_per_world.contains_key(w) => {
                Some(w.to_string())
            }
            _ => None,
        };
        RecordKey {
            participant,
            kind,
            world,
        }
    }

    pub fn can_act(&self, participant: ParticipantId, kind: CooldownKind, world: Option<&str>) -> bool {
        self.remaining_at(participant, kind, world, Instant::now()).is_none()
    }

    pub fn can_act_at(
        &self,
        participant: ParticipantId,
        kind: CooldownKind,
        world: Option<&str>,
        now: Instant,
    ) -> bool {
        self.remaining_at(participant, kind, world, now).is_none()
    }

    /// Time left before the action is allowed, `None` if it is allowed now
    pub fn remaining_at(
        &self,
        participant: ParticipantId,
        kind: CooldownKind,
        world: Option<&str>,
        now: Instant,
    ) -> Option<Duration> {
        self.duration_for(kind, world)?;

        if (self.bypass)(participant) {
            return None;
        }

        let expiry = self.records.get(&self.key(participant, kind, world))?;
        if *expiry > now {
            Some(*expiry - now)
        } else {
            None
        }
    }

    pub fn record_action(&mut self, participant: ParticipantId, kind: CooldownKind, world: Option<&str>) {
        self.record_action_at(participant, kind, world, Instant::now());
    }

    pub fn record_action_at(
        &mut self,
        participant: ParticipantId,
        kind: CooldownKind,
        world: Option<&str>,
        now: Instant,
    ) {
        let Some(duration) = self.duration_for(kind, world) else {
            return;
        };
        if duration.is_zero() {
            return;
        }

        let key = self.key(participant, kind, world);
        self.records.insert(key, now + duration);
    }

    /// Remove every record for a participant
    pub fn clear(&mut self, participant: ParticipantId) {
        self.records.retain(|key, _| key.participant != participant);
    }

    /// Drop expired records. Returns the number removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, expiry| *expiry > now);
        before - self.records.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COOLDOWN_DISABLED;
    use uuid::Uuid;

    fn config() -> CooldownConfig {
        CooldownConfig {
            join_secs: 10,
            join_per_world: HashMap::new(),
            leave_secs: 5,
            post_dispatch_secs: 60,
            bypass_permission: "bypass".to_string(),
        }
    }

    #[test]
    fn test_first_action_allowed() {
        let gate = CooldownGate::without_bypass(config());
        assert!(gate.can_act(Uuid::new_v4(), CooldownKind::Join, Some("arena")));
    }

    #[test]
    fn test_cooldown_blocks_then_expires() {
        let mut gate = CooldownGate::without_bypass(config());
        let p = Uuid::new_v4();
        let now = Instant::now();

        gate.record_action_at(p, CooldownKind::Leave, None, now);

        assert!(!gate.can_act_at(p, CooldownKind::Leave, None, now + Duration::from_secs(4)));
        assert!(gate.can_act_at(p, CooldownKind::Leave, None, now + Duration::from_secs(5)));
        // Other kinds are independent
        assert!(gate.can_act_at(p, CooldownKind::Join, None, now));
    }

    #[test]
    fn test_remaining() {
        let mut gate = CooldownGate::without_bypass(config());
        let p = Uuid::new_v4();
        let now = Instant::now();

        gate.record_action_at(p, CooldownKind::PostDispatch, None, now);

        let remaining = gate
            .remaining_at(p, CooldownKind::PostDispatch, None, now + Duration::from_secs(20))
            .unwrap();
        assert_eq!(remaining, Duration::from_secs(40));
    }

    #[test]
    fn test_disabled_always_passes() {
        let mut cfg = config();
        cfg.leave_secs = COOLDOWN_DISABLED;
        let mut gate = CooldownGate::without_bypass(cfg);
        let p = Uuid::new_v4();

        gate.record_action(p, CooldownKind::Leave, None);

        assert!(gate.can_act(p, CooldownKind::Leave, None));
        assert_eq!(gate.record_count(), 0);
    }

    #[test]
    fn test_per_world_join_cooldown() {
        let mut cfg = config();
        cfg.join_per_world.insert("arena".to_string(), 30);
        cfg.join_per_world.insert("creative".to_string(), COOLDOWN_DISABLED);
        let mut gate = CooldownGate::without_bypass(cfg);
        let p = Uuid::new_v4();
        let now = Instant::now();

        gate.record_action_at(p, CooldownKind::Join, Some("arena"), now);
        let later = now + Duration::from_secs(15);

        assert!(!gate.can_act_at(p, CooldownKind::Join, Some("arena"), later));
        // Worlds without an override share the global join record
        assert!(gate.can_act_at(p, CooldownKind::Join, Some("survival"), later));
        assert!(gate.can_act_at(p, CooldownKind::Join, Some("creative"), later));
    }

    #[test]
    fn test_bypass_predicate() {
        let privileged = Uuid::new_v4();
        let mut gate = CooldownGate::new(config(), Arc::new(move |p| p == privileged));
        let other = Uuid::new_v4();

        gate.record_action(privileged, CooldownKind::Join, None);
        gate.record_action(other, CooldownKind::Join, None);

        assert!(gate.can_act(privileged, CooldownKind::Join, None));
        assert!(!gate.can_act(other, CooldownKind::Join, None));
    }

    #[test]
    fn test_clear_removes_all_records() {
        let mut gate = CooldownGate::without_bypass(config());
        let p = Uuid::new_v4();
        let other = Uuid::new_v4();

        gate.record_action(p, CooldownKind::Join, None);
        gate.record_action(p, CooldownKind::Leave, None);
        gate.record_action(other, CooldownKind::Leave, None);

        gate.clear(p);

        assert!(gate.can_act(p, CooldownKind::Join, None));
        assert!(gate.can_act(p, CooldownKind::Leave, None));
        assert_eq!(gate.record_count(), 1);
    }

    #[test]
    fn test_sweep_expired() {
        let mut gate = CooldownGate::without_bypass(config());
        let now = Instant::now();

        gate.record_action_at(Uuid::new_v4(), CooldownKind::Leave, None, now);
        gate.record_action_at(Uuid::new_v4(), CooldownKind::PostDispatch, None, now);

        let removed = gate.sweep(now + Duration::from_secs(10));

        assert_eq!(removed, 1);
        assert_eq!(gate.record_count(), 1);
    }
}
