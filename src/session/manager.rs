//! Session state machine
//!
//! FORMING -> COUNTDOWN -> LOCATING -> DISPATCHING -> COMPLETED, with
//! CANCELLED reachable from every non-terminal state. All methods run on the
//! primary context; background search results arrive as [`FinderEvent`]s.

use crossbeam_channel::Receiver;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::cooldown::{CooldownGate, CooldownKind};
use crate::host::{Host, ParticipantId, Task};
use crate::location::{
    BatchReport, FinderEvent, LocationFinder, Resolution, SafetyRules, SearchFailure,
};
use crate::queue::QueueStore;
use crate::session::teleport::{CancelReason, SessionId, SessionState, TeleportSession};
use crate::util::Location;

/// Finished sessions kept for inspection
const HISTORY_LEN: usize = 128;

/// Countdown unit interval
const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Queue-side state touched by a dispatch
pub struct DispatchCtx<'a> {
    pub queue: &'a mut QueueStore,
    pub cooldowns: &'a mut CooldownGate,
}

pub struct SessionManager {
    host: Host,
    config: DispatchConfig,
    finder: LocationFinder,
    sessions: HashMap<SessionId, TeleportSession>,
    by_participant: HashMap<ParticipantId, SessionId>,
    history: VecDeque<TeleportSession>,
}

impl SessionManager {
    /// Create a manager and the receiver for its background search reports
    pub fn new(host: Host, config: DispatchConfig) -> (Self, Receiver<BatchReport>) {
        let rules = SafetyRules::new(host.terrain.clone(), host.claims.clone(), config.claim_check);
        let (finder, reports) = LocationFinder::new(
            rules,
            config.search.clone(),
            host.scheduler.clone(),
            config.tick(),
        );

        let manager = Self {
            host,
            config,
            finder,
            sessions: HashMap::new(),
            by_participant: HashMap::new(),
            history: VecDeque::new(),
        };
        (manager, reports)
    }

    pub fn finder(&self) -> &LocationFinder {
        &self.finder
    }

    pub fn get(&self, id: SessionId) -> Option<&TeleportSession> {
        self.sessions.get(&id)
    }

    /// Live or recently finished session
    pub fn lookup(&self, id: SessionId) -> Option<&TeleportSession> {
        self.sessions
            .get(&id)
            .or_else(|| self.history.iter().rev().find(|s| s.id == id))
    }

    pub fn session_of(&self, participant: ParticipantId) -> Option<&TeleportSession> {
        self.by_participant
            .get(&participant)
            .and_then(|id| self.sessions.get(id))
    }

    pub fn in_session(&self, participant: ParticipantId) -> bool {
        self.by_participant.contains_key(&participant)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Start a session for a freshly formed group
    pub fn create(
        &mut self,
        world: &str,
        participants: Vec<ParticipantId>,
        ctx: &mut DispatchCtx<'_>,
    ) -> SessionId {
        let mut session =
            TeleportSession::new(world.to_string(), participants, self.config.countdown_secs);
        let id = session.id;

        for participant in session.participants() {
            debug_assert!(!self.by_participant.contains_key(participant));
            self.by_participant.insert(*participant, id);
        }

        info!(
            session = %id,
            world = %world,
            size = session.size(),
            "session created"
        );

        if self.config.countdown_secs > 0 {
            session.advance(SessionState::Countdown);
            session.countdown = Some(self.host.scheduler.run_repeating(
                Duration::ZERO,
                COUNTDOWN_INTERVAL,
                Task::CountdownTick(id),
            ));
            self.sessions.insert(id, session);
        } else {
            self.sessions.insert(id, session);
            self.begin_locating(id, ctx);
        }

        id
    }

    /// One countdown interval elapsed
    pub fn on_countdown_tick(&mut self, id: SessionId, ctx: &mut DispatchCtx<'_>) {
        if self.sessions.get(&id).map(TeleportSession::state) != Some(SessionState::Countdown) {
            return;
        }
        if !self.drop_offline(id) {
            return;
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        if session.remaining_secs == 0 {
            if let Some(handle) = session.countdown.take() {
                self.host.scheduler.cancel(handle);
            }
            self.begin_locating(id, ctx);
            return;
        }

        let seconds = session.remaining_secs;
        session.remaining_secs -= 1;
        let placeholders = [("seconds", seconds.to_string())];
        for participant in session.participants() {
            self.host
                .notifier
                .send_title(*participant, "countdown.tick", &placeholders);
            self.host
                .notifier
                .play_sound(*participant, "countdown.tick", &placeholders);
        }
    }

    fn begin_locating(&mut self, id: SessionId, ctx: &mut DispatchCtx<'_>) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.advance(SessionState::Locating) {
            return;
        }
        let world = session.world.clone();

        let Some(zone) = self.host.catalog.zone_for(&world) else {
            warn!(session = %id, world = %world, "no zone configured for world");
            self.cancel_session(id, CancelReason::InvalidWorld);
            return;
        };

        match self.finder.get_or_search(&zone, id, Instant::now()) {
            Resolution::Ready(location) => self.dispatch(id, location, ctx),
            Resolution::Pending => {
                debug!(session = %id, world = %world, "waiting for background search");
                let placeholders = [("world", zone.name().to_string())];
                for participant in self.participants_of(id) {
                    self.host
                        .notifier
                        .send_action_bar(participant, "search.pending", &placeholders);
                }
            }
        }
    }

    /// Pace tick for a world's background search
    pub fn on_search_step(&mut self, world: &str, ctx: &mut DispatchCtx<'_>) {
        let events = self.finder.step(world, Instant::now());
        self.apply_finder_events(events, ctx);
    }

    /// A background batch reported back
    pub fn on_search_report(&mut self, report: BatchReport, ctx: &mut DispatchCtx<'_>) {
        let events = self.finder.on_report(report, Instant::now());
        self.apply_finder_events(events, ctx);
    }

    fn apply_finder_events(&mut self, events: Vec<FinderEvent>, ctx: &mut DispatchCtx<'_>) {
        for event in events {
            match event {
                FinderEvent::Resolved { session, location } => {
                    self.dispatch(session, location, ctx)
                }
                FinderEvent::Failed { session, failure } => {
                    self.on_search_failed(session, failure, ctx)
                }
            }
        }
    }

    fn on_search_failed(&mut self, id: SessionId, failure: SearchFailure, ctx: &mut DispatchCtx<'_>) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if session.state() != SessionState::Locating {
            return;
        }

        if self.config.fallback_to_spawn {
            if let Some(spawn) = self.finder.fallback(&session.world) {
                info!(session = %id, "no safe location found, using world spawn");
                self.dispatch(id, spawn, ctx);
                return;
            }
        }

        let reason = match failure {
            SearchFailure::Timeout => CancelReason::Timeout,
            SearchFailure::NoSafeLocations => CancelReason::NoSafeLocations,
        };
        self.cancel_session(id, reason);
    }

    fn dispatch(&mut self, id: SessionId, location: Location, ctx: &mut DispatchCtx<'_>) {
        if !self.drop_offline(id) {
            return;
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.advance(SessionState::Dispatching) {
            return;
        }
        session.destination = Some(location.clone());
        let world = session.world.clone();
        let participants = session.snapshot();

        let mut results = Vec::with_capacity(participants.len());
        for participant in &participants {
            ctx.queue.dequeue(*participant);
            let result = self.host.presence.relocate(*participant, &location);
            if let Err(e) = &result {
                warn!(participant = %participant, "relocation to {} failed: {}", location, e);
            }
            ctx.cooldowns
                .record_action(*participant, CooldownKind::PostDispatch, Some(&world));
            results.push((*participant, result.is_ok()));
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.advance(SessionState::Completed);
        }
        info!(session = %id, "dispatched {} participants to {}", participants.len(), location);
        self.release(id);

        let placeholders = [
            ("world", self.host.catalog.display_name(&world)),
            ("x", format!("{:.0}", location.x.floor())),
            ("y", format!("{:.0}", location.y.floor())),
            ("z", format!("{:.0}", location.z.floor())),
        ];
        let notifier = &self.host.notifier;
        for (participant, relocated) in results {
            if relocated {
                notifier.send_message(participant, "teleport.success", &placeholders);
                notifier.send_title(participant, "teleport.success", &placeholders);
                notifier.play_sound(participant, "teleport.success", &placeholders);
                notifier.spawn_effect(participant, "teleport.success", &placeholders);
            } else {
                notifier.send_message(participant, "teleport.failed", &placeholders);
            }
        }

        if let Some(zone) = self.host.catalog.zone_for(&world) {
            self.finder.warm_cache(&zone, Instant::now());
        }
    }

    /// Remove one participant from its session. The whole session is
    /// cancelled when too few remain or policy says any departure cancels.
    pub fn cancel_participant(&mut self, participant: ParticipantId, reason: CancelReason) -> bool {
        let Some(id) = self.by_participant.remove(&participant) else {
            return false;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };

        session.remove_participant(participant);
        let remaining = session.size();
        debug!(
            session = %id,
            participant = %participant,
            remaining,
            "participant left session: {}",
            reason
        );

        let placeholders = [("world", self.host.catalog.display_name(&session.world))];
        self.host
            .notifier
            .send_message(participant, reason.notice_key(), &placeholders);

        if remaining < self.config.required_size || self.config.cancel_on_any_departure {
            self.cancel_session(id, reason);
        } else {
            let placeholders = [("player", self.host.presence.display_name(participant))];
            for other in self.participants_of(id) {
                self.host
                    .notifier
                    .send_message(other, "cancel.partial", &placeholders);
            }
        }
        true
    }

    /// Drop participants that went offline, telling the rest of the group.
    /// Returns false when the session is gone or too small to continue.
    fn drop_offline(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        let offline: Vec<ParticipantId> = session
            .participants()
            .iter()
            .filter(|p| !self.host.presence.is_online(**p))
            .copied()
            .collect();
        if offline.is_empty() {
            return true;
        }

        for participant in &offline {
            debug!(session = %id, participant = %participant, "dropping offline participant");
            session.remove_participant(*participant);
            self.by_participant.remove(participant);
        }
        let remaining = session.size();
        let placeholders = [("world", self.host.catalog.display_name(&session.world))];
        for participant in &offline {
            self.host.notifier.send_message(
                *participant,
                CancelReason::Disconnected.notice_key(),
                &placeholders,
            );
        }

        if remaining < self.config.required_size {
            self.cancel_session(id, CancelReason::NotEnough);
            return false;
        }

        let others = self.participants_of(id);
        for participant in offline {
            let placeholders = [("player", self.host.presence.display_name(participant))];
            for other in &others {
                self.host
                    .notifier
                    .send_message(*other, "cancel.partial", &placeholders);
            }
        }
        true
    }

    /// Cancel a whole session. No-op for unknown or finished sessions.
    pub fn cancel_session(&mut self, id: SessionId, reason: CancelReason) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if !session.advance(SessionState::Cancelled) {
            return false;
        }
        session.cancel_reason = Some(reason);
        let participants = session.snapshot();
        let world = session.world.clone();

        info!(session = %id, world = %world, "session cancelled: {}", reason);
        self.release(id);

        let placeholders = [("world", self.host.catalog.display_name(&world))];
        for participant in participants {
            self.host
                .notifier
                .send_message(participant, reason.notice_key(), &placeholders);
            self.host
                .notifier
                .play_sound(participant, "cancel", &placeholders);
        }
        true
    }

    pub fn cancel_all(&mut self, reason: CancelReason) -> usize {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.cancel_session(*id, reason))
            .count()
    }

    /// Start cache top-ups for every configured zone
    pub fn warm_all(&mut self) {
        let now = Instant::now();
        for world in self.host.catalog.all_zone_keys() {
            if let Some(zone) = self.host.catalog.zone_for(&world) {
                self.finder.warm_cache(&zone, now);
            }
        }
    }

    /// Apply a new configuration. Live sessions must already be cancelled.
    pub fn reconfigure(&mut self, config: DispatchConfig) {
        debug_assert!(self.sessions.is_empty());
        let rules = SafetyRules::new(
            self.host.terrain.clone(),
            self.host.claims.clone(),
            config.claim_check,
        );
        self.finder.reset(rules, config.search.clone());
        self.config = config;
    }

    /// Stop every background search without touching sessions
    pub fn stop_searches(&mut self) {
        let config = self.config.clone();
        let rules = SafetyRules::new(
            self.host.terrain.clone(),
            self.host.claims.clone(),
            config.claim_check,
        );
        self.finder.reset(rules, config.search);
    }

    fn participants_of(&self, id: SessionId) -> Vec<ParticipantId> {
        self.sessions
            .get(&id)
            .map(TeleportSession::snapshot)
            .unwrap_or_default()
    }

    /// Release timer, index entries and search registration. Runs once per session.
    fn release(&mut self, id: SessionId) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };

        if let Some(handle) = session.countdown.take() {
            self.host.scheduler.cancel(handle);
        }
        for participant in session.participants() {
            if self.by_participant.get(participant) == Some(&id) {
                self.by_participant.remove(participant);
            }
        }
        self.finder.detach(&session.world, id);

        if self.history.len() >= HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CooldownConfig, SearchConfig};
    use crate::host::memory::{FlatWorld, MemoryHost};
    use crate::host::{Block, ClaimCheckers, WorldZone};
    use crate::scheduler::{AsyncMode, TickScheduler};
    use crate::util::Bounds;
    use std::sync::Arc;

    struct Fixture {
        host: Arc<MemoryHost>,
        scheduler: Arc<TickScheduler>,
        tasks: Receiver<Task>,
        reports: Receiver<BatchReport>,
        manager: SessionManager,
        queue: QueueStore,
        cooldowns: CooldownGate,
    }

    impl Fixture {
        fn new(config: DispatchConfig, surface: Block) -> Self {
            let host = Arc::new(MemoryHost::new());
            host.add_world("arena", FlatWorld::new(64, surface));
            host.add_zone(WorldZone::new("arena", Bounds::new(-30, 30, -30, 30, 0, 200), 12));
            let (scheduler, tasks) = TickScheduler::new(config.tick(), AsyncMode::Inline);
            let scheduler = Arc::new(scheduler);
            let bundle = host.bundle(scheduler.clone(), ClaimCheckers::none());
            let (manager, reports) = SessionManager::new(bundle, config.clone());
            Self {
                host,
                scheduler,
                tasks,
                reports,
                manager,
                queue: QueueStore::new(),
                cooldowns: CooldownGate::without_bypass(CooldownConfig::default()),
            }
        }

        fn group(&self, n: usize) -> Vec<ParticipantId> {
            (0..n)
                .map(|i| self.host.spawn_participant(&format!("P{}", i), "arena"))
                .collect()
        }

        fn create(&mut self, participants: Vec<ParticipantId>) -> SessionId {
            let mut ctx = DispatchCtx {
                queue: &mut self.queue,
                cooldowns: &mut self.cooldowns,
            };
            self.manager.create("arena", participants, &mut ctx)
        }

        fn run_secs(&mut self, secs: u64) {
            let ticks = self.scheduler.ticks_for(Duration::from_secs(secs));
            for _ in 0..ticks {
                self.scheduler.tick();
                let mut ctx = DispatchCtx {
                    queue: &mut self.queue,
                    cooldowns: &mut self.cooldowns,
                };
                for task in self.tasks.try_iter().collect::<Vec<_>>() {
                    match task {
                        Task::CountdownTick(id) => self.manager.on_countdown_tick(id, &mut ctx),
                        Task::SearchStep(world) => self.manager.on_search_step(&world, &mut ctx),
                        Task::Maintenance => {}
                    }
                }
                for report in self.reports.try_iter().collect::<Vec<_>>() {
                    self.manager.on_search_report(report, &mut ctx);
                }
            }
        }

        fn state(&self, id: SessionId) -> SessionState {
            self.manager.lookup(id).unwrap().state()
        }
    }

    fn grass() -> Block {
        Block::Solid("grass_block".into())
    }

    #[test]
    fn test_countdown_then_dispatch() {
        let mut fx = Fixture::new(DispatchConfig::default(), grass());
        let group = fx.group(2);
        let id = fx.create(group.clone());

        assert_eq!(fx.state(id), SessionState::Countdown);
        fx.run_secs(4);
        assert_eq!(fx.state(id), SessionState::Countdown);

        fx.run_secs(2);

        assert_eq!(fx.state(id), SessionState::Completed);
        let destination = fx.manager.lookup(id).unwrap().destination().unwrap().clone();
        for p in &group {
            assert_eq!(fx.host.location_of_participant(*p), Some(destination.clone()));
            assert!(fx.host.has_notice(*p, "teleport.success"));
            assert!(!fx.manager.in_session(*p));
        }
        assert_eq!(fx.host.count_notices(group[0], "countdown.tick"), 5 * 2);
        assert_eq!(fx.manager.active_count(), 0);
    }

    #[test]
    fn test_zero_countdown_dispatches_immediately() {
        let config = DispatchConfig {
            countdown_secs: 0,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(2);

        let id = fx.create(group);

        assert_eq!(fx.state(id), SessionState::Completed);
    }

    #[test]
    fn test_departure_below_required_cancels() {
        let mut fx = Fixture::new(DispatchConfig::default(), grass());
        let group = fx.group(2);
        let id = fx.create(group.clone());

        assert!(fx.manager.cancel_participant(group[0], CancelReason::Moved));

        assert_eq!(fx.state(id), SessionState::Cancelled);
        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::Moved)
        );
        assert!(fx.host.has_notice(group[1], "cancel.moved"));
        assert!(!fx.manager.in_session(group[0]));
        assert!(!fx.manager.in_session(group[1]));
        assert_eq!(fx.scheduler.pending(), 0);
    }

    #[test]
    fn test_partial_departure_continues() {
        let config = DispatchConfig {
            required_size: 2,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(3);
        let id = fx.create(group.clone());

        fx.manager.cancel_participant(group[0], CancelReason::Damaged);

        assert_eq!(fx.state(id), SessionState::Countdown);
        assert!(fx.host.has_notice(group[1], "cancel.partial"));
        assert!(fx.host.has_notice(group[0], "cancel.damaged"));

        fx.run_secs(6);
        assert_eq!(fx.state(id), SessionState::Completed);
        assert_eq!(fx.host.relocations(group[0]), 0);
        assert_eq!(fx.host.relocations(group[1]), 1);
        assert!(!fx.host.has_notice(group[0], "teleport.success"));
    }

    #[test]
    fn test_any_departure_policy_cancels() {
        let config = DispatchConfig {
            cancel_on_any_departure: true,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(3);
        let id = fx.create(group.clone());

        fx.manager.cancel_participant(group[2], CancelReason::Chatted);

        assert_eq!(fx.state(id), SessionState::Cancelled);
    }

    #[test]
    fn test_cancellation_is_idempotent() {
        let mut fx = Fixture::new(DispatchConfig::default(), grass());
        let group = fx.group(2);
        let id = fx.create(group.clone());

        assert!(fx.manager.cancel_session(id, CancelReason::Command));
        assert!(!fx.manager.cancel_session(id, CancelReason::Kicked));
        assert!(!fx.manager.cancel_participant(group[0], CancelReason::Moved));

        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::Command)
        );
        assert_eq!(fx.host.count_notices(group[0], "cancel.command"), 1);
    }

    #[test]
    fn test_offline_during_countdown_cancels_not_enough() {
        let mut fx = Fixture::new(DispatchConfig::default(), grass());
        let group = fx.group(2);
        let id = fx.create(group.clone());

        fx.host.set_online(group[1], false);
        fx.run_secs(1);

        assert_eq!(fx.state(id), SessionState::Cancelled);
        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::NotEnough)
        );
    }

    #[test]
    fn test_offline_during_countdown_notifies_group() {
        let config = DispatchConfig {
            required_size: 2,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(3);
        let id = fx.create(group.clone());

        fx.host.set_online(group[0], false);
        fx.run_secs(1);

        assert_eq!(fx.state(id), SessionState::Countdown);
        assert!(!fx.manager.in_session(group[0]));
        assert!(fx.host.has_notice(group[0], "cancel.disconnected"));
        assert!(fx.host.has_notice(group[1], "cancel.partial"));
        assert!(fx.host.has_notice(group[2], "cancel.partial"));
    }

    #[test]
    fn test_offline_while_locating_cancels_before_dispatch() {
        let config = DispatchConfig {
            countdown_secs: 0,
            search: SearchConfig {
                sync_attempts: 0,
                ..SearchConfig::default()
            },
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(2);
        let id = fx.create(group.clone());
        assert_eq!(fx.state(id), SessionState::Locating);

        fx.host.set_online(group[1], false);
        fx.run_secs(1);

        assert_eq!(fx.state(id), SessionState::Cancelled);
        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::NotEnough)
        );
        assert_eq!(fx.host.relocations(group[0]), 0);
        assert!(fx.host.has_notice(group[0], "cancel.not-enough"));
    }

    #[test]
    fn test_background_search_dispatches_without_cache() {
        let config = DispatchConfig {
            countdown_secs: 0,
            search: SearchConfig {
                sync_attempts: 0,
                cache_cap: 0,
                ..SearchConfig::default()
            },
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(2);
        let id = fx.create(group.clone());

        fx.run_secs(2);

        assert_eq!(fx.state(id), SessionState::Completed);
        assert_eq!(fx.host.relocations(group[0]), 1);
        assert_eq!(fx.host.relocations(group[1]), 1);
    }

    fn slow_search(fallback_to_spawn: bool) -> DispatchConfig {
        DispatchConfig {
            countdown_secs: 0,
            fallback_to_spawn,
            search: SearchConfig {
                sync_attempts: 0,
                timeout_ms: 1,
                ..SearchConfig::default()
            },
            ..DispatchConfig::default()
        }
    }

    #[test]
    fn test_search_timeout_cancels_without_relocation() {
        let mut fx = Fixture::new(slow_search(false), Block::Liquid("lava".into()));
        fx.host
            .add_zone(WorldZone::new("arena", Bounds::new(-30, 30, -30, 30, 0, 200), 100_000));
        let group = fx.group(2);
        let id = fx.create(group.clone());

        std::thread::sleep(Duration::from_millis(10));
        fx.run_secs(1);

        assert_eq!(fx.state(id), SessionState::Cancelled);
        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::Timeout)
        );
        assert!(fx.host.has_notice(group[0], "cancel.timeout"));
        assert_eq!(fx.host.relocations(group[0]), 0);
        assert_eq!(fx.host.relocations(group[1]), 0);
    }

    #[test]
    fn test_search_timeout_falls_back_to_spawn() {
        let mut fx = Fixture::new(slow_search(true), Block::Liquid("lava".into()));
        fx.host
            .add_zone(WorldZone::new("arena", Bounds::new(-30, 30, -30, 30, 0, 200), 100_000));
        let group = fx.group(2);
        let id = fx.create(group.clone());

        std::thread::sleep(Duration::from_millis(10));
        fx.run_secs(1);

        assert_eq!(fx.state(id), SessionState::Completed);
        let spawn = fx.host.spawn_of("arena").unwrap();
        assert_eq!(fx.manager.lookup(id).unwrap().destination(), Some(&spawn));
        assert_eq!(fx.host.relocations(group[1]), 1);
    }

    #[test]
    fn test_no_safe_locations_cancels_without_relocation() {
        let mut fx = Fixture::new(DispatchConfig::default(), Block::Liquid("lava".into()));
        let group = fx.group(2);
        let before = fx.host.location_of_participant(group[0]);
        let id = fx.create(group.clone());

        fx.run_secs(10);

        assert_eq!(fx.state(id), SessionState::Cancelled);
        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::NoSafeLocations)
        );
        assert_eq!(fx.host.location_of_participant(group[0]), before);
        assert!(fx.host.has_notice(group[1], "cancel.no-safe-locations"));
        assert!(!fx.manager.finder().is_searching("arena"));
    }

    #[test]
    fn test_fallback_to_spawn() {
        let config = DispatchConfig {
            fallback_to_spawn: true,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, Block::Liquid("lava".into()));
        let group = fx.group(2);
        let id = fx.create(group.clone());

        fx.run_secs(10);

        assert_eq!(fx.state(id), SessionState::Completed);
        let spawn = fx.host.spawn_of("arena").unwrap();
        assert_eq!(fx.manager.lookup(id).unwrap().destination(), Some(&spawn));
        assert_eq!(fx.host.relocations(group[0]), 1);
    }

    #[test]
    fn test_unknown_world_cancels_invalid() {
        let config = DispatchConfig {
            countdown_secs: 0,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(2);
        let mut ctx = DispatchCtx {
            queue: &mut fx.queue,
            cooldowns: &mut fx.cooldowns,
        };

        let id = fx.manager.create("nowhere", group, &mut ctx);

        assert_eq!(
            fx.manager.lookup(id).unwrap().cancel_reason(),
            Some(CancelReason::InvalidWorld)
        );
    }

    #[test]
    fn test_relocation_failure_does_not_abort_others() {
        let config = DispatchConfig {
            countdown_secs: 0,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(2);
        fx.host.fail_relocation(group[0]);

        let id = fx.create(group.clone());

        assert_eq!(fx.state(id), SessionState::Completed);
        assert!(fx.host.has_notice(group[0], "teleport.failed"));
        assert!(fx.host.has_notice(group[1], "teleport.success"));
    }

    #[test]
    fn test_dispatch_applies_post_dispatch_cooldown_and_tops_up() {
        let config = DispatchConfig {
            countdown_secs: 0,
            ..DispatchConfig::default()
        };
        let mut fx = Fixture::new(config, grass());
        let group = fx.group(2);

        fx.create(group.clone());

        assert!(!fx
            .cooldowns
            .can_act(group[0], CooldownKind::PostDispatch, Some("arena")));
        assert!(fx.manager.finder().is_searching("arena"));
        fx.run_secs(1);
        assert_eq!(fx.manager.finder().cache().len("arena"), 5);
    }
}
