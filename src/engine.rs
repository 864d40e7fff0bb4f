//! Dispatcher
//!
//! Owns every piece of primary-context state and exposes the operations the
//! host's command layer calls: join, leave, cancel, admin reload and clear.
//! The host's tick loop calls [`Dispatcher::pump`] after advancing the
//! scheduler so fired timers and background search results are applied here,
//! one at a time.

use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{ConfigError, DispatchConfig};
use crate::cooldown::{BypassPredicate, CooldownGate, CooldownKind};
use crate::host::{Host, HostEvent, ParticipantId, Task, TaskHandle};
use crate::location::BatchReport;
use crate::queue::{Matchmaker, QueueStore};
use crate::session::{
    CancelReason, DispatchCtx, SessionId, SessionManager, SessionState, TeleportSession,
};
use crate::util::WorldKey;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Already queued")]
    AlreadyQueued,
    #[error("Already in a teleport session")]
    InSession,
    #[error("No world given and no default world configured")]
    NoWorld,
    #[error("Unknown world: {0}")]
    UnknownWorld(String),
    #[error("Missing permission: {0}")]
    NoPermission(String),
    #[error("On cooldown for {}s", .remaining.as_secs().max(1))]
    OnCooldown { remaining: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaveError {
    #[error("Not queued")]
    NotQueued,
    #[error("On cooldown for {}s", .remaining.as_secs().max(1))]
    OnCooldown { remaining: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    #[error("Not in a teleport session")]
    NotInSession,
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Waiting in the world's queue (1-based position)
    Queued { world: WorldKey, position: usize },
    /// The join completed a group
    Matched { session: SessionId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantStatus {
    Idle,
    Queued { world: WorldKey, position: usize },
    InSession { session: SessionId, state: SessionState },
}

pub struct Dispatcher {
    host: Host,
    config: DispatchConfig,
    queue: QueueStore,
    cooldowns: CooldownGate,
    matchmaker: Matchmaker,
    sessions: SessionManager,
    tasks: Receiver<Task>,
    reports: Receiver<BatchReport>,
    maintenance: Option<TaskHandle>,
}

impl Dispatcher {
    /// Build the dispatcher. `tasks` is the receiver of the host scheduler's fired tasks.
    pub fn new(host: Host, config: DispatchConfig, tasks: Receiver<Task>) -> Result<Self, ConfigError> {
        config.validate()?;

        let cooldowns = CooldownGate::new(config.cooldowns.clone(), bypass_for(&host, &config));
        let matchmaker = Matchmaker::new(host.presence.clone());
        let (sessions, reports) = SessionManager::new(host.clone(), config.clone());

        let mut dispatcher = Self {
            host,
            config,
            queue: QueueStore::new(),
            cooldowns,
            matchmaker,
            sessions,
            tasks,
            reports,
            maintenance: None,
        };
        dispatcher.schedule_maintenance();

        if dispatcher.config.search.warm_on_start {
            dispatcher.sessions.warm_all();
        }

        info!(
            "Dispatcher ready: group size {}, countdown {}s, {} zones",
            dispatcher.config.required_size,
            dispatcher.config.countdown_secs,
            dispatcher.host.catalog.all_zone_keys().len()
        );
        Ok(dispatcher)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn cooldowns(&self) -> &CooldownGate {
        &self.cooldowns
    }

    /// Queue a participant for a world, forming a group if enough are waiting
    pub fn join(&mut self, participant: ParticipantId, world: Option<&str>) -> Result<JoinOutcome, JoinError> {
        if self.sessions.in_session(participant) {
            return Err(JoinError::InSession);
        }
        if self.queue.is_queued(participant) {
            return Err(JoinError::AlreadyQueued);
        }

        let world = world
            .map(str::to_string)
            .or_else(|| self.config.default_world.clone())
            .ok_or(JoinError::NoWorld)?;
        let zone = self
            .host
            .catalog
            .zone_for(&world)
            .ok_or_else(|| JoinError::UnknownWorld(world.clone()))?;
        if let Some(permission) = &zone.permission {
            if !self.host.presence.has_permission(participant, permission) {
                return Err(JoinError::NoPermission(permission.clone()));
            }
        }

        let now = Instant::now();
        let remaining = [CooldownKind::Join, CooldownKind::PostDispatch]
            .into_iter()
            .filter_map(|kind| self.cooldowns.remaining_at(participant, kind, Some(&world), now))
            .max();
        if let Some(remaining) = remaining {
            return Err(JoinError::OnCooldown { remaining });
        }

        if !self.queue.enqueue(participant, &world) {
            return Err(JoinError::AlreadyQueued);
        }
        self.cooldowns
            .record_action(participant, CooldownKind::Join, Some(&world));

        let size = self.queue.size_of(&world);
        info!(participant = %participant, world = %world, "joined queue ({} waiting)", size);
        self.host.notifier.send_message(
            participant,
            "queue.joined",
            &[
                ("world", zone.name().to_string()),
                ("size", size.to_string()),
                ("required", self.config.required_size.to_string()),
            ],
        );

        if let Some(session) = self.form_group(&world) {
            // The session may already be finished when there is no countdown
            if self.sessions.lookup(session).is_some_and(|s| s.contains(participant)) {
                return Ok(JoinOutcome::Matched { session });
            }
        }

        let position = self.queue.position_of(participant).unwrap_or(size);
        Ok(JoinOutcome::Queued { world, position })
    }

    pub fn leave(&mut self, participant: ParticipantId) -> Result<(), LeaveError> {
        let Some(world) = self.queue.world_of(participant).map(str::to_string) else {
            return Err(LeaveError::NotQueued);
        };
        if let Some(remaining) =
            self.cooldowns
                .remaining_at(participant, CooldownKind::Leave, Some(&world), Instant::now())
        {
            return Err(LeaveError::OnCooldown { remaining });
        }

        self.queue.dequeue(participant);
        self.cooldowns
            .record_action(participant, CooldownKind::Leave, Some(&world));

        info!(participant = %participant, world = %world, "left queue");
        self.host.notifier.send_message(
            participant,
            "queue.left",
            &[("world", self.host.catalog.display_name(&world))],
        );
        Ok(())
    }

    /// Participant asked to leave their teleport session
    pub fn cancel(&mut self, participant: ParticipantId) -> Result<(), CancelError> {
        if !self.sessions.cancel_participant(participant, CancelReason::Command) {
            return Err(CancelError::NotInSession);
        }
        Ok(())
    }

    /// Apply a new configuration. Live sessions are cancelled, searches
    /// aborted and the location cache emptied before the catalog reloads.
    pub fn admin_reload(&mut self, config: DispatchConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let cancelled = self.sessions.cancel_all(CancelReason::Reloaded);
        self.host.catalog.reload();

        self.cooldowns.set_config(config.cooldowns.clone());
        self.cooldowns.set_bypass(bypass_for(&self.host, &config));
        self.sessions.reconfigure(config.clone());
        self.config = config;
        self.schedule_maintenance();
        self.sessions.warm_all();

        info!(
            "Configuration reloaded, {} sessions cancelled, {} zones",
            cancelled,
            self.host.catalog.all_zone_keys().len()
        );
        Ok(())
    }

    /// Empty one world's queue, or every queue. Returns how many were removed.
    pub fn admin_clear(&mut self, world: Option<&str>) -> usize {
        let removed = self.queue.clear(world);
        for participant in &removed {
            self.host.notifier.send_message(*participant, "queue.cleared", &[]);
        }
        info!("Cleared {} queued participants", removed.len());
        removed.len()
    }

    /// Apply a host listener event
    pub fn on_event(&mut self, event: HostEvent) {
        let participant = event.participant();
        match event {
            HostEvent::Moved { from, to, .. } => {
                if self.config.cancel_on_move && !from.same_block(&to) {
                    self.cancel_waiting(participant, CancelReason::Moved);
                }
            }
            HostEvent::Damaged { .. } => {
                if self.config.cancel_on_damage {
                    self.cancel_waiting(participant, CancelReason::Damaged);
                }
            }
            HostEvent::Chatted { .. } => {
                if self.config.cancel_on_chat {
                    self.cancel_waiting(participant, CancelReason::Chatted);
                }
            }
            HostEvent::Disconnected { .. } => self.depart(participant, CancelReason::Disconnected),
            HostEvent::Kicked { .. } => self.depart(participant, CancelReason::Kicked),
        }
    }

    /// Apply fired timers and background search reports. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;

        let tasks: Vec<Task> = self.tasks.try_iter().collect();
        for task in tasks {
            self.run_task(task);
            handled += 1;
        }

        let reports: Vec<BatchReport> = self.reports.try_iter().collect();
        for report in reports {
            let mut ctx = DispatchCtx {
                queue: &mut self.queue,
                cooldowns: &mut self.cooldowns,
            };
            self.sessions.on_search_report(report, &mut ctx);
            handled += 1;
        }

        handled
    }

    pub fn status(&self, participant: ParticipantId) -> ParticipantStatus {
        if let Some(session) = self.sessions.session_of(participant) {
            return ParticipantStatus::InSession {
                session: session.id,
                state: session.state(),
            };
        }
        match (self.queue.world_of(participant), self.queue.position_of(participant)) {
            (Some(world), Some(position)) => ParticipantStatus::Queued {
                world: world.to_string(),
                position,
            },
            _ => ParticipantStatus::Idle,
        }
    }

    pub fn queue_sizes(&self) -> HashMap<WorldKey, usize> {
        self.queue.all_sizes()
    }

    /// Live or recently finished session
    pub fn session(&self, id: SessionId) -> Option<&TeleportSession> {
        self.sessions.lookup(id)
    }

    /// Cancel every live session and stop all timers. Returns the number cancelled.
    pub fn shutdown(&mut self) -> usize {
        let cancelled = self.sessions.cancel_all(CancelReason::Shutdown);
        if let Some(handle) = self.maintenance.take() {
            self.host.scheduler.cancel(handle);
        }
        self.sessions.stop_searches();
        info!("Dispatcher stopped, {} sessions cancelled", cancelled);
        cancelled
    }

    fn run_task(&mut self, task: Task) {
        let mut ctx = DispatchCtx {
            queue: &mut self.queue,
            cooldowns: &mut self.cooldowns,
        };
        match task {
            Task::CountdownTick(id) => self.sessions.on_countdown_tick(id, &mut ctx),
            Task::SearchStep(world) => self.sessions.on_search_step(&world, &mut ctx),
            Task::Maintenance => self.maintain(),
        }
    }

    /// Offline sweep, cooldown expiry, then retry group formation
    fn maintain(&mut self) {
        let presence = self.host.presence.clone();
        let offline = self.queue.remove_offline(|p| presence.is_online(p));
        let expired = self.cooldowns.sweep(Instant::now());
        if offline > 0 || expired > 0 {
            debug!(offline, expired, "maintenance sweep");
        }

        let mut worlds: Vec<WorldKey> = self.queue.all_sizes().into_keys().collect();
        worlds.sort();
        for world in worlds {
            while self.form_group(&world).is_some() {}
        }
    }

    fn form_group(&mut self, world: &str) -> Option<SessionId> {
        let group = self
            .matchmaker
            .try_form_group(&mut self.queue, world, self.config.required_size)?;
        let mut ctx = DispatchCtx {
            queue: &mut self.queue,
            cooldowns: &mut self.cooldowns,
        };
        Some(self.sessions.create(world, group, &mut ctx))
    }

    /// Cancellation triggers only apply before relocation starts
    fn cancel_waiting(&mut self, participant: ParticipantId, reason: CancelReason) {
        let waiting = self.sessions.session_of(participant).is_some_and(|s| {
            matches!(s.state(), SessionState::Countdown | SessionState::Locating)
        });
        if waiting {
            self.sessions.cancel_participant(participant, reason);
        }
    }

    fn depart(&mut self, participant: ParticipantId, reason: CancelReason) {
        if self.queue.dequeue(participant) {
            debug!(participant = %participant, "removed from queue: {}", reason);
        }
        self.sessions.cancel_participant(participant, reason);
        self.cooldowns.clear(participant);
    }

    fn schedule_maintenance(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            self.host.scheduler.cancel(handle);
        }
        let interval = Duration::from_secs(self.config.maintenance_secs);
        self.maintenance = Some(
            self.host
                .scheduler
                .run_repeating(interval, interval, Task::Maintenance),
        );
    }
}

fn bypass_for(host: &Host, config: &DispatchConfig) -> BypassPredicate {
    let presence = host.presence.clone();
    let permission = config.cooldowns.bypass_permission.clone();
    Arc::new(move |participant| presence.has_permission(participant, &permission))
}
