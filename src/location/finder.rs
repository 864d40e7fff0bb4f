//! Safe-location finder
//!
//! A session needing a destination first tries the cache, then a short
//! synchronous search. On a miss it parks on the background search for its
//! world. Background searches are paced by a repeating scheduler task: each
//! step samples a small batch on a worker, which appends safe candidates to
//! the cache and reports back over a channel. Candidates the cache has no room
//! for travel in the report. At most one search runs per world; later
//! requesters wait on it instead of starting another.

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::host::{Scheduler, Task, TaskHandle, WorldZone};
use crate::location::cache::LocationCache;
use crate::location::safety::SafetyRules;
use crate::session::SessionId;
use crate::util::{Location, WorldKey};

pub type SearchId = u64;

/// Why a search gave up on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFailure {
    Timeout,
    NoSafeLocations,
}

/// Immediate answer to a destination request
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ready(Location),
    /// Parked on the world's background search
    Pending,
}

/// Outcome for a parked session
#[derive(Debug, Clone, PartialEq)]
pub enum FinderEvent {
    Resolved { session: SessionId, location: Location },
    Failed { session: SessionId, failure: SearchFailure },
}

/// Sent by a worker when a batch finishes
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub world: WorldKey,
    pub search: SearchId,
    pub attempts: u32,
    pub cached: u32,
    /// Safe candidates the cache refused, claims not yet checked
    pub overflow: Vec<Location>,
}

#[derive(Debug)]
struct Waiter {
    session: SessionId,
    deadline: Instant,
}

#[derive(Debug)]
struct ActiveSearch {
    id: SearchId,
    zone: WorldZone,
    attempts: u32,
    deadline: Instant,
    in_flight: bool,
    handle: TaskHandle,
    waiters: Vec<Waiter>,
    /// Keep running without waiters until the cache is full
    top_up: bool,
}

impl ActiveSearch {
    fn exhausted(&self, now: Instant) -> Option<SearchFailure> {
        if self.attempts >= self.zone.max_attempts {
            Some(SearchFailure::NoSafeLocations)
        } else if now >= self.deadline {
            Some(SearchFailure::Timeout)
        } else {
            None
        }
    }
}

/// One batch of background sampling
struct BatchJob {
    rules: SafetyRules,
    zone: WorldZone,
    search: SearchId,
    count: u32,
    cache: Arc<LocationCache>,
    active: Arc<DashMap<WorldKey, SearchId>>,
    reports: Sender<BatchReport>,
}

impl BatchJob {
    fn still_active(&self) -> bool {
        self.active
            .get(&self.zone.world)
            .is_some_and(|id| *id == self.search)
    }

    fn run(self) {
        let mut rng = rand::thread_rng();
        let mut attempts = 0;
        let mut cached = 0;
        let mut overflow = Vec::new();

        for _ in 0..self.count {
            if !self.still_active() {
                break;
            }
            attempts += 1;

            let Some(candidate) = self.rules.sample(&self.zone, &mut rng) else {
                continue;
            };
            // Claims are checked on the primary context right before use
            if !self.rules.is_safe(&self.zone, &candidate, true) {
                continue;
            }
            if self.cache.offer(&self.zone.world, candidate.clone()) {
                cached += 1;
            } else {
                overflow.push(candidate);
            }
        }

        let _ = self.reports.send(BatchReport {
            world: self.zone.world.clone(),
            search: self.search,
            attempts,
            cached,
            overflow,
        });
    }
}

pub struct LocationFinder {
    rules: SafetyRules,
    config: SearchConfig,
    cache: Arc<LocationCache>,
    /// Active search id per world, read by workers to abort early
    active: Arc<DashMap<WorldKey, SearchId>>,
    searches: HashMap<WorldKey, ActiveSearch>,
    scheduler: Arc<dyn Scheduler>,
    /// Interval between background batches
    pace: Duration,
    reports: Sender<BatchReport>,
    next_id: SearchId,
}

impl LocationFinder {
    /// Create a finder and the receiver its batch reports arrive on
    pub fn new(
        rules: SafetyRules,
        config: SearchConfig,
        scheduler: Arc<dyn Scheduler>,
        pace: Duration,
    ) -> (Self, Receiver<BatchReport>) {
        let (reports, rx) = unbounded();
        let finder = Self {
            rules,
            cache: Arc::new(LocationCache::new(config.cache_cap)),
            config,
            active: Arc::new(DashMap::new()),
            searches: HashMap::new(),
            scheduler,
            pace,
            reports,
            next_id: 1,
        };
        (finder, rx)
    }

    pub fn cache(&self) -> &Arc<LocationCache> {
        &self.cache
    }

    pub fn is_searching(&self, world: &str) -> bool {
        self.searches.contains_key(world)
    }

    pub fn active_searches(&self) -> usize {
        self.searches.len()
    }

    pub fn waiting_sessions(&self, world: &str) -> usize {
        self.searches.get(world).map_or(0, |s| s.waiters.len())
    }

    pub fn is_safe(&self, zone: &WorldZone, location: &Location, skip_claim_check: bool) -> bool {
        self.rules.is_safe(zone, location, skip_claim_check)
    }

    /// Known-safe point used when searching fails
    pub fn fallback(&self, world: &str) -> Option<Location> {
        self.rules.terrain().spawn_location(world)
    }

    /// Cached location, else a short inline search, else park the session
    pub fn get_or_search(&mut self, zone: &WorldZone, session: SessionId, now: Instant) -> Resolution {
        if let Some(location) = self.take_cached(zone) {
            debug!(world = %zone.world, "cache hit");
            return Resolution::Ready(location);
        }

        let attempts = self.config.sync_attempts.min(zone.max_attempts);
        if let Some(location) =
            self.rules
                .search(zone, attempts, Some(now + self.config.timeout()), false)
        {
            debug!(world = %zone.world, "found location inline");
            return Resolution::Ready(location);
        }

        self.attach(zone, session, now);
        Resolution::Pending
    }

    /// Start filling the cache for a zone in the background
    pub fn warm_cache(&mut self, zone: &WorldZone, now: Instant) {
        if self.cache.cap() == 0 || self.cache.is_full(&zone.world) {
            return;
        }

        match self.searches.get_mut(&zone.world) {
            Some(search) => search.top_up = true,
            None => self.start(zone.clone(), true, now),
        }
    }

    /// A parked session no longer needs a destination
    pub fn detach(&mut self, world: &str, session: SessionId) {
        let Some(search) = self.searches.get_mut(world) else {
            return;
        };

        search.waiters.retain(|w| w.session != session);
        if search.waiters.is_empty() && !search.top_up {
            self.stop(world);
        }
    }

    /// Pace tick for a world's search
    pub fn step(&mut self, world: &str, now: Instant) -> Vec<FinderEvent> {
        let mut events = Vec::new();
        let Some(search) = self.searches.get_mut(world) else {
            return events;
        };

        search.waiters.retain(|w| {
            if now >= w.deadline {
                events.push(FinderEvent::Failed {
                    session: w.session,
                    failure: SearchFailure::Timeout,
                });
                false
            } else {
                true
            }
        });

        if let Some(failure) = search.exhausted(now) {
            events.extend(self.finish(world, failure));
            return events;
        }

        if search.waiters.is_empty() && (!search.top_up || self.cache.is_full(world)) {
            self.stop(world);
            return events;
        }

        if search.in_flight {
            return events;
        }

        let remaining = search.zone.max_attempts - search.attempts;
        search.in_flight = true;
        let job = BatchJob {
            rules: self.rules.clone(),
            zone: search.zone.clone(),
            search: search.id,
            count: self.config.candidates_per_tick.min(remaining),
            cache: self.cache.clone(),
            active: self.active.clone(),
            reports: self.reports.clone(),
        };
        self.scheduler.run_async(Box::new(move || job.run()));

        events
    }

    /// Apply a worker's batch report on the primary context
    pub fn on_report(&mut self, mut report: BatchReport, now: Instant) -> Vec<FinderEvent> {
        let mut events = Vec::new();
        let (zone, waiters) = match self.searches.get_mut(&report.world) {
            Some(search) if search.id == report.search => {
                search.in_flight = false;
                search.attempts += report.attempts;
                (search.zone.clone(), std::mem::take(&mut search.waiters))
            }
            _ => return events,
        };

        debug!(
            world = %report.world,
            attempts = report.attempts,
            cached = report.cached,
            overflow = report.overflow.len(),
            "search batch finished"
        );

        let mut still_waiting = Vec::new();
        for waiter in waiters {
            let found = self
                .take_found(&zone, &mut report.overflow)
                .or_else(|| self.take_cached(&zone));
            match found {
                Some(location) => events.push(FinderEvent::Resolved {
                    session: waiter.session,
                    location,
                }),
                None => still_waiting.push(waiter),
            }
        }

        let Some(search) = self.searches.get_mut(&report.world) else {
            return events;
        };
        search.waiters = still_waiting;
        for location in report.overflow {
            if !self.cache.offer(&report.world, location) {
                break;
            }
        }

        if let Some(failure) = search.exhausted(now) {
            events.extend(self.finish(&report.world, failure));
        } else if search.waiters.is_empty()
            && (!search.top_up || self.cache.is_full(&report.world))
        {
            self.stop(&report.world);
        }

        events
    }

    /// Stop everything and forget cached locations
    pub fn reset(&mut self, rules: SafetyRules, config: SearchConfig) {
        let worlds: Vec<WorldKey> = self.searches.keys().cloned().collect();
        for world in worlds {
            self.stop(&world);
        }
        self.cache.clear();
        self.cache.set_cap(config.cache_cap);
        self.rules = rules;
        self.config = config;
    }

    /// Pop cached locations until one is still safe, claims included
    fn take_cached(&self, zone: &WorldZone) -> Option<Location> {
        while let Some(location) = self.cache.take(&zone.world) {
            if self.rules.is_safe(zone, &location, false) {
                return Some(location);
            }
            debug!("Discarding stale cached location {}", location);
        }
        None
    }

    /// First fresh candidate from a report that passes the full check
    fn take_found(&self, zone: &WorldZone, found: &mut Vec<Location>) -> Option<Location> {
        while !found.is_empty() {
            let location = found.remove(0);
            if self.rules.is_safe(zone, &location, false) {
                return Some(location);
            }
        }
        None
    }

    fn attach(&mut self, zone: &WorldZone, session: SessionId, now: Instant) {
        let deadline = now + self.config.timeout();

        if !self.searches.contains_key(&zone.world) {
            self.start(zone.clone(), false, now);
        }
        if let Some(search) = self.searches.get_mut(&zone.world) {
            if search.waiters.is_empty() {
                // First waiter gets a full budget even if a top-up used some
                search.attempts = 0;
                search.deadline = deadline;
            }
            search.waiters.push(Waiter { session, deadline });
        }
    }

    fn start(&mut self, zone: WorldZone, top_up: bool, now: Instant) {
        let id = self.next_id;
        self.next_id += 1;

        let world = zone.world.clone();
        self.active.insert(world.clone(), id);
        let handle = self.scheduler.run_repeating(
            Duration::ZERO,
            self.pace,
            Task::SearchStep(world.clone()),
        );

        info!(world = %world, top_up, "starting location search");
        self.searches.insert(
            world,
            ActiveSearch {
                id,
                zone,
                attempts: 0,
                deadline: now + self.config.timeout(),
                in_flight: false,
                handle,
                waiters: Vec::new(),
                top_up,
            },
        );
    }

    fn stop(&mut self, world: &str) -> Option<ActiveSearch> {
        let search = self.searches.remove(world)?;
        self.active.remove(world);
        self.scheduler.cancel(search.handle);
        debug!(world = %world, attempts = search.attempts, "location search stopped");
        Some(search)
    }

    fn finish(&mut self, world: &str, failure: SearchFailure) -> Vec<FinderEvent> {
        let Some(search) = self.stop(world) else {
            return Vec::new();
        };

        if !search.waiters.is_empty() {
            info!(
                world = %world,
                attempts = search.attempts,
                "location search gave up: {:?}",
                failure
            );
        }

        search
            .waiters
            .into_iter()
            .map(|w| FinderEvent::Failed {
                session: w.session,
                failure,
            })
            .collect()
    }
}
