use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::{Location, WorldKey};

/// Precomputed safe locations per world.
///
/// Background workers append, the primary context consumes. The length of
/// every world's queue never exceeds the cap: the check and the push happen
/// under the same shard lock.
#[derive(Debug)]
pub struct LocationCache {
    entries: DashMap<WorldKey, VecDeque<Location>>,
    cap: AtomicUsize,
}

impl LocationCache {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: DashMap::new(),
            cap: AtomicUsize::new(cap),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap.load(Ordering::Acquire)
    }

    /// Change the cap, dropping the newest entries of any world above it
    pub fn set_cap(&self, cap: usize) {
        self.cap.store(cap, Ordering::Release);
        for mut entry in self.entries.iter_mut() {
            entry.value_mut().truncate(cap);
        }
    }

    /// Append a location unless the world is at its cap
    pub fn offer(&self, world: &str, location: Location) -> bool {
        let cap = self.cap();
        let mut queue = self.entries.entry(world.to_string()).or_default();
        if queue.len() >= cap {
            return false;
        }
        queue.push_back(location);
        true
    }

    /// Oldest cached location for a world
    pub fn take(&self, world: &str) -> Option<Location> {
        self.entries.get_mut(world)?.pop_front()
    }

    pub fn len(&self, world: &str) -> usize {
        self.entries.get(world).map_or(0, |q| q.len())
    }

    pub fn is_full(&self, world: &str) -> bool {
        self.len(world) >= self.cap()
    }

    pub fn clear_world(&self, world: &str) {
        self.entries.remove(world);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }
}
