use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::host::ParticipantId;
use crate::util::WorldKey;

/// A participant waiting for a group
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub participant: ParticipantId,
    pub world: WorldKey,
    pub joined_at: Instant,
}

/// Per-world waiting lists, kept in join order
#[derive(Debug, Default)]
pub struct QueueStore {
    queues: HashMap<WorldKey, VecDeque<QueueEntry>>,
    /// Which world each queued participant waits for
    membership: HashMap<ParticipantId, WorldKey>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant to a world's queue.
    /// Fails without side effects if the participant already waits anywhere.
    pub fn enqueue(&mut self, participant: ParticipantId, world: &str) -> bool {
        if self.membership.contains_key(&participant) {
            return false;
        }

        self.membership.insert(participant, world.to_string());
        self.queues
            .entry(world.to_string())
            .or_default()
            .push_back(QueueEntry {
                participant,
                world: world.to_string(),
                joined_at: Instant::now(),
            });
        true
    }

    /// Remove a participant from whichever queue holds it. Idempotent.
    pub fn dequeue(&mut self, participant: ParticipantId) -> bool {
        let Some(world) = self.membership.remove(&participant) else {
            return false;
        };

        if let Some(queue) = self.queues.get_mut(&world) {
            queue.retain(|e| e.participant != participant);
            if queue.is_empty() {
                self.queues.remove(&world);
            }
        }
        true
    }

    pub fn is_queued(&self, participant: ParticipantId) -> bool {
        self.membership.contains_key(&participant)
    }

    /// World the participant is waiting for
    pub fn world_of(&self, participant: ParticipantId) -> Option<&str> {
        self.membership.get(&participant).map(String::as_str)
    }

    /// 1-based position in its world's queue
    pub fn position_of(&self, participant: ParticipantId) -> Option<usize> {
        let world = self.membership.get(&participant)?;
        self.queues
            .get(world)?
            .iter()
            .position(|e| e.participant == participant)
            .map(|i| i + 1)
    }

    pub fn size_of(&self, world: &str) -> usize {
        self.queues.get(world).map_or(0, VecDeque::len)
    }

    pub fn all_sizes(&self) -> HashMap<WorldKey, usize> {
        self.queues
            .iter()
            .map(|(world, queue)| (world.clone(), queue.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.membership.len()
    }

    /// Entries for a world in join order
    pub fn entries(&self, world: &str) -> impl Iterator<Item = &QueueEntry> {
        self.queues.get(world).into_iter().flatten()
    }

    /// Drop every participant the predicate reports offline. Returns the count removed.
    pub fn remove_offline(&mut self, is_online: impl Fn(ParticipantId) -> bool) -> usize {
        let offline: Vec<ParticipantId> = self
            .membership
            .keys()
            .filter(|p| !is_online(**p))
            .copied()
            .collect();

        for participant in &offline {
            self.dequeue(*participant);
        }
        offline.len()
    }

    /// Empty one world's queue, or every queue. Returns the removed participants.
    pub fn clear(&mut self, world: Option<&str>) -> Vec<ParticipantId> {
        let removed: Vec<ParticipantId> = match world {
            Some(world) => self.entries(world).map(|e| e.participant).collect(),
            None => self.membership.keys().copied().collect(),
        };

        for participant in &removed {
            self.dequeue(*participant);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_enqueue_and_size() {
        let mut store = QueueStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(store.enqueue(a, "arena"));
        assert!(store.enqueue(b, "arena"));

        assert_eq!(store.size_of("arena"), 2);
        assert_eq!(store.size_of("nether"), 0);
        assert!(store.is_queued(a));
    }

    #[test]
    fn test_enqueue_twice_is_noop() {
        let mut store = QueueStore::new();
        let a = Uuid::new_v4();

        assert!(store.enqueue(a, "arena"));
        assert!(!store.enqueue(a, "arena"));

        assert_eq!(store.size_of("arena"), 1);
    }

    #[test]
    fn test_cannot_wait_in_two_worlds() {
        let mut store = QueueStore::new();
        let a = Uuid::new_v4();

        store.enqueue(a, "arena");
        assert!(!store.enqueue(a, "nether"));

        assert_eq!(store.size_of("nether"), 0);
        assert_eq!(store.world_of(a), Some("arena"));
    }

    #[test]
    fn test_dequeue_idempotent() {
        let mut store = QueueStore::new();
        let a = Uuid::new_v4();

        store.enqueue(a, "arena");
        assert!(store.dequeue(a));
        assert!(!store.dequeue(a));

        assert!(!store.is_queued(a));
        assert!(store.all_sizes().is_empty());
    }

    #[test]
    fn test_positions_follow_join_order() {
        let mut store = QueueStore::new();
        let ids: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.enqueue(*id, "arena");
        }

        assert_eq!(store.position_of(ids[0]), Some(1));
        assert_eq!(store.position_of(ids[2]), Some(3));

        store.dequeue(ids[0]);
        assert_eq!(store.position_of(ids[2]), Some(2));
    }

    #[test]
    fn test_all_sizes() {
        let mut store = QueueStore::new();
        store.enqueue(Uuid::new_v4(), "arena");
        store.enqueue(Uuid::new_v4(), "arena");
        store.enqueue(Uuid::new_v4(), "nether");

        let sizes = store.all_sizes();
        assert_eq!(sizes.get("arena"), Some(&2));
        assert_eq!(sizes.get("nether"), Some(&1));
    }

    #[test]
    fn test_remove_offline() {
        let mut store = QueueStore::new();
        let online = Uuid::new_v4();
        let offline1 = Uuid::new_v4();
        let offline2 = Uuid::new_v4();

        store.enqueue(online, "arena");
        store.enqueue(offline1, "arena");
        store.enqueue(offline2, "nether");

        let removed = store.remove_offline(|p| p == online);

        assert_eq!(removed, 2);
        assert!(store.is_queued(online));
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn test_clear_world() {
        let mut store = QueueStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.enqueue(a, "arena");
        store.enqueue(b, "nether");

        let removed = store.clear(Some("arena"));

        assert_eq!(removed, vec![a]);
        assert!(store.is_queued(b));
        assert_eq!(store.clear(None), vec![b]);
        assert_eq!(store.total(), 0);
    }
}
