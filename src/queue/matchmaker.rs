use std::sync::Arc;
use tracing::debug;

use crate::host::{ParticipantId, Presence};
use crate::queue::store::QueueStore;

/// Forms groups from a world's queue in join order
pub struct Matchmaker {
    presence: Arc<dyn Presence>,
}

impl Matchmaker {
    pub fn new(presence: Arc<dyn Presence>) -> Self {
        Self { presence }
    }

    /// Select the first `required_size` online participants waiting for `world`.
    ///
    /// On success the selected participants are already removed from the
    /// store. Offline entries are skipped but left in place for the sweep.
    pub fn try_form_group(
        &self,
        queue: &mut QueueStore,
        world: &str,
        required_size: usize,
    ) -> Option<Vec<ParticipantId>> {
        if required_size == 0 || queue.size_of(world) < required_size {
            return None;
        }

        let group: Vec<ParticipantId> = queue
            .entries(world)
            .map(|e| e.participant)
            .filter(|p| self.presence.is_online(*p))
            .take(required_size)
            .collect();

        if group.len() < required_size {
            return None;
        }

        for participant in &group {
            queue.dequeue(*participant);
        }

        debug!(world = %world, size = group.len(), "group formed");
        Some(group)
    }
}
