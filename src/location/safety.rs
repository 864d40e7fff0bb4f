//! Destination safety predicate and candidate sampling

use rand::Rng;
use std::sync::Arc;
use std::time::Instant;

use crate::host::{Block, ClaimCheckers, Terrain, WorldZone};
use crate::util::{BlockPos, Location};

/// Safety rules for destinations. Cheap to clone into background jobs.
#[derive(Clone)]
pub struct SafetyRules {
    terrain: Arc<dyn Terrain>,
    claims: ClaimCheckers,
    claim_check: bool,
}

impl SafetyRules {
    pub fn new(terrain: Arc<dyn Terrain>, claims: ClaimCheckers, claim_check: bool) -> Self {
        Self {
            terrain,
            claims,
            claim_check,
        }
    }

    pub fn terrain(&self) -> &Arc<dyn Terrain> {
        &self.terrain
    }

    /// Ordered checks, first failure wins:
    /// region loaded, solid allowed surface, free feet and head, no claim.
    pub fn is_safe(&self, zone: &WorldZone, location: &Location, skip_claim_check: bool) -> bool {
        let feet = location.block();
        let world = location.world.as_str();

        if !self.terrain.is_region_loaded(world, feet.x, feet.z) {
            return false;
        }

        match self.terrain.block_at(world, feet.below()) {
            Block::Solid(material) if !zone.unsafe_surfaces.contains(&material) => {}
            _ => return false,
        }

        if !self.terrain.block_at(world, feet).is_passable()
            || !self.terrain.block_at(world, feet.above(1)).is_passable()
        {
            return false;
        }

        if self.claim_check && !skip_claim_check && self.claims.is_claimed(location) {
            return false;
        }

        true
    }

    /// Random column inside the zone, standing on its highest solid block.
    /// `None` when the column has no solid block at all.
    pub fn sample<R: Rng + ?Sized>(&self, zone: &WorldZone, rng: &mut R) -> Option<Location> {
        let bounds = &zone.bounds;
        let x = rng.gen_range(bounds.min_x..=bounds.max_x);
        let z = rng.gen_range(bounds.min_z..=bounds.max_z);

        let y = self.terrain.highest_solid_y(&zone.world, x, z)?;
        let y = bounds.clamp_y(y);

        Some(Location::standing_on(zone.world.clone(), BlockPos::new(x, y, z)))
    }

    /// Sample up to `attempts` candidates (or until `deadline`), returning the first safe one
    pub fn search(
        &self,
        zone: &WorldZone,
        attempts: u32,
        deadline: Option<Instant>,
        skip_claim_check: bool,
    ) -> Option<Location> {
        let mut rng = rand::thread_rng();

        for _ in 0..attempts {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            if let Some(candidate) = self.sample(zone, &mut rng) {
                if self.is_safe(zone, &candidate, skip_claim_check) {
                    return Some(candidate);
                }
            }
        }

        None
    }
}
