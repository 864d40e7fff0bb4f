//! Dispatch core benchmarks
//!
//! Run with: cargo bench --bench dispatch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use rtp_queue::host::memory::{FlatWorld, MemoryHost, RegionClaims};
use rtp_queue::host::{Block, ClaimChecker, ClaimCheckers, WorldZone};
use rtp_queue::location::{LocationCache, SafetyRules};
use rtp_queue::queue::{Matchmaker, QueueStore};
use rtp_queue::util::{Bounds, Location};

fn host_with_players(count: usize) -> (Arc<MemoryHost>, Vec<uuid::Uuid>) {
    let host = Arc::new(MemoryHost::new());
    let players = (0..count)
        .map(|i| host.spawn_participant(&format!("Player{}", i), "world"))
        .collect();
    (host, players)
}

/// Queue everyone, then drain the queue into groups of four
fn bench_matchmaking(c: &mut Criterion) {
    let mut group = c.benchmark_group("matchmaking");
    group.sample_size(50);

    for count in [100, 500, 1000] {
        let (host, players) = host_with_players(count);
        let matchmaker = Matchmaker::new(host.clone());

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("fifo_groups", count), &count, |b, _| {
            b.iter(|| {
                let mut queue = QueueStore::new();
                for p in &players {
                    queue.enqueue(*p, "world");
                }
                let mut formed = 0;
                while let Some(g) = matchmaker.try_form_group(&mut queue, "world", 4) {
                    formed += g.len();
                }
                black_box(formed)
            })
        });
    }
    group.finish();
}

/// Candidate sampling and the full safety predicate, with and without claims
fn bench_safety(c: &mut Criterion) {
    let host = Arc::new(MemoryHost::new());
    host.add_world("world", FlatWorld::new(64, Block::Solid("grass_block".into())));
    let zone = WorldZone::new("world", Bounds::new(-5000, 5000, -5000, 5000, 0, 255), 50)
        .with_unsafe_surfaces(["magma_block", "cactus"]);

    let claims = Arc::new(RegionClaims::new());
    for i in 0..64 {
        let x = i * 150 - 4800;
        claims.claim("world", Bounds::new(x, x + 100, -4800, 4800, 0, 255));
    }
    let checker: Arc<dyn ClaimChecker> = claims;

    let plain = SafetyRules::new(host.clone(), ClaimCheckers::none(), true);
    let claimed = SafetyRules::new(host.clone(), ClaimCheckers::new(vec![checker]), true);

    let mut group = c.benchmark_group("safety");
    for (name, rules) in [("no_claims", &plain), ("64_claims", &claimed)] {
        let mut rng = StdRng::seed_from_u64(42);
        group.bench_function(BenchmarkId::new("sample_and_check", name), |b| {
            b.iter(|| {
                let safe = rules
                    .sample(&zone, &mut rng)
                    .is_some_and(|loc| rules.is_safe(&zone, &loc, false));
                black_box(safe)
            })
        });
    }
    group.bench_function("sync_search_3", |b| {
        b.iter(|| black_box(plain.search(&zone, 3, None, false)))
    });
    group.finish();
}

/// Concurrent top-up and consumption of one world's cache
fn bench_cache(c: &mut Criterion) {
    let cache = LocationCache::new(5);
    let location = Location::new("world", 10.5, 65.0, 10.5);

    c.bench_function("cache_offer_take", |b| {
        b.iter(|| {
            cache.offer("world", location.clone());
            black_box(cache.take("world"))
        })
    });
}

criterion_group!(benches, bench_matchmaking, bench_safety, bench_cache);

criterion_main!(benches);
