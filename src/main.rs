use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rtp_queue::driver;
use rtp_queue::host::memory::{FlatWorld, MemoryHost, RegionClaims};
use rtp_queue::host::{Block, ClaimChecker, ClaimCheckers, HostEvent, WorldZone};
use rtp_queue::scheduler::{AsyncMode, TickScheduler};
use rtp_queue::util::{Bounds, Location};
use rtp_queue::{DispatchConfig, Dispatcher, ParticipantStatus};

/// Simulated players in the demo world
const DEMO_PLAYERS: usize = 6;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("RTP Queue v{}", env!("CARGO_PKG_VERSION"));

    let config = DispatchConfig::load_or_default();
    info!(
        "Configuration loaded: group size {}, countdown {}s, tick {}ms",
        config.required_size, config.countdown_secs, config.tick_millis
    );

    let host = Arc::new(MemoryHost::new());
    host.add_world("world", FlatWorld::new(64, Block::Solid("grass_block".into())));
    host.add_world("world_nether", FlatWorld::new(31, Block::Solid("netherrack".into())));

    match std::env::var("RTPQ_ZONES") {
        Ok(path) => {
            let count = host.load_zones_file(&path)?;
            info!("Loaded {} zones from {}", count, path);
        }
        Err(_) => {
            let mut overworld =
                WorldZone::new("world", Bounds::new(-1000, 1000, -1000, 1000, 0, 255), 50)
                    .with_unsafe_surfaces(["magma_block", "cactus", "campfire"]);
            overworld.display_name = Some("Overworld".into());
            host.add_zone(overworld);
            host.add_zone(
                WorldZone::new("world_nether", Bounds::new(-500, 500, -500, 500, 0, 120), 80)
                    .with_permission("rtpqueue.world.nether"),
            );
        }
    }

    // Spawn protection
    let claims = Arc::new(RegionClaims::new());
    claims.claim("world", Bounds::new(-32, 32, -32, 32, 0, 255));
    let checker: Arc<dyn ClaimChecker> = claims;

    let (scheduler, tasks) = TickScheduler::new(config.tick(), AsyncMode::Pool);
    let scheduler = Arc::new(scheduler);
    let bundle = host.bundle(scheduler.clone(), ClaimCheckers::new(vec![checker]));
    let mut dispatcher = Dispatcher::new(bundle, config, tasks)?;

    let players: Vec<_> = (1..=DEMO_PLAYERS)
        .map(|i| host.spawn_participant(&format!("Player{}", i), "world"))
        .collect();
    let join_every = scheduler.ticks_for(Duration::from_secs(2)).max(1);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    driver::run(&mut dispatcher, &scheduler, shutdown, |d, tick| {
        if tick % join_every != 0 {
            return;
        }
        let round = (tick / join_every) as usize;

        // Every fifth round someone fidgets during their countdown
        if round % 5 == 0 {
            let fidgeting = players.iter().copied().find(|p| {
                matches!(d.status(*p), ParticipantStatus::InSession { .. })
            });
            if let Some(participant) = fidgeting {
                if let Some(from) = host.location_of_participant(participant) {
                    let to = Location::new(from.world.clone(), from.x + 2.0, from.y, from.z);
                    host.move_participant(participant, to.clone());
                    d.on_event(HostEvent::Moved {
                        participant,
                        from,
                        to,
                    });
                }
            }
            return;
        }

        let participant = players[round % players.len()];
        match d.join(participant, Some("world")) {
            Ok(outcome) => info!(participant = %participant, "join: {:?}", outcome),
            Err(e) => debug!(participant = %participant, "join refused: {}", e),
        }
    })
    .await;

    let cancelled = dispatcher.shutdown();
    info!("Server stopped ({} sessions cancelled)", cancelled);

    Ok(())
}
