//! Primary tick loop
//!
//! Advances the scheduler once per tick and pumps the dispatcher on the same
//! task, so everything the dispatcher owns is only ever touched from here.

use std::future::Future;
use std::time::Instant;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::Dispatcher;
use crate::scheduler::TickScheduler;

/// Drive the dispatcher until `shutdown` resolves. `on_tick` runs after each
/// pump and receives the tick number. Returns the number of ticks run.
pub async fn run<S, F>(
    dispatcher: &mut Dispatcher,
    scheduler: &TickScheduler,
    shutdown: S,
    mut on_tick: F,
) -> u64
where
    S: Future<Output = ()>,
    F: FnMut(&mut Dispatcher, u64),
{
    let mut ticker = interval(scheduler.tick_length());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!(
        "Tick loop started at {} ms per tick",
        scheduler.tick_length().as_millis()
    );
    let start = Instant::now();
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }

        ticks += 1;
        scheduler.tick();
        let handled = dispatcher.pump();
        if handled > 0 {
            debug!(tick = ticks, handled, "pumped");
        }
        on_tick(&mut *dispatcher, ticks);
    }

    info!("Tick loop stopped after {} ticks in {:?}", ticks, start.elapsed());
    ticks
}
