//! Tick-driven scheduler
//!
//! Timers are counted in host ticks. The primary loop calls
//! [`TickScheduler::tick`] once per tick; due tasks are sent over a channel
//! that the dispatcher drains on the same context, so timer callbacks never
//! run concurrently with queue or session mutation.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::host::{Scheduler, Task, TaskHandle};

/// Where `run_async` jobs execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncMode {
    /// Rayon global thread pool
    Pool,
    /// Immediately on the calling thread (deterministic tests)
    Inline,
}

#[derive(Debug)]
struct Entry {
    due: u64,
    interval: Option<u64>,
    task: Task,
}

#[derive(Debug, Default)]
struct SchedulerState {
    now: u64,
    next_handle: TaskHandle,
    entries: HashMap<TaskHandle, Entry>,
}

pub struct TickScheduler {
    tick: Duration,
    mode: AsyncMode,
    state: Mutex<SchedulerState>,
    fired: Sender<Task>,
}

impl TickScheduler {
    /// Create a scheduler and the receiver its fired tasks arrive on
    pub fn new(tick: Duration, mode: AsyncMode) -> (Self, Receiver<Task>) {
        let (fired, rx) = unbounded();
        let scheduler = Self {
            tick: if tick.is_zero() { Duration::from_millis(50) } else { tick },
            mode,
            state: Mutex::new(SchedulerState {
                next_handle: 1,
                ..Default::default()
            }),
            fired,
        };
        (scheduler, rx)
    }

    /// Convert a duration to whole ticks, rounding up
    pub fn ticks_for(&self, duration: Duration) -> u64 {
        let tick = self.tick.as_nanos();
        duration.as_nanos().div_ceil(tick) as u64
    }

    pub fn tick_length(&self) -> Duration {
        self.tick
    }

    pub fn current_tick(&self) -> u64 {
        self.state.lock().now
    }

    pub fn pending(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Advance one tick and send every due task. Returns the number fired.
    pub fn tick(&self) -> usize {
        let mut state = self.state.lock();
        state.now += 1;
        let now = state.now;

        let mut due: Vec<(u64, TaskHandle)> = state
            .entries
            .iter()
            .filter(|(_, e)| e.due <= now)
            .map(|(h, e)| (e.due, *h))
            .collect();
        due.sort_unstable();

        for (_, handle) in &due {
            let reschedule = match state.entries.get_mut(handle) {
                Some(entry) => {
                    // The receiver lives as long as the dispatcher
                    let _ = self.fired.send(entry.task.clone());
                    match entry.interval {
                        Some(interval) => {
                            entry.due = now + interval;
                            true
                        }
                        None => false,
                    }
                }
                None => continue,
            };
            if !reschedule {
                state.entries.remove(handle);
            }
        }

        due.len()
    }

    /// Run as many ticks as cover `duration`
    pub fn advance(&self, duration: Duration) -> usize {
        (0..self.ticks_for(duration)).map(|_| self.tick()).sum()
    }

    fn insert(&self, delay: Duration, interval: Option<Duration>, task: Task) -> TaskHandle {
        let delay_ticks = self.ticks_for(delay);
        let interval_ticks = interval.map(|i| self.ticks_for(i).max(1));

        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        let due = state.now + delay_ticks;
        state.entries.insert(
            handle,
            Entry {
                due,
                interval: interval_ticks,
                task,
            },
        );
        handle
    }
}

impl Scheduler for TickScheduler {
    fn run_once(&self, delay: Duration, task: Task) -> TaskHandle {
        self.insert(delay, None, task)
    }

    fn run_repeating(&self, delay: Duration, interval: Duration, task: Task) -> TaskHandle {
        self.insert(delay, Some(interval), task)
    }

    fn cancel(&self, handle: TaskHandle) {
        if let Some(entry) = self.state.lock().entries.remove(&handle) {
            debug!("Cancelled scheduled task {:?}", entry.task);
        }
    }

    fn run_async(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        match self.mode {
            AsyncMode::Pool => rayon::spawn(job),
            AsyncMode::Inline => job(),
        }
    }
}
