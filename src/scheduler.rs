//! The hourly update loop.
//!
//! One background thread per running session walks the timeline: each tick
//! maps the current hour, merges frozen overrides, applies the batch to the
//! chain and publishes a [`TickSnapshot`]. Everything the tick touches lives
//! in one [`SharedState`] behind one mutex.
//!
//! Every loop carries the generation it was started with. Stopping bumps the
//! shared generation under the lock, so a loop that is slow to notice the
//! stop signal can no longer write anything.

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, trace, warn};

use crate::chain::{ChainLayout, EffectChainGraph};
use crate::control::ControlSet;
use crate::error::{Error, Result};
use crate::mapping::ParameterMapper;
use crate::overrides::EffectOverrideStore;
use crate::weather::{WeatherSample, WeatherTimeline};

const SCHEDULER_THREAD: &str = "sonification-scheduler";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

/// What display collaborators see after each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickSnapshot {
    /// Loop generation that produced this tick
    pub generation: u64,
    pub hour_index: usize,
    pub sample: WeatherSample,
    /// Chain values after the tick
    pub values: ControlSet,
    /// False when auto-update was off and the previous values were held
    pub applied: bool,
    pub frozen: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick ran; the index moved from `hour` to `next_hour`
    Advanced { hour: usize, next_hour: usize },
    /// The caller's generation is no longer current, or there is no timeline
    Superseded,
}

/// Everything a tick reads or writes, guarded by one lock.
pub struct SharedState {
    pub(crate) timeline: Option<Arc<WeatherTimeline>>,
    pub(crate) hour: usize,
    pub(crate) chain: EffectChainGraph,
    pub(crate) overrides: EffectOverrideStore,
    pub(crate) mapper: ParameterMapper,
    pub(crate) generation: u64,
    pub(crate) state: SchedulerState,
    subscribers: Vec<Producer<TickSnapshot>>,
}

impl SharedState {
    pub fn new(chain: EffectChainGraph, mapper: ParameterMapper) -> Self {
        Self {
            timeline: None,
            hour: 0,
            chain,
            overrides: EffectOverrideStore::new(),
            mapper,
            generation: 0,
            state: SchedulerState::Idle,
            subscribers: Vec::new(),
        }
    }

    pub fn timeline(&self) -> Option<&WeatherTimeline> {
        self.timeline.as_deref()
    }

    pub fn hour(&self) -> usize {
        self.hour
    }

    pub fn chain(&self) -> &EffectChainGraph {
        &self.chain
    }

    pub fn overrides(&self) -> &EffectOverrideStore {
        &self.overrides
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Open a snapshot stream holding at most `capacity` unread ticks
    pub fn subscribe(&mut self, capacity: usize) -> TickReceiver {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        self.subscribers.push(producer);
        TickReceiver { consumer }
    }

    fn publish(&mut self, snapshot: TickSnapshot) {
        self.subscribers.retain(|p| !p.is_abandoned());
        for subscriber in &mut self.subscribers {
            if subscriber.push(snapshot.clone()).is_err() {
                trace!(hour = snapshot.hour_index, "subscriber lagging, snapshot dropped");
            }
        }
    }
}

impl core::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedState")
            .field("hour", &self.hour)
            .field("chain", &self.chain)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Lock the shared state, recovering from a poisoned lock
pub(crate) fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one tick on behalf of loop `generation`.
///
/// Returns [`Error::SourceUnavailable`] without touching the index when no
/// source is attached.
pub fn run_tick(state: &mut SharedState, generation: u64) -> Result<TickOutcome> {
    if state.generation != generation {
        return Ok(TickOutcome::Superseded);
    }
    let Some(timeline) = state.timeline.clone() else {
        return Ok(TickOutcome::Superseded);
    };
    let Some(layout) = state.chain.layout() else {
        return Err(Error::SourceUnavailable);
    };

    let hour = state.hour;
    let sample = timeline.sample(hour).clone();

    let applied = state.overrides.auto_update();
    if applied {
        let set = tick_values(state, layout, &sample);
        match state.chain.apply(&set) {
            Ok(()) => {}
            Err(Error::UnknownControlKey { keys }) => {
                warn!(?keys, %layout, "chain has no stage for these keys, skipped");
            }
            Err(e) => return Err(e),
        }
    }

    let next_hour = timeline.next_index(hour);
    debug!(hour, next_hour, applied, frozen = state.overrides.is_frozen(), "tick");

    let snapshot = TickSnapshot {
        generation,
        hour_index: hour,
        sample,
        values: state.chain.values(),
        applied,
        frozen: state.overrides.is_frozen(),
    };
    state.publish(snapshot);
    state.hour = next_hour;

    Ok(TickOutcome::Advanced { hour, next_hour })
}

/// Mapped values for `sample`, with frozen overrides the chain declares
fn tick_values(state: &SharedState, layout: ChainLayout, sample: &WeatherSample) -> ControlSet {
    let mut set = state.mapper.map(layout, sample);
    state.overrides.merge_into(&mut set, |key| state.chain.declares(key));
    set
}

/// Receiving end of a tick snapshot stream.
pub struct TickReceiver {
    consumer: Consumer<TickSnapshot>,
}

impl TickReceiver {
    pub fn try_recv(&mut self) -> Option<TickSnapshot> {
        self.consumer.pop().ok()
    }

    /// Poll for a snapshot until `timeout` elapses
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<TickSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.try_recv() {
                return Some(snapshot);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Everything currently queued
    pub fn drain(&mut self) -> Vec<TickSnapshot> {
        core::iter::from_fn(|| self.try_recv()).collect()
    }
}

struct Worker {
    generation: u64,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Starts and stops the background loop.
pub struct SonificationScheduler {
    shared: Arc<Mutex<SharedState>>,
    worker: Option<Worker>,
    tick_micros: Arc<AtomicU64>,
    stop_wait: Duration,
    source_retry: Duration,
}

impl SonificationScheduler {
    pub fn new(
        shared: Arc<Mutex<SharedState>>,
        tick: Duration,
        stop_wait: Duration,
        source_retry: Duration,
    ) -> Self {
        Self {
            shared,
            worker: None,
            tick_micros: Arc::new(AtomicU64::new(tick.as_micros() as u64)),
            stop_wait,
            source_retry,
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.shared).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Takes effect from the next sleep; the loop keeps running
    pub fn set_tick_interval(&self, tick: Duration) {
        self.tick_micros.store(tick.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_micros.load(Ordering::Relaxed))
    }

    /// Stop any running loop, then start a new one for the loaded timeline.
    ///
    /// Without a timeline nothing is started and the state stays `Idle`.
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        let generation = {
            let mut state = lock(&self.shared);
            if state.timeline.is_none() {
                debug!("no timeline loaded, scheduler stays idle");
                return Ok(());
            }
            state.state = SchedulerState::Running;
            state.generation
        };

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = LoopContext {
            shared: self.shared.clone(),
            generation,
            stop: stop.clone(),
            tick_micros: self.tick_micros.clone(),
            source_retry: self.source_retry,
        };
        let handle = thread::Builder::new()
            .name(SCHEDULER_THREAD.into())
            .spawn(move || ctx.run())
            .map_err(|source| {
                lock(&self.shared).state = SchedulerState::Idle;
                Error::Spawn {
                    name: SCHEDULER_THREAD,
                    source,
                }
            })?;

        info!(generation, tick = ?self.tick_interval(), "scheduler started");
        self.worker = Some(Worker { generation, stop, handle });
        Ok(())
    }

    /// Signal the loop, wait a bounded time for it to exit, return to `Idle`.
    ///
    /// A loop still running after the wait is detached; its generation is
    /// already stale, so it exits at its next tick without writing.
    pub fn stop(&mut self) {
        {
            let mut state = lock(&self.shared);
            state.generation += 1;
            if self.worker.is_some() {
                state.state = SchedulerState::Stopping;
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            worker.handle.thread().unpark();

            let deadline = Instant::now() + self.stop_wait;
            while !worker.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if worker.handle.is_finished() {
                if worker.handle.join().is_err() {
                    warn!(generation = worker.generation, "scheduler loop panicked");
                }
            } else {
                warn!(
                    generation = worker.generation,
                    wait = ?self.stop_wait,
                    "scheduler loop did not exit in time, detaching"
                );
            }
            info!(generation = worker.generation, "scheduler stopped");
        }

        lock(&self.shared).state = SchedulerState::Idle;
    }

    /// Run one tick synchronously for the current generation
    pub fn step(&self) -> Result<TickOutcome> {
        let mut state = lock(&self.shared);
        let generation = state.generation;
        run_tick(&mut state, generation)
    }
}

impl Drop for SonificationScheduler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

struct LoopContext {
    shared: Arc<Mutex<SharedState>>,
    generation: u64,
    stop: Arc<AtomicBool>,
    tick_micros: Arc<AtomicU64>,
    source_retry: Duration,
}

impl LoopContext {
    fn run(self) {
        debug!(generation = self.generation, "scheduler loop entered");
        while !self.stop.load(Ordering::Acquire) {
            let outcome = {
                let mut state = lock(&self.shared);
                run_tick(&mut state, self.generation)
            };
            let wait = match outcome {
                Ok(TickOutcome::Advanced { .. }) => {
                    Duration::from_micros(self.tick_micros.load(Ordering::Relaxed))
                }
                Ok(TickOutcome::Superseded) => break,
                Err(Error::SourceUnavailable) => {
                    debug!(retry = ?self.source_retry, "no source attached, retrying");
                    self.source_retry
                }
                Err(e) => {
                    warn!(error = %e, "tick failed");
                    Duration::from_micros(self.tick_micros.load(Ordering::Relaxed))
                }
            };
            self.sleep(wait);
        }

        let mut state = lock(&self.shared);
        if state.generation == self.generation {
            state.state = SchedulerState::Idle;
        }
        debug!(generation = self.generation, "scheduler loop exited");
    }

    // woken early by `unpark` on stop
    fn sleep(&self, wait: Duration) {
        let deadline = Instant::now() + wait;
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::park_timeout(deadline - now);
        }
    }
}
