//! Session facade: the operations a UI or CLI drives.
//!
//! ```no_run
//! use wetterklang::{OutputTarget, SessionConfig, SonificationSession, SourceSignal};
//!
//! let target = OutputTarget::default_device();
//! let mut session = SonificationSession::with_engine(SessionConfig::default(), target)?;
//! session.attach_source(SourceSignal::Oscillator)?;
//! session.load_region("Seoul")?;
//! let mut ticks = session.subscribe();
//! while let Some(tick) = ticks.recv_timeout(std::time::Duration::from_secs(5)) {
//!     println!("{}", tick.sample.summary(tick.hour_index));
//! }
//! session.shutdown();
//! # Ok::<(), wetterklang::Error>(())
//! ```

use alloc::sync::Arc;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, warn};

use crate::chain::{EffectChainGraph, SourceSignal};
use crate::config::SessionConfig;
use crate::control::{ControlKey, ControlSet, ControlValue};
use crate::engine::AudioEngine;
use crate::error::Result;
use crate::mapping::ParameterMapper;
use crate::output::OutputTarget;
use crate::scheduler::{
    lock, SchedulerState, SharedState, SonificationScheduler, TickOutcome, TickReceiver,
};
use crate::weather::{WeatherSample, WeatherTimeline};

pub struct SonificationSession {
    config: SessionConfig,
    shared: Arc<Mutex<SharedState>>,
    scheduler: SonificationScheduler,
    engine: Option<AudioEngine>,
}

impl SonificationSession {
    /// A session whose chain is tracked but not rendered
    pub fn new(config: SessionConfig) -> Self {
        Self::assemble(config, EffectChainGraph::detached(), None)
    }

    /// A session rendering through an audio engine on `target`
    pub fn with_engine(config: SessionConfig, target: OutputTarget) -> Result<Self> {
        let (engine, link) = AudioEngine::start(&config.engine, target)?;
        Ok(Self::assemble(config, EffectChainGraph::new(Some(link)), Some(engine)))
    }

    fn assemble(
        config: SessionConfig,
        chain: EffectChainGraph,
        engine: Option<AudioEngine>,
    ) -> Self {
        let mapper = ParameterMapper::new(config.mapping.clone());
        let shared = Arc::new(Mutex::new(SharedState::new(chain, mapper)));
        let scheduler = SonificationScheduler::new(
            shared.clone(),
            config.tick_interval(),
            config.stop_wait(),
            config.source_retry(),
        );
        Self {
            config,
            shared,
            scheduler,
            engine,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load a dataset file and start sonifying it.
    ///
    /// On failure the running loop, if any, is left untouched.
    pub fn load_timeline(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let timeline = WeatherTimeline::load(path)?;
        self.start(timeline)
    }

    /// Load `<data_dir>/<region>.json` and start sonifying it
    pub fn load_region(&mut self, region: &str) -> Result<()> {
        let timeline = WeatherTimeline::load_region(&self.config.data_dir, region)?;
        self.start(timeline)
    }

    /// Replace the timeline and restart the loop from hour 0.
    ///
    /// The chain is rebuilt for the attached source first; if that fails the
    /// running loop, timeline and override freeze are left as they were.
    /// Otherwise the freeze is lifted and the old loop is replaced.
    pub fn start(&mut self, timeline: WeatherTimeline) -> Result<()> {
        {
            let mut state = lock(&self.shared);
            if let Some(source) = state.chain.source().cloned() {
                let sample = timeline.sample(0).clone();
                rebuild(&mut state, source, &sample)?;
            }
            // fence the old loop before it can tick against the new timeline
            state.generation += 1;
            info!(city = timeline.city(), hours = timeline.len(), "starting timeline");
            state.timeline = Some(Arc::new(timeline));
            state.hour = 0;
            state.overrides.release();
        }
        self.scheduler.start()
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    /// Run one tick on the calling thread
    pub fn step(&mut self) -> Result<TickOutcome> {
        self.scheduler.step()
    }

    /// Change the time per hour without restarting. Returns the clamped value.
    pub fn set_tick_interval(&mut self, secs: f64) -> f64 {
        let secs = self.config.clamp_tick(secs);
        self.config.tick_interval_secs = secs;
        self.scheduler.set_tick_interval(Duration::from_secs_f64(secs));
        secs
    }

    pub fn tick_interval(&self) -> Duration {
        self.scheduler.tick_interval()
    }

    /// Receive a snapshot after every tick
    pub fn subscribe(&mut self) -> TickReceiver {
        lock(&self.shared).subscribe(self.config.display_queue)
    }

    /// Stage an override value; it takes effect once committed
    pub fn set_override(&mut self, key: ControlKey, value: f64) -> ControlValue {
        lock(&self.shared).overrides.set_pending(key, value)
    }

    /// Stage an override by name, accepting the short knob names too
    pub fn set_override_named(&mut self, name: &str, value: f64) -> Result<ControlValue> {
        let key: ControlKey = name.parse()?;
        Ok(self.set_override(key, value))
    }

    /// Freeze the pending overrides at the current hour
    pub fn commit_overrides(&mut self) {
        let mut state = lock(&self.shared);
        let hour = state.hour;
        state.overrides.commit_pending(hour);
    }

    pub fn release_overrides(&mut self) {
        lock(&self.shared).overrides.release();
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        lock(&self.shared).overrides.set_auto_update(enabled);
    }

    /// Flip auto-update, returning the new setting
    pub fn toggle_auto_update(&mut self) -> bool {
        lock(&self.shared).overrides.toggle_auto_update()
    }

    /// Rebuild the chain around `source`, seeded from the current hour.
    ///
    /// Attaching while running is fine; the next tick drives the new chain.
    pub fn attach_source(&mut self, source: SourceSignal) -> Result<()> {
        let mut state = lock(&self.shared);
        let sample = match state.timeline() {
            Some(timeline) => timeline.sample(state.hour).clone(),
            None => WeatherSample::neutral(),
        };
        rebuild(&mut state, source, &sample)
    }

    /// Remove the source; ticks degrade to retries until one is attached
    pub fn detach_source(&mut self) {
        lock(&self.shared).chain.clear();
    }

    pub fn current_values(&self) -> ControlSet {
        lock(&self.shared).chain.values()
    }

    pub fn current_value(&self, key: ControlKey) -> Option<f64> {
        lock(&self.shared).chain.value(key)
    }

    pub fn current_hour(&self) -> usize {
        lock(&self.shared).hour
    }

    pub fn current_sample(&self) -> Option<WeatherSample> {
        let state = lock(&self.shared);
        let hour = state.hour;
        state.timeline().map(|t| t.sample(hour).clone())
    }

    pub fn timeline(&self) -> Option<Arc<WeatherTimeline>> {
        lock(&self.shared).timeline.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn pending_overrides(&self) -> ControlSet {
        lock(&self.shared).overrides.pending().clone()
    }

    pub fn is_frozen(&self) -> bool {
        lock(&self.shared).overrides.is_frozen()
    }

    pub fn frozen_hour(&self) -> Option<usize> {
        lock(&self.shared).overrides.frozen_hour()
    }

    pub fn auto_update(&self) -> bool {
        lock(&self.shared).overrides.auto_update()
    }

    pub fn engine(&self) -> Option<&AudioEngine> {
        self.engine.as_ref()
    }

    /// Stop the loop, drop the chain and release the audio engine.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn shutdown(&mut self) {
        self.scheduler.stop();
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        lock(&self.shared).chain.clear();
        engine.shutdown();
        info!("session shut down");
    }
}

impl Drop for SonificationSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn rebuild(state: &mut SharedState, source: SourceSignal, sample: &WeatherSample) -> Result<()> {
    let layout = source.layout();
    let seed = state.mapper.map(layout, sample);
    if let Err(e) = state.chain.rebuild(source, &seed) {
        warn!(error = %e, %layout, "chain rebuild failed");
        return Err(e);
    }
    Ok(())
}
