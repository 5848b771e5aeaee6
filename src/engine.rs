//! Audio engine: a dedicated render thread fed by a command queue.
//!
//! ```no_run
//! use wetterklang::{AudioEngine, EngineConfig, OutputTarget};
//!
//! let target = OutputTarget::default_device();
//! let (mut engine, link) = AudioEngine::start(&EngineConfig::default(), target)?;
//! // hand `link` to an EffectChainGraph, then later:
//! engine.shutdown();
//! # Ok::<(), wetterklang::Error>(())
//! ```

use alloc::boxed::Box;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dasp_graph::Buffer;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::control::ControlFrame;
use crate::error::{Error, Result};
use crate::output::{OutputSink, OutputTarget};
use crate::render::RenderChain;

const RENDER_THREAD: &str = "wetterklang-render";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Render rate when the output does not dictate one
    pub sample_rate: u32,
    /// Capacity of the control → render command queue
    pub command_queue: usize,
    /// Blocks rendered ahead of wall-clock time
    pub lead_blocks: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            command_queue: 64,
            lead_blocks: 4,
        }
    }
}

/// Messages to the render thread
pub enum EngineCommand {
    /// Swap in a new chain; the old one is sent back for disposal
    Install(Box<RenderChain>),
    /// Apply one control batch before the next block
    Apply(ControlFrame),
    /// Drop the current chain and render silence
    Clear,
}

/// Control-side end of the engine queues.
pub struct EngineLink {
    commands: Producer<EngineCommand>,
    retired: Consumer<Box<RenderChain>>,
    sample_rate: u32,
}

impl EngineLink {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue a command. Returns it back if the queue is full.
    pub fn send(&mut self, command: EngineCommand) -> core::result::Result<(), EngineCommand> {
        self.commands
            .push(command)
            .map_err(|rtrb::PushError::Full(command)| command)
    }

    /// Drop chains the render thread has finished with. Returns how many.
    pub fn collect_retired(&mut self) -> usize {
        let mut count = 0;
        while let Ok(chain) = self.retired.pop() {
            let dropped = chain.dropped_messages();
            if dropped > 0 {
                warn!(dropped, stages = chain.stage_count(), "retired chain lost stage messages");
            }
            count += 1;
        }
        count
    }
}

#[cfg(test)]
impl EngineLink {
    /// A link whose render thread has already exited, so nothing drains it
    pub(crate) fn stalled(command_queue: usize) -> Self {
        let config = EngineConfig {
            command_queue,
            ..EngineConfig::default()
        };
        let (mut engine, link) = AudioEngine::start(&config, OutputTarget::Null).unwrap();
        engine.shutdown();
        link
    }
}

/// Owner of the render thread.
///
/// Dropping the engine shuts it down; [`shutdown`](Self::shutdown) does the
/// same explicitly and may be called any number of times.
pub struct AudioEngine {
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    blocks: Arc<AtomicU64>,
    sample_rate: u32,
}

impl AudioEngine {
    /// Open `target` on a new render thread and start rendering.
    ///
    /// Fails if the output cannot be opened; no thread is left behind.
    pub fn start(config: &EngineConfig, target: OutputTarget) -> Result<(Self, EngineLink)> {
        let sample_rate = target.sample_rate().unwrap_or(config.sample_rate).max(1);
        let (command_tx, command_rx) = RingBuffer::new(config.command_queue.max(1));
        // every install can retire one chain
        let (retired_tx, retired_rx) = RingBuffer::new(config.command_queue.max(1));

        let running = Arc::new(AtomicBool::new(true));
        let blocks = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let worker = RenderLoop {
            commands: command_rx,
            retired: retired_tx,
            chain: None,
            running: running.clone(),
            blocks: blocks.clone(),
            sample_rate,
            lead_blocks: config.lead_blocks,
        };

        let thread = thread::Builder::new()
            .name(RENDER_THREAD.into())
            .spawn(move || {
                let sink = match target.open() {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                worker.run(sink);
            })
            .map_err(|source| Error::Spawn {
                name: RENDER_THREAD,
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::AudioDevice("render thread exited during startup".into()));
            }
        }

        info!(sample_rate, "audio engine started");
        let engine = Self {
            thread: Some(thread),
            running,
            blocks,
            sample_rate,
        };
        let link = EngineLink {
            commands: command_tx,
            retired: retired_rx,
            sample_rate,
        };
        Ok((engine, link))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Blocks rendered since start
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the render thread and release the output
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if thread.join().is_err() {
            warn!("render thread panicked");
        }
        info!(blocks = self.blocks_rendered(), "audio engine stopped");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("sample_rate", &self.sample_rate)
            .field("running", &self.is_running())
            .field("blocks", &self.blocks_rendered())
            .finish()
    }
}

struct RenderLoop {
    commands: Consumer<EngineCommand>,
    retired: Producer<Box<RenderChain>>,
    chain: Option<Box<RenderChain>>,
    running: Arc<AtomicBool>,
    blocks: Arc<AtomicU64>,
    sample_rate: u32,
    lead_blocks: u64,
}

impl RenderLoop {
    fn run(mut self, mut sink: Box<dyn OutputSink>) {
        let silence = [Buffer::default(), Buffer::default()];
        let start = Instant::now();
        let rate = self.sample_rate as f64;
        let mut rendered = 0u64;
        let mut dropped = 0u64;

        while self.running.load(Ordering::Acquire) {
            self.drain_commands();

            // stay a few blocks ahead of wall-clock time
            let elapsed_blocks = start.elapsed().as_secs_f64() * rate / Buffer::LEN as f64;
            let target = elapsed_blocks as u64 + self.lead_blocks;
            while rendered < target {
                let written = match self.chain.as_mut() {
                    Some(chain) => {
                        chain.process();
                        sink.write_block(chain.output())
                    }
                    None => sink.write_block(&silence),
                };
                if !written {
                    dropped += 1;
                }
                rendered += 1;
                self.blocks.store(rendered, Ordering::Relaxed);
            }

            thread::sleep(Duration::from_micros(500));
        }

        if dropped > 0 {
            debug!(dropped, "output skipped blocks");
        }
        if let Some(chain) = self.chain.take() {
            self.retire(chain);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::Install(chain) => {
                    if let Some(old) = self.chain.replace(chain) {
                        self.retire(old);
                    }
                }
                EngineCommand::Apply(frame) => {
                    if let Some(chain) = self.chain.as_mut() {
                        chain.apply(&frame);
                    }
                }
                EngineCommand::Clear => {
                    if let Some(old) = self.chain.take() {
                        self.retire(old);
                    }
                }
            }
        }
    }

    fn retire(&mut self, chain: Box<RenderChain>) {
        // a full queue means the control side stopped collecting; dropping here is the fallback
        let _ = self.retired.push(chain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainLayout, SourceSignal};

    #[test]
    fn headless_engine_renders_and_shuts_down_twice() {
        let (target, consumer) = OutputTarget::ring(1 << 16, 2);
        let (mut engine, mut link) = AudioEngine::start(&EngineConfig::default(), target).unwrap();
        assert_eq!(link.sample_rate(), 48000);

        let stages = ChainLayout::Tone.topology().unwrap();
        let chain = RenderChain::build(&stages, &SourceSignal::Oscillator, 48000).unwrap();
        assert!(link.send(EngineCommand::Install(Box::new(chain))).is_ok());

        let deadline = Instant::now() + Duration::from_secs(2);
        while consumer.slots() < Buffer::LEN * 2 * 8 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(engine.blocks_rendered() >= 8);

        engine.shutdown();
        assert!(!engine.is_running());
        engine.shutdown();
    }

    #[test]
    fn replaced_chains_come_back() {
        let (mut engine, mut link) =
            AudioEngine::start(&EngineConfig::default(), OutputTarget::Null).unwrap();
        let stages = ChainLayout::Tone.topology().unwrap();
        for _ in 0..2 {
            let chain =
                RenderChain::build(&stages, &SourceSignal::Oscillator, link.sample_rate()).unwrap();
            assert!(link.send(EngineCommand::Install(Box::new(chain))).is_ok());
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut collected = 0;
        while collected == 0 && Instant::now() < deadline {
            collected += link.collect_retired();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(collected, 1);
        engine.shutdown();
        // the active chain is retired on exit
        assert_eq!(link.collect_retired(), 1);
    }
}
