//! wetterklang - weather sonification with a message-controlled effect chain
//!
//! Design principles:
//! - Hourly weather samples map onto effect parameters through pure, clamping functions
//! - One background loop per session walks the timeline; all chain state sits behind one lock
//! - The render thread never shares state: chains and control frames arrive over ring buffers
//! - A stopped loop can never write, even if it outlives the stop wait
//! - Audio output is pluggable: null, ring buffer, or a CPAL device

extern crate alloc;

mod chain;
mod config;
mod control;
mod device;
mod engine;
mod error;
mod graph;
mod mapping;
mod node;
pub mod nodes;
mod output;
mod overrides;
mod render;
mod scheduler;
mod session;
mod weather;

pub use chain::{
    ChainBuilder, ChainLayout, EffectChainGraph, SourceSignal, Stage, StageId, StageKind,
};
pub use config::SessionConfig;
pub use control::{ControlFrame, ControlKey, ControlRange, ControlSet, ControlValue};
pub use device::CpalDevice;
pub use engine::{AudioEngine, EngineCommand, EngineConfig, EngineLink};
pub use error::{Error, Result};
pub use graph::{NodeHandle, RenderGraph};
pub use mapping::*;
pub use node::{AudioNode, NodeId, ProcessContext, StageMessage};
pub use nodes::{SampleBuffer, SamplePlayer, ToneSource};
pub use output::{NullOutput, OutputSink, OutputTarget, RingOutput};
pub use overrides::{knob, EffectOverrideStore, Knob, KNOBS};
pub use render::RenderChain;
pub use scheduler::{
    run_tick, SchedulerState, SharedState, SonificationScheduler, TickOutcome, TickReceiver,
    TickSnapshot,
};
pub use session::SonificationSession;
pub use weather::{region_path, WeatherField, WeatherSample, WeatherTimeline};
