//! Chain stage nodes.
//!
//! ## Sources ([`source`])
//!
//! - [`SamplePlayer`] - loops a [`SampleBuffer`] at `playbackPitchRatio`, level `volumeGain`
//! - [`ToneSource`] - sine at `toneFreqHz` plus white noise
//!
//! ## Effects ([`effect`])
//!
//! - [`LowPass`], [`Reverb`], [`Tremolo`], [`ShelfEq`], [`Pan`], [`Spatializer`], [`Delay`]
//!
//! Every node takes [`StageMessage`](crate::StageMessage) and only reacts to
//! the keys its stage owns.

pub mod effect;
pub mod source;

pub use effect::{Delay, LowPass, Pan, Reverb, ShelfEq, Spatializer, Tremolo};
pub use source::{SampleBuffer, SamplePlayer, ToneSource};
