//! Looping sample player source.

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::path::Path;

use dasp_graph::{Buffer, Input};

use crate::control::ControlKey;
use crate::error::Result;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Pre-decoded, interleaved audio shared between chain rebuilds.
///
/// Cloning is cheap, so the same buffer can seed every rebuilt chain.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wrap interleaved samples (L, R, L, R, ... for stereo)
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Read a WAV file. Integer formats are scaled to -1.0..1.0.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<core::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<core::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(Self::new(samples, spec.channels as usize, spec.sample_rate))
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Total duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Plays a [`SampleBuffer`] on a loop with variable speed and volume.
///
/// Speed is the `playbackPitchRatio` control (1.0 = original pitch); the
/// buffer's own sample rate is folded into the read step, so no separate
/// resampler is needed. Volume changes are smoothed to avoid clicks.
pub struct SamplePlayer {
    buffer: SampleBuffer,
    /// Read position in frames
    position: f64,
    speed: f32,
    volume: f32,
    smoothed_volume: f32,
    smooth_coeff: f32,
}

/// Output level applied on top of `volumeGain`
const HEADROOM: f32 = 0.8;

impl SamplePlayer {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            position: 0.0,
            speed: 1.0,
            volume: ControlKey::VolumeGain.default_value() as f32,
            smoothed_volume: ControlKey::VolumeGain.default_value() as f32 * HEADROOM,
            smooth_coeff: 0.995, // ~7ms at 48kHz
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self.smoothed_volume = volume * HEADROOM;
        self
    }

    #[inline]
    pub fn speed(&self) -> f32 {
        self.speed
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn frame_sample(&self, frame: usize, ch: usize) -> f32 {
        let channels = self.buffer.channels;
        self.buffer.samples[frame * channels + ch % channels]
    }
}

impl AudioNode for SamplePlayer {
    type Message = StageMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for StageMessage::Set(key, value) in messages {
            match key {
                ControlKey::PlaybackPitchRatio => self.speed = value,
                ControlKey::VolumeGain => self.volume = value,
                _ => {}
            }
        }

        let frames = self.buffer.frames();
        if frames == 0 {
            for buffer in outputs.iter_mut() {
                buffer.silence();
            }
            return;
        }

        let step = self.speed as f64 * self.buffer.sample_rate as f64 / ctx.sample_rate as f64;
        let target = self.volume * HEADROOM;
        let mut gain = self.smoothed_volume;
        let buffer_len = outputs.first().map_or(0, |b| b.len());

        for i in 0..buffer_len {
            gain = target + self.smooth_coeff * (gain - target);

            let base = self.position.floor();
            let frac = (self.position - base) as f32;
            let here = base as usize % frames;
            let next = (here + 1) % frames;

            for (ch, buffer) in outputs.iter_mut().enumerate() {
                let a = self.frame_sample(here, ch);
                let b = self.frame_sample(next, ch);
                buffer[i] = (a + (b - a) * frac) * gain;
            }

            self.position += step;
            if self.position >= frames as f64 {
                self.position %= frames as f64;
            }
        }

        self.smoothed_volume = gain;
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        0
    }
}
