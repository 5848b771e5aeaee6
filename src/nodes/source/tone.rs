//! Sine oscillator with a white-noise layer.

use dasp_graph::{Buffer, Input};

use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Oscillator source for the tone chain.
///
/// Emits `sin * toneGain + noise * noiseGain` on both channels.
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    noise_level: f32,
    phase: f32,
    rng: fastrand::Rng,
}

impl ToneSource {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
            amplitude: ControlKey::ToneGain.default_value() as f32,
            noise_level: 0.0,
            rng: fastrand::Rng::with_seed(0x5eed),
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn with_noise(mut self, level: f32) -> Self {
        self.noise_level = level.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }
}

impl AudioNode for ToneSource {
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
                ControlKey::ToneFreqHz => self.frequency = value.max(0.0),
                ControlKey::ToneGain => self.amplitude = value.clamp(0.0, 1.0),
                ControlKey::NoiseGain => self.noise_level = value.clamp(0.0, 1.0),
                _ => {}
            }
        }

        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        let phase_inc = self.frequency / ctx.sample_rate as f32;

        for sample in first.iter_mut() {
            let tone = (self.phase * core::f32::consts::TAU).sin() * self.amplitude;
            let noise = (self.rng.f32() * 2.0 - 1.0) * self.noise_level;
            *sample = tone + noise;

            self.phase += phase_inc;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_noise_layer_yields_pure_sine() {
        let mut tone = ToneSource::new(750.0).with_amplitude(0.5);
        let ctx = ProcessContext { sample_rate: 3000, buffer_size: Buffer::LEN };
        let mut outputs = [Buffer::default(), Buffer::default()];

        tone.process(&ctx, core::iter::empty(), &[], &mut outputs);

        // quarter-cycle steps: 0, peak, 0, trough
        assert!(outputs[0][0].abs() < 1e-6);
        assert!((outputs[0][1] - 0.5).abs() < 1e-5);
        assert!((outputs[0][3] + 0.5).abs() < 1e-5);
        assert_eq!(&outputs[0][..], &outputs[1][..]);
    }

    #[test]
    fn noise_gain_message_adds_noise() {
        let mut tone = ToneSource::new(0.0).with_amplitude(0.0);
        let ctx = ProcessContext { sample_rate: 48000, buffer_size: Buffer::LEN };
        let mut outputs = [Buffer::default(), Buffer::default()];
        let messages = [StageMessage::Set(ControlKey::NoiseGain, 0.3)];

        tone.process(&ctx, messages.into_iter(), &[], &mut outputs);

        assert!(outputs[0].iter().any(|s| s.abs() > 0.0));
        assert!(outputs[0].iter().all(|s| s.abs() <= 0.3));
    }
}
