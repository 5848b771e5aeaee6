//! High-shelf EQ stage.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};
use dasp_graph::{Buffer, Input};

use super::lowpass::PASSTHROUGH;
use super::{input_channel, silence};
use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Shelf corner frequency in Hz
pub const SHELF_FREQ_HZ: f32 = 5000.0;
/// Boost at `eqGain = 1.0`, in dB
pub const SHELF_MAX_DB: f32 = 6.0;

/// High-shelf boost of 0..6 dB above 5 kHz driven by `eqGain`.
pub struct ShelfEq {
    gain: f32,
    sample_rate: u32,
    filters: [DirectForm1<f32>; 2],
}

impl ShelfEq {
    pub fn new(gain: f32, sample_rate: u32) -> Self {
        let coeffs = shelf_coefficients(gain, sample_rate).unwrap_or(PASSTHROUGH);
        Self {
            gain,
            sample_rate,
            filters: [DirectForm1::<f32>::new(coeffs), DirectForm1::<f32>::new(coeffs)],
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn set_gain(&mut self, gain: f32) {
        if let Some(coeffs) = shelf_coefficients(gain, self.sample_rate) {
            self.gain = gain;
            for filter in &mut self.filters {
                filter.update_coefficients(coeffs);
            }
        }
    }
}

fn shelf_coefficients(gain: f32, sample_rate: u32) -> Option<Coefficients<f32>> {
    let fs = sample_rate as f32;
    let f0 = SHELF_FREQ_HZ.min(fs * 0.45);
    let db = gain.clamp(0.0, 1.0) * SHELF_MAX_DB;
    Coefficients::<f32>::from_params(Type::HighShelf(db), fs.hz(), f0.hz(), Q_BUTTERWORTH_F32).ok()
}

impl AudioNode for ShelfEq {
    type Message = StageMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if ctx.sample_rate != self.sample_rate {
            self.sample_rate = ctx.sample_rate;
            self.set_gain(self.gain);
        }
        for StageMessage::Set(key, value) in messages {
            if key == ControlKey::EqGain {
                self.set_gain(value);
            }
        }

        for (ch, (out, filter)) in outputs.iter_mut().zip(self.filters.iter_mut()).enumerate() {
            let Some(input) = input_channel(inputs, ch) else {
                silence(core::slice::from_mut(out));
                continue;
            };
            for (o, i) in out.iter_mut().zip(input.iter()) {
                *o = filter.run(*i);
            }
        }
    }

    fn num_inputs(&self) -> usize {
        1
    }
}
