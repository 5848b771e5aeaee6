//! Amplitude tremolo stage.

use dasp_graph::{Buffer, Input};

use super::input_channel;
use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Full-depth sine tremolo: `out = in * (0.5 + 0.5 * sin(2π·rate·t))`.
pub struct Tremolo {
    rate: f32,
    phase: f32,
    gains: [f32; Buffer::LEN],
}

impl Tremolo {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.max(0.0),
            phase: 0.0,
            gains: [1.0; Buffer::LEN],
        }
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl AudioNode for Tremolo {
    type Message = StageMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for StageMessage::Set(key, value) in messages {
            if key == ControlKey::TremoloRateHz {
                self.rate = value.max(0.0);
            }
        }

        let phase_inc = self.rate / ctx.sample_rate as f32;
        for gain in self.gains.iter_mut() {
            *gain = 0.5 + 0.5 * (self.phase * core::f32::consts::TAU).sin();
            self.phase = (self.phase + phase_inc).fract();
        }

        for (ch, out) in outputs.iter_mut().enumerate() {
            match input_channel(inputs, ch) {
                Some(input) => {
                    for ((o, i), g) in out.iter_mut().zip(input.iter()).zip(self.gains.iter()) {
                        *o = *i * *g;
                    }
                }
                None => out.silence(),
            }
        }
    }

    fn num_inputs(&self) -> usize {
        1
    }
}
