//! Butterworth low-pass stage.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};
use dasp_graph::{Buffer, Input};
use tracing::warn;

use super::{input_channel, silence};
use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Identity coefficients, used until a valid cutoff has been set
pub(crate) const PASSTHROUGH: Coefficients<f32> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

/// Second-order low-pass filter, one filter state per channel.
pub struct LowPass {
    cutoff: f32,
    sample_rate: u32,
    filters: [DirectForm1<f32>; 2],
}

impl LowPass {
    pub fn new(cutoff: f32, sample_rate: u32) -> Self {
        let coeffs = lowpass_coefficients(cutoff, sample_rate).unwrap_or(PASSTHROUGH);
        Self {
            cutoff,
            sample_rate,
            filters: [DirectForm1::<f32>::new(coeffs), DirectForm1::<f32>::new(coeffs)],
        }
    }

    #[inline]
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    fn set_cutoff(&mut self, cutoff: f32) {
        match lowpass_coefficients(cutoff, self.sample_rate) {
            Some(coeffs) => {
                self.cutoff = cutoff;
                for filter in &mut self.filters {
                    filter.update_coefficients(coeffs);
                }
            }
            None => warn!(cutoff, "rejected low-pass cutoff, keeping previous"),
        }
    }
}

fn lowpass_coefficients(cutoff: f32, sample_rate: u32) -> Option<Coefficients<f32>> {
    let fs = sample_rate as f32;
    // stay clear of Nyquist
    let f0 = cutoff.clamp(1.0, fs * 0.45);
    Coefficients::<f32>::from_params(Type::LowPass, fs.hz(), f0.hz(), Q_BUTTERWORTH_F32).ok()
}

impl AudioNode for LowPass {
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
            self.set_cutoff(self.cutoff);
        }
        for StageMessage::Set(key, value) in messages {
            if key == ControlKey::CutoffFreqHz {
                self.set_cutoff(value);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::effect::test_util::{render, rms};

    fn sine(freq: f32, sr: f32) -> impl FnMut(usize) -> f32 + Send + 'static {
        move |t| (core::f32::consts::TAU * freq * t as f32 / sr).sin()
    }

    #[test]
    fn passes_low_frequencies() {
        let (left, right) =
            render(LowPass::new(1200.0, 48000), sine(100.0, 48000.0), 48000, 64, &[]);
        let tail = &left[left.len() / 2..];
        assert!((rms(tail) - core::f32::consts::FRAC_1_SQRT_2).abs() < 0.05);
        assert_eq!(left, right);
    }

    #[test]
    fn lower_cutoff_attenuates_more() {
        let open = render(LowPass::new(1200.0, 48000), sine(4000.0, 48000.0), 48000, 32, &[]).0;
        let closed = render(
            LowPass::new(1200.0, 48000),
            sine(4000.0, 48000.0),
            48000,
            32,
            &[StageMessage::Set(ControlKey::CutoffFreqHz, 300.0)],
        )
        .0;
        assert!(rms(&closed[1024..]) < rms(&open[1024..]) * 0.5);
    }

    #[test]
    fn cutoff_above_nyquist_is_capped() {
        let mut lp = LowPass::new(600.0, 8000);
        lp.set_cutoff(50_000.0);
        assert_eq!(lp.cutoff(), 50_000.0);
    }
}
