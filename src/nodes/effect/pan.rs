//! Equal-power stereo panner.

use dasp_graph::{Buffer, Input};

use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Left/right gains for a pan position in -1..=1.
///
/// `cos²θ + sin²θ = 1` keeps perceived loudness constant across the field.
#[inline]
pub fn equal_power_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * core::f32::consts::FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Sums the input to mono and places it with [`equal_power_gains`].
pub struct Pan {
    position: f32,
}

impl Pan {
    pub fn new(position: f32) -> Self {
        Self {
            position: position.clamp(-1.0, 1.0),
        }
    }

    pub fn position(&self) -> f32 {
        self.position
    }
}

impl AudioNode for Pan {
    type Message = StageMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for StageMessage::Set(key, value) in messages {
            if key == ControlKey::PanPosition {
                self.position = value.clamp(-1.0, 1.0);
            }
        }

        let Some(input) = inputs.first() else {
            super::silence(outputs);
            return;
        };
        let buffers = input.buffers();
        let scale = 1.0 / buffers.len().max(1) as f32;
        let (gl, gr) = equal_power_gains(self.position);

        let [left, right, ..] = outputs else {
            return;
        };
        for i in 0..Buffer::LEN {
            let mono = buffers.iter().map(|b| b[i]).sum::<f32>() * scale;
            left[i] = mono * gl;
            right[i] = mono * gr;
        }
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::effect::test_util::render;

    #[test]
    fn center_is_equal_power() {
        let (gl, gr) = equal_power_gains(0.0);
        assert!((gl - gr).abs() < 1e-6);
        assert!((gl * gl + gr * gr - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hard_positions() {
        let hard_left = [StageMessage::Set(ControlKey::PanPosition, -1.0)];
        let (l, r) = render(Pan::new(0.0), |_| 1.0, 48000, 1, &hard_left);
        assert!(l.iter().all(|s| (*s - 1.0).abs() < 1e-6));
        assert!(r.iter().all(|s| s.abs() < 1e-6));

        let (l, r) = render(Pan::new(1.0), |_| 1.0, 48000, 1, &[]);
        assert!(l.iter().all(|s| s.abs() < 1e-6));
        assert!(r.iter().all(|s| (*s - 1.0).abs() < 1e-6));
    }
}
