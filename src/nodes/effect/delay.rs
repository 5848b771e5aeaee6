//! Feedback delay line.

use alloc::vec;
use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};

use super::input_channel;
use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Longest delay time in seconds
pub const MAX_DELAY_SECONDS: f32 = 2.0;
const FEEDBACK: f32 = 0.3;
const WET_GAIN: f32 = 0.5;

/// Echo with fixed feedback: `out = dry + 0.5 * wet`.
pub struct Delay {
    seconds: f32,
    sample_rate: u32,
    lines: [Vec<f32>; 2],
    write: usize,
}

impl Delay {
    pub fn new(seconds: f32, sample_rate: u32) -> Self {
        let len = (MAX_DELAY_SECONDS * sample_rate as f32) as usize + 1;
        Self {
            seconds: seconds.clamp(0.0, MAX_DELAY_SECONDS),
            sample_rate,
            lines: [vec![0.0; len], vec![0.0; len]],
            write: 0,
        }
    }

    pub fn seconds(&self) -> f32 {
        self.seconds
    }

    #[inline]
    fn delay_samples(&self) -> usize {
        let len = self.lines[0].len();
        ((self.seconds * self.sample_rate as f32) as usize).clamp(1, len - 1)
    }
}

impl AudioNode for Delay {
    type Message = StageMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if ctx.sample_rate != self.sample_rate {
            *self = Self::new(self.seconds, ctx.sample_rate);
        }
        for StageMessage::Set(key, value) in messages {
            if key == ControlKey::DelaySeconds {
                self.seconds = value.clamp(0.0, MAX_DELAY_SECONDS);
            }
        }

        let delay = self.delay_samples();
        let start = self.write;
        for (ch, (out, line)) in outputs.iter_mut().zip(self.lines.iter_mut()).enumerate() {
            let len = line.len();
            let mut write = start;
            let input = input_channel(inputs, ch);
            for (i, o) in out.iter_mut().enumerate() {
                let dry = input.map_or(0.0, |b| b[i]);
                let read = (write + len - delay) % len;
                let wet = line[read];
                line[write] = dry + wet * FEEDBACK;
                *o = dry + wet * WET_GAIN;
                write = (write + 1) % len;
            }
        }
        self.write = (start + Buffer::LEN) % self.lines[0].len();
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
    fn echo_lands_after_delay_time() {
        // 100 samples of delay at 1 kHz
        let impulse = |t: usize| if t == 0 { 1.0 } else { 0.0 };
        let (left, right) = render(Delay::new(0.1, 1000), impulse, 1000, 8, &[]);
        assert_eq!(left[0], 1.0);
        assert!(left[1..100].iter().all(|s| *s == 0.0));
        assert!((left[100] - 0.5).abs() < 1e-6);
        // second echo carries the feedback
        assert!((left[200] - 0.15).abs() < 1e-6);
        assert_eq!(left, right);
    }

    #[test]
    fn delay_time_is_capped() {
        let (left, _) = render(
            Delay::new(0.5, 100),
            |t| if t == 0 { 1.0 } else { 0.0 },
            100,
            3,
            &[StageMessage::Set(ControlKey::DelaySeconds, 9.0)],
        );
        assert!(left[1..].iter().all(|s| *s == 0.0));
    }
}
