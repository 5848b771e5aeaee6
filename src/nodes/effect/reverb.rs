//! Small Schroeder/Freeverb style reverb.

use alloc::vec;
use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};

use super::input_channel;
use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f32 = 44100.0;

const DAMPING: f32 = 0.5;
const INPUT_GAIN: f32 = 0.015;
const WET_SCALE: f32 = 3.0;
const ALLPASS_FEEDBACK: f32 = 0.5;

struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32) -> f32 {
        let out = self.buffer[self.pos];
        self.store = out * (1.0 - DAMPING) + self.store * DAMPING;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        self.buffer[self.pos] = input + delayed * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        delayed - input
    }
}

struct Channel {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Channel {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f32 / TUNING_RATE;
        let len = |base: usize| ((base + spread) as f32 * scale) as usize;
        Self {
            combs: COMB_TUNING.iter().map(|&n| Comb::new(len(n))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&n| Allpass::new(len(n))).collect(),
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32) -> f32 {
        let mut wet: f32 = self.combs.iter_mut().map(|c| c.tick(input, feedback)).sum();
        for allpass in &mut self.allpasses {
            wet = allpass.tick(wet);
        }
        wet
    }
}

/// Stereo reverb with a wet/dry `balance` and a room `size`.
///
/// `out = dry * (1 - balance) + wet * balance * 3`, comb feedback is
/// `size * 0.28 + 0.7`. Delay lengths are tuned at 44.1 kHz and scaled to the
/// graph rate; the right channel is offset by a small spread.
pub struct Reverb {
    balance: f32,
    size: f32,
    sample_rate: u32,
    channels: [Channel; 2],
}

impl Reverb {
    pub fn new(balance: f32, size: f32, sample_rate: u32) -> Self {
        Self {
            balance: balance.clamp(0.0, 1.0),
            size: size.clamp(0.0, 1.0),
            sample_rate,
            channels: [Channel::new(sample_rate, 0), Channel::new(sample_rate, STEREO_SPREAD)],
        }
    }

    pub fn balance(&self) -> f32 {
        self.balance
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    #[inline]
    fn feedback(&self) -> f32 {
        self.size * 0.28 + 0.7
    }
}

impl AudioNode for Reverb {
    type Message = StageMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if ctx.sample_rate != self.sample_rate {
            *self = Self::new(self.balance, self.size, ctx.sample_rate);
        }
        for StageMessage::Set(key, value) in messages {
            match key {
                ControlKey::ReverbBalance => self.balance = value.clamp(0.0, 1.0),
                ControlKey::ReverbSize => self.size = value.clamp(0.0, 1.0),
                _ => {}
            }
        }

        let feedback = self.feedback();
        let dry_gain = 1.0 - self.balance;
        let wet_gain = self.balance * WET_SCALE;

        for (ch, (out, channel)) in outputs.iter_mut().zip(self.channels.iter_mut()).enumerate() {
            let Some(input) = input_channel(inputs, ch) else {
                out.silence();
                continue;
            };
            for (o, i) in out.iter_mut().zip(input.iter()) {
                let wet = channel.tick(*i * INPUT_GAIN, feedback);
                *o = *i * dry_gain + wet * wet_gain;
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

    fn impulse(t: usize) -> f32 {
        if t == 0 {
            1.0
        } else {
            0.0
        }
    }

    #[test]
    fn dry_only_passes_input_through() {
        let (left, right) = render(Reverb::new(0.0, 0.7, 48000), impulse, 48000, 40, &[]);
        assert_eq!(left[0], 1.0);
        assert!(left[1..].iter().all(|s| *s == 0.0));
        assert!(right[1..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn wet_signal_has_a_tail() {
        let (left, right) = render(
            Reverb::new(0.0, 0.7, 48000),
            impulse,
            48000,
            80,
            &[StageMessage::Set(ControlKey::ReverbBalance, 1.0)],
        );
        // first comb echo arrives after ~1200 samples at 48 kHz
        assert!(rms(&left[2000..]) > 0.0);
        assert_ne!(left, right);
    }

    #[test]
    fn bigger_room_rings_longer() {
        let tail = |size| {
            let (left, _) = render(Reverb::new(1.0, size, 48000), impulse, 48000, 300, &[]);
            rms(&left[15_000..])
        };
        assert!(tail(1.0) > tail(0.0));
    }
}
