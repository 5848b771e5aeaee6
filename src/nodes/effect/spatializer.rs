//! Directional placement from azimuth and elevation.

use alloc::vec;
use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};

use super::pan::equal_power_gains;
use crate::control::ControlKey;
use crate::node::{AudioNode, ProcessContext, StageMessage};

/// Largest interaural time difference in seconds
const MAX_ITD_SECONDS: f32 = 0.0006;
/// Gain lost directly behind the listener
const REAR_ATTENUATION: f32 = 0.3;
/// Gain lost directly overhead or underfoot
const ELEVATION_ATTENUATION: f32 = 0.2;

/// Gains and far-ear delay for one direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub left: f32,
    pub right: f32,
    /// Far-ear delay in samples; positive delays the left ear
    pub itd_samples: isize,
}

/// Azimuth is clockwise from front (90° = right), elevation is up from the horizon.
pub fn placement(azimuth_deg: f32, elevation_deg: f32, sample_rate: u32) -> Placement {
    let az = azimuth_deg.to_radians();
    let lateral = az.sin();
    let rear = (-az.cos()).max(0.0);
    let lift = (elevation_deg.clamp(-90.0, 90.0) / 90.0).abs();

    let level = (1.0 - REAR_ATTENUATION * rear) * (1.0 - ELEVATION_ATTENUATION * lift);
    let (gl, gr) = equal_power_gains(lateral);
    let itd = (lateral * MAX_ITD_SECONDS * sample_rate as f32).round() as isize;

    Placement {
        left: gl * level,
        right: gr * level,
        itd_samples: itd,
    }
}

/// Places a mono-summed input around the listener.
pub struct Spatializer {
    azimuth: f32,
    elevation: f32,
    sample_rate: u32,
    history: Vec<f32>,
    write: usize,
}

impl Spatializer {
    pub fn new(azimuth: f32, elevation: f32, sample_rate: u32) -> Self {
        let len = (MAX_ITD_SECONDS * sample_rate as f32).ceil() as usize + 1;
        Self {
            azimuth,
            elevation,
            sample_rate,
            history: vec![0.0; len],
            write: 0,
        }
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth
    }

    pub fn elevation(&self) -> f32 {
        self.elevation
    }
}

impl AudioNode for Spatializer {
    type Message = StageMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = StageMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if ctx.sample_rate != self.sample_rate {
            *self = Self::new(self.azimuth, self.elevation, ctx.sample_rate);
        }
        for StageMessage::Set(key, value) in messages {
            match key {
                ControlKey::AzimuthDeg => self.azimuth = value.rem_euclid(360.0),
                ControlKey::ElevationDeg => self.elevation = value.clamp(-90.0, 90.0),
                _ => {}
            }
        }

        let Some(input) = inputs.first() else {
            super::silence(outputs);
            return;
        };
        let buffers = input.buffers();
        let scale = 1.0 / buffers.len().max(1) as f32;

        let p = placement(self.azimuth, self.elevation, self.sample_rate);
        let len = self.history.len();
        let lag = p.itd_samples.unsigned_abs().min(len - 1);

        let [left, right, ..] = outputs else {
            return;
        };
        for i in 0..Buffer::LEN {
            let mono = buffers.iter().map(|b| b[i]).sum::<f32>() * scale;
            self.history[self.write] = mono;
            let delayed = self.history[(self.write + len - lag) % len];
            self.write = (self.write + 1) % len;

            let (l, r) = if p.itd_samples > 0 { (delayed, mono) } else { (mono, delayed) };
            left[i] = l * p.left;
            right[i] = r * p.right;
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
    fn front_is_centered() {
        let p = placement(0.0, 0.0, 48000);
        assert!((p.left - p.right).abs() < 1e-6);
        assert_eq!(p.itd_samples, 0);
    }

    #[test]
    fn right_side_favours_right_ear() {
        let p = placement(90.0, 0.0, 48000);
        assert!(p.right > 0.99);
        assert!(p.left < 1e-3);
        // left ear hears it late
        assert!(p.itd_samples > 0);
    }

    #[test]
    fn behind_and_above_are_quieter() {
        let front = placement(0.0, 0.0, 48000);
        let back = placement(180.0, 0.0, 48000);
        let up = placement(0.0, 20.0, 48000);
        assert!(back.left < front.left);
        assert!(up.left < front.left);
        assert!(up.left > back.left);
    }

    #[test]
    fn left_front_delays_right_channel() {
        let (left, right) = render(
            Spatializer::new(0.0, 0.0, 48000),
            |t| if t == 0 { 1.0 } else { 0.0 },
            48000,
            1,
            &[StageMessage::Set(ControlKey::AzimuthDeg, 300.0)],
        );
        assert!(left[0] > 0.99);
        let first_right = right.iter().position(|s| s.abs() > 0.0);
        assert!(first_right.is_some_and(|i| i > 0));
    }
}
