//! Weather → control value mapping.
//!
//! Everything here is pure: the same sample and config always produce the
//! same values, and every formula is total over its input domain. Values
//! leaving the mapper are clamped again by [`ControlValue::new`](crate::ControlValue::new)
//! against the stage's declared range.

use serde::Deserialize;

use crate::chain::ChainLayout;
use crate::control::{ControlKey, ControlSet};
use crate::weather::WeatherSample;

/// Low-pass cutoff in Hz: 40 Hz per °C around 10 °C, held to 300..1200.
pub fn cutoff_freq_hz(temp: f64) -> f64 {
    (300.0 + (temp - 10.0) * 40.0).clamp(300.0, 1200.0)
}

/// Reverb wet/dry balance, humidity as a fraction.
pub fn reverb_balance(humidity: f64) -> f64 {
    (humidity / 100.0).clamp(0.0, 1.0)
}

/// Reverb room size, humidity as a fraction held to 0.3..0.9.
pub fn reverb_size(humidity: f64) -> f64 {
    (humidity / 100.0).clamp(0.3, 0.9)
}

/// Tremolo LFO rate in Hz.
///
/// No upper bound: 0..10 m/s covers 0.1..5.1 Hz, stronger wind keeps
/// speeding the LFO up. The tremolo stage's declared range still caps what
/// reaches the audio graph.
pub fn tremolo_rate_hz(wind_speed: f64) -> f64 {
    0.1 + (wind_speed / 10.0) * 5.0
}

/// High-shelf gain from the UV index.
pub fn eq_gain(uv_index: f64) -> f64 {
    (uv_index / 10.0).clamp(0.0, 1.0)
}

/// Stereo position -1 (left) ..= 1 (right), periodic in 360°.
pub fn pan_position(wind_direction_deg: f64) -> f64 {
    azimuth_deg(wind_direction_deg) / 360.0 * 2.0 - 1.0
}

pub fn azimuth_deg(wind_direction_deg: f64) -> f64 {
    let deg = wind_direction_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

pub fn elevation_deg(wind_speed: f64) -> f64 {
    if wind_speed > 5.0 {
        20.0
    } else {
        0.0
    }
}

/// Playback speed of the music source, 0.02 per °C around 10 °C.
pub fn playback_pitch_ratio(temp: f64) -> f64 {
    (0.7 + (temp - 10.0) * 0.02).clamp(0.7, 1.3)
}

/// Source volume from precipitation, never quieter than 0.2.
pub fn volume_gain(rain_mm: f64, snow_mm: f64) -> f64 {
    ((rain_mm + snow_mm) / 10.0).max(0.2)
}

/// Linear re-scale of `input` from `in_min..in_max` onto `out_min..out_max`.
///
/// The result is clamped to the output range even when `input` falls outside
/// the input range. A zero-width input range maps everything to `out_min`.
pub fn linear_map(input: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    let span = in_max - in_min;
    if span == 0.0 || !span.is_finite() {
        return out_min;
    }
    let value = out_min + (input - in_min) * (out_max - out_min) / span;
    let (lo, hi) = if out_min <= out_max {
        (out_min, out_max)
    } else {
        (out_max, out_min)
    };
    if value.is_nan() {
        out_min
    } else {
        value.clamp(lo, hi)
    }
}

/// Oscillator pitch: 15..35 °C onto 200..800 Hz.
pub fn tone_freq_hz(temp: f64) -> f64 {
    linear_map(temp, 15.0, 35.0, 200.0, 800.0)
}

/// Oscillator level: 30..100 % humidity onto 0.05..0.5.
pub fn tone_gain(humidity: f64) -> f64 {
    linear_map(humidity, 30.0, 100.0, 0.05, 0.5)
}

/// Noise layer level from rain, up to 0.3 at 10 mm.
pub fn noise_gain(rain_mm: f64) -> f64 {
    (rain_mm / 10.0).clamp(0.0, 1.0) * 0.3
}

/// Reverb balance driven by wind in the oscillator chain, up to 0.8.
pub fn wind_reverb_balance(wind_speed: f64) -> f64 {
    (wind_speed / 10.0).clamp(0.0, 1.0) * 0.8
}

/// Fixed room size of the oscillator chain's reverb
pub const TONE_REVERB_SIZE: f64 = 0.8;

/// Fixed mapping configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Delay line time used by the oscillator chain, seconds
    pub delay_seconds: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self { delay_seconds: 0.5 }
    }
}

/// Maps weather samples onto the control set of a chain layout.
#[derive(Clone, Debug, Default)]
pub struct ParameterMapper {
    config: MapperConfig,
}

impl ParameterMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Complete control set for `layout` computed from `sample`
    pub fn map(&self, layout: ChainLayout, sample: &WeatherSample) -> ControlSet {
        match layout {
            ChainLayout::Music => self.map_music(sample),
            ChainLayout::Tone => self.map_tone(sample),
        }
    }

    fn map_music(&self, s: &WeatherSample) -> ControlSet {
        let mut set = ControlSet::new();
        set.set(ControlKey::PlaybackPitchRatio, playback_pitch_ratio(s.temperature));
        set.set(ControlKey::VolumeGain, volume_gain(s.rain_mm, s.snow_mm));
        set.set(ControlKey::CutoffFreqHz, cutoff_freq_hz(s.temperature));
        set.set(ControlKey::ReverbBalance, reverb_balance(s.humidity));
        set.set(ControlKey::ReverbSize, reverb_size(s.humidity));
        set.set(ControlKey::TremoloRateHz, tremolo_rate_hz(s.wind_speed));
        set.set(ControlKey::EqGain, eq_gain(s.uv_index));
        set.set(ControlKey::PanPosition, pan_position(s.wind_direction_deg));
        set.set(ControlKey::AzimuthDeg, azimuth_deg(s.wind_direction_deg));
        set.set(ControlKey::ElevationDeg, elevation_deg(s.wind_speed));
        set
    }

    fn map_tone(&self, s: &WeatherSample) -> ControlSet {
        let mut set = ControlSet::new();
        set.set(ControlKey::ToneFreqHz, tone_freq_hz(s.temperature));
        set.set(ControlKey::ToneGain, tone_gain(s.humidity));
        set.set(ControlKey::NoiseGain, noise_gain(s.rain_mm));
        set.set(ControlKey::ReverbBalance, wind_reverb_balance(s.wind_speed));
        set.set(ControlKey::ReverbSize, TONE_REVERB_SIZE);
        set.set(ControlKey::DelaySeconds, self.config.delay_seconds);
        set.set(ControlKey::PanPosition, pan_position(s.wind_direction_deg));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn reverb_tracks_humidity() {
        let mut last_size = f64::MIN;
        for h in 0..=100 {
            let h = h as f64;
            let bal = reverb_balance(h);
            assert!(approx(bal, h / 100.0));
            assert!((0.0..=1.0).contains(&bal));

            let size = reverb_size(h);
            assert!((0.3..=0.9).contains(&size));
            assert!(size >= last_size);
            last_size = size;
        }
    }

    #[test]
    fn cutoff_saturates_at_both_ends() {
        assert_eq!(cutoff_freq_hz(-40.0), 300.0);
        assert_eq!(cutoff_freq_hz(2.5), 300.0);
        assert_eq!(cutoff_freq_hz(32.5), 1200.0);
        assert_eq!(cutoff_freq_hz(45.0), 1200.0);

        let mut last = 0.0;
        let mut t = -10.0;
        while t <= 40.0 {
            let c = cutoff_freq_hz(t);
            assert!((300.0..=1200.0).contains(&c));
            assert!(c >= last);
            last = c;
            t += 0.25;
        }
    }

    #[test]
    fn tremolo_rate_has_no_ceiling() {
        for w in [0.0, 1.0, 5.0, 10.0, 37.0, 120.0] {
            assert!(approx(tremolo_rate_hz(w), 0.1 + w / 2.0));
        }
        assert!(tremolo_rate_hz(120.0) > 40.0);
    }

    #[test]
    fn wind_direction_is_periodic() {
        for d in [-725.0, -90.0, 0.0, 45.0, 180.0, 359.0, 720.5] {
            assert!(approx(pan_position(d), pan_position(d + 360.0)));
            let p = pan_position(d);
            assert!((-1.0..=1.0).contains(&p));
        }
        assert_eq!(pan_position(0.0), -1.0);
        assert!(approx(pan_position(180.0), 0.0));
        assert_eq!(azimuth_deg(450.0), 90.0);
    }

    #[test]
    fn elevation_lifts_in_strong_wind() {
        assert_eq!(elevation_deg(5.0), 0.0);
        assert_eq!(elevation_deg(5.1), 20.0);
    }

    #[test]
    fn pitch_and_volume_clamps() {
        assert_eq!(playback_pitch_ratio(-20.0), 0.7);
        assert_eq!(playback_pitch_ratio(60.0), 1.3);
        assert!(approx(playback_pitch_ratio(20.0), 0.9));
        assert_eq!(volume_gain(0.0, 0.0), 0.2);
        assert!(approx(volume_gain(3.0, 2.0), 0.5));
    }

    #[test]
    fn linear_map_clamps_outside_input_range() {
        assert_eq!(linear_map(25.0, 15.0, 35.0, 200.0, 800.0), 500.0);
        assert_eq!(linear_map(-10.0, 15.0, 35.0, 200.0, 800.0), 200.0);
        assert_eq!(linear_map(90.0, 15.0, 35.0, 200.0, 800.0), 800.0);
        assert_eq!(linear_map(5.0, 1.0, 1.0, 0.2, 0.9), 0.2);
        // descending output range
        assert_eq!(linear_map(0.0, 0.0, 10.0, 1.0, 0.0), 1.0);
        assert_eq!(linear_map(20.0, 0.0, 10.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn music_layout_covers_every_music_control() {
        let mapper = ParameterMapper::default();
        let set = mapper.map(ChainLayout::Music, &WeatherSample::neutral());
        let mut keys: Vec<_> = set.keys().collect();
        let mut expected = ChainLayout::Music.control_keys();
        keys.sort();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn tone_layout_uses_configured_delay() {
        let mapper = ParameterMapper::new(MapperConfig { delay_seconds: 0.75 });
        let set = mapper.map(ChainLayout::Tone, &WeatherSample::neutral());
        assert_eq!(set.get(ControlKey::DelaySeconds), Some(0.75));
        assert_eq!(set.get(ControlKey::ReverbSize), Some(TONE_REVERB_SIZE));
        assert!(!set.contains(ControlKey::CutoffFreqHz));
    }

    #[test]
    fn out_of_range_humidity_degrades_to_bounds() {
        let mut sample = WeatherSample::neutral();
        sample.humidity = 180.0;
        let set = ParameterMapper::default().map(ChainLayout::Music, &sample);
        assert_eq!(set.get(ControlKey::ReverbBalance), Some(1.0));
        assert_eq!(set.get(ControlKey::ReverbSize), Some(0.9));
    }
}
