//! Control keys, declared ranges and value batches.
//!
//! Every tunable parameter of the effect chain is identified by a
//! [`ControlKey`]. A [`ControlValue`] can only be built through
//! [`ControlValue::new`], which clamps to the key's declared range, so a value
//! that reaches a stage is always in range.

use alloc::collections::BTreeMap;
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Stable identifier of one tunable chain parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlKey {
    CutoffFreqHz,
    ReverbBalance,
    ReverbSize,
    TremoloRateHz,
    EqGain,
    PanPosition,
    AzimuthDeg,
    ElevationDeg,
    PlaybackPitchRatio,
    VolumeGain,
    DelaySeconds,
    ToneFreqHz,
    ToneGain,
    NoiseGain,
}

/// Inclusive range a control is clamped to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlRange {
    pub min: f64,
    pub max: f64,
}

impl ControlRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp `value` into the range. NaN collapses to `min`.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl ControlKey {
    /// Number of distinct keys
    pub const COUNT: usize = 14;

    /// Every key, in declaration order
    pub const ALL: [ControlKey; Self::COUNT] = [
        ControlKey::CutoffFreqHz,
        ControlKey::ReverbBalance,
        ControlKey::ReverbSize,
        ControlKey::TremoloRateHz,
        ControlKey::EqGain,
        ControlKey::PanPosition,
        ControlKey::AzimuthDeg,
        ControlKey::ElevationDeg,
        ControlKey::PlaybackPitchRatio,
        ControlKey::VolumeGain,
        ControlKey::DelaySeconds,
        ControlKey::ToneFreqHz,
        ControlKey::ToneGain,
        ControlKey::NoiseGain,
    ];

    /// Position of this key in [`ControlKey::ALL`] and in a [`ControlFrame`]
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlKey::CutoffFreqHz => "cutoffFreqHz",
            ControlKey::ReverbBalance => "reverbBalance",
            ControlKey::ReverbSize => "reverbSize",
            ControlKey::TremoloRateHz => "tremoloRateHz",
            ControlKey::EqGain => "eqGain",
            ControlKey::PanPosition => "panPosition",
            ControlKey::AzimuthDeg => "azimuthDeg",
            ControlKey::ElevationDeg => "elevationDeg",
            ControlKey::PlaybackPitchRatio => "playbackPitchRatio",
            ControlKey::VolumeGain => "volumeGain",
            ControlKey::DelaySeconds => "delaySeconds",
            ControlKey::ToneFreqHz => "toneFreqHz",
            ControlKey::ToneGain => "toneGain",
            ControlKey::NoiseGain => "noiseGain",
        }
    }

    /// Declared valid range.
    ///
    /// These are the ranges a stage accepts, which can be wider than what the
    /// weather mapping produces (e.g. the mapper keeps the pitch ratio within
    /// 0.7..1.3, the player accepts 0.5..2.0).
    pub fn range(self) -> ControlRange {
        match self {
            ControlKey::CutoffFreqHz => ControlRange::new(300.0, 1200.0),
            ControlKey::ReverbBalance => ControlRange::new(0.0, 1.0),
            ControlKey::ReverbSize => ControlRange::new(0.0, 1.0),
            ControlKey::TremoloRateHz => ControlRange::new(0.1, 40.0),
            ControlKey::EqGain => ControlRange::new(0.0, 1.0),
            ControlKey::PanPosition => ControlRange::new(-1.0, 1.0),
            ControlKey::AzimuthDeg => ControlRange::new(0.0, 360.0),
            ControlKey::ElevationDeg => ControlRange::new(-90.0, 90.0),
            ControlKey::PlaybackPitchRatio => ControlRange::new(0.5, 2.0),
            ControlKey::VolumeGain => ControlRange::new(0.0, 2.0),
            ControlKey::DelaySeconds => ControlRange::new(0.0, 2.0),
            ControlKey::ToneFreqHz => ControlRange::new(20.0, 2000.0),
            ControlKey::ToneGain => ControlRange::new(0.0, 1.0),
            ControlKey::NoiseGain => ControlRange::new(0.0, 1.0),
        }
    }

    /// Value a freshly built stage starts with before any mapping is applied
    pub fn default_value(self) -> f64 {
        match self {
            ControlKey::CutoffFreqHz => 600.0,
            ControlKey::ReverbBalance => 0.5,
            ControlKey::ReverbSize => 0.7,
            ControlKey::TremoloRateHz => 1.0,
            ControlKey::EqGain => 0.5,
            ControlKey::PanPosition => 0.0,
            ControlKey::AzimuthDeg => 0.0,
            ControlKey::ElevationDeg => 0.0,
            ControlKey::PlaybackPitchRatio => 1.0,
            ControlKey::VolumeGain => 0.5,
            ControlKey::DelaySeconds => 0.5,
            ControlKey::ToneFreqHz => 440.0,
            ControlKey::ToneGain => 0.25,
            ControlKey::NoiseGain => 0.0,
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlKey {
    type Err = Error;

    /// Accepts the camelCase key names and the short names used by the
    /// effect optimizer dialog (`rev_bal`, `cutoff_freq`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = ControlKey::ALL.iter().find(|k| k.as_str() == s) {
            return Ok(*key);
        }
        match s {
            "rev_bal" => Ok(ControlKey::ReverbBalance),
            "rev_size" => Ok(ControlKey::ReverbSize),
            "cutoff_freq" => Ok(ControlKey::CutoffFreqHz),
            "trem_rate" => Ok(ControlKey::TremoloRateHz),
            "eq_gain" => Ok(ControlKey::EqGain),
            other => Err(Error::unknown_key(other)),
        }
    }
}

/// A control key paired with an in-range value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ControlValue {
    key: ControlKey,
    value: f64,
}

impl ControlValue {
    /// Create a value, clamped to the key's declared range
    pub fn new(key: ControlKey, value: f64) -> Self {
        Self {
            key,
            value: key.range().clamp(value),
        }
    }

    /// The key's default value
    pub fn default_for(key: ControlKey) -> Self {
        Self::new(key, key.default_value())
    }

    #[inline]
    pub fn key(&self) -> ControlKey {
        self.key
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// An ordered batch of control values, at most one per key.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ControlSet {
    values: BTreeMap<ControlKey, ControlValue>,
}

impl ControlSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (clamping) and return the stored value
    pub fn set(&mut self, key: ControlKey, value: f64) -> ControlValue {
        let v = ControlValue::new(key, value);
        self.values.insert(key, v);
        v
    }

    pub fn insert(&mut self, value: ControlValue) {
        self.values.insert(value.key(), value);
    }

    pub fn get(&self, key: ControlKey) -> Option<f64> {
        self.values.get(&key).map(ControlValue::value)
    }

    pub fn contains(&self, key: ControlKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn remove(&mut self, key: ControlKey) -> Option<ControlValue> {
        self.values.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = ControlKey> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlValue> {
        self.values.values()
    }

    /// Fixed-size image of this set for the render thread
    pub fn to_frame(&self) -> ControlFrame {
        let mut frame = ControlFrame::empty();
        for v in self.values.values() {
            frame.set(v.key(), v.value() as f32);
        }
        frame
    }
}

impl FromIterator<ControlValue> for ControlSet {
    fn from_iter<I: IntoIterator<Item = ControlValue>>(iter: I) -> Self {
        let mut set = ControlSet::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

/// Allocation-free control batch, one optional slot per [`ControlKey`].
///
/// This is what crosses into the render thread: it is `Copy`, so pushing it
/// through a ring buffer never allocates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlFrame {
    slots: [Option<f32>; ControlKey::COUNT],
}

impl ControlFrame {
    pub const fn empty() -> Self {
        Self {
            slots: [None; ControlKey::COUNT],
        }
    }

    #[inline]
    pub fn set(&mut self, key: ControlKey, value: f32) {
        self.slots[key.index()] = Some(value);
    }

    #[inline]
    pub fn get(&self, key: ControlKey) -> Option<f32> {
        self.slots[key.index()]
    }

    /// Iterate over the occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (ControlKey, f32)> + '_ {
        ControlKey::ALL
            .iter()
            .filter_map(move |k| self.slots[k.index()].map(|v| (*k, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

impl Default for ControlFrame {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_position_in_all() {
        for (i, key) in ControlKey::ALL.iter().enumerate() {
            assert_eq!(key.index(), i);
        }
    }

    #[test]
    fn keys_round_trip_through_their_names() {
        for key in ControlKey::ALL {
            assert_eq!(key.as_str().parse::<ControlKey>().unwrap(), key);
        }
    }

    #[test]
    fn optimizer_names_are_accepted() {
        assert_eq!("rev_bal".parse::<ControlKey>().unwrap(), ControlKey::ReverbBalance);
        assert_eq!("trem_rate".parse::<ControlKey>().unwrap(), ControlKey::TremoloRateHz);
        assert_eq!("cutoff_freq".parse::<ControlKey>().unwrap(), ControlKey::CutoffFreqHz);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "flangerDepth".parse::<ControlKey>().unwrap_err();
        match err {
            Error::UnknownControlKey { keys } => assert_eq!(keys, vec!["flangerDepth".to_string()]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn values_are_clamped_on_construction() {
        assert_eq!(ControlValue::new(ControlKey::CutoffFreqHz, -100.0).value(), 300.0);
        assert_eq!(ControlValue::new(ControlKey::PanPosition, 3.0).value(), 1.0);
        assert_eq!(ControlValue::new(ControlKey::ReverbBalance, f64::NAN).value(), 0.0);
    }

    #[test]
    fn defaults_lie_in_range() {
        for key in ControlKey::ALL {
            assert!(key.range().contains(key.default_value()), "{key}");
        }
    }

    #[test]
    fn frame_mirrors_set() {
        let mut set = ControlSet::new();
        set.set(ControlKey::EqGain, 0.25);
        set.set(ControlKey::AzimuthDeg, 90.0);

        let frame = set.to_frame();
        assert_eq!(frame.get(ControlKey::EqGain), Some(0.25));
        assert_eq!(frame.get(ControlKey::AzimuthDeg), Some(90.0));
        assert_eq!(frame.get(ControlKey::CutoffFreqHz), None);
        assert_eq!(frame.iter().count(), 2);
    }

    #[test]
    fn serializes_with_camel_case_names() {
        let json = serde_json::to_string(&ControlKey::PlaybackPitchRatio).unwrap();
        assert_eq!(json, "\"playbackPitchRatio\"");
    }
}
