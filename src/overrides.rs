//! User overrides on top of the mapped values.
//!
//! Knob edits land in `pending`. Committing copies them to `active` and
//! freezes hourly updates for those keys at the current hour; releasing lifts
//! the freeze but keeps the pending values so the knobs do not jump.

use tracing::{debug, info};

use crate::control::{ControlKey, ControlSet, ControlValue};

/// A bounded, stepped slider.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Knob {
    pub key: ControlKey,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub initial: f64,
}

impl Knob {
    /// Clamp to the knob's range and snap to its step grid
    pub fn quantize(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        let steps = ((value.clamp(self.min, self.max) - self.min) / self.step).round();
        (self.min + steps * self.step).clamp(self.min, self.max)
    }

    /// Number of step positions between min and max, inclusive
    pub fn positions(&self) -> usize {
        ((self.max - self.min) / self.step).round() as usize + 1
    }
}

/// Optimizer knobs in display order
pub const KNOBS: [Knob; 5] = [
    Knob { key: ControlKey::ReverbBalance, min: 0.0, max: 1.0, step: 0.01, initial: 0.5 },
    Knob { key: ControlKey::ReverbSize, min: 0.0, max: 1.0, step: 0.01, initial: 0.7 },
    Knob { key: ControlKey::CutoffFreqHz, min: 300.0, max: 1200.0, step: 10.0, initial: 600.0 },
    Knob { key: ControlKey::TremoloRateHz, min: 0.1, max: 5.0, step: 0.1, initial: 1.0 },
    Knob { key: ControlKey::EqGain, min: 0.0, max: 1.0, step: 0.01, initial: 0.5 },
];

pub fn knob(key: ControlKey) -> Option<&'static Knob> {
    KNOBS.iter().find(|k| k.key == key)
}

#[derive(Clone, Debug)]
pub struct EffectOverrideStore {
    pending: ControlSet,
    active: ControlSet,
    frozen: bool,
    frozen_hour: Option<usize>,
    auto_update: bool,
}

impl Default for EffectOverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectOverrideStore {
    /// Knob defaults pending, nothing active, not frozen, auto-update on
    pub fn new() -> Self {
        Self {
            pending: KNOBS.iter().map(|k| ControlValue::new(k.key, k.initial)).collect(),
            active: ControlSet::new(),
            frozen: false,
            frozen_hour: None,
            auto_update: true,
        }
    }

    /// Stage a value. Knob keys are snapped to their step grid.
    pub fn set_pending(&mut self, key: ControlKey, value: f64) -> ControlValue {
        let value = knob(key).map_or(value, |k| k.quantize(value));
        self.pending.set(key, value)
    }

    /// Activate every pending value and freeze at `hour`
    pub fn commit_pending(&mut self, hour: usize) {
        self.active = self.pending.clone();
        self.frozen = true;
        self.frozen_hour = Some(hour);
        info!(hour, keys = self.active.len(), "overrides committed");
    }

    /// Lift the freeze. Pending values are kept.
    pub fn release(&mut self) {
        if self.frozen {
            info!(hour = ?self.frozen_hour, "overrides released");
        }
        self.frozen = false;
        self.frozen_hour = None;
    }

    pub fn toggle_auto_update(&mut self) -> bool {
        self.set_auto_update(!self.auto_update);
        self.auto_update
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        if self.auto_update != enabled {
            debug!(enabled, "auto update switched");
        }
        self.auto_update = enabled;
    }

    /// Substitute active values into `computed` while frozen.
    ///
    /// Active keys the mapper did not compute are added too, as long as
    /// `accepts` allows them.
    pub fn merge_into(&self, computed: &mut ControlSet, accepts: impl Fn(ControlKey) -> bool) {
        if !self.frozen {
            return;
        }
        for value in self.active.iter().filter(|v| accepts(v.key())) {
            computed.insert(*value);
        }
    }

    pub fn pending(&self) -> &ControlSet {
        &self.pending
    }

    pub fn active(&self) -> &ControlSet {
        &self.active
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn frozen_hour(&self) -> Option<usize> {
        self.frozen_hour
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knob_quantize_snaps_and_clamps() {
        let cutoff = knob(ControlKey::CutoffFreqHz).unwrap();
        assert_eq!(cutoff.quantize(604.0), 600.0);
        assert_eq!(cutoff.quantize(5000.0), 1200.0);
        assert_eq!(cutoff.quantize(f64::NAN), 300.0);
        assert_eq!(cutoff.positions(), 91);

        let trem = knob(ControlKey::TremoloRateHz).unwrap();
        assert!((trem.quantize(2.34) - 2.3).abs() < 1e-9);
        assert_eq!(trem.positions(), 50);
    }

    #[test]
    fn defaults_are_pending_only() {
        let store = EffectOverrideStore::new();
        assert_eq!(store.pending().get(ControlKey::CutoffFreqHz), Some(600.0));
        assert_eq!(store.pending().get(ControlKey::ReverbSize), Some(0.7));
        assert!(store.active().is_empty());
        assert!(!store.is_frozen());
        assert!(store.auto_update());
    }

    #[test]
    fn commit_then_release_keeps_pending() {
        let mut store = EffectOverrideStore::new();
        store.set_pending(ControlKey::CutoffFreqHz, 850.0);
        let before = store.pending().clone();

        store.commit_pending(7);
        assert!(store.is_frozen());
        assert_eq!(store.frozen_hour(), Some(7));

        store.release();
        assert!(!store.is_frozen());
        assert_eq!(store.frozen_hour(), None);
        assert_eq!(store.pending(), &before);
    }

    #[test]
    fn merge_substitutes_and_adds_only_while_frozen() {
        let mut store = EffectOverrideStore::new();
        store.set_pending(ControlKey::CutoffFreqHz, 900.0);

        let mut computed = ControlSet::new();
        computed.set(ControlKey::CutoffFreqHz, 300.0);
        computed.set(ControlKey::PanPosition, 0.25);

        let mut unfrozen = computed.clone();
        store.merge_into(&mut unfrozen, |_| true);
        assert_eq!(unfrozen, computed);

        store.commit_pending(0);
        store.merge_into(&mut computed, |_| true);
        assert_eq!(computed.get(ControlKey::CutoffFreqHz), Some(900.0));
        assert_eq!(computed.get(ControlKey::PanPosition), Some(0.25));
        // tremolo was never computed but is held by the store
        assert_eq!(computed.get(ControlKey::TremoloRateHz), Some(1.0));
    }

    #[test]
    fn merge_skips_keys_the_filter_rejects() {
        let mut store = EffectOverrideStore::new();
        store.commit_pending(0);

        let mut computed = ControlSet::new();
        computed.set(ControlKey::ToneFreqHz, 400.0);
        store.merge_into(&mut computed, |key| key != ControlKey::CutoffFreqHz);
        assert!(!computed.contains(ControlKey::CutoffFreqHz));
        assert_eq!(computed.get(ControlKey::EqGain), Some(0.5));
        assert_eq!(computed.get(ControlKey::ToneFreqHz), Some(400.0));
    }

    #[test]
    fn auto_update_toggles() {
        let mut store = EffectOverrideStore::new();
        assert!(!store.toggle_auto_update());
        assert!(store.toggle_auto_update());
        store.set_auto_update(false);
        assert!(!store.auto_update());
    }
}
