//! Effect chain topology and its control surface.
//!
//! [`EffectChainGraph`] is the control-side mirror of what the render thread
//! plays. It owns the stage list and every stage's current values; audio only
//! ever sees whole [`RenderChain`]s and whole [`ControlFrame`]s.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::control::{ControlFrame, ControlKey, ControlSet, ControlValue};
use crate::engine::{EngineCommand, EngineLink};
use crate::error::{Error, Result};
use crate::nodes::SampleBuffer;
use crate::render::RenderChain;

/// Fixed stage layouts, one per source kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChainLayout {
    /// player → low-pass → reverb → tremolo → shelf EQ → pan → spatializer
    Music,
    /// oscillator → reverb → delay → pan
    Tone,
}

impl ChainLayout {
    pub fn stage_kinds(self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            ChainLayout::Music => &[Player, LowPass, Reverb, Tremolo, ShelfEq, Pan, Spatializer],
            ChainLayout::Tone => &[Oscillator, Reverb, Delay, Pan],
        }
    }

    /// Every key some stage of this layout declares, in stage order
    pub fn control_keys(self) -> Vec<ControlKey> {
        self.stage_kinds()
            .iter()
            .flat_map(|kind| kind.controls().iter().copied())
            .collect()
    }

    /// Build the linear topology of this layout
    pub fn topology(self) -> Result<Vec<Stage>> {
        let mut builder = ChainBuilder::new();
        let mut previous = None;
        for &kind in self.stage_kinds() {
            let inputs: Vec<StageId> = previous.into_iter().collect();
            previous = Some(builder.stage(kind, &inputs));
        }
        builder.build()
    }
}

impl fmt::Display for ChainLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainLayout::Music => "music",
            ChainLayout::Tone => "tone",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Player,
    Oscillator,
    LowPass,
    Reverb,
    Tremolo,
    ShelfEq,
    Pan,
    Spatializer,
    Delay,
}

impl StageKind {
    /// Keys this stage owns
    pub fn controls(self) -> &'static [ControlKey] {
        use ControlKey::*;
        match self {
            StageKind::Player => &[PlaybackPitchRatio, VolumeGain],
            StageKind::Oscillator => &[ToneFreqHz, ToneGain, NoiseGain],
            StageKind::LowPass => &[CutoffFreqHz],
            StageKind::Reverb => &[ReverbBalance, ReverbSize],
            StageKind::Tremolo => &[TremoloRateHz],
            StageKind::ShelfEq => &[EqGain],
            StageKind::Pan => &[PanPosition],
            StageKind::Spatializer => &[AzimuthDeg, ElevationDeg],
            StageKind::Delay => &[DelaySeconds],
        }
    }

    #[inline]
    pub fn is_source(self) -> bool {
        matches!(self, StageKind::Player | StageKind::Oscillator)
    }
}

/// Position of a stage in its chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(pub(crate) usize);

impl StageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One stage: its kind, the stages feeding it, and its current values.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    kind: StageKind,
    inputs: Vec<StageId>,
    controls: ControlSet,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn inputs(&self) -> &[StageId] {
        &self.inputs
    }

    pub fn controls(&self) -> &ControlSet {
        &self.controls
    }

    /// Current value of `key`, falling back to its default
    pub fn value(&self, key: ControlKey) -> f64 {
        self.controls.get(key).unwrap_or_else(|| key.default_value())
    }
}

/// Collects stages in order and checks the topology on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct ChainBuilder {
    stages: Vec<Stage>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage with default values for its controls
    pub fn stage(&mut self, kind: StageKind, inputs: &[StageId]) -> StageId {
        let id = StageId(self.stages.len());
        let controls = kind.controls().iter().map(|&k| ControlValue::default_for(k)).collect();
        self.stages.push(Stage {
            kind,
            inputs: inputs.to_vec(),
            controls,
        });
        id
    }

    /// Inputs must reference earlier stages; sources take none, effects at least one
    pub fn build(self) -> Result<Vec<Stage>> {
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.kind.is_source() && !stage.inputs.is_empty() {
                return Err(Error::InvalidTopology(format!(
                    "source stage {index} ({:?}) cannot have inputs",
                    stage.kind
                )));
            }
            if !stage.kind.is_source() && stage.inputs.is_empty() {
                return Err(Error::InvalidTopology(format!(
                    "effect stage {index} ({:?}) has no input",
                    stage.kind
                )));
            }
            if let Some(bad) = stage.inputs.iter().find(|input| input.0 >= index) {
                return Err(Error::InvalidTopology(format!(
                    "stage {index} ({:?}) reads from stage {}, which does not precede it",
                    stage.kind, bad.0
                )));
            }
        }
        if self.stages.is_empty() {
            return Err(Error::InvalidTopology("chain has no stages".into()));
        }
        Ok(self.stages)
    }
}

/// Playable source a chain is built around.
#[derive(Clone, Debug)]
pub enum SourceSignal {
    /// Looping pre-decoded audio, played through the music layout
    Samples(SampleBuffer),
    /// Sine plus noise, played through the tone layout
    Oscillator,
}

impl SourceSignal {
    pub fn layout(&self) -> ChainLayout {
        match self {
            SourceSignal::Samples(_) => ChainLayout::Music,
            SourceSignal::Oscillator => ChainLayout::Tone,
        }
    }
}

/// Stage list plus the link to the render thread.
///
/// Without a link the chain is detached: values are tracked and validated
/// but nothing is rendered.
pub struct EffectChainGraph {
    stages: Vec<Stage>,
    key_index: HashMap<ControlKey, usize>,
    source: Option<SourceSignal>,
    link: Option<EngineLink>,
    /// Frame that could not be queued yet; merged with the next batch
    backlog: ControlFrame,
    revision: u64,
}

impl EffectChainGraph {
    pub fn new(link: Option<EngineLink>) -> Self {
        Self {
            stages: Vec::new(),
            key_index: HashMap::new(),
            source: None,
            link,
            backlog: ControlFrame::empty(),
            revision: 0,
        }
    }

    pub fn detached() -> Self {
        Self::new(None)
    }

    pub fn with_link(mut self, link: EngineLink) -> Self {
        self.link = Some(link);
        self
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Replace the whole chain with the layout for `source`.
    ///
    /// `seed` provides initial values; keys the new layout lacks are ignored.
    /// The previous render chain is handed back by the render thread and
    /// dropped here.
    pub fn rebuild(&mut self, source: SourceSignal, seed: &ControlSet) -> Result<()> {
        let layout = source.layout();
        let mut stages = layout.topology()?;

        let mut key_index = HashMap::new();
        for (index, stage) in stages.iter_mut().enumerate() {
            for &key in stage.kind.controls() {
                key_index.insert(key, index);
                if let Some(value) = seed.get(key) {
                    stage.controls.set(key, value);
                }
            }
        }

        self.collect_retired();
        if let Some(link) = &mut self.link {
            let chain = RenderChain::build(&stages, &source, link.sample_rate())?;
            if link.send(EngineCommand::Install(Box::new(chain))).is_err() {
                warn!(%layout, "engine queue full, keeping the current chain");
                return Err(Error::EngineBusy);
            }
        }

        self.stages = stages;
        self.key_index = key_index;
        self.source = Some(source);
        self.backlog = ControlFrame::empty();
        self.revision += 1;
        info!(
            %layout,
            stages = self.stages.len(),
            revision = self.revision,
            "effect chain rebuilt"
        );
        Ok(())
    }

    /// Drop the source and all stages
    pub fn clear(&mut self) {
        self.stages.clear();
        self.key_index.clear();
        self.source = None;
        self.backlog = ControlFrame::empty();
        self.revision += 1;
        if let Some(link) = &mut self.link {
            if link.send(EngineCommand::Clear).is_err() {
                warn!("engine queue full, render chain not cleared");
            }
        }
        self.collect_retired();
    }

    /// Apply a batch of values in one step.
    ///
    /// Keys no stage declares are skipped and reported together as
    /// [`Error::UnknownControlKey`]; every other key is applied regardless.
    pub fn apply(&mut self, set: &ControlSet) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::SourceUnavailable);
        }

        let mut unknown = Vec::new();
        let mut frame = self.backlog;
        for value in set.iter() {
            let key = value.key();
            match self.key_index.get(&key) {
                Some(&index) => {
                    self.stages[index].controls.insert(*value);
                    frame.set(key, value.value() as f32);
                }
                None => unknown.push(key.as_str().to_string()),
            }
        }

        self.backlog = ControlFrame::empty();
        if !frame.is_empty() {
            if let Some(link) = &mut self.link {
                if let Err(EngineCommand::Apply(rejected)) =
                    link.send(EngineCommand::Apply(frame))
                {
                    debug!("engine queue full, holding control frame");
                    self.backlog = rejected;
                }
            }
        }
        self.collect_retired();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::UnknownControlKey { keys: unknown })
        }
    }

    /// Current value of `key`, if a stage declares it
    pub fn value(&self, key: ControlKey) -> Option<f64> {
        let index = *self.key_index.get(&key)?;
        Some(self.stages[index].value(key))
    }

    /// Values of every stage control
    pub fn values(&self) -> ControlSet {
        self.stages
            .iter()
            .flat_map(|stage| stage.controls.iter().copied())
            .collect()
    }

    pub fn declares(&self, key: ControlKey) -> bool {
        self.key_index.contains_key(&key)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Bumped on every rebuild and clear
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn source(&self) -> Option<&SourceSignal> {
        self.source.as_ref()
    }

    pub fn layout(&self) -> Option<ChainLayout> {
        self.source.as_ref().map(SourceSignal::layout)
    }

    fn collect_retired(&mut self) {
        if let Some(link) = &mut self.link {
            let dropped = link.collect_retired();
            if dropped > 0 {
                debug!(dropped, "released retired render chains");
            }
        }
    }
}

impl fmt::Debug for EffectChainGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectChainGraph")
            .field("layout", &self.layout())
            .field("stages", &self.stages.len())
            .field("attached", &self.link.is_some())
            .field("revision", &self.revision)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn music_source() -> SourceSignal {
        SourceSignal::Samples(SampleBuffer::new(vec![0.0; 64], 1, 48000))
    }

    #[test]
    fn layouts_are_valid_chains() {
        for layout in [ChainLayout::Music, ChainLayout::Tone] {
            let stages = layout.topology().unwrap();
            assert!(stages[0].kind().is_source());
            for (i, stage) in stages.iter().enumerate().skip(1) {
                assert_eq!(stage.inputs(), &[StageId(i - 1)]);
            }
        }
    }

    #[test]
    fn builder_rejects_forward_edges() {
        let mut builder = ChainBuilder::new();
        let src = builder.stage(StageKind::Oscillator, &[]);
        builder.stage(StageKind::Reverb, &[StageId(5)]);
        builder.stage(StageKind::Pan, &[src]);
        assert!(matches!(builder.build(), Err(Error::InvalidTopology(_))));
    }

    #[test]
    fn builder_rejects_source_with_input_and_orphan_effect() {
        let mut builder = ChainBuilder::new();
        let src = builder.stage(StageKind::Oscillator, &[]);
        builder.stage(StageKind::Player, &[src]);
        assert!(matches!(builder.build(), Err(Error::InvalidTopology(_))));

        let mut builder = ChainBuilder::new();
        builder.stage(StageKind::Delay, &[]);
        assert!(matches!(builder.build(), Err(Error::InvalidTopology(_))));
    }

    #[test]
    fn rebuild_seeds_and_ignores_foreign_keys() {
        let mut chain = EffectChainGraph::detached();
        let mut seed = ControlSet::new();
        seed.set(ControlKey::CutoffFreqHz, 900.0);
        seed.set(ControlKey::ToneFreqHz, 300.0);
        chain.rebuild(music_source(), &seed).unwrap();

        assert_eq!(chain.layout(), Some(ChainLayout::Music));
        assert_eq!(chain.value(ControlKey::CutoffFreqHz), Some(900.0));
        assert_eq!(chain.value(ControlKey::ReverbSize), Some(0.7));
        assert_eq!(chain.value(ControlKey::ToneFreqHz), None);
        assert_eq!(chain.revision(), 1);
    }

    #[test]
    fn busy_engine_keeps_the_current_layout() {
        let mut chain = EffectChainGraph::new(Some(EngineLink::stalled(1)));
        chain.rebuild(SourceSignal::Oscillator, &ControlSet::new()).unwrap();
        assert_eq!(chain.revision(), 1);

        let mut seed = ControlSet::new();
        seed.set(ControlKey::CutoffFreqHz, 900.0);
        assert!(matches!(chain.rebuild(music_source(), &seed), Err(Error::EngineBusy)));
        assert_eq!(chain.layout(), Some(ChainLayout::Tone));
        assert_eq!(chain.revision(), 1);
        assert!(chain.declares(ControlKey::ToneFreqHz));
        assert!(!chain.declares(ControlKey::CutoffFreqHz));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut chain = EffectChainGraph::detached();
        chain.rebuild(music_source(), &ControlSet::new()).unwrap();

        let mut set = ControlSet::new();
        set.set(ControlKey::CutoffFreqHz, 700.0);
        set.set(ControlKey::PanPosition, -0.5);
        chain.apply(&set).unwrap();
        let once = chain.stages().to_vec();
        chain.apply(&set).unwrap();
        assert_eq!(chain.stages(), &once[..]);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut chain = EffectChainGraph::detached();
        chain.rebuild(music_source(), &ControlSet::new()).unwrap();

        let mut set = ControlSet::new();
        set.set(ControlKey::CutoffFreqHz, 5000.0);
        set.set(ControlKey::PanPosition, -3.0);
        chain.apply(&set).unwrap();
        assert_eq!(chain.value(ControlKey::CutoffFreqHz), Some(1200.0));
        assert_eq!(chain.value(ControlKey::PanPosition), Some(-1.0));
    }

    #[test]
    fn unknown_keys_do_not_block_the_rest() {
        let mut chain = EffectChainGraph::detached();
        chain.rebuild(SourceSignal::Oscillator, &ControlSet::new()).unwrap();

        let mut set = ControlSet::new();
        set.set(ControlKey::CutoffFreqHz, 700.0);
        set.set(ControlKey::ToneFreqHz, 250.0);
        match chain.apply(&set) {
            Err(Error::UnknownControlKey { keys }) => {
                assert_eq!(keys, vec!["cutoffFreqHz".to_string()])
            }
            other => panic!("expected unknown key error, got {other:?}"),
        }
        assert_eq!(chain.value(ControlKey::ToneFreqHz), Some(250.0));
    }

    #[test]
    fn apply_without_source_is_unavailable() {
        let mut chain = EffectChainGraph::detached();
        let mut set = ControlSet::new();
        set.set(ControlKey::EqGain, 0.3);
        assert!(matches!(chain.apply(&set), Err(Error::SourceUnavailable)));
        assert!(!chain.has_source());
    }

    #[test]
    fn values_cover_every_stage_control() {
        let mut chain = EffectChainGraph::detached();
        chain.rebuild(SourceSignal::Oscillator, &ControlSet::new()).unwrap();
        let mut keys: Vec<_> = chain.values().keys().collect();
        let mut expected = ChainLayout::Tone.control_keys();
        keys.sort();
        expected.sort();
        assert_eq!(keys, expected);
    }
}
