//! Render-side image of an effect chain.

use alloc::vec::Vec;

use dasp_graph::Buffer;

use crate::chain::{SourceSignal, Stage, StageKind};
use crate::control::{ControlFrame, ControlKey};
use crate::error::{Error, Result};
use crate::graph::{NodeHandle, RenderGraph};
use crate::node::StageMessage;
use crate::nodes::{
    Delay, LowPass, Pan, Reverb, SamplePlayer, ShelfEq, Spatializer, ToneSource, Tremolo,
};

/// A built render graph plus the routing from control keys to its nodes.
///
/// Built on the control side from a stage list, then moved whole into the
/// render thread, which only calls [`apply`](Self::apply),
/// [`process`](Self::process) and [`output`](Self::output).
pub struct RenderChain {
    graph: RenderGraph,
    handles: Vec<NodeHandle<StageMessage>>,
    routes: [Option<usize>; ControlKey::COUNT],
}

impl RenderChain {
    pub fn build(stages: &[Stage], source: &SourceSignal, sample_rate: u32) -> Result<Self> {
        let mut graph = RenderGraph::new(sample_rate);
        let mut handles: Vec<NodeHandle<StageMessage>> = Vec::with_capacity(stages.len());
        let mut routes = [None; ControlKey::COUNT];

        for (index, stage) in stages.iter().enumerate() {
            let v = |key: ControlKey| stage.value(key) as f32;
            let handle = match stage.kind() {
                StageKind::Player => {
                    let SourceSignal::Samples(buffer) = source else {
                        return Err(Error::InvalidTopology(
                            "player stage needs a sample source".into(),
                        ));
                    };
                    graph.add(
                        SamplePlayer::new(buffer.clone())
                            .with_speed(v(ControlKey::PlaybackPitchRatio))
                            .with_volume(v(ControlKey::VolumeGain)),
                    )
                }
                StageKind::Oscillator => graph.add(
                    ToneSource::new(v(ControlKey::ToneFreqHz))
                        .with_amplitude(v(ControlKey::ToneGain))
                        .with_noise(v(ControlKey::NoiseGain)),
                ),
                StageKind::LowPass => {
                    graph.add(LowPass::new(v(ControlKey::CutoffFreqHz), sample_rate))
                }
                StageKind::Reverb => graph.add(Reverb::new(
                    v(ControlKey::ReverbBalance),
                    v(ControlKey::ReverbSize),
                    sample_rate,
                )),
                StageKind::Tremolo => graph.add(Tremolo::new(v(ControlKey::TremoloRateHz))),
                StageKind::ShelfEq => graph.add(ShelfEq::new(v(ControlKey::EqGain), sample_rate)),
                StageKind::Pan => graph.add(Pan::new(v(ControlKey::PanPosition))),
                StageKind::Spatializer => graph.add(Spatializer::new(
                    v(ControlKey::AzimuthDeg),
                    v(ControlKey::ElevationDeg),
                    sample_rate,
                )),
                StageKind::Delay => graph.add(Delay::new(v(ControlKey::DelaySeconds), sample_rate)),
            };

            for input in stage.inputs() {
                let from = handles.get(input.index()).ok_or_else(|| {
                    Error::InvalidTopology(format!("stage {index} reads a missing stage"))
                })?;
                graph.connect(from, &handle)?;
            }
            for &key in stage.kind().controls() {
                routes[key.index()] = Some(index);
            }
            handles.push(handle);
        }

        let terminal = handles
            .last()
            .ok_or_else(|| Error::InvalidTopology("chain has no stages".into()))?;
        graph.set_terminal(terminal)?;

        Ok(Self { graph, handles, routes })
    }

    /// Queue every value in `frame` onto its stage before the next block
    pub fn apply(&mut self, frame: &ControlFrame) {
        for (key, value) in frame.iter() {
            if let Some(index) = self.routes[key.index()] {
                // a full node queue only happens when frames outpace blocks; the
                // next frame carries fresh values
                let _ = self.handles[index].send(StageMessage::Set(key, value));
            }
        }
    }

    #[inline]
    pub fn process(&mut self) {
        self.graph.process();
    }

    #[inline]
    pub fn output(&self) -> &[Buffer] {
        self.graph.output()
    }

    pub fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    pub fn stage_count(&self) -> usize {
        self.handles.len()
    }

    /// Stage messages lost to full node queues over this chain's lifetime
    pub fn dropped_messages(&self) -> u64 {
        self.handles.iter().map(NodeHandle::dropped).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainLayout;
    use crate::nodes::SampleBuffer;

    fn peak(chain: &RenderChain) -> f32 {
        chain.output().iter().flat_map(|b| b.iter()).fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn tone_chain_renders_stereo() {
        let stages = ChainLayout::Tone.topology().unwrap();
        let mut chain = RenderChain::build(&stages, &SourceSignal::Oscillator, 48000).unwrap();
        assert_eq!(chain.stage_count(), 4);
        for _ in 0..8 {
            chain.process();
        }
        assert_eq!(chain.output().len(), 2);
        assert!(peak(&chain) > 0.0);
    }

    #[test]
    fn frame_reaches_the_owning_stage() {
        let stages = ChainLayout::Tone.topology().unwrap();
        let mut chain = RenderChain::build(&stages, &SourceSignal::Oscillator, 48000).unwrap();
        let mut frame = ControlFrame::empty();
        frame.set(ControlKey::ToneGain, 0.0);
        frame.set(ControlKey::NoiseGain, 0.0);
        chain.apply(&frame);
        // delay and reverb tails are empty, so a silent source stays silent
        chain.process();
        assert_eq!(peak(&chain), 0.0);
    }

    #[test]
    fn unprocessed_frames_overflow_into_drop_count() {
        let stages = ChainLayout::Tone.topology().unwrap();
        let mut chain = RenderChain::build(&stages, &SourceSignal::Oscillator, 48000).unwrap();
        let mut frame = ControlFrame::empty();
        frame.set(ControlKey::DelaySeconds, 0.25);
        for _ in 0..crate::graph::NODE_QUEUE + 3 {
            chain.apply(&frame);
        }
        assert_eq!(chain.dropped_messages(), 3);
        chain.process();
        chain.apply(&frame);
        assert_eq!(chain.dropped_messages(), 3);
    }

    #[test]
    fn music_layout_requires_samples() {
        let stages = ChainLayout::Music.topology().unwrap();
        assert!(matches!(
            RenderChain::build(&stages, &SourceSignal::Oscillator, 48000),
            Err(Error::InvalidTopology(_))
        ));

        let source = SourceSignal::Samples(SampleBuffer::new(vec![0.5; 256], 2, 44100));
        let mut chain = RenderChain::build(&stages, &source, 48000).unwrap();
        chain.process();
        assert_eq!(chain.stage_count(), 7);
    }
}
