//! Chain stage effects.
//!
//! All effects are stereo: one input, two outputs. A mono input fans out to
//! both channels.

mod delay;
mod lowpass;
mod pan;
mod reverb;
mod shelf;
mod spatializer;
mod tremolo;

pub use delay::*;
pub use lowpass::*;
pub use pan::*;
pub use reverb::*;
pub use shelf::*;
pub use spatializer::*;
pub use tremolo::*;

use dasp_graph::{Buffer, Input};

/// Input buffer feeding output channel `ch`
pub(crate) fn input_channel(inputs: &[Input], ch: usize) -> Option<&Buffer> {
    let buffers = inputs.first()?.buffers();
    buffers.get(ch).or_else(|| buffers.last())
}

pub(crate) fn silence(outputs: &mut [Buffer]) {
    for buffer in outputs.iter_mut() {
        buffer.silence();
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use alloc::vec::Vec;

    use dasp_graph::{Buffer, Input};

    use crate::graph::RenderGraph;
    use crate::node::{AudioNode, ProcessContext, StageMessage};

    /// Test source emitting `signal(t)` on both channels
    pub struct Probe<F> {
        signal: F,
        t: usize,
    }

    impl<F: FnMut(usize) -> f32 + Send + 'static> AudioNode for Probe<F> {
        type Message = ();

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            _messages: impl Iterator<Item = ()>,
            _inputs: &[Input],
            outputs: &mut [Buffer],
        ) {
            for i in 0..Buffer::LEN {
                let v = (self.signal)(self.t + i);
                for buffer in outputs.iter_mut() {
                    buffer[i] = v;
                }
            }
            self.t += Buffer::LEN;
        }
    }

    /// Run `signal` through `effect` for `blocks` blocks, returning (left, right)
    pub fn render<N, F>(
        effect: N,
        signal: F,
        sample_rate: u32,
        blocks: usize,
        messages: &[StageMessage],
    ) -> (Vec<f32>, Vec<f32>)
    where
        N: AudioNode<Message = StageMessage>,
        F: FnMut(usize) -> f32 + Send + 'static,
    {
        let mut graph = RenderGraph::new(sample_rate);
        let source = graph.add(Probe { signal, t: 0 });
        let mut fx = graph.add(effect);
        graph.connect(&source, &fx).unwrap();
        graph.set_terminal(&fx).unwrap();
        for msg in messages {
            assert!(fx.send(*msg).is_ok());
        }

        let mut left = Vec::new();
        let mut right = Vec::new();
        for _ in 0..blocks {
            graph.process();
            let out = graph.output();
            left.extend_from_slice(&out[0]);
            right.extend_from_slice(&out[1]);
        }
        (left, right)
    }

    pub fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }
}
