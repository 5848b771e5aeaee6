//! Render node trait and context types.

use dasp_graph::{Buffer, Input};

use crate::control::ControlKey;

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the render graph in Hz
    pub sample_rate: u32,
    /// Number of samples per buffer (always [`Buffer::LEN`])
    pub buffer_size: usize,
}

/// Unique identifier for a node within a render graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// Parameter update delivered to a chain stage node.
///
/// Nodes ignore keys they do not own, so one message type serves every stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageMessage {
    Set(ControlKey, f32),
}

/// A node in the render graph.
///
/// Nodes never share mutable state with the control side. Parameter updates
/// arrive as messages and are drained at the start of `process()`:
///
/// ```
/// use wetterklang::{AudioNode, ControlKey, ProcessContext, StageMessage};
/// use dasp_graph::{Buffer, Input};
///
/// struct Level {
///     gain: f32,
/// }
///
/// impl AudioNode for Level {
///     type Message = StageMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = StageMessage>,
///         inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for StageMessage::Set(key, value) in messages {
///             if key == ControlKey::VolumeGain {
///                 self.gain = value;
///             }
///         }
///         if let Some(input) = inputs.first() {
///             for (out, inp) in outputs.iter_mut().zip(input.buffers()) {
///                 for (o, i) in out.iter_mut().zip(inp.iter()) {
///                     *o = *i * self.gain;
///                 }
///             }
///         }
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates (`()` if none are needed)
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// 1. Drain and handle all pending messages
    /// 2. Read from `inputs` (if any)
    /// 3. Write to `outputs`
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio input channels (0 for sources)
    fn num_inputs(&self) -> usize {
        0
    }

    /// Number of audio output channels
    fn num_outputs(&self) -> usize {
        2
    }
}
