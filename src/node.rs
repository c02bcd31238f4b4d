//! Core node trait and context types.

use dasp_graph::{Buffer, Input};

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call. Contains the graph's sample rate,
/// the buffer size (always 64 frames) and the absolute frame index of the block.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of frames per buffer (currently always 64)
    pub buffer_size: usize,
    /// Graph frame at which this block starts.
    ///
    /// Frame `n` of the graph is played by the bus device at device frame `n`,
    /// so `frame / sample_rate` is a position on the bus clock.
    pub frame: u64,
}

impl ProcessContext {
    /// Bus-clock time of the first frame of this block, in seconds.
    #[inline]
    pub fn time_secs(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }
}

/// Unique identifier for a node within a graph.
///
/// You typically don't interact with this directly - use [`Handle`](crate::Handle) instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

/// The core trait for audio processing nodes.
///
/// Nodes can be:
/// - **Sources**: Generate audio (0 inputs, 1+ outputs) - stem clips, microphone capture
/// - **Effects**: Process audio (1+ inputs, 1+ outputs) - gain, compressor, pitch units
/// - **Sinks**: Consume audio (1+ inputs, 0 outputs) - device outputs
///
/// # Message-Based Parameters
///
/// Instead of shared mutable state, nodes receive parameter updates via messages.
/// Define your message type and handle it at the start of `process()`:
///
/// ```
/// use stagebus::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum TrimMessage {
///     SetTrim(f32),
/// }
///
/// struct Trim {
///     trim: f32,
/// }
///
/// impl AudioNode for Trim {
///     type Message = TrimMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = TrimMessage>,
///         inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for msg in messages {
///             match msg {
///                 TrimMessage::SetTrim(t) => self.trim = t,
///             }
///         }
///
///         let Some(input) = inputs.first() else { return };
///         for (out, buf) in outputs.iter_mut().zip(input.buffers()) {
///             for (o, i) in out.iter_mut().zip(buf.iter()) {
///                 *o = *i * self.trim;
///             }
///         }
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
/// }
/// ```
///
/// If your node doesn't need runtime parameter updates, use `()` as the message type.
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates.
    ///
    /// Use a custom enum for nodes with parameters, or `()` for nodes without.
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// Called once per audio block (64 frames). Your implementation should:
    /// 1. Drain and handle all pending messages
    /// 2. Read from `inputs` (if any)
    /// 3. Write to `outputs`
    ///
    /// Must not allocate or block.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio input channels (0 for sources).
    fn num_inputs(&self) -> usize { 0 }

    /// Number of audio output channels.
    fn num_outputs(&self) -> usize { 1 }
}

/// Write silence to every output buffer.
#[inline]
pub(crate) fn silence(outputs: &mut [Buffer]) {
    for buffer in outputs.iter_mut() {
        buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}
