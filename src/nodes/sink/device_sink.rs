//! Terminal node feeding an output device's ring buffer

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{AudioNode, ProcessContext};

/// A sink that interleaves its input into the ring buffer the device reads.
///
/// The engine only renders as far ahead as the ring can hold; if a block still
/// does not fit it is skipped whole rather than partially written, so the device
/// never receives a torn frame.
pub struct DeviceSink {
    producer: Producer<f32>,
    channels: usize,
}

impl DeviceSink {
    /// Create a sink that writes interleaved samples with `channels` channels
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
        }
    }

    /// Returns how many sample slots are available
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }
}

impl AudioNode for DeviceSink {
    type Message = ();

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        let buffers = inputs.first().map(|i| i.buffers()).unwrap_or(&[]);
        let buffer_len = ctx.buffer_size;
        let samples_needed = buffer_len * self.channels;

        // Skip if buffer is full
        if self.producer.slots() < samples_needed {
            tracing::trace!(frame = ctx.frame, "device ring full, block dropped");
            return;
        }

        // Interleave channels; devices with more channels than the graph get
        // the last graph channel repeated, an unconnected sink writes silence
        for i in 0..buffer_len {
            for ch in 0..self.channels {
                let value = match buffers.get(ch).or_else(|| buffers.last()) {
                    Some(buffer) => buffer[i],
                    None => 0.0,
                };
                // slots were checked above
                let _ = self.producer.push(value);
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        0
    }
}
