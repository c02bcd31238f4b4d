//! Mixer effect - sums multiple inputs together

use dasp_graph::{Buffer, Input};

use crate::node::{silence, AudioNode, ProcessContext};

/// A mixer that sums multiple inputs together
///
/// Each bus owns one as its stem mix; every clip, the vocals-to-PA override
/// and the microphone chain connect into it. Each input is summed with equal
/// weight. If an input has fewer channels it is upmixed (mono copies to both),
/// extra input channels are ignored.
pub struct Mixer {
    channels: usize,
}

impl Mixer {
    /// Create a new mixer with the specified number of output channels (1 or 2)
    pub fn new(channels: usize) -> Self {
        Self { channels: channels.clamp(1, 2) }
    }

    /// Create a stereo mixer
    pub fn stereo() -> Self {
        Self::new(2)
    }

    /// Create a mono mixer
    pub fn mono() -> Self {
        Self::new(1)
    }
}

impl AudioNode for Mixer {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        output: &mut [Buffer],
    ) {
        silence(output);

        for input in inputs {
            let buffers = input.buffers();
            let Some(last) = buffers.last() else { continue };

            for (out_ch, out_buf) in output.iter_mut().enumerate() {
                let in_buf = buffers.get(out_ch).unwrap_or(last);
                for (out_sample, in_sample) in out_buf.iter_mut().zip(in_buf.iter()) {
                    *out_sample += *in_sample;
                }
            }
        }
    }

    fn num_inputs(&self) -> usize {
        // Accept any number of inputs
        usize::MAX
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}
