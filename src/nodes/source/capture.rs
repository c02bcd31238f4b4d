//! Microphone capture source node
//!
//! Consumes mono samples captured at the input device's rate and outputs them
//! at the graph's sample rate.

use dasp_graph::{Buffer, Input};
use rtrb::Consumer;

use crate::node::{silence, AudioNode, ProcessContext};

/// Messages for the capture source
#[derive(Clone, Copy, Debug)]
pub enum CaptureMessage {
    /// Set the input sample rate (if the device reopened at another rate)
    SetInputRate(u32),
}

/// A mono source that reads captured samples from a ring buffer and resamples
/// them to the graph rate with linear interpolation.
///
/// When the backlog grows beyond `max_backlog` input frames (the input device
/// runs faster than the bus), the oldest samples are dropped so the monitor
/// latency stays bounded.
pub struct CaptureSource {
    consumer: Consumer<f32>,
    input_sample_rate: u32,
    max_backlog: usize,

    /// Fractional position between `prev` and `curr`
    position: f64,
    prev: f32,
    curr: f32,
    primed: bool,
}

impl CaptureSource {
    /// - `consumer`: ring buffer with mono samples at `input_sample_rate`
    pub fn new(consumer: Consumer<f32>, input_sample_rate: u32) -> Self {
        Self {
            consumer,
            input_sample_rate,
            // ~50 ms
            max_backlog: (input_sample_rate as usize / 20).max(256),
            position: 0.0,
            prev: 0.0,
            curr: 0.0,
            primed: false,
        }
    }

    fn read_sample(&mut self) -> bool {
        match self.consumer.pop() {
            Ok(sample) => {
                self.prev = self.curr;
                self.curr = sample;
                true
            }
            Err(_) => false,
        }
    }

    fn drop_backlog(&mut self) {
        let backlog = self.consumer.slots();
        if backlog > self.max_backlog {
            let excess = backlog - self.max_backlog / 2;
            if let Ok(chunk) = self.consumer.read_chunk(excess) {
                chunk.commit_all();
            }
        }
    }
}

impl AudioNode for CaptureSource {
    type Message = CaptureMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = CaptureMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                CaptureMessage::SetInputRate(rate) => {
                    self.input_sample_rate = rate.max(1);
                    self.max_backlog = (rate as usize / 20).max(256);
                }
            }
        }

        if outputs.is_empty() {
            return;
        }

        self.drop_backlog();

        if !self.primed {
            if self.read_sample() && self.read_sample() {
                self.primed = true;
            } else {
                silence(outputs);
                return;
            }
        }

        let rate_ratio = self.input_sample_rate as f64 / ctx.sample_rate as f64;
        let buffer_len = outputs[0].len();

        for i in 0..buffer_len {
            while self.position >= 1.0 {
                self.position -= 1.0;
                if !self.read_sample() {
                    // Underrun: wait for more input with a fresh interpolator
                    self.primed = false;
                    self.position = 0.0;
                    for buffer in outputs.iter_mut() {
                        buffer[i..].iter_mut().for_each(|s| *s = 0.0);
                    }
                    return;
                }
            }

            let t = self.position as f32;
            let value = self.prev + t * (self.curr - self.prev);
            for buffer in outputs.iter_mut() {
                buffer[i] = value;
            }

            self.position += rate_ratio;
        }
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        1
    }
}
