//! Gain/volume stage with smoothing and scheduled ramps

use dasp_graph::{Buffer, Input};

use crate::node::{silence, AudioNode, ProcessContext};

/// Messages to control gain
#[derive(Clone, Copy, Debug)]
pub enum GainMessage {
    /// Set the gain multiplier (1.0 = unity, 0.0 = silence), smoothed
    SetGain(f32),
    /// Move linearly from the current gain to `gain` over `seconds`
    RampTo { gain: f32, seconds: f32 },
}

/// A gain stage that sums its inputs and scales them.
///
/// Bus masters, the vocals-to-PA override, the microphone level and the
/// correction chain's makeup stage are all `Gain` nodes. Every input channel
/// maps to the corresponding output channel; mono inputs are copied to all
/// outputs.
pub struct Gain {
    gain: f32,
    /// Value applied to the last sample
    current: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
    ramp_step: f32,
    ramp_remaining: u32,
    channels: usize,
}

impl Gain {
    /// Create a stereo gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            current: gain,
            smooth_coeff: 0.995, // ~7ms at 48kHz
            ramp_step: 0.0,
            ramp_remaining: 0,
            channels: 2,
        }
    }

    /// Set the number of output channels (1 or 2)
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.clamp(1, 2);
        self
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        // Time constant: after `ms` milliseconds, we've reached ~63% of target
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.smooth_coeff = (-1.0 / samples.max(1.0)).exp();
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn start_ramp(&mut self, gain: f32, seconds: f32, sample_rate: u32) {
        let samples = (seconds.max(0.0) * sample_rate as f32) as u32;
        self.gain = gain;
        if samples == 0 {
            self.current = gain;
            self.ramp_remaining = 0;
        } else {
            self.ramp_step = (gain - self.current) / samples as f32;
            self.ramp_remaining = samples;
        }
    }

    #[inline]
    fn next_gain(&mut self) -> f32 {
        if self.ramp_remaining > 0 {
            self.ramp_remaining -= 1;
            self.current = if self.ramp_remaining == 0 {
                self.gain
            } else {
                self.current + self.ramp_step
            };
        } else {
            self.current = self.gain + self.smooth_coeff * (self.current - self.gain);
        }
        self.current
    }
}

impl AudioNode for Gain {
    type Message = GainMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = GainMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                GainMessage::SetGain(g) => {
                    self.gain = g;
                    self.ramp_remaining = 0;
                }
                GainMessage::RampTo { gain, seconds } => self.start_ramp(gain, seconds, ctx.sample_rate),
            }
        }

        silence(outputs);
        if outputs.is_empty() {
            return;
        }

        let buffer_len = outputs[0].len();
        for i in 0..buffer_len {
            let gain = self.next_gain();
            for input in inputs {
                let in_buffers = input.buffers();
                let Some(last) = in_buffers.last() else { continue };
                for (ch, out_buffer) in outputs.iter_mut().enumerate() {
                    let in_buffer = in_buffers.get(ch).unwrap_or(last);
                    out_buffer[i] += in_buffer[i] * gain;
                }
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        usize::MAX
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{Dc, Rig};

    fn rig(gain: Gain) -> (Rig, crate::Handle<GainMessage>) {
        let mut rig = Rig::new(6400, 2);
        let dc = rig.graph.add(Dc::mono(1.0));
        let gain = rig.graph.add(gain);
        rig.graph.connect(dc.id(), gain.id());
        rig.graph.connect(gain.id(), rig.sink);
        (rig, gain)
    }

    #[test]
    fn unsmoothed_gain_applies_immediately() {
        let (mut rig, mut gain) = rig(Gain::new(1.0).without_smoothing());
        gain.send(GainMessage::SetGain(0.25)).unwrap();
        let out = rig.block_interleaved();
        assert_eq!(out.len(), 128);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn ramp_is_linear_and_lands_on_target() {
        let (mut rig, mut gain) = rig(Gain::new(0.0));
        // 6400 Hz * 0.02 s = 128 samples = two blocks
        gain.send(GainMessage::RampTo { gain: 1.0, seconds: 0.02 }).unwrap();
        let first = rig.block();
        assert!((first[63] - 0.5).abs() < 1e-3);
        let second = rig.block();
        assert_eq!(second[63], 1.0);
    }

    #[test]
    fn sums_every_input() {
        let (mut rig, gain) = rig(Gain::new(0.5).without_smoothing());
        let other = rig.graph.add(Dc::mono(1.0));
        rig.graph.connect(other.id(), gain.id());
        assert!(rig.block().iter().all(|s| (*s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn no_input_is_silence() {
        let mut rig = Rig::new(6400, 1);
        let gain = rig.graph.add(Gain::new(1.0));
        rig.graph.connect(gain.id(), rig.sink);
        assert!(rig.block().iter().all(|s| *s == 0.0));
    }
}
