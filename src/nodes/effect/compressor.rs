//! Soft-knee feed-forward compressor for the corrected vocal.
//!
//! ```text
//! Input → Envelope Follower → Gain Computer → Gain Reduction → Output
//! ```

use dasp_graph::{Buffer, Input};

use crate::gain::{db_to_linear, linear_to_db};
use crate::node::{silence, AudioNode, ProcessContext};

#[derive(Clone, Copy, Debug)]
pub enum CompressorMessage {
    SetThreshold(f32),
    SetRatio(f32),
}

/// Static compression curve.
#[derive(Debug, Clone)]
struct GainComputer {
    threshold_db: f32,
    ratio: f32,
    knee_db: f32,
}

impl GainComputer {
    #[inline]
    fn compute_gain_db(&self, input_db: f32) -> f32 {
        let overshoot = input_db - self.threshold_db;
        let half_knee = self.knee_db / 2.0;

        if overshoot <= -half_knee {
            0.0
        } else if overshoot > half_knee || self.knee_db <= 0.0 {
            -overshoot * (1.0 - 1.0 / self.ratio)
        } else {
            // quadratic blend across the knee
            let x = overshoot + half_knee;
            -(1.0 - 1.0 / self.ratio) * x * x / (2.0 * self.knee_db)
        }
    }
}

/// Envelope follower with separate attack and release time constants.
#[derive(Debug, Clone)]
struct Envelope {
    attack_ms: f32,
    release_ms: f32,
    attack_coeff: f32,
    release_coeff: f32,
    sample_rate: u32,
    level: f32,
}

impl Envelope {
    fn new(attack_ms: f32, release_ms: f32) -> Self {
        Self {
            attack_ms,
            release_ms,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            sample_rate: 0,
            level: 0.0,
        }
    }

    fn prepare(&mut self, sample_rate: u32) {
        if self.sample_rate == sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        let coeff = |ms: f32| (-1.0 / (ms / 1000.0 * sample_rate as f32).max(1.0)).exp();
        self.attack_coeff = coeff(self.attack_ms);
        self.release_coeff = coeff(self.release_ms);
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let rectified = input.abs();
        let coeff = if rectified > self.level {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.level = rectified + coeff * (self.level - rectified);
        self.level
    }
}

/// Dynamics compressor with linked channels.
///
/// Defaults: threshold −24 dB, ratio 3:1, a wide 30 dB soft knee, 3 ms attack
/// and 250 ms release.
pub struct Compressor {
    envelope: Envelope,
    curve: GainComputer,
    channels: usize,
    last_gain_reduction_db: f32,
}

impl Compressor {
    pub fn new() -> Self {
        Self {
            envelope: Envelope::new(3.0, 250.0),
            curve: GainComputer {
                threshold_db: -24.0,
                ratio: 3.0,
                knee_db: 30.0,
            },
            channels: 1,
            last_gain_reduction_db: 0.0,
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.clamp(1, 2);
        self
    }

    /// Gain reduction of the last sample, in dB (never positive).
    pub fn gain_reduction_db(&self) -> f32 {
        self.last_gain_reduction_db
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for Compressor {
    type Message = CompressorMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = CompressorMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                CompressorMessage::SetThreshold(db) => self.curve.threshold_db = db.clamp(-60.0, 0.0),
                CompressorMessage::SetRatio(r) => self.curve.ratio = r.clamp(1.0, 20.0),
            }
        }
        self.envelope.prepare(ctx.sample_rate);

        let buffers = inputs.first().map(|i| i.buffers()).unwrap_or(&[]);
        let Some(last) = buffers.last() else {
            silence(outputs);
            return;
        };
        if outputs.is_empty() {
            return;
        }

        for i in 0..outputs[0].len() {
            // linked detection on the channel average
            let mut detect = 0.0;
            for buf in buffers {
                detect += buf[i];
            }
            detect /= buffers.len() as f32;

            let level_db = linear_to_db(self.envelope.process(detect));
            let reduction_db = self.curve.compute_gain_db(level_db);
            let gain = db_to_linear(reduction_db);

            for (ch, out) in outputs.iter_mut().enumerate() {
                out[i] = buffers.get(ch).unwrap_or(last)[i] * gain;
            }
            self.last_gain_reduction_db = reduction_db;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}
