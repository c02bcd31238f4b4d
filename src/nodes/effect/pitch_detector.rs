//! Monophonic pitch detector tap.
//!
//! Audio passes through untouched. Every hop the node runs a YIN estimate on
//! the most recent analysis window and pushes a [`PitchSample`] stamped with
//! the bus time of the window's end.

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{silence, AudioNode, ProcessContext};
use crate::pitch::PitchSample;

/// Analysis window (integration length) in samples.
pub const WINDOW: usize = 1024;
const HISTORY: usize = WINDOW * 2;
const HOP: usize = WINDOW;
const THRESHOLD: f32 = 0.15;
const MIN_FREQUENCY: f32 = 60.0;
const MAX_FREQUENCY: f32 = 1200.0;
/// Windows quieter than this RMS are reported unvoiced.
const SILENCE_RMS: f32 = 0.003;

#[derive(Clone, Copy, Debug)]
pub enum PitchDetectorMessage {
    /// Analyse as if the input ran at this rate instead of the graph rate
    SetSampleRate(u32),
    SetEnabled(bool),
}

pub struct PitchDetector {
    output: Producer<PitchSample>,
    sample_rate: Option<u32>,
    enabled: bool,
    history: Vec<f32>,
    write: usize,
    filled: usize,
    since_hop: usize,
    scratch: Vec<f32>,
    window: Vec<f32>,
    channels: usize,
}

impl PitchDetector {
    /// Samples are pushed to `output`; when it is full they are dropped.
    pub fn new(output: Producer<PitchSample>) -> Self {
        Self {
            output,
            sample_rate: None,
            enabled: true,
            history: vec![0.0; HISTORY],
            write: 0,
            filled: 0,
            since_hop: 0,
            scratch: vec![0.0; WINDOW + 1],
            window: vec![0.0; HISTORY],
            channels: 1,
        }
    }

    /// Pass `channels` channels through (analysis always runs on their average).
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.clamp(1, 2);
        self
    }

    fn push(&mut self, sample: f32) {
        self.history[self.write] = sample;
        self.write = (self.write + 1) % HISTORY;
        self.filled = (self.filled + 1).min(HISTORY);
        self.since_hop += 1;
    }

    fn analyse(&mut self, sample_rate: u32) -> f32 {
        // unroll the ring, oldest first
        let (older, newer) = self.history.split_at(self.write);
        self.window[..newer.len()].copy_from_slice(newer);
        self.window[newer.len()..].copy_from_slice(older);

        let rms = (self.window.iter().map(|s| s * s).sum::<f32>() / HISTORY as f32).sqrt();
        if rms < SILENCE_RMS {
            return 0.0;
        }
        yin(&self.window, &mut self.scratch, sample_rate as f32)
    }
}

/// YIN fundamental estimate over `signal` (length ≥ 2·WINDOW), 0.0 when unvoiced.
fn yin(signal: &[f32], diff: &mut [f32], sample_rate: f32) -> f32 {
    let min_tau = ((sample_rate / MAX_FREQUENCY) as usize).max(2);
    let max_tau = ((sample_rate / MIN_FREQUENCY) as usize).min(WINDOW - 1);
    if min_tau + 2 >= max_tau {
        return 0.0;
    }

    diff[0] = 1.0;
    let mut running = 0.0;
    for tau in 1..=max_tau {
        let mut sum = 0.0;
        for j in 0..WINDOW {
            let d = signal[j] - signal[j + tau];
            sum += d * d;
        }
        running += sum;
        // cumulative mean normalised difference
        diff[tau] = if running > 0.0 { sum * tau as f32 / running } else { 1.0 };
    }

    let mut tau = min_tau;
    while tau < max_tau {
        if diff[tau] < THRESHOLD {
            while tau + 1 < max_tau && diff[tau + 1] < diff[tau] {
                tau += 1;
            }
            break;
        }
        tau += 1;
    }
    if tau >= max_tau {
        return 0.0;
    }

    // parabolic interpolation around the dip
    let (a, b, c) = (diff[tau - 1], diff[tau], diff[tau + 1]);
    let denom = a + c - 2.0 * b;
    let shift = if denom.abs() > f32::EPSILON { 0.5 * (a - c) / denom } else { 0.0 };
    sample_rate / (tau as f32 + shift)
}

impl AudioNode for PitchDetector {
    type Message = PitchDetectorMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = PitchDetectorMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                PitchDetectorMessage::SetSampleRate(rate) => self.sample_rate = Some(rate),
                PitchDetectorMessage::SetEnabled(enabled) => {
                    self.enabled = enabled;
                    self.since_hop = 0;
                }
            }
        }

        let buffers = inputs.first().map(|i| i.buffers()).unwrap_or(&[]);
        let Some(last) = buffers.last() else {
            silence(outputs);
            return;
        };

        for (ch, out) in outputs.iter_mut().enumerate() {
            out.copy_from_slice(buffers.get(ch).unwrap_or(last));
        }

        if !self.enabled {
            return;
        }

        let len = last.len();
        let scale = 1.0 / buffers.len() as f32;
        for i in 0..len {
            let mixed = buffers.iter().map(|b| b[i]).sum::<f32>() * scale;
            self.push(mixed);
        }

        if self.since_hop >= HOP && self.filled == HISTORY {
            self.since_hop = 0;
            let rate = self.sample_rate.unwrap_or(ctx.sample_rate);
            let frequency = self.analyse(rate);
            let timestamp = (ctx.frame + len as u64) as f64 / ctx.sample_rate as f64;
            // a full queue means nobody is reading; drop
            let _ = self.output.push(PitchSample { frequency, timestamp });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::{Dc, Rig, Tone};
    use rtrb::RingBuffer;

    fn run(frequency: Option<f32>, blocks: usize) -> Vec<PitchSample> {
        let mut rig = Rig::new(16_000, 1);
        let (tx, mut rx) = RingBuffer::new(64);
        let detector = rig.graph.add(PitchDetector::new(tx));
        let source = match frequency {
            Some(f) => rig.graph.add(Tone::new(f, 0.5)).id(),
            None => rig.graph.add(Dc::mono(0.0)).id(),
        };
        rig.graph.connect(source, detector.id());
        rig.graph.connect(detector.id(), rig.sink);
        for _ in 0..blocks {
            rig.block();
        }
        let mut samples = Vec::new();
        while let Ok(s) = rx.pop() {
            samples.push(s);
        }
        samples
    }

    #[test]
    fn finds_a_sung_a3() {
        let samples = run(Some(220.0), 96);
        let last = samples.last().expect("detector emitted nothing");
        assert!((last.frequency - 220.0).abs() < 3.0, "got {}", last.frequency);
        assert!(last.timestamp > 0.0);
    }

    #[test]
    fn silence_is_unvoiced() {
        let samples = run(None, 96);
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.frequency == 0.0));
    }

    #[test]
    fn timestamps_follow_the_graph_clock() {
        let samples = run(Some(330.0), 96);
        assert!(samples.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
    }
}
