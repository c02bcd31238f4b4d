//! Level meter tap on the PA output.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dasp_graph::{Buffer, Input};

use crate::node::{silence, AudioNode, ProcessContext};

/// Read side of an [`Analyser`], cheap to clone and safe to poll from any thread.
#[derive(Clone, Debug, Default)]
pub struct AnalyserReadout {
    peak: Arc<AtomicU32>,
    rms: Arc<AtomicU32>,
}

impl AnalyserReadout {
    /// Peak absolute sample of the most recent block.
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    /// RMS level of the most recent block.
    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Relaxed))
    }

    pub fn peak_db(&self) -> f32 {
        crate::gain::linear_to_db(self.peak())
    }

    fn store(&self, peak: f32, rms: f32) {
        self.peak.store(peak.to_bits(), Ordering::Relaxed);
        self.rms.store(rms.to_bits(), Ordering::Relaxed);
    }
}

/// Stereo pass-through that publishes peak and RMS of each block.
pub struct Analyser {
    readout: AnalyserReadout,
}

impl Analyser {
    pub fn new() -> Self {
        Self {
            readout: AnalyserReadout::default(),
        }
    }

    pub fn readout(&self) -> AnalyserReadout {
        self.readout.clone()
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for Analyser {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        let buffers = inputs.first().map(|i| i.buffers()).unwrap_or(&[]);
        let Some(last) = buffers.last() else {
            silence(outputs);
            self.readout.store(0.0, 0.0);
            return;
        };

        let mut peak = 0.0_f32;
        let mut sum = 0.0_f32;
        let mut count = 0usize;
        for (ch, out) in outputs.iter_mut().enumerate() {
            let input = buffers.get(ch).unwrap_or(last);
            for (o, i) in out.iter_mut().zip(input.iter()) {
                *o = *i;
                peak = peak.max(i.abs());
                sum += i * i;
                count += 1;
            }
        }

        let rms = if count > 0 { (sum / count as f32).sqrt() } else { 0.0 };
        self.readout.store(peak, rms);
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        2
    }
}
