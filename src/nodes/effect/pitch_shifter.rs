//! Real-time transposition of the microphone via signalsmith-stretch.

use dasp_graph::{Buffer, Input};
use signalsmith_stretch::Stretch;

use crate::graph::BLOCK_FRAMES;
use crate::node::{silence, AudioNode, ProcessContext};

/// Largest shift accepted in either direction.
pub const MAX_SEMITONES: f32 = 24.0;

#[derive(Clone, Copy, Debug)]
pub enum PitchShifterMessage {
    SetSemitones(f32),
    /// Drop internal state and return to no shift
    Reset,
}

/// Mono pitch shifter. Input and output lengths are equal, so only the
/// transpose factor changes the sound.
pub struct PitchShifter {
    stretch: Stretch,
    semitones: f32,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl PitchShifter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            stretch: Stretch::preset_default(1, sample_rate),
            semitones: 0.0,
            input: vec![0.0; BLOCK_FRAMES],
            output: vec![0.0; BLOCK_FRAMES],
        }
    }

    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    fn set_semitones(&mut self, semitones: f32) {
        let semitones = if semitones.is_finite() {
            semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES)
        } else {
            0.0
        };
        if semitones != self.semitones {
            self.semitones = semitones;
            self.stretch.set_transpose_factor_semitones(semitones, None);
        }
    }
}

impl AudioNode for PitchShifter {
    type Message = PitchShifterMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = PitchShifterMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                PitchShifterMessage::SetSemitones(s) => self.set_semitones(s),
                PitchShifterMessage::Reset => {
                    self.stretch.reset();
                    self.set_semitones(0.0);
                }
            }
        }

        let Some(buffer) = inputs.first().and_then(|i| i.buffers().first()) else {
            silence(outputs);
            return;
        };
        let Some(out) = outputs.first_mut() else { return };

        let len = buffer.len().min(self.input.len());
        self.input[..len].copy_from_slice(&buffer[..len]);
        self.stretch.process(&self.input[..len], &mut self.output[..len]);
        out[..len].copy_from_slice(&self.output[..len]);
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        1
    }
}
