use serde::Deserialize;

use crate::error::{EngineError, Result};

use super::note_to_hz;

/// One frame of a vocal pitch reference.
///
/// `note == 0` marks silence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PitchFrame {
    pub note: u8,
    pub cents: i8,
}

impl PitchFrame {
    pub fn frequency(&self) -> Option<f32> {
        (self.note != 0).then(|| note_to_hz(self.note as f32 + self.cents as f32 / 100.0))
    }

    fn from_midi(midi: f64) -> Self {
        if !midi.is_finite() || midi <= 0.0 {
            return Self::default();
        }
        let note = midi.round().clamp(1.0, 127.0);
        let cents = ((midi - note) * 100.0).round().clamp(-50.0, 50.0);
        Self {
            note: note as u8,
            cents: cents as i8,
        }
    }
}

/// Pre-computed melody of the lead vocal, sampled at a fixed frame rate.
#[derive(Clone, Debug, PartialEq)]
pub struct VocalPitchTrack {
    frame_rate: f64,
    frames: Vec<PitchFrame>,
}

/// Shape of the offline pitch-extraction output.
#[derive(Deserialize)]
struct ExtractedPitch {
    #[serde(default)]
    time: Vec<f64>,
    midi: Vec<f64>,
    sample_rate: f64,
    hop_length: f64,
}

impl VocalPitchTrack {
    pub fn new(frame_rate: f64, frames: Vec<PitchFrame>) -> Self {
        Self { frame_rate, frames }
    }

    /// Build from `(note, cents)` pairs.
    pub fn from_pairs(frame_rate: f64, pairs: &[(u8, i8)]) -> Self {
        let frames = pairs.iter().map(|&(note, cents)| PitchFrame { note, cents }).collect();
        Self::new(frame_rate, frames)
    }

    /// Build from a packed `[note: u8, cents: i8]*` stream. A dangling odd byte is ignored.
    pub fn from_bytes(frame_rate: f64, bytes: &[u8]) -> Self {
        let frames = bytes
            .chunks_exact(2)
            .map(|pair| PitchFrame {
                note: pair[0],
                cents: pair[1] as i8,
            })
            .collect();
        Self::new(frame_rate, frames)
    }

    /// Build from the JSON written by the offline pitch extractor
    /// (`midi` values per hop, `sample_rate` / `hop_length` giving the frame rate).
    pub fn from_extracted_json(json: &str) -> Result<Self> {
        let parsed: ExtractedPitch = serde_json::from_str(json)?;
        if parsed.sample_rate <= 0.0 || parsed.hop_length <= 0.0 {
            return Err(EngineError::Config(format!(
                "pitch reference with sample_rate {} and hop_length {}",
                parsed.sample_rate, parsed.hop_length
            )));
        }
        if !parsed.time.is_empty() && parsed.time.len() != parsed.midi.len() {
            tracing::warn!(
                time = parsed.time.len(),
                midi = parsed.midi.len(),
                "pitch reference arrays differ in length, using midi"
            );
        }
        let frame_rate = parsed.sample_rate / parsed.hop_length;
        let frames = parsed.midi.iter().copied().map(PitchFrame::from_midi).collect();
        Ok(Self::new(frame_rate, frames))
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frames(&self) -> &[PitchFrame] {
        &self.frames
    }

    pub fn duration(&self) -> f64 {
        if self.frame_rate > 0.0 {
            self.frames.len() as f64 / self.frame_rate
        } else {
            0.0
        }
    }

    /// Reference pitch at song position `seconds`; `None` for silence or outside the track.
    pub fn frequency_at(&self, seconds: f64) -> Option<f32> {
        if seconds < 0.0 || self.frame_rate <= 0.0 {
            return None;
        }
        let index = (seconds * self.frame_rate) as usize;
        self.frames.get(index).and_then(PitchFrame::frequency)
    }
}
