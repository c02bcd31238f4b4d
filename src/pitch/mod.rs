//! Pitch data shared between the detector nodes, the reference tracker and the
//! auto-tune loop.

mod reference;
mod tracker;

pub use reference::{PitchFrame, VocalPitchTrack};
pub use tracker::ReferencePitchTracker;

use rtrb::Consumer;

/// One detector estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchSample {
    /// Fundamental in Hz; `0.0` when the window was unvoiced
    pub frequency: f32,
    /// Bus-clock time (seconds) of the end of the analysed window
    pub timestamp: f64,
}

impl PitchSample {
    #[inline]
    pub fn is_voiced(&self) -> bool {
        self.frequency > 0.0
    }
}

/// Frequency of a (fractional) MIDI note number.
#[inline]
pub fn note_to_hz(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

/// Control-side end of a detector's sample queue, remembering the newest sample.
pub struct PitchReadout {
    consumer: Consumer<PitchSample>,
    latest: Option<PitchSample>,
}

impl PitchReadout {
    pub fn new(consumer: Consumer<PitchSample>) -> Self {
        Self { consumer, latest: None }
    }

    /// Drain the queue and return the newest sample seen so far.
    pub fn latest(&mut self) -> Option<PitchSample> {
        while let Ok(sample) = self.consumer.pop() {
            self.latest = Some(sample);
        }
        self.latest
    }

    /// Newest voiced sample no older than `max_age` seconds at bus time `now`.
    pub fn fresh(&mut self, now: f64, max_age: f64) -> Option<f32> {
        self.latest()
            .filter(|s| s.is_voiced() && now - s.timestamp <= max_age)
            .map(|s| s.frequency)
    }

    /// Forget the remembered sample (after a seek or a restart).
    pub fn clear(&mut self) {
        while self.consumer.pop().is_ok() {}
        self.latest = None;
    }
}
