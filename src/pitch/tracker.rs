use std::sync::Arc;

use crate::autotune::AutoTuneSettings;

use super::{PitchReadout, VocalPitchTrack};

/// Chooses the target pitch the singer is corrected towards.
///
/// With `prefer_vocals` and a vocal pitch reference loaded, the reference is
/// sampled at the song position. Otherwise the newest live estimate from the
/// melodic backing stem is used, as long as it is voiced and fresh.
pub struct ReferencePitchTracker {
    vocal_track: Option<Arc<VocalPitchTrack>>,
    backing: Option<PitchReadout>,
    freshness: f64,
}

impl ReferencePitchTracker {
    /// `freshness` is the maximum age, in seconds, of a usable backing estimate.
    pub fn new(freshness: f64) -> Self {
        Self {
            vocal_track: None,
            backing: None,
            freshness,
        }
    }

    pub fn set_vocal_track(&mut self, track: Option<Arc<VocalPitchTrack>>) {
        self.vocal_track = track;
    }

    pub fn has_vocal_track(&self) -> bool {
        self.vocal_track.is_some()
    }

    /// Attach (or detach) the detector on the melodic backing stem.
    pub fn set_backing(&mut self, readout: Option<PitchReadout>) {
        self.backing = readout;
    }

    pub fn has_backing(&self) -> bool {
        self.backing.is_some()
    }

    /// Target frequency in Hz for the current instant.
    ///
    /// - `position`: song position in seconds
    /// - `bus_now`: PA bus-clock time, the clock backing estimates are stamped with
    pub fn target(&mut self, settings: &AutoTuneSettings, playing: bool, position: f64, bus_now: f64) -> Option<f32> {
        if !settings.enabled || !playing {
            return None;
        }

        if settings.prefer_vocals {
            if let Some(track) = &self.vocal_track {
                return track.frequency_at(position);
            }
        }

        self.backing.as_mut()?.fresh(bus_now, self.freshness)
    }

    /// Drop any remembered backing estimate.
    pub fn reset(&mut self) {
        if let Some(backing) = self.backing.as_mut() {
            backing.clear();
        }
    }
}
