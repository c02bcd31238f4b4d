//! Pitch-correction control: settings, the semitone math and the smoothing loop.
//!
//! The loop runs on the control thread at a fixed rate. Each tick compares the
//! reference pitch with the singer's pitch, folds the difference into one octave
//! so a singer an octave away is corrected to the nearest matching note, scales
//! it by the strength, smooths it by the speed and hands the result to the
//! pitch shifter.

use rtrb::Producer;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::nodes::effect::MAX_SEMITONES;
use crate::nodes::{PitchDetector, PitchShifter};
use crate::pitch::PitchSample;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoTuneSettings {
    pub enabled: bool,
    /// Share of the correction applied, 0 to 100
    pub strength: f32,
    /// How fast the applied shift follows the target, 1 to 100
    pub speed: f32,
    /// Use the song's vocal pitch reference when there is one
    pub prefer_vocals: bool,
}

impl Default for AutoTuneSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 80.0,
            speed: 50.0,
            prefer_vocals: true,
        }
    }
}

impl AutoTuneSettings {
    /// Clamp strength and speed into range; NaN falls back to the defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let fix = |v: f32, lo: f32, fallback: f32| if v.is_nan() { fallback } else { v.clamp(lo, 100.0) };
        Self {
            strength: fix(self.strength, 0.0, defaults.strength),
            speed: fix(self.speed, 1.0, defaults.speed),
            ..self
        }
    }
}

/// Signed distance from `mic` to `target` in semitones.
#[inline]
pub fn semitone_offset(target_hz: f32, mic_hz: f32) -> f32 {
    12.0 * (target_hz / mic_hz).log2()
}

/// Fold whole octaves away: the result lies strictly between -12 and 12.
///
/// Values within rounding distance of a whole octave count as that octave.
///
/// ```
/// use stagebus::autotune::fold_octave;
/// assert_eq!(fold_octave(36.0), 0.0);
/// assert_eq!(fold_octave(-13.0), -1.0);
/// ```
pub fn fold_octave(mut semitones: f32) -> f32 {
    if !semitones.is_finite() {
        return 0.0;
    }
    const EPSILON: f32 = 1e-3;
    while semitones >= 12.0 - EPSILON {
        semitones -= 12.0;
    }
    while semitones <= -12.0 + EPSILON {
        semitones += 12.0;
    }
    semitones
}

/// Octave-safe correction from `mic` towards `target`, or `None` if either is unusable.
pub fn correction_semitones(target_hz: f32, mic_hz: f32) -> Option<f32> {
    let usable = |hz: f32| hz.is_finite() && hz > 0.0;
    if !usable(target_hz) || !usable(mic_hz) {
        return None;
    }
    Some(fold_octave(semitone_offset(target_hz, mic_hz)).clamp(-MAX_SEMITONES, MAX_SEMITONES))
}

/// Rate limiter and smoothing state of the correction loop.
#[derive(Clone, Debug)]
pub struct AutoTuneLoop {
    interval: f64,
    next_tick: Option<f64>,
    smoothed: f32,
    engaged: bool,
}

impl AutoTuneLoop {
    /// `rate_hz` ticks per second.
    pub fn new(rate_hz: f64) -> Self {
        Self {
            interval: 1.0 / rate_hz.max(1.0),
            next_tick: None,
            smoothed: 0.0,
            engaged: false,
        }
    }

    /// Whether a tick is due at host time `now`. Late ticks are not caught up.
    pub fn due(&mut self, now: f64) -> bool {
        match self.next_tick {
            Some(next) if now < next => false,
            _ => {
                self.next_tick = Some(now + self.interval);
                true
            }
        }
    }

    #[inline]
    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    /// True while the loop has been driving the shifter since the last reset.
    #[inline]
    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// One tick: the shift to apply now.
    pub fn step(&mut self, settings: &AutoTuneSettings, target_hz: Option<f32>, mic_hz: Option<f32>) -> f32 {
        self.engaged = true;
        let Some(semitones) = target_hz.zip(mic_hz).and_then(|(t, m)| correction_semitones(t, m)) else {
            self.smoothed = 0.0;
            return 0.0;
        };

        let settings = settings.sanitized();
        let target_shift = semitones * settings.strength / 100.0;
        let speed = settings.speed / 100.0;
        self.smoothed = (self.smoothed * (1.0 - speed) + target_shift * speed).clamp(-MAX_SEMITONES, MAX_SEMITONES);
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.engaged = false;
        self.next_tick = None;
    }
}

/// Creates the detector and shifter of the correction chain.
///
/// Creation may fail (a unit that needs resources it cannot get); the
/// microphone then stays on its direct path.
pub trait CorrectionUnits: Send {
    fn detector(&self, output: Producer<PitchSample>) -> Result<PitchDetector>;

    fn shifter(&self, sample_rate: u32) -> Result<PitchShifter>;
}

/// The units shipped with the crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinUnits;

impl CorrectionUnits for BuiltinUnits {
    fn detector(&self, output: Producer<PitchSample>) -> Result<PitchDetector> {
        Ok(PitchDetector::new(output))
    }

    fn shifter(&self, sample_rate: u32) -> Result<PitchShifter> {
        Ok(PitchShifter::new(sample_rate))
    }
}
