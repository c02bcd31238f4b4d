//! Play/pause/seek bookkeeping and end-of-song detection.
//!
//! The position is never integrated: while playing it is rebuilt from the bus
//! clock as `base + (now - start_time)`, so it cannot drift from what the
//! devices actually played.

use serde::{Deserialize, Serialize};

/// Shared start time for a play segment: `lead` seconds after the later of the
/// two bus clocks.
///
/// ```
/// use stagebus::transport::schedule_time;
/// assert!((schedule_time(5.0, 5.3, 0.1) - 5.4).abs() < 1e-9);
/// ```
#[inline]
pub fn schedule_time(pa_now: f64, iem_now: f64, lead: f64) -> f64 {
    pa_now.max(iem_now) + lead
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transport {
    playing: bool,
    /// Position at the last pause/seek
    base: f64,
    /// Bus-clock time the current play segment started at
    start_time: f64,
    duration: f64,
}

impl Transport {
    pub fn new(duration: f64) -> Self {
        Self {
            duration: duration.max(0.0),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Position at the start of the current (or next) play segment.
    #[inline]
    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Position in seconds at bus time `now`, within `[0, duration]`.
    ///
    /// Before the segment's start time arrives the elapsed part counts as zero.
    pub fn position(&self, now: f64) -> f64 {
        if self.playing {
            let elapsed = (now - self.start_time).max(0.0);
            (self.base + elapsed).clamp(0.0, self.duration)
        } else {
            self.base
        }
    }

    /// Begin a play segment at `start_time` from the stored position.
    pub fn start(&mut self, start_time: f64) {
        self.start_time = start_time;
        self.playing = true;
    }

    /// Freeze the position reached at `now`.
    pub fn pause(&mut self, now: f64) -> f64 {
        self.base = self.position(now);
        self.playing = false;
        self.base
    }

    /// Stop the clock without touching the stored position.
    pub fn hold(&mut self) {
        self.playing = false;
    }

    /// Move to `position` (clamped). Restarting sources is up to the caller.
    pub fn seek(&mut self, position: f64) -> f64 {
        self.base = if position.is_finite() {
            position.clamp(0.0, self.duration)
        } else {
            0.0
        };
        self.base
    }

    /// Stop and rewind.
    pub fn stop(&mut self) {
        self.playing = false;
        self.base = 0.0;
    }

    /// Stop at the end of the song.
    pub fn finish(&mut self) {
        self.playing = false;
        self.base = self.duration;
    }
}

/// Periodic check for "close enough to the end".
///
/// Only fires once polling has been running for `min_monitoring` seconds, so
/// starting playback right at the end of a song does not end it instantly.
#[derive(Clone, Debug)]
pub struct EndOfSongMonitor {
    interval: f64,
    threshold: f64,
    min_monitoring: f64,
    started_at: Option<f64>,
    last_poll: f64,
}

impl EndOfSongMonitor {
    pub fn new(interval: f64, threshold: f64, min_monitoring: f64) -> Self {
        Self {
            interval,
            threshold,
            min_monitoring,
            started_at: None,
            last_poll: f64::NEG_INFINITY,
        }
    }

    pub fn start(&mut self, now: f64) {
        self.started_at = Some(now);
        self.last_poll = now;
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Returns true when the song should end. Checks at most once per interval.
    pub fn poll(&mut self, now: f64, position: f64, duration: f64) -> bool {
        let Some(started_at) = self.started_at else {
            return false;
        };
        if now - self.last_poll < self.interval {
            return false;
        }
        self.last_poll = now;

        now - started_at >= self.min_monitoring && position >= duration - self.threshold
    }
}

/// Debounce for the "every clip ran out" backup trigger.
#[derive(Clone, Debug)]
pub struct ClipEndDebounce {
    delay: f64,
    since: Option<f64>,
}

impl ClipEndDebounce {
    pub fn new(delay: f64) -> Self {
        Self { delay, since: None }
    }

    /// Feed the current "all finished" state; true once it held for `delay` seconds.
    pub fn observe(&mut self, all_finished: bool, now: f64) -> bool {
        if !all_finished {
            self.since = None;
            return false;
        }
        let since = *self.since.get_or_insert(now);
        now - since >= self.delay
    }

    pub fn reset(&mut self) {
        self.since = None;
    }
}

/// Transport as reported to observers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportSnapshot {
    pub playing: bool,
    pub position: f64,
    pub duration: f64,
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn schedule_uses_later_clock() {
        assert_relative_eq!(schedule_time(5.0, 5.3, 0.1), 5.4);
        assert_relative_eq!(schedule_time(7.0, 2.0, 0.1), 7.1);
    }

    #[test]
    fn position_waits_for_start_time() {
        let mut t = Transport::new(120.0);
        t.seek(10.0);
        t.start(5.4);
        assert_eq!(t.position(5.0), 10.0);
        assert_relative_eq!(t.position(6.4), 11.0);
    }

    #[test]
    fn pause_captures_elapsed_before_stopping() {
        let mut t = Transport::new(120.0);
        t.start(1.0);
        assert_relative_eq!(t.pause(61.0), 60.0);
        assert!(!t.is_playing());
        // paused position ignores the clock
        assert_relative_eq!(t.position(500.0), 60.0);
    }

    #[test]
    fn seek_and_stop_clamp() {
        let mut t = Transport::new(30.0);
        assert_eq!(t.seek(45.0), 30.0);
        assert_eq!(t.seek(-2.0), 0.0);
        assert_eq!(t.seek(f64::NAN), 0.0);
        t.seek(12.0);
        t.stop();
        assert_eq!(t.position(0.0), 0.0);
        t.finish();
        assert_eq!(t.position(0.0), 30.0);
    }

    #[test]
    fn monitor_needs_minimum_window() {
        let mut m = EndOfSongMonitor::new(0.25, 0.2, 2.0);
        assert!(!m.poll(10.0, 100.0, 100.0));
        m.start(10.0);
        // at the end, but monitoring only just began
        assert!(!m.poll(10.5, 99.9, 100.0));
        assert!(!m.poll(11.0, 50.0, 100.0));
        assert!(m.poll(12.0, 99.85, 100.0));
    }

    #[test]
    fn monitor_rate_limits() {
        let mut m = EndOfSongMonitor::new(0.25, 0.2, 0.0);
        m.start(0.0);
        assert!(!m.poll(0.1, 100.0, 100.0));
        assert!(m.poll(0.3, 100.0, 100.0));
        m.stop();
        assert!(!m.poll(1.0, 100.0, 100.0));
    }

    #[test]
    fn clip_end_debounce() {
        let mut d = ClipEndDebounce::new(0.01);
        assert!(!d.observe(true, 1.0));
        assert!(!d.observe(false, 1.005));
        assert!(!d.observe(true, 1.006));
        assert!(d.observe(true, 1.02));
    }

    proptest! {
        #[test]
        fn position_is_monotonic_and_bounded(
            duration in 1.0f64..600.0,
            base in 0.0f64..600.0,
            steps in proptest::collection::vec(0.0f64..5.0, 1..50),
        ) {
            let mut t = Transport::new(duration);
            t.seek(base);
            t.start(100.0);
            let mut now = 99.0;
            let mut last = t.position(now);
            for step in steps {
                now += step;
                let pos = t.position(now);
                prop_assert!(pos >= last);
                prop_assert!(pos <= duration);
                last = pos;
            }
        }
    }
}
