//! Stem playback across the two buses.
//!
//! ```text
//! Empty ──load──► Loaded ──play──► Playing ◄──play/pause──► Paused
//!   ▲                ▲                 │
//!   └────load────────┴──stop / end─────┘
//! ```
//!
//! Every play segment spawns one [`ClipPlayer`] per stem and bus, all keyed
//! to a single schedule time. Vocal stems go to the in-ear bus (plus a copy
//! into the PA's vocals override stage), everything else to the PA. Pausing
//! and seeking throw the clips away; the next segment builds fresh ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtrb::RingBuffer;
use serde::Serialize;

use crate::autotune::AutoTuneSettings;
use crate::config::EngineConfig;
use crate::decode::{StemCache, StemDecoder};
use crate::error::{EngineError, Result};
use crate::gain::db_to_linear;
use crate::graph::Handle;
use crate::mixer::StemView;
use crate::node::NodeId;
use crate::nodes::{ClipMessage, ClipPlayer, PitchDetector};
use crate::pitch::{PitchReadout, ReferencePitchTracker};
use crate::router::{BusId, Router};
use crate::stem::{classify, reference_stem, Song, StemClass, StemKind};
use crate::transport::{schedule_time, ClipEndDebounce, EndOfSongMonitor, Transport, TransportSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Empty,
    Loaded,
    Playing,
    Paused,
}

#[derive(Clone, Debug)]
struct StemEntry {
    name: String,
    gain_db: f32,
    class: StemClass,
    duration: f64,
}

/// Where a clip is connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Feed {
    Mix,
    /// The PA's vocals override stage
    VocalsPa,
    /// Through a pitch detector into the mix
    Reference,
}

struct ActiveClip {
    bus: BusId,
    stem: usize,
    handle: Handle<ClipMessage>,
    detector: Option<NodeId>,
    finished: Arc<AtomicBool>,
}

/// Outcome of [`Scheduler::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub decoded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<EngineError>,
}

pub struct Scheduler {
    state: PlaybackState,
    title: Option<String>,
    stems: Vec<StemEntry>,
    cache: StemCache,
    transport: Transport,
    active: Vec<ActiveClip>,
    reference: Option<usize>,
    tracker: ReferencePitchTracker,
    vocals_pa: bool,
    monitor: EndOfSongMonitor,
    clip_end: ClipEndDebounce,
    lead: f64,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: PlaybackState::Empty,
            title: None,
            stems: Vec::new(),
            cache: StemCache::new(),
            transport: Transport::new(0.0),
            active: Vec::new(),
            reference: None,
            tracker: ReferencePitchTracker::new(config.reference_freshness),
            vocals_pa: false,
            monitor: EndOfSongMonitor::new(config.end_poll_interval, config.end_threshold, config.min_monitoring),
            clip_end: ClipEndDebounce::new(config.clip_end_debounce),
            lead: config.schedule_lead,
        }
    }

    #[inline]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn duration(&self) -> f64 {
        self.transport.duration()
    }

    /// Song position in seconds, read from the PA clock while playing.
    pub fn position(&self, router: &Router) -> f64 {
        match router.bus(BusId::Pa) {
            Some(pa) => self.transport.position(pa.now()),
            None => self.transport.base(),
        }
    }

    pub fn snapshot(&self, router: &Router) -> TransportSnapshot {
        TransportSnapshot {
            playing: self.is_playing(),
            position: self.position(router),
            duration: self.duration(),
            title: self.title.clone(),
        }
    }

    pub fn stems(&self) -> Vec<StemView> {
        self.stems
            .iter()
            .map(|s| StemView {
                name: s.name.clone(),
                gain_db: s.gain_db,
                kind: s.class.kind,
                melodic: s.class.melodic,
                duration: s.duration,
            })
            .collect()
    }

    /// Number of clips currently in the graphs.
    pub fn active_sources(&self) -> usize {
        self.active.len()
    }

    /// Number of live clips on `bus`.
    pub fn active_on(&self, bus: BusId) -> usize {
        self.active.iter().filter(|c| c.bus == bus).count()
    }

    /// Replace the current song. Decoding is sequential; stems that fail are
    /// skipped. Fails with [`EngineError::NoSong`] only if nothing decoded.
    pub fn load(&mut self, song: Song, decoder: &dyn StemDecoder, router: &mut Router) -> Result<LoadReport> {
        self.stop_sources(router);
        self.monitor.stop();
        self.cache.clear();
        self.stems.clear();
        self.state = PlaybackState::Empty;
        self.transport = Transport::new(0.0);

        let mut report = LoadReport::default();
        for payload in song.stems {
            let class = classify(&payload.name);
            if class.kind == StemKind::Mixdown {
                tracing::debug!(stem = %payload.name, "skipping mixdown");
                report.skipped.push(payload.name);
                continue;
            }
            if self.stems.iter().any(|s| s.name == payload.name) {
                tracing::warn!(stem = %payload.name, "duplicate stem name, keeping the first");
                report.skipped.push(payload.name);
                continue;
            }
            // bytes are dropped at the end of this iteration
            match decoder.decode(&payload.name, &payload.bytes) {
                Ok(buffer) => {
                    let duration = buffer.duration();
                    self.cache.insert(&payload.name, buffer);
                    report.decoded.push(payload.name.clone());
                    self.stems.push(StemEntry {
                        name: payload.name,
                        gain_db: clamp_gain_db(payload.gain_db),
                        class,
                        duration,
                    });
                }
                Err(err) => {
                    tracing::warn!(stem = %payload.name, %err, "stem skipped");
                    report.failed.push(err);
                }
            }
        }

        if self.stems.is_empty() {
            return Err(EngineError::NoSong);
        }

        self.prepare_all(router);
        self.reference = reference_stem(self.stems.iter().map(|s| s.name.as_str()));
        self.tracker.set_vocal_track(song.vocal_pitch);
        self.tracker.set_backing(None);
        self.title = song.title;
        self.transport = Transport::new(self.cache.duration());
        self.state = PlaybackState::Loaded;

        tracing::info!(
            stems = self.stems.len(),
            failed = report.failed.len(),
            duration = self.duration(),
            reference = ?self.reference.map(|i| &self.stems[i].name),
            "song loaded"
        );
        Ok(report)
    }

    /// Convert every stem to the rates of the current buses.
    pub fn prepare_all(&mut self, router: &Router) {
        for bus in BusId::ALL {
            if let Some(rate) = router.bus(bus).map(|b| b.sample_rate()) {
                for stem in &self.stems {
                    self.cache.prepare(&stem.name, rate);
                }
            }
        }
    }

    /// Start a play segment from the stored position. Returns the schedule time.
    pub fn play(&mut self, router: &mut Router, host_now: f64) -> Result<f64> {
        match self.state {
            PlaybackState::Empty => return Err(EngineError::NoSong),
            PlaybackState::Playing => return Ok(self.transport.start_time()),
            PlaybackState::Loaded | PlaybackState::Paused => {}
        }
        let (pa_now, iem_now) = router.latest_now().ok_or(EngineError::NotInitialized)?;
        let at = schedule_time(pa_now, iem_now, self.lead);

        self.start_sources(router, at);
        self.transport.start(at);
        self.state = PlaybackState::Playing;
        self.monitor.start(host_now);
        self.clip_end.reset();

        tracing::info!(at, from = self.transport.base(), "playback started");
        Ok(at)
    }

    /// Freeze the position and drop every clip. Safe in any state.
    pub fn pause(&mut self, router: &mut Router) -> f64 {
        if self.state == PlaybackState::Playing {
            // position first, it depends on the playing flag
            let now = router.bus(BusId::Pa).map(|b| b.now()).unwrap_or(self.transport.start_time());
            let position = self.transport.pause(now);
            self.stop_sources(router);
            self.monitor.stop();
            self.state = PlaybackState::Paused;
            tracing::info!(position, "paused");
        }
        self.transport.base()
    }

    pub fn seek(&mut self, router: &mut Router, position: f64, host_now: f64) -> Result<f64> {
        if self.state == PlaybackState::Empty {
            return Err(EngineError::NoSong);
        }
        let was_playing = self.is_playing();
        if was_playing {
            self.stop_sources(router);
            self.transport.hold();
        }
        let position = self.transport.seek(position);
        self.state = PlaybackState::Paused;
        if was_playing {
            self.play(router, host_now)?;
        }
        Ok(position)
    }

    /// Stop and rewind. Safe in any state.
    pub fn stop(&mut self, router: &mut Router) {
        self.stop_sources(router);
        self.monitor.stop();
        self.transport.stop();
        if self.state != PlaybackState::Empty {
            self.state = PlaybackState::Loaded;
        }
    }

    /// Change a stem's gain on every live clip of it. Returns false for unknown stems.
    pub fn set_stem_gain(&mut self, name: &str, db: f32) -> bool {
        let Some(index) = self.stems.iter().position(|s| s.name == name) else {
            return false;
        };
        let db = clamp_gain_db(db);
        self.stems[index].gain_db = db;
        let volume = db_to_linear(db);
        for clip in self.active.iter_mut().filter(|c| c.stem == index) {
            if clip.handle.send(ClipMessage::SetVolume(volume)).is_err() {
                tracing::warn!(stem = name, "clip queue full");
            }
        }
        true
    }

    pub fn vocals_pa(&self) -> bool {
        self.vocals_pa
    }

    /// Fade the vocal copies on the PA in or out.
    pub fn set_vocals_pa(&mut self, router: &mut Router, enabled: bool, fade_secs: f32) {
        self.vocals_pa = enabled;
        if let Some(pa) = router.bus_mut(BusId::Pa) {
            pa.ramp_vocals_pa(if enabled { 1.0 } else { 0.0 }, fade_secs.max(0.0));
        }
    }

    /// Target pitch for the correction loop right now.
    pub fn target_pitch(&mut self, settings: &AutoTuneSettings, router: &Router) -> Option<f32> {
        let pa = router.bus(BusId::Pa)?;
        let position = self.transport.position(pa.now());
        self.tracker.target(settings, self.is_playing(), position, pa.device_time())
    }

    /// End-of-song checks. Returns true when the song just ended.
    pub fn tick(&mut self, router: &mut Router, host_now: f64) -> bool {
        if !self.is_playing() {
            return false;
        }

        let position = self.position(router);
        let polled = self.monitor.poll(host_now, position, self.duration());
        let all_finished = !self.active.is_empty() && self.active.iter().all(|c| c.finished.load(Ordering::Relaxed));
        let clips_done = self.clip_end.observe(all_finished, host_now);

        if polled || clips_done {
            tracing::info!(position, by_clips = clips_done && !polled, "song ended");
            self.stop_sources(router);
            self.monitor.stop();
            self.transport.finish();
            self.state = PlaybackState::Loaded;
            return true;
        }
        false
    }

    fn start_sources(&mut self, router: &mut Router, at: f64) {
        let offset = self.transport.base();
        for index in 0..self.stems.len() {
            match self.stems[index].class.kind {
                StemKind::Mixdown => {}
                StemKind::Vocal => {
                    self.spawn(router, BusId::Iem, index, at, offset, Feed::Mix);
                    self.spawn(router, BusId::Pa, index, at, offset, Feed::VocalsPa);
                }
                StemKind::Backing => {
                    let feed = if Some(index) == self.reference { Feed::Reference } else { Feed::Mix };
                    self.spawn(router, BusId::Pa, index, at, offset, feed);
                }
            }
        }
    }

    fn spawn(&mut self, router: &mut Router, bus_id: BusId, index: usize, at: f64, offset: f64, feed: Feed) {
        let Some(bus) = router.bus_mut(bus_id) else {
            return;
        };
        let stem = &self.stems[index];
        let rate = bus.sample_rate();
        let Some(buffer) = self.cache.prepare(&stem.name, rate) else {
            return;
        };

        let offset_frames = ((offset.min(buffer.duration()) * rate as f64).round() as u64).min(buffer.frames() as u64);
        let at_frame = bus.frame_at(at);
        let clip = ClipPlayer::new(buffer, at_frame, offset_frames).with_volume(db_to_linear(stem.gain_db));
        let finished = clip.finished_flag();
        let channels = clip.channels();

        let mix = bus.mix();
        let vocals_pa = bus.vocals_pa();
        let graph = bus.graph_mut();
        let handle = graph.add(clip);
        let mut detector = None;

        match (feed, vocals_pa) {
            (Feed::VocalsPa, Some(stage)) => graph.connect(handle.id(), stage),
            (Feed::Reference, _) => {
                let (tx, rx) = RingBuffer::new(64);
                let node = graph.add(PitchDetector::new(tx).with_channels(channels));
                graph.connect(handle.id(), node.id());
                graph.connect(node.id(), mix);
                detector = Some(node.id());
                self.tracker.set_backing(Some(PitchReadout::new(rx)));
            }
            _ => graph.connect(handle.id(), mix),
        }

        tracing::debug!(stem = %stem.name, bus = %bus_id, at_frame, offset_frames, "clip scheduled");
        self.active.push(ActiveClip {
            bus: bus_id,
            stem: index,
            handle,
            detector,
            finished,
        });
    }

    fn stop_sources(&mut self, router: &mut Router) {
        for mut clip in self.active.drain(..) {
            let _ = clip.handle.send(ClipMessage::Stop);
            if let Some(bus) = router.bus_mut(clip.bus) {
                let graph = bus.graph_mut();
                graph.remove(clip.handle.id());
                if let Some(detector) = clip.detector {
                    graph.remove(detector);
                }
            }
        }
        self.tracker.set_backing(None);
        self.clip_end.reset();
    }
}

/// Stem gains are capped at what a clip can apply; non-finite means unity.
fn clamp_gain_db(db: f32) -> f32 {
    if db.is_finite() {
        db.min(crate::gain::MAX_GAIN_DB)
    } else {
        0.0
    }
}
