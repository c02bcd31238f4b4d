//! The two output buses and their render graphs.
//!
//! ```text
//! PA:   clips ─┐
//!   vocals_pa ─┼─► mix ─► master ─► analyser ─► device
//!         mic ─┘
//! IEM:  clips ───► mix ─► mono fold ─► master ─► device
//! ```
//!
//! Each bus owns an [`AudioGraph`] rendered on the control thread into the ring
//! buffer of its output stream. Bus time is `origin + frames played / rate`,
//! where `origin` is the host time the stream was opened at; that puts both
//! independently clocked devices on one timeline so a shared schedule time
//! means the same instant on each of them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::device::{AudioBackend, DeviceInfo, StreamClock, StreamGuard};
use crate::error::{EngineError, Result};
use crate::gain::audible_gain;
use crate::graph::{AudioGraph, Handle, BLOCK_FRAMES};
use crate::node::NodeId;
use crate::nodes::{Analyser, AnalyserReadout, DeviceSink, Gain, GainMessage, Mixer, MonoFold, MonoFoldMessage};

/// Output rings are sized for this rate so one allocation fits any device.
const MAX_DEVICE_RATE: u32 = 192_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusId {
    /// Public address: what the audience hears
    Pa,
    /// In-ear monitor: what the performer hears
    Iem,
}

impl BusId {
    pub const ALL: [BusId; 2] = [BusId::Pa, BusId::Iem];

    #[inline]
    fn index(self) -> usize {
        match self {
            BusId::Pa => 0,
            BusId::Iem => 1,
        }
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusId::Pa => "PA",
            BusId::Iem => "IEM",
        })
    }
}

/// Master level of a bus as it should be heard.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MasterLevel {
    pub gain_db: f32,
    pub muted: bool,
}

pub struct Bus {
    id: BusId,
    info: DeviceInfo,
    graph: AudioGraph,
    clock: StreamClock,
    origin: f64,
    generation: u64,
    render_ahead: u64,
    mix: NodeId,
    master: Handle<GainMessage>,
    mono: Option<Handle<MonoFoldMessage>>,
    vocals_pa: Option<Handle<GainMessage>>,
    analyser: Option<AnalyserReadout>,
    // dropped last: releases the device
    _guard: StreamGuard,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Open `device_id` and build the bus topology, starting at `level`.
    pub fn open(
        id: BusId,
        backend: &dyn AudioBackend,
        device_id: &str,
        config: &EngineConfig,
        level: MasterLevel,
        mono: bool,
        host_now: f64,
    ) -> Result<Bus> {
        let stream = backend.open_output(device_id, config.render_ahead_frames(MAX_DEVICE_RATE) * 2)?;
        let info = stream.info;
        let sample_rate = info.sample_rate;
        let render_ahead = config.render_ahead_frames(sample_rate);
        if render_ahead as f64 / sample_rate.max(1) as f64 >= config.schedule_lead {
            return Err(EngineError::Config(format!(
                "{render_ahead} frames of render-ahead at {sample_rate} Hz reach past the {}s schedule lead",
                config.schedule_lead
            )));
        }
        let channels = info.channels.max(1) as usize;

        let mut graph = AudioGraph::new(sample_rate);
        let sink = graph.add(DeviceSink::new(stream.producer, channels));
        graph.set_terminal(sink.id());

        let mix = graph.add(Mixer::stereo());
        let master = graph.add(Gain::new(audible_gain(level.gain_db, level.muted)).with_smoothing_ms(5.0, sample_rate));

        let (mono_fold, vocals_pa, analyser) = match id {
            BusId::Pa => {
                let analyser = Analyser::new();
                let readout = analyser.readout();
                let analyser = graph.add(analyser);
                let vocals_pa = graph.add(Gain::new(0.0).with_smoothing_ms(5.0, sample_rate));

                graph.connect(vocals_pa.id(), mix.id());
                graph.connect(mix.id(), master.id());
                graph.connect(master.id(), analyser.id());
                graph.connect(analyser.id(), sink.id());
                (None, Some(vocals_pa), Some(readout))
            }
            BusId::Iem => {
                let fold = graph.add(MonoFold::new(mono));
                graph.connect(mix.id(), fold.id());
                graph.connect(fold.id(), master.id());
                graph.connect(master.id(), sink.id());
                (Some(fold), None, None)
            }
        };

        tracing::info!(bus = %id, device = %info.label, sample_rate, channels, "bus opened");

        Ok(Bus {
            id,
            info,
            graph,
            clock: stream.clock,
            origin: host_now,
            generation: 0,
            render_ahead: render_ahead as u64,
            mix: mix.id(),
            master,
            mono: mono_fold,
            vocals_pa,
            analyser,
            _guard: stream.guard,
        })
    }

    #[inline]
    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.info
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.graph.sample_rate()
    }

    /// Bumped every time the router installs a new bus for this id.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current bus time in seconds on the shared host timeline.
    #[inline]
    pub fn now(&self) -> f64 {
        self.origin + self.clock.seconds()
    }

    /// Seconds the device has played; the timeline detector samples are stamped on.
    #[inline]
    pub fn device_time(&self) -> f64 {
        self.clock.seconds()
    }

    /// Graph frame at which bus time `time` is played.
    pub fn frame_at(&self, time: f64) -> u64 {
        ((time - self.origin).max(0.0) * self.sample_rate() as f64).round() as u64
    }

    pub fn graph_mut(&mut self) -> &mut AudioGraph {
        &mut self.graph
    }

    /// Node everything played on this bus is connected to.
    #[inline]
    pub fn mix(&self) -> NodeId {
        self.mix
    }

    /// The vocals-to-PA override stage (PA only).
    pub fn vocals_pa(&self) -> Option<NodeId> {
        self.vocals_pa.as_ref().map(Handle::id)
    }

    pub fn analyser(&self) -> Option<AnalyserReadout> {
        self.analyser.clone()
    }

    pub fn set_master(&mut self, level: MasterLevel, ramp_secs: f32) {
        let gain = audible_gain(level.gain_db, level.muted);
        send(&mut self.master, GainMessage::RampTo { gain, seconds: ramp_secs }, "master");
    }

    pub fn set_mono(&mut self, enabled: bool) {
        if let Some(fold) = self.mono.as_mut() {
            if fold.send(MonoFoldMessage::SetEnabled(enabled)).is_err() {
                tracing::warn!(bus = %self.id, "mono fold queue full");
            }
        }
    }

    /// Ramp the vocals-to-PA override to `gain` (linear).
    pub fn ramp_vocals_pa(&mut self, gain: f32, seconds: f32) {
        if let Some(stage) = self.vocals_pa.as_mut() {
            send(stage, GainMessage::RampTo { gain, seconds }, "vocals_pa");
        }
    }

    /// Render until the graph is `render_ahead` frames past the device.
    ///
    /// A graph that fell behind the device (underrun) jumps forward instead of
    /// rendering audio that is already late. Returns the number of blocks rendered.
    pub fn render(&mut self) -> usize {
        let played = self.clock.frames();
        if self.graph.frame() < played {
            tracing::debug!(bus = %self.id, behind = played - self.graph.frame(), "render fell behind, jumping");
            self.graph.jump_to(played);
        }

        let target = played + self.render_ahead;
        let mut blocks = 0;
        while self.graph.frame() + BLOCK_FRAMES as u64 <= target {
            self.graph.process();
            blocks += 1;
        }
        blocks
    }
}

fn send(handle: &mut Handle<GainMessage>, msg: GainMessage, stage: &str) {
    if handle.send(msg).is_err() {
        tracing::warn!(stage, "gain queue full, change dropped");
    }
}

#[derive(Default)]
struct Slot {
    bus: Option<Bus>,
    busy: bool,
    generation: u64,
}

/// Owner of the PA and IEM buses.
///
/// Swapping a bus is a two-step affair (build the replacement, then install it),
/// guarded by a per-bus in-flight flag.
#[derive(Default)]
pub struct Router {
    slots: [Slot; 2],
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.slots[id.index()].bus.as_ref()
    }

    pub fn bus_mut(&mut self, id: BusId) -> Option<&mut Bus> {
        self.slots[id.index()].bus.as_mut()
    }

    pub fn is_ready(&self) -> bool {
        self.slots.iter().all(|s| s.bus.is_some())
    }

    /// Mark `id` as being rebuilt. Fails if an operation is already in flight.
    pub fn begin(&mut self, id: BusId) -> Result<()> {
        let slot = &mut self.slots[id.index()];
        if slot.busy {
            return Err(EngineError::BusBusy(id));
        }
        slot.busy = true;
        Ok(())
    }

    pub fn finish(&mut self, id: BusId) {
        self.slots[id.index()].busy = false;
    }

    /// Install `bus`, returning the one it replaces.
    pub fn install(&mut self, mut bus: Bus) -> Option<Bus> {
        let slot = &mut self.slots[bus.id.index()];
        slot.generation += 1;
        bus.generation = slot.generation;
        slot.bus.replace(bus)
    }

    pub fn take(&mut self, id: BusId) -> Option<Bus> {
        self.slots[id.index()].bus.take()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.bus = None;
            slot.busy = false;
        }
    }

    /// Later of the two bus clocks; `None` until both exist.
    pub fn latest_now(&self) -> Option<(f64, f64)> {
        Some((self.bus(BusId::Pa)?.now(), self.bus(BusId::Iem)?.now()))
    }

    pub fn render(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(bus) = slot.bus.as_mut() {
                bus.render();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessBackend;

    fn unity() -> MasterLevel {
        MasterLevel {
            gain_db: 0.0,
            muted: false,
        }
    }

    fn open(backend: &HeadlessBackend, id: BusId) -> Bus {
        Bus::open(id, backend, "headless-out", &EngineConfig::default(), unity(), false, 0.0).unwrap()
    }

    #[test]
    fn display_names() {
        assert_eq!(BusId::Pa.to_string(), "PA");
        assert_eq!(BusId::Iem.to_string(), "IEM");
    }

    #[test]
    fn renders_ahead_of_device() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut bus = open(&backend, BusId::Pa);
        let blocks = bus.render();
        assert_eq!(blocks, 1920 / BLOCK_FRAMES);
        assert_eq!(bus.render(), 0);

        backend.advance(0.01);
        assert_eq!(bus.render(), 480 / BLOCK_FRAMES);
    }

    #[test]
    fn render_ahead_past_the_lead_is_rejected() {
        // a single block at 500 Hz is already longer than the lead
        let backend = HeadlessBackend::with_defaults(500);
        let config = EngineConfig {
            schedule_lead: 0.1,
            ..EngineConfig::default()
        };
        let err = Bus::open(BusId::Pa, &backend, "headless-out", &config, unity(), false, 0.0).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(backend.open_outputs().is_empty());

        let backend = HeadlessBackend::with_defaults(8_000);
        let bus = Bus::open(BusId::Pa, &backend, "headless-out", &config, unity(), false, 0.0).unwrap();
        assert_eq!(bus.sample_rate(), 8_000);
    }

    #[test]
    fn jumps_after_underrun() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut bus = open(&backend, BusId::Iem);
        backend.advance(1.0);
        bus.render();
        assert!(bus.graph_mut().frame() >= 48_000);
    }

    #[test]
    fn bus_time_is_offset_by_origin() {
        let backend = HeadlessBackend::with_defaults(1000);
        let bus = Bus::open(BusId::Iem, &backend, "headless-out", &EngineConfig::default(), unity(), false, 10.0).unwrap();
        backend.advance(0.5);
        assert!((bus.now() - 10.5).abs() < 1e-9);
        assert_eq!(bus.frame_at(11.0), 1000);
        assert_eq!(bus.frame_at(3.0), 0);
    }

    #[test]
    fn install_bumps_generation_and_guards() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut router = Router::new();
        assert!(router.install(open(&backend, BusId::Pa)).is_none());
        let old = router.install(open(&backend, BusId::Pa));
        assert_eq!(old.map(|b| b.generation()), Some(1));
        assert_eq!(router.bus(BusId::Pa).map(Bus::generation), Some(2));

        router.begin(BusId::Iem).unwrap();
        assert!(matches!(router.begin(BusId::Iem), Err(EngineError::BusBusy(BusId::Iem))));
        router.finish(BusId::Iem);
        assert!(router.begin(BusId::Iem).is_ok());
    }

    #[test]
    fn muted_master_is_silent() {
        let backend = HeadlessBackend::with_defaults(48_000);
        backend.record("headless-out");
        let mut bus = Bus::open(
            BusId::Pa,
            &backend,
            "headless-out",
            &EngineConfig::default(),
            MasterLevel {
                gain_db: 0.0,
                muted: true,
            },
            false,
            0.0,
        )
        .unwrap();
        bus.render();
        backend.advance(0.02);
        assert!(backend.take_recording("headless-out").iter().all(|s| *s == 0.0));
        assert!(bus.analyser().is_some());
    }
}
