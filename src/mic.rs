//! Microphone capture and its place in the PA graph.
//!
//! ```text
//! capture ─► mic gain ─┬──────────────────────────────────────────────► PA mix  (direct)
//!                      └► detector ─► shifter ─► makeup ─► compressor ─► PA mix  (corrected)
//! ```
//!
//! Capture is always raw: no echo cancellation, noise suppression or automatic
//! gain is applied anywhere on the way.

use rtrb::RingBuffer;

use crate::autotune::CorrectionUnits;
use crate::config::EngineConfig;
use crate::device::{AudioBackend, DeviceInfo, StreamGuard};
use crate::error::{EngineError, Result};
use crate::graph::{AudioGraph, Handle};
use crate::node::NodeId;
use crate::nodes::{
    CaptureMessage, CaptureSource, Compressor, CompressorMessage, Gain, GainMessage, PitchDetector,
    PitchDetectorMessage, PitchShifter, PitchShifterMessage,
};
use crate::pitch::PitchReadout;
use crate::router::Bus;

/// Where the microphone signal goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicRoute {
    /// Captured but not heard
    Silent,
    Direct,
    /// Through the pitch-correction chain
    Corrected,
}

impl MicRoute {
    pub fn choose(to_speakers: bool, autotune: bool, chain_available: bool) -> MicRoute {
        match (to_speakers, autotune && chain_available) {
            (false, _) => MicRoute::Silent,
            (true, true) => MicRoute::Corrected,
            (true, false) => MicRoute::Direct,
        }
    }
}

struct Chain {
    detector: Handle<PitchDetectorMessage>,
    shifter: Handle<PitchShifterMessage>,
    makeup: Handle<GainMessage>,
    compressor: Handle<CompressorMessage>,
    readout: PitchReadout,
}

/// A running microphone attached to one PA graph.
///
/// Dropping it stops capture; call [`Microphone::detach`] first to also take
/// its nodes out of the graph.
pub struct Microphone {
    info: DeviceInfo,
    capture: Handle<CaptureMessage>,
    gain: Handle<GainMessage>,
    chain: Option<Chain>,
    mix: NodeId,
    route: MicRoute,
    _guard: StreamGuard,
}

impl Microphone {
    /// Open `device_id` and build the mic nodes in `bus`'s graph, unrouted.
    ///
    /// A correction unit that fails to load leaves the microphone without a
    /// chain; [`Microphone::has_chain`] reports it.
    pub fn start(
        backend: &dyn AudioBackend,
        device_id: &str,
        config: &EngineConfig,
        units: &dyn CorrectionUnits,
        bus: &mut Bus,
    ) -> Result<Microphone> {
        let stream = backend.open_input(device_id, config.mic_sample_rate).map_err(|e| match e {
            EngineError::Capture(_) => e,
            other => EngineError::Capture(other.to_string()),
        })?;
        let sample_rate = bus.sample_rate();
        let mix = bus.mix();

        let chain_units = load_units(units, sample_rate);
        let graph = bus.graph_mut();

        let capture = graph.add(CaptureSource::new(stream.consumer, stream.sample_rate));
        let gain = graph.add(Gain::new(0.0).with_channels(1).with_smoothing_ms(5.0, sample_rate));
        graph.connect(capture.id(), gain.id());

        let chain = match chain_units {
            Ok((detector, shifter, readout)) => {
                let detector = graph.add(detector);
                let shifter = graph.add(shifter);
                let makeup = graph.add(Gain::new(config.makeup_gain).with_channels(1));
                let compressor = graph.add(Compressor::new().with_channels(1));
                graph.connect(gain.id(), detector.id());
                graph.connect(detector.id(), shifter.id());
                graph.connect(shifter.id(), makeup.id());
                graph.connect(makeup.id(), compressor.id());
                Some(Chain {
                    detector,
                    shifter,
                    makeup,
                    compressor,
                    readout,
                })
            }
            Err(err) => {
                tracing::warn!(%err, "pitch correction unavailable, microphone stays direct");
                None
            }
        };

        tracing::info!(device = %stream.info.label, rate = stream.sample_rate, "microphone started");

        Ok(Microphone {
            info: stream.info,
            capture,
            gain,
            chain,
            mix,
            route: MicRoute::Silent,
            _guard: stream.guard,
        })
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn has_chain(&self) -> bool {
        self.chain.is_some()
    }

    pub fn route(&self) -> MicRoute {
        self.route
    }

    /// Reconnect to `route`. A corrected route without a chain falls back to direct.
    pub fn set_route(&mut self, graph: &mut AudioGraph, route: MicRoute) {
        let route = match (route, &self.chain) {
            (MicRoute::Corrected, None) => MicRoute::Direct,
            (route, _) => route,
        };
        if route == self.route {
            return;
        }

        graph.disconnect(self.gain.id(), self.mix);
        if let Some(chain) = &self.chain {
            graph.disconnect(chain.compressor.id(), self.mix);
        }

        match (route, &self.chain) {
            (MicRoute::Direct, _) => graph.connect(self.gain.id(), self.mix),
            (MicRoute::Corrected, Some(chain)) => graph.connect(chain.compressor.id(), self.mix),
            _ => {}
        }

        if let Some(chain) = self.chain.as_mut() {
            let enabled = route == MicRoute::Corrected;
            if chain.detector.send(PitchDetectorMessage::SetEnabled(enabled)).is_err() {
                tracing::warn!("detector queue full");
            }
            if !enabled {
                chain.readout.clear();
            }
        }

        tracing::debug!(?route, "microphone routed");
        self.route = route;
    }

    /// Linear input gain, or silence while muted.
    pub fn set_level(&mut self, gain: f32, muted: bool) {
        let gain = if muted { 0.0 } else { gain.max(0.0) };
        if self.gain.send(GainMessage::SetGain(gain)).is_err() {
            tracing::warn!("mic gain queue full");
        }
    }

    /// Shift applied by the correction chain, in semitones.
    pub fn set_shift(&mut self, semitones: f32) {
        if let Some(chain) = self.chain.as_mut() {
            if chain.shifter.send(PitchShifterMessage::SetSemitones(semitones)).is_err() {
                tracing::warn!("shifter queue full");
            }
        }
    }

    /// Newest voiced estimate of the singer's pitch.
    pub fn pitch(&mut self) -> Option<f32> {
        self.chain
            .as_mut()?
            .readout
            .latest()
            .filter(|s| s.is_voiced())
            .map(|s| s.frequency)
    }

    /// Remove every mic node from `graph`.
    pub fn detach(&mut self, graph: &mut AudioGraph) {
        graph.remove(self.capture.id());
        graph.remove(self.gain.id());
        if let Some(chain) = &self.chain {
            graph.remove(chain.detector.id());
            graph.remove(chain.shifter.id());
            graph.remove(chain.makeup.id());
            graph.remove(chain.compressor.id());
        }
        self.route = MicRoute::Silent;
    }
}

type Units = (PitchDetector, PitchShifter, PitchReadout);

fn load_units(units: &dyn CorrectionUnits, sample_rate: u32) -> Result<Units> {
    let (tx, rx) = RingBuffer::new(64);
    let detector = units.detector(tx)?;
    let shifter = units.shifter(sample_rate)?;
    Ok((detector, shifter, PitchReadout::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autotune::BuiltinUnits;
    use crate::device::HeadlessBackend;
    use crate::pitch::PitchSample;
    use crate::router::{BusId, MasterLevel};

    struct Broken;

    impl CorrectionUnits for Broken {
        fn detector(&self, output: rtrb::Producer<PitchSample>) -> Result<PitchDetector> {
            Ok(PitchDetector::new(output))
        }

        fn shifter(&self, _sample_rate: u32) -> Result<PitchShifter> {
            Err(EngineError::ProcessingUnit("no shifter".into()))
        }
    }

    fn pa(backend: &HeadlessBackend) -> Bus {
        let level = MasterLevel {
            gain_db: 0.0,
            muted: false,
        };
        Bus::open(BusId::Pa, backend, "headless-out", &EngineConfig::default(), level, false, 0.0).unwrap()
    }

    #[test]
    fn route_choice() {
        assert_eq!(MicRoute::choose(false, true, true), MicRoute::Silent);
        assert_eq!(MicRoute::choose(true, true, true), MicRoute::Corrected);
        assert_eq!(MicRoute::choose(true, true, false), MicRoute::Direct);
        assert_eq!(MicRoute::choose(true, false, true), MicRoute::Direct);
    }

    #[test]
    fn direct_route_reaches_the_pa() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut bus = pa(&backend);
        let mut mic = Microphone::start(&backend, "headless-in", &EngineConfig::default(), &BuiltinUnits, &mut bus).unwrap();
        mic.set_level(1.0, false);
        mic.set_route(bus.graph_mut(), MicRoute::Direct);
        assert_eq!(backend.open_inputs(), vec!["headless-in".to_string()]);

        backend.record("headless-out");
        backend.push_input("headless-in", &vec![0.5; 4800]);
        bus.render();
        backend.advance(0.04);
        let played = backend.take_recording("headless-out");
        assert!(played.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn failed_units_fall_back_to_direct() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut bus = pa(&backend);
        let mut mic = Microphone::start(&backend, "headless-in", &EngineConfig::default(), &Broken, &mut bus).unwrap();
        assert!(!mic.has_chain());
        mic.set_route(bus.graph_mut(), MicRoute::Corrected);
        assert_eq!(mic.route(), MicRoute::Direct);
        assert_eq!(mic.pitch(), None);
    }

    #[test]
    fn detach_and_drop_release_everything() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut bus = pa(&backend);
        let before = bus.graph_mut().node_count();
        let mut mic = Microphone::start(&backend, "headless-in", &EngineConfig::default(), &BuiltinUnits, &mut bus).unwrap();
        mic.set_route(bus.graph_mut(), MicRoute::Corrected);
        assert_eq!(bus.graph_mut().node_count(), before + 6);

        mic.detach(bus.graph_mut());
        drop(mic);
        assert_eq!(bus.graph_mut().node_count(), before);
        assert!(backend.open_inputs().is_empty());
    }

    #[test]
    fn capture_failure_is_a_capture_error() {
        let backend = HeadlessBackend::with_defaults(48_000);
        let mut bus = pa(&backend);
        let err = Microphone::start(&backend, "nope", &EngineConfig::default(), &BuiltinUnits, &mut bus).err();
        assert!(matches!(err, Some(EngineError::Capture(_))));
    }
}
