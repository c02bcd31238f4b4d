//! The engine façade.
//!
//! [`Engine`] owns both buses, the song, the microphone and the mixer model and
//! is driven from a single control thread: call the operations below as the
//! user acts, and call [`Engine::pump`] every few milliseconds to render audio
//! and run the timers.

use serde::Serialize;

use crate::autotune::{AutoTuneLoop, AutoTuneSettings, BuiltinUnits, CorrectionUnits};
use crate::clock::{HostClock, SystemClock};
use crate::config::EngineConfig;
use crate::decode::{StemDecoder, SymphoniaDecoder};
use crate::device::{AudioBackend, DeviceInfo, DevicePreference};
use crate::error::{EngineError, Result};
use crate::mic::{MicRoute, Microphone};
use crate::mixer::{EngineEvent, MixerState, NotificationSink, NullNotifier};
use crate::nodes::AnalyserReadout;
use crate::resolver::resolve;
use crate::router::{Bus, BusId, Router};
use crate::scheduler::{LoadReport, PlaybackState, Scheduler};
use crate::settings::{self, get_or, keys, MemorySettings, SettingsStore};
use crate::stem::Song;
use crate::transport::TransportSnapshot;

fn device_key(bus: BusId) -> &'static str {
    match bus {
        BusId::Pa => keys::DEVICE_PA,
        BusId::Iem => keys::DEVICE_IEM,
    }
}

#[cfg(feature = "cpal_sink")]
fn default_backend() -> Result<Box<dyn AudioBackend>> {
    Ok(Box::new(crate::device::CpalBackend::new()))
}

#[cfg(not(feature = "cpal_sink"))]
fn default_backend() -> Result<Box<dyn AudioBackend>> {
    Err(EngineError::DeviceUnavailable)
}

/// Collaborators and configuration for an [`Engine`].
///
/// Everything has a default except the audio backend, which defaults to cpal
/// when the `cpal_sink` feature is enabled.
///
/// ```no_run
/// use stagebus::device::HeadlessBackend;
/// use stagebus::Engine;
///
/// let mut engine = Engine::builder()
///     .backend(HeadlessBackend::with_defaults(48_000))
///     .build()
///     .unwrap();
/// engine.initialize().unwrap();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Box<dyn AudioBackend>>,
    clock: Box<dyn HostClock>,
    settings: Box<dyn SettingsStore>,
    notifier: Box<dyn NotificationSink>,
    decoder: Box<dyn StemDecoder>,
    units: Box<dyn CorrectionUnits>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            backend: None,
            clock: Box::new(SystemClock::new()),
            settings: Box::new(MemorySettings::new()),
            notifier: Box::new(NullNotifier),
            decoder: Box::new(SymphoniaDecoder),
            units: Box::new(BuiltinUnits),
        }
    }
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: impl AudioBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn clock(mut self, clock: impl HostClock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn settings(mut self, settings: impl SettingsStore + 'static) -> Self {
        self.settings = Box::new(settings);
        self
    }

    pub fn notifier(mut self, notifier: impl NotificationSink + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn decoder(mut self, decoder: impl StemDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn correction_units(mut self, units: impl CorrectionUnits + 'static) -> Self {
        self.units = Box::new(units);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend()?,
        };

        Ok(Engine {
            scheduler: Scheduler::new(&self.config),
            tuner: AutoTuneLoop::new(self.config.autotune_rate_hz),
            config: self.config,
            backend,
            clock: self.clock,
            settings: self.settings,
            notifier: self.notifier,
            decoder: self.decoder,
            units: self.units,
            router: Router::new(),
            mixer: MixerState::default(),
            autotune: AutoTuneSettings::default(),
            mic: None,
            mic_device: None,
            initialized: false,
        })
    }
}

/// Dual-bus karaoke engine.
///
/// Errors returned from public operations are also pushed to the notification
/// sink as [`EngineEvent::Error`].
pub struct Engine {
    config: EngineConfig,
    backend: Box<dyn AudioBackend>,
    clock: Box<dyn HostClock>,
    settings: Box<dyn SettingsStore>,
    notifier: Box<dyn NotificationSink>,
    decoder: Box<dyn StemDecoder>,
    units: Box<dyn CorrectionUnits>,
    router: Router,
    scheduler: Scheduler,
    mixer: MixerState,
    autotune: AutoTuneSettings,
    tuner: AutoTuneLoop,
    mic: Option<Microphone>,
    /// Input device of the current (or last) microphone session
    mic_device: Option<String>,
    initialized: bool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    // ---- lifecycle ----

    /// Open both buses on the persisted devices and restore mixer and auto-tune state.
    ///
    /// Either both buses open or neither does. A microphone that was in use
    /// last session is reopened; if that fails the engine still initializes
    /// with the microphone off.
    pub fn initialize(&mut self) -> Result<()> {
        let result = self.try_initialize();
        self.report(result)
    }

    fn try_initialize(&mut self) -> Result<()> {
        let mixer: MixerState = get_or(self.settings.as_ref(), keys::MIXER, MixerState::default());
        self.mixer = MixerState {
            stems: self.scheduler.stems(),
            ..mixer
        };
        self.autotune = get_or(self.settings.as_ref(), keys::AUTOTUNE, AutoTuneSettings::default()).sanitized();

        let outputs = self.backend.output_devices();
        if outputs.is_empty() {
            return Err(EngineError::DeviceUnavailable);
        }

        let now = self.clock.now();
        let mut buses = Vec::with_capacity(2);
        for id in BusId::ALL {
            let preference: DevicePreference = get_or(self.settings.as_ref(), device_key(id), DevicePreference::default());
            let device_id = resolve(&preference, &outputs);
            let bus = Bus::open(
                id,
                self.backend.as_ref(),
                &device_id,
                &self.config,
                self.mixer.level(id),
                self.mixer.iem.mono,
                now,
            )?;
            buses.push(bus);
        }

        self.close_mic();
        self.router.clear();
        for bus in buses {
            self.router.install(bus);
        }
        self.initialized = true;
        self.scheduler.prepare_all(&self.router);
        self.scheduler.set_vocals_pa(&mut self.router, self.mixer.vocals_pa, 0.0);

        if self.mixer.mic.enabled {
            let saved: Option<DevicePreference> = get_or(self.settings.as_ref(), keys::DEVICE_INPUT, None);
            if let Some(preference) = saved {
                let device_id = resolve(&preference, &self.backend.input_devices());
                if let Err(err) = self.open_mic(&device_id) {
                    tracing::warn!(%err, "microphone unavailable, continuing without it");
                    self.notifier.notify(EngineEvent::error(&err));
                }
            }
        }

        tracing::info!(
            pa = ?self.bus_device(BusId::Pa).map(|d| d.label),
            iem = ?self.bus_device(BusId::Iem).map(|d| d.label),
            "engine initialized"
        );
        self.notify_mixer();
        Ok(())
    }

    /// Tear everything down, wait for the devices to settle, then initialize
    /// again from persisted state. Playback resumes where it was.
    pub fn reinitialize(&mut self) -> Result<()> {
        let was_playing = self.scheduler.is_playing();
        self.scheduler.pause(&mut self.router);
        self.close_mic();
        self.router.clear();
        self.initialized = false;

        std::thread::sleep(self.config.settle_delay());

        let result = self.try_initialize().and_then(|()| {
            if was_playing {
                self.scheduler.play(&mut self.router, self.clock.now())?;
            }
            Ok(())
        });
        self.notify_transport();
        self.report(result)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Render audio and run the timers. Call every few milliseconds.
    pub fn pump(&mut self) {
        if !self.initialized {
            return;
        }
        self.router.render();

        let now = self.clock.now();
        self.tick_autotune(now);
        if self.scheduler.tick(&mut self.router, now) {
            self.notifier.notify(EngineEvent::SongEnded);
            self.notify_transport();
        }
    }

    // ---- song & transport ----

    /// Decode `song` and make it current. Stems that fail to decode are
    /// reported and skipped.
    pub fn load_song(&mut self, song: Song) -> Result<LoadReport> {
        let result = self.scheduler.load(song, self.decoder.as_ref(), &mut self.router);
        if let Ok(report) = &result {
            for err in &report.failed {
                self.notifier.notify(EngineEvent::error(err));
            }
        }
        self.mixer.stems = self.scheduler.stems();
        self.notify_mixer();
        self.notify_transport();
        self.report(result)
    }

    pub fn play(&mut self) -> Result<()> {
        let result = self.require_init().and_then(|()| {
            let now = self.clock.now();
            self.scheduler.play(&mut self.router, now).map(|_| ())
        });
        self.notify_transport();
        self.report(result)
    }

    pub fn pause(&mut self) {
        self.scheduler.pause(&mut self.router);
        self.notify_transport();
    }

    /// Jump to `position` seconds; playback continues from there if it was running.
    pub fn seek(&mut self, position: f64) -> Result<f64> {
        let now = self.clock.now();
        let result = self.scheduler.seek(&mut self.router, position, now);
        self.notify_transport();
        self.report(result)
    }

    /// Stop and rewind to the start.
    pub fn stop(&mut self) {
        self.scheduler.stop(&mut self.router);
        self.notify_transport();
    }

    pub fn current_position(&self) -> f64 {
        self.scheduler.position(&self.router)
    }

    pub fn duration(&self) -> f64 {
        self.scheduler.duration()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    pub fn transport_snapshot(&self) -> TransportSnapshot {
        self.scheduler.snapshot(&self.router)
    }

    /// Clips currently scheduled on `bus`.
    pub fn active_sources(&self, bus: BusId) -> usize {
        self.scheduler.active_on(bus)
    }

    // ---- mixer ----

    pub fn mixer_state(&self) -> &MixerState {
        &self.mixer
    }

    /// Set a bus's master gain in dB (clamped); returns the value applied.
    pub fn set_master_gain(&mut self, bus: BusId, db: f32) -> f32 {
        let db = self.mixer.set_gain(bus, db);
        self.apply_master(bus);
        self.mixer_changed();
        db
    }

    /// Flip a bus's mute; returns the new state.
    pub fn toggle_master_mute(&mut self, bus: BusId) -> bool {
        let muted = self.mixer.toggle_muted(bus);
        self.apply_master(bus);
        self.mixer_changed();
        muted
    }

    pub fn set_master_mute(&mut self, bus: BusId, muted: bool) {
        self.mixer.set_muted(bus, muted);
        self.apply_master(bus);
        self.mixer_changed();
    }

    /// Fold the in-ear mix to mono.
    pub fn set_iem_mono_vocals(&mut self, enabled: bool) {
        self.mixer.iem.mono = enabled;
        if let Some(iem) = self.router.bus_mut(BusId::Iem) {
            iem.set_mono(enabled);
        }
        self.mixer_changed();
    }

    /// Fade the vocal stems in or out on the PA over `fade_secs`.
    pub fn set_vocals_pa_enabled(&mut self, enabled: bool, fade_secs: f32) {
        self.mixer.vocals_pa = enabled;
        self.scheduler.set_vocals_pa(&mut self.router, enabled, fade_secs);
        self.mixer_changed();
    }

    /// Change a stem's gain live. Returns false if no loaded stem has that name.
    pub fn set_stem_gain(&mut self, name: &str, db: f32) -> bool {
        let known = self.scheduler.set_stem_gain(name, db);
        if known {
            self.mixer.stems = self.scheduler.stems();
            self.notify_mixer();
        }
        known
    }

    // ---- routing ----

    pub fn output_devices(&self) -> Vec<DeviceInfo> {
        self.backend.output_devices()
    }

    pub fn input_devices(&self) -> Vec<DeviceInfo> {
        self.backend.input_devices()
    }

    pub fn bus_device(&self, bus: BusId) -> Option<DeviceInfo> {
        self.router.bus(bus).map(|b| b.device().clone())
    }

    /// How many times `bus` has been (re)built.
    pub fn bus_generation(&self, bus: BusId) -> Option<u64> {
        self.router.bus(bus).map(Bus::generation)
    }

    /// Level meter on the PA output.
    pub fn analyser(&self) -> Option<AnalyserReadout> {
        self.router.bus(BusId::Pa).and_then(Bus::analyser)
    }

    /// Move `bus` to another output device.
    ///
    /// The new device is opened first; if that fails the old bus keeps playing
    /// untouched. Otherwise playback pauses, the bus is replaced, stems are
    /// converted to the new rate if needed, and playback resumes at the same
    /// position.
    pub fn set_output_device(&mut self, bus: BusId, device_id: &str) -> Result<()> {
        let result = self.require_init().and_then(|()| self.router.begin(bus)).and_then(|()| {
            let swapped = self.swap_bus(bus, device_id);
            self.router.finish(bus);
            swapped
        });
        self.report(result)
    }

    fn swap_bus(&mut self, id: BusId, device_id: &str) -> Result<()> {
        let replacement = Bus::open(
            id,
            self.backend.as_ref(),
            device_id,
            &self.config,
            self.mixer.level(id),
            self.mixer.iem.mono,
            self.clock.now(),
        )?;

        let was_playing = self.scheduler.is_playing();
        let position = self.scheduler.pause(&mut self.router);

        let mic_device = match id {
            BusId::Pa if self.mic.is_some() => self.mic_device.clone(),
            _ => None,
        };
        if id == BusId::Pa {
            self.close_mic();
        }

        drop(self.router.install(replacement));
        self.scheduler.prepare_all(&self.router);

        if id == BusId::Pa {
            self.scheduler.set_vocals_pa(&mut self.router, self.mixer.vocals_pa, 0.0);
            if let Some(device) = mic_device {
                if let Err(err) = self.open_mic(&device) {
                    tracing::warn!(%err, "microphone lost with the PA device change");
                    self.notifier.notify(EngineEvent::error(&err));
                }
            }
        }

        if let Some(info) = self.bus_device(id) {
            self.persist(device_key(id), &DevicePreference::of(&info));
            tracing::info!(bus = %id, device = %info.label, position, "output device changed");
            self.notifier.notify(EngineEvent::DeviceChanged { bus: id, device: info });
        }

        if was_playing {
            self.scheduler.play(&mut self.router, self.clock.now())?;
        }
        self.notify_transport();
        Ok(())
    }

    // ---- microphone & auto-tune ----

    /// Capture from `device_id` and route it to the PA.
    pub fn start_microphone_input(&mut self, device_id: &str) -> Result<()> {
        let result = self.require_init().and_then(|()| {
            self.close_mic();
            self.open_mic(device_id)
        });
        if result.is_ok() {
            self.mixer.mic.enabled = true;
            if let Some(info) = self.mic.as_ref().map(|m| m.device().clone()) {
                self.persist(keys::DEVICE_INPUT, &DevicePreference::of(&info));
            }
            self.mixer_changed();
        }
        self.report(result)
    }

    /// Stop capturing and remove every microphone node.
    pub fn stop_microphone_input(&mut self) {
        self.close_mic();
        self.mic_device = None;
    }

    pub fn microphone_active(&self) -> bool {
        self.mic.is_some()
    }

    pub fn microphone_route(&self) -> Option<MicRoute> {
        self.mic.as_ref().map(Microphone::route)
    }

    /// Linear microphone gain.
    pub fn set_microphone_gain(&mut self, gain: f32) {
        self.mixer.mic.gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
        self.apply_mic_level();
        self.mixer_changed();
    }

    pub fn set_mic_muted(&mut self, muted: bool) {
        self.mixer.mic.muted = muted;
        self.apply_mic_level();
        self.mixer_changed();
    }

    /// Whether the microphone is heard on the PA at all.
    pub fn set_mic_to_speakers(&mut self, enabled: bool) {
        self.mixer.mic.to_speakers = enabled;
        self.apply_mic_route();
        self.mixer_changed();
    }

    /// Turn capture off entirely, or back on with the last device.
    pub fn set_enable_mic(&mut self, enabled: bool) -> Result<()> {
        self.mixer.mic.enabled = enabled;
        let result = if !enabled {
            self.close_mic();
            Ok(())
        } else if self.mic.is_none() && self.initialized {
            match self.mic_device.clone() {
                Some(device) => self.open_mic(&device),
                None => Ok(()),
            }
        } else {
            Ok(())
        };
        self.mixer_changed();
        self.report(result)
    }

    pub fn auto_tune_settings(&self) -> AutoTuneSettings {
        self.autotune
    }

    /// Whether the correction chain could be loaded for the current microphone.
    pub fn auto_tune_available(&self) -> bool {
        self.mic.as_ref().is_some_and(Microphone::has_chain)
    }

    pub fn set_auto_tune_settings(&mut self, settings: AutoTuneSettings) {
        self.autotune = settings.sanitized();
        self.persist(keys::AUTOTUNE, &self.autotune.clone());
        self.apply_mic_route();
    }

    pub fn enable_auto_tune(&mut self) {
        self.set_auto_tune_settings(AutoTuneSettings {
            enabled: true,
            ..self.autotune
        });
    }

    pub fn disable_auto_tune(&mut self) {
        self.set_auto_tune_settings(AutoTuneSettings {
            enabled: false,
            ..self.autotune
        });
    }

    /// Shift the correction loop is currently applying, in semitones.
    pub fn current_correction(&self) -> f32 {
        self.tuner.smoothed()
    }

    fn open_mic(&mut self, device_id: &str) -> Result<()> {
        let pa = self.router.bus_mut(BusId::Pa).ok_or(EngineError::NotInitialized)?;
        let mic = Microphone::start(self.backend.as_ref(), device_id, &self.config, self.units.as_ref(), pa)?;
        self.mic = Some(mic);
        self.mic_device = Some(device_id.to_string());
        self.apply_mic_level();
        self.apply_mic_route();
        Ok(())
    }

    fn close_mic(&mut self) {
        if let Some(mut mic) = self.mic.take() {
            if let Some(pa) = self.router.bus_mut(BusId::Pa) {
                mic.detach(pa.graph_mut());
            }
            tracing::info!(device = %mic.device().label, "microphone stopped");
        }
        self.tuner.reset();
    }

    fn apply_mic_level(&mut self) {
        if let Some(mic) = self.mic.as_mut() {
            mic.set_level(self.mixer.mic.gain, self.mixer.mic.muted);
        }
    }

    fn apply_mic_route(&mut self) {
        let (Some(mic), Some(pa)) = (self.mic.as_mut(), self.router.bus_mut(BusId::Pa)) else {
            return;
        };
        let route = MicRoute::choose(self.mixer.mic.to_speakers, self.autotune.enabled, mic.has_chain());
        mic.set_route(pa.graph_mut(), route);
        if mic.route() != MicRoute::Corrected {
            mic.set_shift(0.0);
            self.tuner.reset();
        }
    }

    fn tick_autotune(&mut self, now: f64) {
        if !self.tuner.due(now) {
            return;
        }
        let Some(mic) = self.mic.as_mut() else {
            return;
        };

        let running = self.autotune.enabled && self.scheduler.is_playing() && mic.route() == MicRoute::Corrected;
        if !running {
            if self.tuner.is_engaged() {
                mic.set_shift(0.0);
                self.tuner.reset();
            }
            return;
        }

        let target = self.scheduler.target_pitch(&self.autotune, &self.router);
        let sung = mic.pitch();
        let shift = self.tuner.step(&self.autotune, target, sung);
        mic.set_shift(shift);
    }

    // ---- plumbing ----

    fn require_init(&self) -> Result<()> {
        if self.initialized && self.router.is_ready() {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn apply_master(&mut self, bus: BusId) {
        let level = self.mixer.level(bus);
        let ramp = self.config.gain_ramp_secs;
        if let Some(b) = self.router.bus_mut(bus) {
            b.set_master(level, ramp);
        }
    }

    fn mixer_changed(&mut self) {
        let persisted = self.mixer.persisted();
        self.persist(keys::MIXER, &persisted);
        self.notify_mixer();
    }

    fn persist<T: Serialize>(&mut self, key: &str, value: &T) {
        if let Err(err) = settings::put(self.settings.as_mut(), key, value) {
            tracing::warn!(key, %err, "could not persist setting");
            self.notifier.notify(EngineEvent::error(&err));
        }
    }

    fn notify_mixer(&self) {
        self.notifier.notify(EngineEvent::MixerChanged {
            mixer: self.mixer.clone(),
        });
    }

    fn notify_transport(&self) {
        self.notifier.notify(EngineEvent::Transport {
            transport: self.transport_snapshot(),
        });
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            tracing::warn!(%err, "operation failed");
            self.notifier.notify(EngineEvent::error(err));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::decode::DecodedBuffer;
    use crate::device::HeadlessBackend;
    use crate::stem::StemPayload;
    use crossbeam_channel::Receiver;

    struct Silence;

    impl StemDecoder for Silence {
        fn decode(&self, _name: &str, _bytes: &[u8]) -> Result<DecodedBuffer> {
            Ok(DecodedBuffer::new(vec![0.0; 8000 * 4], 1, 8000))
        }
    }

    fn engine() -> (Engine, HeadlessBackend, MemorySettings, Receiver<EngineEvent>) {
        let backend = HeadlessBackend::with_defaults(8000);
        let settings = MemorySettings::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let engine = Engine::builder()
            .backend(backend.clone())
            .clock(ManualClock::new())
            .settings(settings.clone())
            .notifier(tx)
            .decoder(Silence)
            .config(EngineConfig {
                settle_delay_ms: 0,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        (engine, backend, settings, rx)
    }

    #[test]
    fn operations_before_initialize_fail() {
        let (mut engine, _backend, _settings, rx) = engine();
        assert!(matches!(engine.play(), Err(EngineError::NoSong | EngineError::NotInitialized)));
        assert!(matches!(
            engine.set_output_device(BusId::Pa, "headless-out"),
            Err(EngineError::NotInitialized)
        ));
        assert!(rx.try_iter().any(|e| matches!(e, EngineEvent::Error { .. })));
    }

    #[test]
    fn initialize_restores_persisted_mixer() {
        let (mut engine, _backend, settings, _rx) = engine();
        let mut stored = settings.clone();
        settings::put(&mut stored, keys::MIXER, &serde_json::json!({"pa": {"gain_db": -6.0, "muted": true}})).unwrap();

        engine.initialize().unwrap();
        assert_eq!(engine.mixer_state().pa.gain_db, -6.0);
        assert!(engine.mixer_state().pa.muted);
        assert_eq!(engine.bus_generation(BusId::Pa), Some(1));
    }

    #[test]
    fn mute_toggle_is_idempotent_and_persisted() {
        let (mut engine, _backend, settings, _rx) = engine();
        engine.initialize().unwrap();
        engine.set_master_gain(BusId::Pa, -3.0);
        let before = engine.mixer_state().clone();

        assert!(engine.toggle_master_mute(BusId::Pa));
        assert!(!engine.toggle_master_mute(BusId::Pa));
        assert_eq!(engine.mixer_state(), &before);

        let saved: MixerState = get_or(&settings, keys::MIXER, MixerState::default());
        assert_eq!(saved.pa.gain_db, -3.0);
        assert!(!saved.pa.muted);
    }

    #[test]
    fn master_gain_is_clamped() {
        let (mut engine, _backend, _settings, _rx) = engine();
        engine.initialize().unwrap();
        assert_eq!(engine.set_master_gain(BusId::Iem, 99.0), crate::gain::MAX_GAIN_DB);
    }

    #[test]
    fn load_play_pause_round_trip() {
        let (mut engine, _backend, _settings, rx) = engine();
        engine.initialize().unwrap();
        let song = Song::new(vec![StemPayload::new("Drums", vec![0]), StemPayload::new("Vocals", vec![0])]);
        engine.load_song(song).unwrap();
        assert_eq!(engine.duration(), 4.0);

        engine.play().unwrap();
        assert_eq!(engine.playback_state(), PlaybackState::Playing);
        assert_eq!(engine.active_sources(BusId::Iem), 1);
        engine.pause();
        assert_eq!(engine.playback_state(), PlaybackState::Paused);
        assert_eq!(engine.active_sources(BusId::Pa), 0);

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::Transport { transport } if transport.playing)));
    }

    #[test]
    fn autotune_settings_persist() {
        let (mut engine, _backend, settings, _rx) = engine();
        engine.enable_auto_tune();
        assert!(engine.auto_tune_settings().enabled);
        let saved: AutoTuneSettings = get_or(&settings, keys::AUTOTUNE, AutoTuneSettings::default());
        assert!(saved.enabled);
        engine.disable_auto_tune();
        assert!(!engine.auto_tune_settings().enabled);
    }

    #[test]
    fn unknown_output_device_keeps_old_bus() {
        let (mut engine, _backend, _settings, _rx) = engine();
        engine.initialize().unwrap();
        assert!(engine.set_output_device(BusId::Pa, "missing").is_err());
        assert_eq!(engine.bus_generation(BusId::Pa), Some(1));
        // the in-flight flag was released
        assert!(engine.set_output_device(BusId::Pa, "headless-out").is_ok());
        assert_eq!(engine.bus_generation(BusId::Pa), Some(2));
    }
}
