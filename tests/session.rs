mod helpers;

use approx::assert_abs_diff_eq;
use helpers::{wav_bytes, Rig, RATE};
use stagebus::device::DevicePreference;
use stagebus::mic::MicRoute;
use stagebus::pitch::VocalPitchTrack;
use stagebus::settings::{get_or, keys, JsonFileSettings, MemorySettings, SettingsStore};
use stagebus::{AutoTuneSettings, BusId, EngineEvent, MixerState, Song, StemPayload};

#[test]
fn settings_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stagebus.json");

    {
        let mut rig = Rig::with_settings(JsonFileSettings::open(&path).unwrap());
        rig.engine.initialize().unwrap();
        rig.engine.set_master_gain(BusId::Iem, -9.0);
        rig.engine.set_iem_mono_vocals(true);
        rig.engine.set_vocals_pa_enabled(true, 0.0);
        rig.engine.set_output_device(BusId::Pa, "device2").unwrap();
        rig.engine.set_auto_tune_settings(AutoTuneSettings {
            enabled: true,
            strength: 150.0,
            ..AutoTuneSettings::default()
        });
    }

    let mut rig = Rig::with_settings(JsonFileSettings::open(&path).unwrap());
    rig.engine.initialize().unwrap();
    let mixer = rig.engine.mixer_state();
    assert_eq!(mixer.iem.gain_db, -9.0);
    assert!(mixer.iem.mono);
    assert!(mixer.vocals_pa);
    assert_eq!(rig.engine.bus_device(BusId::Pa).unwrap().id, "device2");
    assert_eq!(rig.engine.bus_device(BusId::Iem).unwrap().id, "headless-out");

    let autotune = rig.engine.auto_tune_settings();
    assert!(autotune.enabled);
    assert_eq!(autotune.strength, 100.0);
}

#[test]
fn stale_device_preference_falls_back_to_default() {
    let settings = MemorySettings::new().with(
        keys::DEVICE_PA,
        serde_json::to_value(DevicePreference::id("unplugged")).unwrap(),
    );
    let mut rig = Rig::with_settings(settings);
    rig.engine.initialize().unwrap();
    assert_eq!(rig.engine.bus_device(BusId::Pa).unwrap().id, "headless-out");
}

#[test]
fn mixer_changes_are_pushed_and_persisted() {
    let settings = MemorySettings::new();
    let mut rig = Rig::with_settings(settings.clone());
    rig.engine.initialize().unwrap();
    rig.drain_events();

    rig.engine.set_master_gain(BusId::Pa, -4.5);
    assert!(rig.engine.toggle_master_mute(BusId::Iem));

    let events = rig.drain_events();
    let last = events
        .iter()
        .rev()
        .find_map(|e| match e {
            EngineEvent::MixerChanged { mixer } => Some(mixer.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(last.pa.gain_db, -4.5);
    assert!(last.iem.muted);

    let saved: MixerState = get_or(&settings, keys::MIXER, MixerState::default());
    assert_eq!(saved.pa.gain_db, -4.5);
    assert!(saved.iem.muted);
    assert!(saved.stems.is_empty());
}

#[test]
fn stem_gain_is_live_and_projected() {
    let mut rig = Rig::new();
    rig.engine.initialize().unwrap();
    let song = Song::new(vec![
        StemPayload::new("drums", wav_bytes(5.0, RATE, 110.0)).with_gain_db(-3.0),
        StemPayload::new("vocals", wav_bytes(5.0, RATE, 440.0)),
    ]);
    rig.engine.load_song(song).unwrap();
    rig.engine.play().unwrap();

    assert!(rig.engine.set_stem_gain("drums", -12.0));
    assert!(!rig.engine.set_stem_gain("cowbell", 0.0));
    let drums = rig
        .engine
        .mixer_state()
        .stems
        .iter()
        .find(|s| s.name == "drums")
        .cloned()
        .unwrap();
    assert_eq!(drums.gain_db, -12.0);
}

#[test]
fn microphone_routes_follow_the_switches() {
    let mut rig = Rig::new();
    rig.engine.initialize().unwrap();
    rig.engine.start_microphone_input("headless-in").unwrap();
    assert!(rig.engine.microphone_active());
    assert_eq!(rig.engine.microphone_route(), Some(MicRoute::Direct));

    rig.engine.enable_auto_tune();
    if rig.engine.auto_tune_available() {
        assert_eq!(rig.engine.microphone_route(), Some(MicRoute::Corrected));
    } else {
        assert_eq!(rig.engine.microphone_route(), Some(MicRoute::Direct));
    }

    rig.engine.set_mic_to_speakers(false);
    assert_eq!(rig.engine.microphone_route(), Some(MicRoute::Silent));
    rig.engine.set_mic_to_speakers(true);
    rig.engine.disable_auto_tune();
    assert_eq!(rig.engine.microphone_route(), Some(MicRoute::Direct));
    assert_eq!(rig.engine.current_correction(), 0.0);

    rig.engine.stop_microphone_input();
    assert!(!rig.engine.microphone_active());
    assert!(rig.backend.open_inputs().is_empty());
}

/// `seconds` of a sine at the capture rate, continuing from `phase` samples in.
fn sung(freq: f32, seconds: f64, phase: usize) -> Vec<f32> {
    let rate = 48_000.0;
    let frames = (seconds * rate) as usize;
    (phase..phase + frames)
        .map(|i| (i as f32 / rate as f32 * freq * std::f32::consts::TAU).sin() * 0.5)
        .collect()
}

#[test]
fn correction_pulls_the_singer_to_the_reference() {
    let mut rig = Rig::new();
    rig.engine.initialize().unwrap();
    rig.engine.start_microphone_input("headless-in").unwrap();
    rig.engine.enable_auto_tune();
    assert!(rig.engine.auto_tune_available());
    assert_eq!(rig.engine.microphone_route(), Some(MicRoute::Corrected));

    // the melody is an A4 all the way through
    let melody = VocalPitchTrack::from_pairs(10.0, &[(69, 0); 200]);
    let song = Song::new(vec![StemPayload::new("vocals", wav_bytes(20.0, RATE, 440.0))]).with_vocal_pitch(melody);
    rig.engine.load_song(song).unwrap();
    rig.engine.play().unwrap();

    // sing a G4, two semitones flat
    let chunk = 0.05;
    let mut phase = 0;
    for _ in 0..60 {
        let samples = sung(392.0, chunk, phase);
        phase += samples.len();
        rig.backend.push_input("headless-in", &samples);
        rig.run(chunk);
    }

    let strength = rig.engine.auto_tune_settings().strength;
    let expected = 2.0 * strength / 100.0;
    assert_abs_diff_eq!(rig.engine.current_correction(), expected, epsilon = 0.25);

    rig.engine.pause();
    rig.run(0.2);
    assert_eq!(rig.engine.current_correction(), 0.0);
}

#[test]
fn microphone_reaches_the_pa() {
    let mut rig = Rig::new();
    rig.engine.initialize().unwrap();
    rig.engine.start_microphone_input("headless-in").unwrap();
    rig.backend.record("device2");
    rig.engine.set_output_device(BusId::Pa, "device2").unwrap();

    // reattached to the new PA
    assert!(rig.engine.microphone_active());
    assert_eq!(rig.backend.open_inputs(), vec!["headless-in".to_string()]);

    rig.backend.push_input("headless-in", &vec![0.5; RATE as usize / 2]);
    rig.run(0.5);
    let played = rig.backend.take_recording("device2");
    assert!(played.iter().any(|s| s.abs() > 0.1));

    rig.engine.set_mic_muted(true);
    rig.run(0.5);
    rig.backend.take_recording("device2");
    rig.backend.push_input("headless-in", &vec![0.5; RATE as usize / 4]);
    rig.run(0.5);
    assert!(rig.backend.take_recording("device2").iter().all(|s| s.abs() < 1e-3));
}

#[test]
fn disabling_the_mic_releases_capture() {
    let settings = MemorySettings::new();
    let mut rig = Rig::with_settings(settings.clone());
    rig.engine.initialize().unwrap();
    rig.engine.start_microphone_input("headless-in").unwrap();
    assert!(settings.get(keys::DEVICE_INPUT).is_some());

    rig.engine.set_enable_mic(false).unwrap();
    assert!(!rig.engine.microphone_active());
    assert!(rig.backend.open_inputs().is_empty());

    rig.engine.set_enable_mic(true).unwrap();
    assert!(rig.engine.microphone_active());
}

#[test]
fn bad_input_device_reports_capture_error() {
    let mut rig = Rig::new();
    rig.engine.initialize().unwrap();
    rig.drain_events();
    assert!(rig.engine.start_microphone_input("nope").is_err());
    assert!(!rig.engine.microphone_active());
    assert!(rig.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::Error {
            category: stagebus::ErrorCategory::Capture,
            ..
        }
    )));
}
