//! Shared fixtures: WAV payloads and a headless engine on a manual clock.

#![allow(dead_code)]

use std::io::Cursor;

use crossbeam_channel::Receiver;
use stagebus::clock::ManualClock;
use stagebus::device::{DeviceInfo, HeadlessBackend};
use stagebus::settings::{MemorySettings, SettingsStore};
use stagebus::{Engine, EngineConfig, EngineEvent};

pub const RATE: u32 = 8000;

/// Mono 16-bit WAV of a sine at `freq` Hz.
pub fn wav_bytes(seconds: f64, sample_rate: u32, freq: f32) -> Vec<u8> {
    gated_wav_bytes(seconds, sample_rate, freq, 0.0)
}

/// Like [`wav_bytes`], but silent before `sound_from` seconds.
pub fn gated_wav_bytes(seconds: f64, sample_rate: u32, freq: f32, sound_from: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * sample_rate as f64) as usize;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let s = if (t as f64) < sound_from {
                0.0
            } else {
                (t * freq * std::f32::consts::TAU).sin() * 0.25
            };
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn output(id: &str, sample_rate: u32) -> DeviceInfo {
    DeviceInfo {
        id: id.into(),
        label: id.into(),
        is_default: false,
        sample_rate,
        channels: 2,
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        settle_delay_ms: 0,
        ..EngineConfig::default()
    }
}

pub struct Rig {
    pub engine: Engine,
    pub backend: HeadlessBackend,
    pub clock: ManualClock,
    pub events: Receiver<EngineEvent>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(MemorySettings::new())
    }

    pub fn with_settings(settings: impl SettingsStore + 'static) -> Self {
        let backend = HeadlessBackend::with_defaults(RATE);
        backend.add_output(output("device2", RATE));
        let clock = ManualClock::new();
        let (tx, events) = crossbeam_channel::unbounded();
        let engine = Engine::builder()
            .backend(backend.clone())
            .clock(clock.clone())
            .settings(settings)
            .notifier(tx)
            .config(config())
            .build()
            .unwrap();
        Self {
            engine,
            backend,
            clock,
            events,
        }
    }

    /// Let `seconds` of device and host time pass, pumping as a host would.
    pub fn run(&mut self, seconds: f64) {
        let step: f64 = 0.05;
        let mut left = seconds;
        while left > 1e-9 {
            let dt = step.min(left);
            self.engine.pump();
            self.clock.advance(dt);
            self.backend.advance(dt);
            left -= dt;
        }
        self.engine.pump();
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
