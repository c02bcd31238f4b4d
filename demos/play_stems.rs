//! Play a folder of stems to the default outputs.
//!
//! Run with: cargo run --example play_stems --features cpal_sink -- path/to/stems [pa-device] [iem-device]

use std::thread::sleep;
use std::time::Duration;

use stagebus::settings::JsonFileSettings;
use stagebus::{BusId, Engine, EngineEvent, Song, StemPayload};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let mut args = std::env::args().skip(1);
    let dir = args.next().ok_or("usage: play_stems <stem folder> [pa-device] [iem-device]")?;
    let pa = args.next();
    let iem = args.next();

    let mut stems = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.is_file() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("stem").to_string();
            stems.push(StemPayload::new(name, std::fs::read(&path)?));
        }
    }

    let (tx, rx) = crossbeam_channel::bounded(256);
    let mut engine = Engine::builder()
        .settings(JsonFileSettings::open("stagebus-settings.json")?)
        .notifier(tx)
        .build()?;
    engine.initialize()?;

    for device in engine.output_devices() {
        println!("output: {} ({}){}", device.label, device.id, if device.is_default { " *" } else { "" });
    }
    if let Some(id) = pa {
        engine.set_output_device(BusId::Pa, &id)?;
    }
    if let Some(id) = iem {
        engine.set_output_device(BusId::Iem, &id)?;
    }

    let report = engine.load_song(Song::new(stems).with_title(dir.clone()))?;
    println!("loaded {:?}, skipped {:?}", report.decoded, report.skipped);
    engine.play()?;

    println!("Playing {:.1}s... Ctrl+C to stop", engine.duration());
    loop {
        engine.pump();
        for event in rx.try_iter() {
            match event {
                EngineEvent::SongEnded => return Ok(()),
                EngineEvent::Error { message, .. } => eprintln!("error: {message}"),
                _ => {}
            }
        }
        sleep(Duration::from_millis(2));
    }
}
