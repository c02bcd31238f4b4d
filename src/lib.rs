//! # stagebus
//!
//! A dual-bus karaoke engine. One song, split into stems, plays in sync to two
//! independently clocked outputs: the PA for the audience and the in-ear
//! monitors for the performer. The performer's microphone is captured, can be
//! pitch-corrected against a reference melody, and is mixed into the PA.
//!
//! Each bus is an [`AudioGraph`] of [`AudioNode`]s rendered on the control
//! thread into a lock-free ring that the device drains. Parameter changes reach
//! nodes through typed message queues ([`Handle`]), so nothing on the audio
//! path locks or allocates.
//!
//! ```no_run
//! use stagebus::device::HeadlessBackend;
//! use stagebus::{BusId, Engine, Song, StemPayload};
//!
//! let mut engine = Engine::builder()
//!     .backend(HeadlessBackend::with_defaults(48_000))
//!     .build()?;
//! engine.initialize()?;
//!
//! let song = Song::new(vec![
//!     StemPayload::new("Vocals.wav", std::fs::read("vocals.wav")?),
//!     StemPayload::new("Drums.wav", std::fs::read("drums.wav")?),
//! ]);
//! engine.load_song(song)?;
//! engine.set_master_gain(BusId::Iem, -6.0);
//! engine.play()?;
//!
//! loop {
//!     engine.pump();
//!     std::thread::sleep(std::time::Duration::from_millis(2));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Features
//!
//! - `cpal_sink`: real audio devices through cpal. Without it only
//!   [`HeadlessBackend`](device::HeadlessBackend) is available.

mod graph;
mod node;

pub mod autotune;
pub mod clock;
pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod gain;
pub mod mic;
pub mod mixer;
pub mod nodes;
pub mod pitch;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod stem;
pub mod transport;

pub use autotune::AutoTuneSettings;
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, ErrorCategory, Result};
pub use graph::{AudioGraph, Handle, BLOCK_FRAMES};
pub use mixer::{EngineEvent, MixerState, NotificationSink};
pub use node::{AudioNode, NodeId, ProcessContext};
pub use router::BusId;
pub use scheduler::PlaybackState;
pub use stem::{Song, StemPayload};
