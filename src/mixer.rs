//! The observable mixer model and the notifications pushed to observers.
//!
//! [`MixerState`] is plain data. The engine mutates it, applies the matching
//! graph change itself and then pushes a copy through the [`NotificationSink`];
//! nothing here ever touches audio.

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::error::{EngineError, ErrorCategory};
use crate::gain::clamp_db;
use crate::router::{BusId, MasterLevel};
use crate::stem::StemKind;
use crate::transport::TransportSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusMix {
    pub gain_db: f32,
    pub muted: bool,
    /// Fold the bus to mono (only honoured on the in-ear bus)
    pub mono: bool,
}

impl Default for BusMix {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            muted: false,
            mono: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicMix {
    /// Linear
    pub gain: f32,
    pub muted: bool,
    /// Capture at all
    pub enabled: bool,
    /// Route the captured signal to the PA
    pub to_speakers: bool,
}

impl Default for MicMix {
    fn default() -> Self {
        Self {
            gain: 1.0,
            muted: false,
            enabled: true,
            to_speakers: true,
        }
    }
}

/// Read-only view of a loaded stem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StemView {
    pub name: String,
    pub gain_db: f32,
    pub kind: StemKind,
    pub melodic: bool,
    pub duration: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerState {
    pub pa: BusMix,
    pub iem: BusMix,
    pub mic: MicMix,
    /// Vocal stems also play on the PA
    pub vocals_pa: bool,
    /// Projection of the loaded song, not persisted
    #[serde(skip_deserializing)]
    pub stems: Vec<StemView>,
}

impl MixerState {
    pub fn bus(&self, id: BusId) -> &BusMix {
        match id {
            BusId::Pa => &self.pa,
            BusId::Iem => &self.iem,
        }
    }

    fn bus_mut(&mut self, id: BusId) -> &mut BusMix {
        match id {
            BusId::Pa => &mut self.pa,
            BusId::Iem => &mut self.iem,
        }
    }

    pub fn level(&self, id: BusId) -> MasterLevel {
        let bus = self.bus(id);
        MasterLevel {
            gain_db: bus.gain_db,
            muted: bus.muted,
        }
    }

    /// Store a master gain (clamped) and return the stored value.
    pub fn set_gain(&mut self, id: BusId, db: f32) -> f32 {
        let db = clamp_db(db);
        self.bus_mut(id).gain_db = db;
        db
    }

    pub fn set_muted(&mut self, id: BusId, muted: bool) {
        self.bus_mut(id).muted = muted;
    }

    /// Flip the mute flag, returning the new value.
    pub fn toggle_muted(&mut self, id: BusId) -> bool {
        let bus = self.bus_mut(id);
        bus.muted = !bus.muted;
        bus.muted
    }

    /// Copy without the stem projection, as written to the settings store.
    pub fn persisted(&self) -> MixerState {
        MixerState {
            stems: Vec::new(),
            ..self.clone()
        }
    }
}

/// Pushed to observers after every change.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    MixerChanged { mixer: MixerState },
    Transport { transport: TransportSnapshot },
    SongEnded,
    DeviceChanged { bus: BusId, device: DeviceInfo },
    Error { category: ErrorCategory, message: String },
}

impl EngineEvent {
    pub fn error(err: &EngineError) -> Self {
        EngineEvent::Error {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// One-way channel to whoever displays engine state.
pub trait NotificationSink: Send {
    fn notify(&self, event: EngineEvent);
}

impl NotificationSink for Sender<EngineEvent> {
    fn notify(&self, event: EngineEvent) {
        match self.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("notification dropped, observer is behind"),
            Err(TrySendError::Disconnected(_)) => tracing::trace!("no observer listening"),
        }
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _event: EngineEvent) {}
}
