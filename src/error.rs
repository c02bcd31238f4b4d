//! Engine error type.

use thiserror::Error;

use crate::router::BusId;

/// Coarse grouping of failures, used when they are reported to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Device,
    Decode,
    Capture,
    ProcessingUnit,
    Engine,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no audio device is available")]
    DeviceUnavailable,

    #[error("failed to open device '{device}': {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("failed to decode stem '{stem}': {reason}")]
    Decode { stem: String, reason: String },

    #[error("sample rate conversion failed: {0}")]
    Resample(String),

    #[error("microphone capture failed: {0}")]
    Capture(String),

    #[error("pitch correction units unavailable: {0}")]
    ProcessingUnit(String),

    #[error("{0} bus is busy with another operation")]
    BusBusy(BusId),

    #[error("no song is loaded")]
    NoSong,

    #[error("engine is not initialized")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("settings store: {0}")]
    Settings(String),

    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::DeviceUnavailable | EngineError::DeviceOpen { .. } | EngineError::BusBusy(_) => {
                ErrorCategory::Device
            }
            EngineError::Decode { .. } | EngineError::Resample(_) => ErrorCategory::Decode,
            EngineError::Capture(_) => ErrorCategory::Capture,
            EngineError::ProcessingUnit(_) => ErrorCategory::ProcessingUnit,
            EngineError::NoSong
            | EngineError::NotInitialized
            | EngineError::Config(_)
            | EngineError::Settings(_)
            | EngineError::Toml(_)
            | EngineError::Json(_)
            | EngineError::Io(_) => ErrorCategory::Engine,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_categories() {
        let err = EngineError::DeviceOpen {
            device: "usb-2".into(),
            reason: "busy".into(),
        };
        assert_eq!(err.to_string(), "failed to open device 'usb-2': busy");
        assert_eq!(err.category(), ErrorCategory::Device);
        assert_eq!(EngineError::BusBusy(BusId::Iem).to_string(), "IEM bus is busy with another operation");
        assert_eq!(EngineError::NoSong.category(), ErrorCategory::Engine);
    }
}
