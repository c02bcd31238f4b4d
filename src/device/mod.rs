//! Audio device discovery and streams.
//!
//! An [`AudioBackend`] lists devices and opens streams. Output streams hand the
//! engine the producer end of an interleaved `f32` ring buffer and a
//! [`StreamClock`] counting the frames the device has consumed; that count is the
//! bus clock. Input streams deliver mono samples through the consumer end of a
//! ring buffer.
//!
//! Two backends ship with the crate:
//! - [`CpalBackend`] (feature `cpal_sink`) talks to the system's audio host
//! - [`HeadlessBackend`] has virtual devices that only play when told to, for
//!   offline runs and tests

#[cfg(feature = "cpal_sink")]
mod cpal_backend;
mod headless;

#[cfg(feature = "cpal_sink")]
pub use cpal_backend::CpalBackend;
pub use headless::HeadlessBackend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use rtrb::{Consumer, Producer};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A physical (or virtual) endpoint as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identifier, unique among devices of the same direction
    pub id: String,
    /// Human readable name; several devices may share one
    pub label: String,
    pub is_default: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A persisted device choice. Resolution tries the label first, then the id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePreference {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl DevicePreference {
    pub fn of(info: &DeviceInfo) -> Self {
        Self {
            id: Some(info.id.clone()),
            label: Some(info.label.clone()),
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            label: None,
        }
    }
}

/// Frames consumed by an output device since its stream opened.
#[derive(Clone, Debug)]
pub struct StreamClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl StreamClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Device time in seconds.
    #[inline]
    pub fn seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }
}

/// Keeps a stream alive. Dropping it stops the stream and releases the device.
///
/// Backends that run the stream on its own thread park that thread on a
/// shutdown channel; dropping the guard closes the channel and joins.
pub struct StreamGuard {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamGuard {
    pub fn new(shutdown: Sender<()>, thread: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            thread: Some(thread),
        }
    }

    /// A guard with nothing to release.
    pub fn detached() -> Self {
        Self {
            shutdown: None,
            thread: None,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("audio stream thread panicked");
            }
        }
    }
}

/// An open output device.
pub struct OutputStream {
    pub info: DeviceInfo,
    /// Interleaved samples with `info.channels` channels at `info.sample_rate`
    pub producer: Producer<f32>,
    pub clock: StreamClock,
    pub guard: StreamGuard,
}

/// An open capture device delivering mono samples.
pub struct InputStream {
    pub info: DeviceInfo,
    /// Rate the samples actually arrive at
    pub sample_rate: u32,
    pub consumer: Consumer<f32>,
    pub guard: StreamGuard,
}

pub trait AudioBackend: Send {
    fn output_devices(&self) -> Vec<DeviceInfo>;

    fn input_devices(&self) -> Vec<DeviceInfo>;

    /// Open `device_id` for playback with room for `ring_frames` frames of audio.
    fn open_output(&self, device_id: &str, ring_frames: usize) -> Result<OutputStream>;

    /// Open `device_id` for mono capture, preferably at `sample_rate`.
    fn open_input(&self, device_id: &str, sample_rate: u32) -> Result<InputStream>;
}

/// Disambiguate repeated names: the second "USB Audio" becomes "USB Audio#2".
pub(crate) fn assign_ids(labels: impl IntoIterator<Item = String>) -> Vec<(String, String)> {
    let mut seen: hashbrown::HashMap<String, usize> = hashbrown::HashMap::new();
    labels
        .into_iter()
        .map(|label| {
            let count = seen.entry(label.clone()).or_insert(0);
            *count += 1;
            let id = if *count == 1 { label.clone() } else { format!("{label}#{count}") };
            (id, label)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_labels_get_distinct_ids() {
        let ids = assign_ids(["USB Audio".to_string(), "Speakers".to_string(), "USB Audio".to_string()]);
        assert_eq!(ids[0], ("USB Audio".to_string(), "USB Audio".to_string()));
        assert_eq!(ids[2], ("USB Audio#2".to_string(), "USB Audio".to_string()));
    }

    #[test]
    fn clock_counts_seconds() {
        let clock = StreamClock::new(48_000);
        clock.advance(24_000);
        assert_eq!(clock.seconds(), 0.5);
        let shared = clock.clone();
        shared.advance(24_000);
        assert_eq!(clock.frames(), 48_000);
    }

    #[test]
    fn preference_round_trips_through_json() {
        let pref = DevicePreference {
            id: Some("usb#2".into()),
            label: Some("USB".into()),
        };
        let value = serde_json::to_value(&pref).unwrap();
        assert_eq!(serde_json::from_value::<DevicePreference>(value).unwrap(), pref);
        assert_eq!(serde_json::from_str::<DevicePreference>("{}").unwrap(), DevicePreference::default());
    }
}
