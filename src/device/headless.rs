//! Virtual devices driven by hand.
//!
//! Nothing plays until [`HeadlessBackend::advance`] is called; each call pulls
//! the corresponding number of frames out of every open output and moves its
//! clock. Useful for offline rendering and for tests that need exact control
//! over device time.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use super::{AudioBackend, DeviceInfo, InputStream, OutputStream, StreamClock, StreamGuard};
use crate::error::{EngineError, Result};

struct OpenOutput {
    device_id: String,
    channels: usize,
    consumer: Consumer<f32>,
    clock: StreamClock,
    /// Fractional frames carried between `advance` calls
    carry: f64,
    underruns: u64,
}

struct OpenInput {
    device_id: String,
    producer: Producer<f32>,
}

#[derive(Default)]
struct Inner {
    outputs: Vec<DeviceInfo>,
    inputs: Vec<DeviceInfo>,
    open_outputs: Vec<OpenOutput>,
    open_inputs: Vec<OpenInput>,
    fail_next: HashSet<String>,
    recording: HashMap<String, Vec<f32>>,
}

impl Inner {
    fn prune(&mut self) {
        self.open_outputs.retain(|o| !o.consumer.is_abandoned());
        self.open_inputs.retain(|i| !i.producer.is_abandoned());
    }
}

/// Cloneable handle to a set of virtual devices; clones share state.
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    inner: Arc<Mutex<Inner>>,
}

impl HeadlessBackend {
    pub fn new(outputs: Vec<DeviceInfo>, inputs: Vec<DeviceInfo>) -> Self {
        let backend = Self::default();
        {
            let mut inner = backend.inner.lock();
            inner.outputs = outputs;
            inner.inputs = inputs;
        }
        backend
    }

    /// One default stereo output and one default microphone, both at `sample_rate`.
    pub fn with_defaults(sample_rate: u32) -> Self {
        Self::new(
            vec![DeviceInfo {
                id: "headless-out".into(),
                label: "Headless Output".into(),
                is_default: true,
                sample_rate,
                channels: 2,
            }],
            vec![DeviceInfo {
                id: "headless-in".into(),
                label: "Headless Microphone".into(),
                is_default: true,
                sample_rate,
                channels: 1,
            }],
        )
    }

    pub fn add_output(&self, info: DeviceInfo) {
        self.inner.lock().outputs.push(info);
    }

    /// Make the next open of `device_id` fail.
    pub fn fail_next_open(&self, device_id: &str) {
        self.inner.lock().fail_next.insert(device_id.to_string());
    }

    /// Ids of outputs that currently have a live stream, in open order.
    pub fn open_outputs(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.prune();
        inner.open_outputs.iter().map(|o| o.device_id.clone()).collect()
    }

    pub fn open_inputs(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.prune();
        inner.open_inputs.iter().map(|i| i.device_id.clone()).collect()
    }

    /// Keep the first channel of everything `device_id` plays from now on.
    pub fn record(&self, device_id: &str) {
        self.inner.lock().recording.entry(device_id.to_string()).or_default();
    }

    /// Take what `device_id` played since the last call.
    pub fn take_recording(&self, device_id: &str) -> Vec<f32> {
        self.inner
            .lock()
            .recording
            .get_mut(device_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Samples the device wanted but the ring could not supply.
    pub fn underruns(&self, device_id: &str) -> u64 {
        self.inner
            .lock()
            .open_outputs
            .iter()
            .filter(|o| o.device_id == device_id)
            .map(|o| o.underruns)
            .sum()
    }

    /// Let every open output play `seconds` of audio.
    pub fn advance(&self, seconds: f64) {
        let mut inner = self.inner.lock();
        inner.prune();
        let Inner {
            open_outputs, recording, ..
        } = &mut *inner;

        for output in open_outputs.iter_mut() {
            let exact = seconds * output.clock.sample_rate() as f64 + output.carry;
            let frames = (exact + 1e-9).floor().max(0.0);
            output.carry = exact - frames;
            let frames = frames as u64;

            let mut tape = recording.get_mut(&output.device_id);
            for _ in 0..frames {
                for ch in 0..output.channels {
                    let sample = match output.consumer.pop() {
                        Ok(s) => s,
                        Err(_) => {
                            output.underruns += 1;
                            0.0
                        }
                    };
                    if ch == 0 {
                        if let Some(tape) = tape.as_mut() {
                            tape.push(sample);
                        }
                    }
                }
            }
            output.clock.advance(frames);
        }
    }

    /// Feed captured samples to every open stream of `device_id`; returns how many were accepted.
    pub fn push_input(&self, device_id: &str, samples: &[f32]) -> usize {
        let mut inner = self.inner.lock();
        inner.prune();
        let mut accepted = 0;
        for input in inner.open_inputs.iter_mut().filter(|i| i.device_id == device_id) {
            accepted = samples.iter().take_while(|s| input.producer.push(**s).is_ok()).count();
        }
        accepted
    }
}

impl AudioBackend for HeadlessBackend {
    fn output_devices(&self) -> Vec<DeviceInfo> {
        self.inner.lock().outputs.clone()
    }

    fn input_devices(&self) -> Vec<DeviceInfo> {
        self.inner.lock().inputs.clone()
    }

    fn open_output(&self, device_id: &str, ring_frames: usize) -> Result<OutputStream> {
        let mut inner = self.inner.lock();
        if inner.fail_next.remove(device_id) {
            return Err(EngineError::DeviceOpen {
                device: device_id.to_string(),
                reason: "injected failure".into(),
            });
        }
        let info = inner
            .outputs
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .ok_or_else(|| EngineError::DeviceOpen {
                device: device_id.to_string(),
                reason: "no such output device".into(),
            })?;

        let channels = info.channels.max(1) as usize;
        let (producer, consumer) = RingBuffer::new(ring_frames.max(64) * channels);
        let clock = StreamClock::new(info.sample_rate);
        inner.open_outputs.push(OpenOutput {
            device_id: device_id.to_string(),
            channels,
            consumer,
            clock: clock.clone(),
            carry: 0.0,
            underruns: 0,
        });
        tracing::debug!(device = device_id, "headless output opened");

        Ok(OutputStream {
            info,
            producer,
            clock,
            guard: StreamGuard::detached(),
        })
    }

    fn open_input(&self, device_id: &str, sample_rate: u32) -> Result<InputStream> {
        let mut inner = self.inner.lock();
        if inner.fail_next.remove(device_id) {
            return Err(EngineError::Capture(format!("injected failure opening '{device_id}'")));
        }
        let info = inner
            .inputs
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .ok_or_else(|| EngineError::Capture(format!("no such input device '{device_id}'")))?;

        let (producer, consumer) = RingBuffer::new(sample_rate.max(1) as usize);
        inner.open_inputs.push(OpenInput {
            device_id: device_id.to_string(),
            producer,
        });

        Ok(InputStream {
            info,
            sample_rate,
            consumer,
            guard: StreamGuard::detached(),
        })
    }
}
