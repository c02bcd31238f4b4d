//! cpal-backed devices.
//!
//! Every stream is built and owned by a dedicated thread: some hosts require a
//! stream to stay on the thread that created it. The thread reports the build
//! result over a channel, then parks until the [`StreamGuard`] is dropped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver};
use rtrb::{Consumer, Producer, RingBuffer};

use super::{assign_ids, AudioBackend, DeviceInfo, InputStream, OutputStream, StreamClock, StreamGuard};
use crate::error::{EngineError, Result};

/// Devices of the platform's default audio host.
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal backend initialized");
        Self { host }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

enum Direction {
    Output,
    Input,
}

fn list(host: &cpal::Host, direction: Direction) -> Vec<(DeviceInfo, cpal::Device)> {
    let (devices, default_name) = match direction {
        Direction::Output => (
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
            host.default_output_device().and_then(|d| d.name().ok()),
        ),
        Direction::Input => (
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
            host.default_input_device().and_then(|d| d.name().ok()),
        ),
    };
    let devices = match devices {
        Ok(devices) => devices,
        Err(err) => {
            tracing::warn!(%err, "device enumeration failed");
            return Vec::new();
        }
    };

    let with_config: Vec<_> = devices
        .into_iter()
        .filter_map(|device| {
            let config = match direction {
                Direction::Output => device.default_output_config(),
                Direction::Input => device.default_input_config(),
            }
            .ok()?;
            let name = device.name().unwrap_or_else(|_| "Unknown".into());
            Some((name, config, device))
        })
        .collect();

    let ids = assign_ids(with_config.iter().map(|(name, _, _)| name.clone()));
    let mut default_taken = false;
    ids.into_iter()
        .zip(with_config)
        .map(|((id, label), (_, config, device))| {
            let is_default = !default_taken && default_name.as_deref() == Some(label.as_str());
            default_taken |= is_default;
            let info = DeviceInfo {
                id,
                label,
                is_default,
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
            };
            (info, device)
        })
        .collect()
}

fn wait_ready<T>(ready: Receiver<std::result::Result<T, String>>, device_id: &str) -> Result<T> {
    match ready.recv() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(reason)) => Err(EngineError::DeviceOpen {
            device: device_id.to_string(),
            reason,
        }),
        Err(_) => Err(EngineError::DeviceOpen {
            device: device_id.to_string(),
            reason: "stream thread exited before the stream was built".into(),
        }),
    }
}

impl AudioBackend for CpalBackend {
    fn output_devices(&self) -> Vec<DeviceInfo> {
        list(&self.host, Direction::Output).into_iter().map(|(info, _)| info).collect()
    }

    fn input_devices(&self) -> Vec<DeviceInfo> {
        list(&self.host, Direction::Input).into_iter().map(|(info, _)| info).collect()
    }

    fn open_output(&self, device_id: &str, ring_frames: usize) -> Result<OutputStream> {
        let (info, device) = list(&self.host, Direction::Output)
            .into_iter()
            .find(|(info, _)| info.id == device_id)
            .ok_or_else(|| EngineError::DeviceOpen {
                device: device_id.to_string(),
                reason: "no such output device".into(),
            })?;

        let config = device.default_output_config().map_err(|e| EngineError::DeviceOpen {
            device: device_id.to_string(),
            reason: e.to_string(),
        })?;
        let sample_format = config.sample_format();
        let stream_config = config.config();
        let channels = stream_config.channels as usize;

        let (producer, consumer) = RingBuffer::<f32>::new((ring_frames * channels).next_power_of_two());
        let clock = StreamClock::new(info.sample_rate);
        let stream_clock = clock.clone();

        let (ready_tx, ready_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name(format!("stagebus-out-{device_id}"))
            .spawn(move || {
                let stream = build_output_stream(&device, sample_format, &stream_config, consumer, stream_clock)
                    .map_err(|e| e.to_string())
                    .and_then(|stream| stream.play().map(|_| stream).map_err(|e| e.to_string()));
                match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // blocks until the guard drops the sender
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                    }
                }
            })?;
        let guard = StreamGuard::new(shutdown_tx, thread);

        wait_ready(ready_rx, device_id)?;
        tracing::info!(device = %info.label, sample_rate = info.sample_rate, channels, "output stream started");

        Ok(OutputStream {
            info,
            producer,
            clock,
            guard,
        })
    }

    fn open_input(&self, device_id: &str, sample_rate: u32) -> Result<InputStream> {
        let (info, device) = list(&self.host, Direction::Input)
            .into_iter()
            .find(|(info, _)| info.id == device_id)
            .ok_or_else(|| EngineError::Capture(format!("no such input device '{device_id}'")))?;

        let (stream_config, sample_format) = input_config(&device, sample_rate)?;
        let actual_rate = stream_config.sample_rate.0;

        // one second of headroom
        let (producer, consumer) = RingBuffer::<f32>::new(actual_rate as usize);

        let (ready_tx, ready_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name(format!("stagebus-in-{device_id}"))
            .spawn(move || {
                let stream = build_input_stream(&device, sample_format, &stream_config, producer)
                    .map_err(|e| e.to_string())
                    .and_then(|stream| stream.play().map(|_| stream).map_err(|e| e.to_string()));
                match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                    }
                }
            })?;
        let guard = StreamGuard::new(shutdown_tx, thread);

        wait_ready(ready_rx, device_id).map_err(|e| EngineError::Capture(e.to_string()))?;
        tracing::info!(device = %info.label, sample_rate = actual_rate, "input stream started");

        Ok(InputStream {
            info,
            sample_rate: actual_rate,
            consumer,
            guard,
        })
    }
}

/// Prefer a config running at `sample_rate`; fall back to the device default.
fn input_config(device: &cpal::Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let wanted = SampleRate(sample_rate);
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            let usable = matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16);
            if usable && range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate() {
                let config = range.with_sample_rate(wanted);
                return Ok((config.config(), config.sample_format()));
            }
        }
    }
    let config = device
        .default_input_config()
        .map_err(|e| EngineError::Capture(e.to_string()))?;
    Ok((config.config(), config.sample_format()))
}

fn build_output_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &StreamConfig,
    mut consumer: Consumer<f32>,
    clock: StreamClock,
) -> std::result::Result<cpal::Stream, String> {
    let channels = stream_config.channels.max(1) as u64;
    let on_error = |err: cpal::StreamError| tracing::error!(%err, "output stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| {
                for sample in data.iter_mut() {
                    *sample = consumer.pop().unwrap_or(0.0);
                }
                clock.advance(data.len() as u64 / channels);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _| {
                for sample in data.iter_mut() {
                    let s = consumer.pop().unwrap_or(0.0);
                    *sample = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                }
                clock.advance(data.len() as u64 / channels);
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            stream_config,
            move |data: &mut [u16], _| {
                for sample in data.iter_mut() {
                    let s = consumer.pop().unwrap_or(0.0);
                    *sample = ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16;
                }
                clock.advance(data.len() as u64 / channels);
            },
            on_error,
            None,
        ),
        other => return Err(format!("unsupported sample format {other:?}")),
    };
    stream.map_err(|e| e.to_string())
}

fn build_input_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &StreamConfig,
    mut producer: Producer<f32>,
) -> std::result::Result<cpal::Stream, String> {
    let channels = stream_config.channels.max(1) as usize;
    let on_error = |err: cpal::StreamError| tracing::error!(%err, "input stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            stream_config,
            move |data: &[f32], _| {
                for frame in data.chunks(channels) {
                    let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                    // drop on overflow, the capture source trims latency anyway
                    let _ = producer.push(mono);
                }
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            stream_config,
            move |data: &[i16], _| {
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|s| *s as f32 / i16::MAX as f32).sum();
                    let _ = producer.push(sum / frame.len() as f32);
                }
            },
            on_error,
            None,
        ),
        other => return Err(format!("unsupported sample format {other:?}")),
    };
    stream.map_err(|e| e.to_string())
}
