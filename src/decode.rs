//! Stem decoding and per-bus preparation.
//!
//! Stems arrive as encoded bytes and are decoded exactly once into an
//! interleaved `f32` [`DecodedBuffer`]. Each bus then needs the audio at its own
//! device rate; [`StemCache`] keeps one prepared copy per `(stem, rate)` and hands
//! back the decoded buffer itself when no conversion is needed.

use std::io::Cursor;
use std::sync::Arc;

use hashbrown::HashMap;
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{EngineError, Result};

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Interleaved PCM owned by one stem.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    /// Length in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    /// Band-limited copy at `sample_rate`, trimmed so it lines up with the
    /// original frame for frame.
    pub fn resampled(&self, sample_rate: u32) -> Result<DecodedBuffer> {
        if sample_rate == self.sample_rate || self.samples.is_empty() {
            return Ok(DecodedBuffer::new(self.samples.clone(), self.channels, sample_rate));
        }

        let channels = self.channels;
        let frames = self.frames();
        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            sample_rate as usize,
            RESAMPLE_CHUNK,
            RESAMPLE_SUB_CHUNKS,
            channels,
        )
        .map_err(|e| EngineError::Resample(e.to_string()))?;

        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| self.samples.chunks_exact(channels).map(|frame| frame[ch]).collect())
            .collect();
        let expected = (frames as u64 * sample_rate as u64 / self.sample_rate as u64) as usize;
        let delay = resampler.output_delay();
        let mut planar_out: Vec<Vec<f32>> = (0..channels)
            .map(|_| Vec::with_capacity(expected + delay + RESAMPLE_CHUNK))
            .collect();

        let mut pos = 0;
        while pos < frames {
            let needed = resampler.input_frames_next();
            let end = (pos + needed).min(frames);
            let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..end]).collect();
            let block = if end - pos == needed {
                resampler.process(chunk.as_slice(), None)
            } else {
                resampler.process_partial(Some(chunk.as_slice()), None)
            }
            .map_err(|e| EngineError::Resample(e.to_string()))?;
            for (out, ch) in planar_out.iter_mut().zip(block) {
                out.extend_from_slice(&ch);
            }
            pos = end;
        }

        // flush the filter tail
        while planar_out[0].len() < expected + delay {
            let block = resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| EngineError::Resample(e.to_string()))?;
            if block[0].is_empty() {
                break;
            }
            for (out, ch) in planar_out.iter_mut().zip(block) {
                out.extend_from_slice(&ch);
            }
        }

        let mut samples = Vec::with_capacity(expected * channels);
        for i in delay..delay + expected {
            for ch in &planar_out {
                samples.push(ch.get(i).copied().unwrap_or(0.0));
            }
        }
        Ok(DecodedBuffer::new(samples, channels, sample_rate))
    }
}

/// Turns encoded stem bytes into PCM.
pub trait StemDecoder: Send {
    /// `name` is used as a format hint (its extension) and in errors.
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<DecodedBuffer>;
}

/// Decoder for every container/codec symphonia was built with.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl StemDecoder for SymphoniaDecoder {
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<DecodedBuffer> {
        let fail = |reason: String| EngineError::Decode {
            stem: name.to_string(),
            reason,
        };

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let mut hint = Hint::new();
        if let Some((_, ext)) = name.rsplit_once('.') {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| fail(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| fail("no audio track".into()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| fail("unknown sample rate".into()))?;
        let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| fail(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    tracing::warn!(stem = name, %e, "stopped reading packets");
                    break;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(stem = name, e, "skipping corrupt packet");
                    continue;
                }
                Err(e) => return Err(fail(e.to_string())),
            };

            if sample_buf.is_none() {
                let spec = *decoded.spec();
                channels = spec.channels.count();
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        if samples.is_empty() || channels == 0 {
            return Err(fail("no audio decoded".into()));
        }

        let buffer = DecodedBuffer::new(samples, channels, sample_rate);
        tracing::debug!(
            stem = name,
            channels,
            sample_rate,
            seconds = buffer.duration(),
            "stem decoded"
        );
        Ok(buffer)
    }
}

/// Decoded stems plus their per-rate prepared copies.
#[derive(Default)]
pub struct StemCache {
    decoded: HashMap<String, Arc<DecodedBuffer>>,
    prepared: HashMap<(String, u32), Arc<DecodedBuffer>>,
}

impl StemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly decoded stem. A stem decoded twice keeps the first buffer.
    pub fn insert(&mut self, name: &str, buffer: DecodedBuffer) -> Arc<DecodedBuffer> {
        Arc::clone(self.decoded.entry(name.to_string()).or_insert_with(|| Arc::new(buffer)))
    }

    pub fn decoded(&self, name: &str) -> Option<&Arc<DecodedBuffer>> {
        self.decoded.get(name)
    }

    pub fn is_prepared(&self, name: &str, sample_rate: u32) -> bool {
        self.prepared.contains_key(&(name.to_string(), sample_rate))
    }

    /// The stem at `sample_rate`, converting (once) when needed. `None` for
    /// unknown stems and for conversions that failed.
    pub fn prepare(&mut self, name: &str, sample_rate: u32) -> Option<Arc<DecodedBuffer>> {
        let decoded = self.decoded.get(name)?;
        let key = (name.to_string(), sample_rate);
        if let Some(prepared) = self.prepared.get(&key) {
            return Some(Arc::clone(prepared));
        }

        let prepared = if decoded.sample_rate == sample_rate {
            Arc::clone(decoded)
        } else {
            tracing::debug!(stem = name, from = decoded.sample_rate, to = sample_rate, "resampling stem");
            match decoded.resampled(sample_rate) {
                Ok(buffer) => Arc::new(buffer),
                Err(err) => {
                    tracing::warn!(stem = name, %err, "stem not prepared");
                    return None;
                }
            }
        };
        self.prepared.insert(key, Arc::clone(&prepared));
        Some(prepared)
    }

    /// Longest decoded stem, in seconds.
    pub fn duration(&self) -> f64 {
        self.decoded.values().map(|b| b.duration()).fold(0.0, f64::max)
    }

    pub fn len(&self) -> usize {
        self.decoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoded.is_empty()
    }

    pub fn clear(&mut self) {
        self.decoded.clear();
        self.prepared.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wav(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames * channels as usize {
                writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_bytes() {
        let buffer = SymphoniaDecoder.decode("Drums.wav", &wav(8000, 2, 4000)).unwrap();
        assert_eq!(buffer.channels, 2);
        assert_eq!(buffer.sample_rate, 8000);
        assert_eq!(buffer.frames(), 4000);
        assert_relative_eq!(buffer.duration(), 0.5);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = SymphoniaDecoder.decode("Bass.mp3", b"definitely not audio").unwrap_err();
        assert!(matches!(err, EngineError::Decode { ref stem, .. } if stem == "Bass.mp3"));
    }

    fn sine(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn resampling_keeps_duration() {
        let buffer = DecodedBuffer::new(sine(1000.0, 44_100, 4410), 1, 44_100);
        let up = buffer.resampled(48_000).unwrap();
        assert_eq!(up.sample_rate, 48_000);
        assert_eq!(up.frames(), 4800);
        assert_relative_eq!(up.duration(), buffer.duration(), epsilon = 1e-3);
        // passband tone keeps its level away from the edges
        assert_relative_eq!(peak(&up.samples[1200..3600]), 1.0, epsilon = 0.05);
    }

    #[test]
    fn resampling_keeps_channels_apart() {
        let frames = 9600;
        let samples: Vec<f32> = sine(500.0, 48_000, frames)
            .into_iter()
            .flat_map(|s| [s, 0.0])
            .collect();
        let down = DecodedBuffer::new(samples, 2, 48_000).resampled(44_100).unwrap();
        assert_eq!(down.channels, 2);
        assert_eq!(down.frames(), 8820);
        let left: Vec<f32> = down.samples.iter().step_by(2).copied().collect();
        let right: Vec<f32> = down.samples.iter().skip(1).step_by(2).copied().collect();
        assert_relative_eq!(peak(&left[2000..6000]), 1.0, epsilon = 0.05);
        assert!(peak(&right) < 1e-3);
    }

    #[test]
    fn downsampling_filters_above_nyquist() {
        // 12 kHz has no place at 16 kHz and must not fold back
        let buffer = DecodedBuffer::new(sine(12_000.0, 48_000, 48_000), 1, 48_000);
        let down = buffer.resampled(16_000).unwrap();
        assert_eq!(down.frames(), 16_000);
        assert!(peak(&down.samples[2000..14_000]) < 0.05);
    }

    #[test]
    fn cache_shares_matching_rate() {
        let mut cache = StemCache::new();
        let original = cache.insert("Keys", DecodedBuffer::new(vec![0.0; 960], 2, 48_000));
        let same = cache.prepare("Keys", 48_000).unwrap();
        assert!(Arc::ptr_eq(&original, &same));

        let other = cache.prepare("Keys", 24_000).unwrap();
        assert_eq!(other.frames(), 240);
        assert!(cache.is_prepared("Keys", 24_000));
        assert!(Arc::ptr_eq(&other, &cache.prepare("Keys", 24_000).unwrap()));
        assert!(cache.prepare("Missing", 48_000).is_none());
    }

    #[test]
    fn duration_is_longest_stem() {
        let mut cache = StemCache::new();
        cache.insert("a", DecodedBuffer::new(vec![0.0; 100], 1, 100));
        cache.insert("b", DecodedBuffer::new(vec![0.0; 300], 1, 100));
        assert_relative_eq!(cache.duration(), 3.0);
    }
}
