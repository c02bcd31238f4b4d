//! Built-in audio nodes.
//!
//! Nodes are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`ClipPlayer`] - Play a decoded stem from a scheduled graph frame
//! - [`CaptureSource`] - Read microphone samples from a ring buffer with rate conversion
//!
//! ## Effects ([`effect`])
//!
//! Process audio (inputs → outputs):
//! - [`Gain`] - Volume control with smoothing and linear ramps
//! - [`Mixer`] - Sum multiple inputs together
//! - [`MonoFold`] - Optional stereo-to-mono fold (in-ear bus)
//! - [`Analyser`] - Peak/RMS tap
//! - [`Compressor`] - Soft-knee dynamics for the corrected vocal
//! - [`PitchDetector`] - Pass-through tap emitting [`PitchSample`](crate::pitch::PitchSample)s
//! - [`PitchShifter`] - Transpose by a number of semitones
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio with no audio outputs:
//! - [`DeviceSink`] - Feed an output device's ring buffer
//!
//! # Message Types
//!
//! Most nodes have associated message types for runtime parameter control:
//! - [`ClipMessage`] - Stop a clip or change its volume
//! - [`GainMessage`] - Set or ramp a [`Gain`]
//! - [`PitchDetectorMessage`] / [`PitchShifterMessage`] - Correction unit contract
//!
//! Nodes without parameters (like [`Mixer`]) use `()` as their message type.

pub mod effect;
pub mod sink;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use effect::{
    Analyser, AnalyserReadout, Compressor, CompressorMessage, Gain, GainMessage, Mixer, MonoFold, MonoFoldMessage,
    PitchDetector, PitchDetectorMessage, PitchShifter, PitchShifterMessage,
};
pub use sink::DeviceSink;
pub use source::{CaptureMessage, CaptureSource, ClipMessage, ClipPlayer};
