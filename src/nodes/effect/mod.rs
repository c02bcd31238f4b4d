mod analyser;
mod compressor;
mod gain;
mod mixer;
mod mono_fold;
mod pitch_detector;
mod pitch_shifter;

pub use analyser::*;
pub use compressor::*;
pub use gain::*;
pub use mixer::*;
pub use mono_fold::*;
pub use pitch_detector::*;
pub use pitch_shifter::*;
