mod capture;
mod clip;

pub use capture::*;
pub use clip::*;
