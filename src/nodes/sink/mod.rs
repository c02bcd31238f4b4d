mod device_sink;

pub use device_sink::*;
