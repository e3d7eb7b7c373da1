//! Microphone capture for the native recognizer.
//!
//! Uses cpal for cross-platform input, with rubato resampling when the device
//! cannot deliver the recognizer's sample rate directly.

mod capture;
mod resampler;
mod util;

pub use capture::Capturer;
