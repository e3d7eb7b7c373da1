//! Utterance sources for the continuous recognition worker.
//!
//! The console source is always available; the microphone backend (Silero VAD
//! + Whisper via sherpa-rs) needs the `native` feature.

mod console;
#[cfg(feature = "native")]
mod microphone;
#[cfg(feature = "native")]
mod recognizer;

pub use console::{ConsoleSource, console_backend};
#[cfg(feature = "native")]
pub use microphone::MicrophoneBackend;
