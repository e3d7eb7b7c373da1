//! Grammar session - drive a continuously running speech recognizer with a
//! single-phrase grammar that can be swapped at runtime.
//!
//! The [`session::GrammarSession`] owns the recognition engine. The first
//! `load` starts recognition; later loads go through the engine's update
//! handshake (request → boundary signal → apply) so that recognition never
//! stops and no result is ever judged against a half-swapped grammar.
//! Recognized text is forwarded to one registered listener.

#[cfg(feature = "native")]
mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod session;
pub mod stt;

pub use error::{Result, SessionError};
pub use grammar::GrammarPhrase;
pub use session::{GrammarSession, LoadOutcome, RecognitionListener, SessionPhase, spawn_event_pump};
