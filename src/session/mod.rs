//! Grammar session: owns the engine, swaps its grammar through the update
//! handshake and forwards recognized text to one listener.

mod listener;
mod manager;

pub use listener::RecognitionListener;
pub use manager::{GrammarSession, LoadOutcome, SessionPhase, spawn_event_pump};
