//! Recognition engine handle.
//!
//! Wraps a continuous recognizer behind start-once semantics, an explicit
//! update boundary for grammar swaps, and explicit teardown.

mod backend;
mod claim;
pub mod continuous;
mod event;
mod handle;

pub use backend::RecognitionBackend;
pub(crate) use claim::EngineClaim;
pub use continuous::{ContinuousBackend, Utterance, UtteranceSource};
pub use event::{EngineEvent, EngineEvents, EventSink};
pub use handle::{EngineHandle, EngineState, UpdateToken, UpdateWindow};
