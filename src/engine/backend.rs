//! Boundary between the engine handle and a concrete recognizer.

use anyhow::Result;

use crate::grammar::GrammarPhrase;

/// A continuous, multi-utterance speech recognizer.
///
/// Implementations publish [`EngineEvent`](super::EngineEvent)s through the
/// [`EventSink`](super::EventSink) they were constructed with. The
/// [`EngineHandle`](super::EngineHandle) is the only caller and guarantees the
/// ordering rules below, so backends need not re-check them:
///
/// - `start` is called at most once;
/// - `replace_active_grammar` is called before `start`, or while paused at an
///   update boundary (after emitting `UpdateReached`, before `resume`);
/// - `request_update` is never called again before the matching `resume`;
/// - `destroy` may be called in any state, more than once.
pub trait RecognitionBackend: Send {
    /// Begin continuous recognition with the given grammar active.
    fn start(&mut self, grammar: &GrammarPhrase) -> Result<()>;

    /// Ask the recognizer to pause at the next safe boundary and emit
    /// `UpdateReached`. Must not block.
    fn request_update(&mut self) -> Result<()>;

    /// Unload the current grammar and load `grammar` in its place.
    fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> Result<()>;

    /// Leave the update boundary and continue recognizing.
    fn resume(&mut self) -> Result<()>;

    /// Stop recognition and release every resource, including the event sink.
    fn destroy(&mut self);
}

impl<B: RecognitionBackend + ?Sized> RecognitionBackend for Box<B> {
    fn start(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        (**self).start(grammar)
    }

    fn request_update(&mut self) -> Result<()> {
        (**self).request_update()
    }

    fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        (**self).replace_active_grammar(grammar)
    }

    fn resume(&mut self) -> Result<()> {
        (**self).resume()
    }

    fn destroy(&mut self) {
        (**self).destroy()
    }
}
