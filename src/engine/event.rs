//! Engine event stream.

use tokio::sync::mpsc;
use tracing::debug;

/// Events produced by a running recognition engine.
///
/// Both kinds travel on one ordered stream, so an update boundary is never
/// delivered concurrently with a recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An utterance matching the active grammar was recognized.
    Recognized(String),
    /// The engine paused at a safe point after `request_update()`; the
    /// grammar may be replaced until the engine is resumed.
    UpdateReached,
}

/// Receiving end of the engine event stream.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Sending end of the engine event stream, handed to backends on construction.
/// Cloneable so a backend can move a copy into its worker thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    /// Create a connected sink/stream pair.
    pub fn channel() -> (Self, EngineEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. Never blocks.
    ///
    /// # Returns
    /// `false` once the receiving side has gone away.
    pub fn send(&self, event: EngineEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("Engine event dropped, stream closed: {:?}", e.0);
                false
            }
        }
    }
}
