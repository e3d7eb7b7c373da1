//! Continuous recognition worker shared by all concrete backends.
//!
//! A dedicated thread pulls utterances from an [`UtteranceSource`] and checks
//! each against the active grammar. Update requests are honoured only between
//! utterances: the worker emits `UpdateReached` and blocks until resumed, so an
//! utterance is always judged against the grammar that was active when it was
//! decoded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::RecognitionBackend;
use super::event::{EngineEvent, EventSink};
use crate::grammar::GrammarPhrase;

/// How long the worker waits for an utterance (or a resume) before
/// re-checking its flags.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of waiting for the next utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utterance {
    /// A complete utterance was transcribed.
    Heard(String),
    /// Nothing arrived within the timeout.
    Silence,
    /// The source is exhausted and will never produce again.
    Closed,
}

/// Producer of transcribed utterances, owned by the worker thread.
pub trait UtteranceSource: Send + 'static {
    /// Called once on the worker thread before the first utterance is requested.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Wait up to `timeout` for the next utterance.
    fn next_utterance(&mut self, timeout: Duration) -> Utterance;
}

/// State shared between the backend and its worker thread.
struct WorkerShared {
    grammar: Mutex<Option<GrammarPhrase>>, // Active single-phrase grammar
    update_requested: AtomicBool,          // Pause at the next boundary
    paused: AtomicBool,                    // Waiting at a boundary for resume
    finished: AtomicBool,                  // Worker returned, nothing more will be recognized
    shutdown: AtomicBool,                  // Permanent stop
}

/// [`RecognitionBackend`] running an [`UtteranceSource`] on its own thread.
pub struct ContinuousBackend<S: UtteranceSource> {
    source: Option<S>,                // Moved into the worker on start
    sink: Option<EventSink>,          // Moved to the worker; the stream closes when it exits
    shared: Arc<WorkerShared>,
    resume_tx: Option<Sender<()>>,    // Releases the worker from a boundary
    worker: Option<JoinHandle<()>>,
}

impl<S: UtteranceSource> ContinuousBackend<S> {
    /// Create a backend that will recognize utterances from `source`.
    pub fn new(source: S, sink: EventSink) -> Self {
        Self {
            source: Some(source),
            sink: Some(sink),
            shared: Arc::new(WorkerShared {
                grammar: Mutex::new(None),
                update_requested: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            resume_tx: None,
            worker: None,
        }
    }

    /// The grammar the worker currently matches against.
    pub fn active_grammar(&self) -> Option<GrammarPhrase> {
        self.shared.grammar.lock().clone()
    }
}

impl<S: UtteranceSource> RecognitionBackend for ContinuousBackend<S> {
    fn start(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        let source = self.source.take().context("Recognition worker already started")?;
        let sink = self.sink.take().context("Recognition backend already destroyed")?;

        *self.shared.grammar.lock() = Some(grammar.clone());

        let (resume_tx, resume_rx) = mpsc::channel();
        let shared = self.shared.clone();

        let worker = std::thread::Builder::new()
            .name("recognition-worker".to_string())
            .spawn(move || {
                run_worker(source, &sink, &shared, resume_rx);
                // Flagged before the sink drops, so a closed stream implies a finished worker
                shared.finished.store(true, Ordering::SeqCst);
                drop(sink);
            })
            .context("Failed to spawn recognition worker")?;

        self.resume_tx = Some(resume_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn request_update(&mut self) -> Result<()> {
        if self.worker.is_none() || self.shared.finished.load(Ordering::SeqCst) {
            anyhow::bail!("Recognition worker is not running");
        }
        self.shared.update_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        let mut active = self.shared.grammar.lock();
        if let Some(previous) = active.as_ref() {
            debug!("Unloading grammar '{}'", previous);
        }
        *active = Some(grammar.clone());
        debug!("Loaded grammar '{}'", grammar);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let resume_tx = self.resume_tx.as_ref().context("Recognition worker is not running")?;

        // A resume that finds the worker running must not release a later boundary
        if !self.shared.paused.swap(false, Ordering::SeqCst) {
            debug!("Recognition worker is not paused, ignoring resume");
            return Ok(());
        }
        resume_tx.send(()).context("Recognition worker has exited")
    }

    fn destroy(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);

        // Dropping the sender wakes a worker paused at a boundary
        drop(self.resume_tx.take());

        if let Some(handle) = self.worker.take()
            && let Err(e) = handle.join()
        {
            warn!("Failed to join recognition worker: {:?}", e);
        }

        self.shared.grammar.lock().take();
        self.source = None;
        self.sink = None;
    }
}

impl<S: UtteranceSource> Drop for ContinuousBackend<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Worker loop: alternate between update boundaries and utterances until
/// shutdown, source exhaustion, or the event stream closing.
fn run_worker<S: UtteranceSource>(mut source: S, sink: &EventSink, shared: &WorkerShared, resume_rx: Receiver<()>) {
    if let Err(e) = source.open() {
        warn!("Utterance source failed to open: {:#}", e);
        return;
    }

    info!("Recognition worker started");

    while !shared.shutdown.load(Ordering::Relaxed) {
        // Boundary: between two utterances, never inside one
        if shared.update_requested.swap(false, Ordering::SeqCst) {
            debug!("Update boundary reached, pausing recognition");
            shared.paused.store(true, Ordering::SeqCst);
            if !sink.send(EngineEvent::UpdateReached) || !wait_for_resume(&resume_rx, &shared.shutdown) {
                break;
            }
            debug!("Recognition resumed");
            continue;
        }

        match source.next_utterance(POLL_INTERVAL) {
            Utterance::Heard(text) => {
                let grammar = shared.grammar.lock().clone();
                match grammar {
                    Some(grammar) if grammar.matches(&text) => {
                        info!("🗣️ Recognized '{}' (heard \"{}\")", grammar, text);
                        if !sink.send(EngineEvent::Recognized(grammar.as_str().to_string())) {
                            break;
                        }
                    }
                    Some(grammar) => debug!("Rejected \"{}\" (grammar is '{}')", text, grammar),
                    None => debug!("Rejected \"{}\" (no grammar loaded)", text),
                }
            }
            Utterance::Silence => continue,
            Utterance::Closed => {
                info!("Utterance source closed");
                break;
            }
        }
    }

    debug!("Recognition worker exiting");
}

/// Block until resumed. Returns `false` if the worker should exit instead.
fn wait_for_resume(resume_rx: &Receiver<()>, shutdown: &AtomicBool) -> bool {
    loop {
        match resume_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) => return true,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    return false;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::SyncSender;

    use super::*;
    use crate::engine::EngineEvents;

    /// Source fed utterance by utterance from the test body.
    struct ScriptedSource {
        rx: Receiver<String>,
    }

    impl UtteranceSource for ScriptedSource {
        fn next_utterance(&mut self, timeout: Duration) -> Utterance {
            match self.rx.recv_timeout(timeout) {
                Ok(text) => Utterance::Heard(text),
                Err(RecvTimeoutError::Timeout) => Utterance::Silence,
                Err(RecvTimeoutError::Disconnected) => Utterance::Closed,
            }
        }
    }

    fn backend() -> (ContinuousBackend<ScriptedSource>, SyncSender<String>, EngineEvents) {
        let (tx, rx) = mpsc::sync_channel(16);
        let (sink, events) = EventSink::channel();
        (ContinuousBackend::new(ScriptedSource { rx }, sink), tx, events)
    }

    fn phrase(text: &str) -> GrammarPhrase {
        GrammarPhrase::new(text).unwrap()
    }

    fn next_event(events: &mut EngineEvents) -> EngineEvent {
        for _ in 0..200 {
            if let Ok(event) = events.try_recv() {
                return event;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("no engine event within 2s");
    }

    #[test]
    fn test_emits_active_phrase_for_matching_utterance() {
        let (mut backend, utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();

        utterances.send("Five.".to_string()).unwrap();
        assert_eq!(next_event(&mut events), EngineEvent::Recognized("five".to_string()));
        backend.destroy();
    }

    #[test]
    fn test_rejects_utterance_outside_grammar() {
        let (mut backend, utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();

        utterances.send("six".to_string()).unwrap();
        utterances.send("five".to_string()).unwrap();
        // Only the matching utterance surfaces
        assert_eq!(next_event(&mut events), EngineEvent::Recognized("five".to_string()));
        backend.destroy();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_pauses_at_boundary_until_resumed() {
        let (mut backend, utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();

        backend.request_update().unwrap();
        assert_eq!(next_event(&mut events), EngineEvent::UpdateReached);

        // Paused: this utterance waits for the new grammar
        utterances.send("seven".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert!(events.try_recv().is_err());

        backend.replace_active_grammar(&phrase("seven")).unwrap();
        backend.resume().unwrap();
        assert_eq!(next_event(&mut events), EngineEvent::Recognized("seven".to_string()));
        assert_eq!(backend.active_grammar(), Some(phrase("seven")));
        backend.destroy();
    }

    #[test]
    fn test_destroy_closes_event_stream() {
        let (mut backend, _utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();
        backend.destroy();
        backend.destroy();

        assert_eq!(backend.active_grammar(), None);
        assert!(events.blocking_recv().is_none());
    }

    #[test]
    fn test_destroy_while_paused_does_not_hang() {
        let (mut backend, _utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();
        backend.request_update().unwrap();
        assert_eq!(next_event(&mut events), EngineEvent::UpdateReached);

        backend.destroy();
        assert!(events.blocking_recv().is_none());
    }

    #[test]
    fn test_resume_while_running_does_not_skip_next_pause() {
        let (mut backend, utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();

        // Nothing to resume yet; must not be remembered for later
        backend.resume().unwrap();

        backend.request_update().unwrap();
        assert_eq!(next_event(&mut events), EngineEvent::UpdateReached);

        utterances.send("five".to_string()).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(events.try_recv().is_err());

        backend.replace_active_grammar(&phrase("seven")).unwrap();
        backend.resume().unwrap();
        utterances.send("seven".to_string()).unwrap();
        // "five" was judged against the new grammar and rejected
        assert_eq!(next_event(&mut events), EngineEvent::Recognized("seven".to_string()));
        backend.destroy();
    }

    #[test]
    fn test_request_update_fails_after_source_closed() {
        let (mut backend, utterances, mut events) = backend();
        backend.start(&phrase("five")).unwrap();

        drop(utterances);
        assert!(events.blocking_recv().is_none());
        assert!(backend.request_update().is_err());
        backend.destroy();
    }

    #[test]
    fn test_request_update_before_start_fails() {
        let (mut backend, _utterances, _events) = backend();
        assert!(backend.request_update().is_err());
        assert!(backend.resume().is_err());
    }
}
