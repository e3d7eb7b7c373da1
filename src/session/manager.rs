//! Grammar session manager: the grammar-swap state machine plus the
//! recognized-text bridge to a single listener.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::listener::{ListenerSlot, RecognitionListener};
use crate::engine::{EngineClaim, EngineEvent, EngineEvents, EngineHandle, EngineState, EventSink, RecognitionBackend};
use crate::error::{Result, SessionError};
use crate::grammar::GrammarPhrase;

/// Where the session is in the grammar-swap protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// No grammar loaded yet; the engine has not been started.
    Idle,
    /// Recognition running with one grammar live, no swap pending.
    Active,
    /// A newer phrase waits for the engine's update boundary.
    SwapPending(GrammarPhrase),
    /// Shut down. Terminal.
    Destroyed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::SwapPending(phrase) => write!(f, "swap pending ('{}')", phrase),
            SessionPhase::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// What a successful `load` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// First load: the engine was started with the phrase active.
    Started,
    /// An update was requested; the phrase becomes active at the boundary.
    SwapRequested,
    /// A swap was already pending; its phrase was overwritten.
    SwapSuperseded,
}

struct SessionInner {
    engine: EngineHandle,
    phase: SessionPhase,
    active: Option<GrammarPhrase>, // Grammar the engine is matching against
    listener: ListenerSlot,
    claim: Option<EngineClaim>,    // Released once the engine is destroyed
}

/// Owns the recognition engine and swaps its single-phrase grammar on demand.
///
/// Cheap to clone; all clones drive the same session. `load` may be called
/// from any thread, including from inside the listener callback. Engine
/// events are handled one at a time, either by [`spawn_event_pump`] or by
/// calling [`dispatch_pending`](Self::dispatch_pending) from the caller's own
/// loop.
#[derive(Clone)]
pub struct GrammarSession {
    inner: Arc<Mutex<SessionInner>>,
}

impl GrammarSession {
    /// Construct the recognition backend and wrap it in a new session.
    ///
    /// `factory` receives the sink the backend must publish events to. Only
    /// one session may own an engine at a time in a process; the next one can
    /// be created once the previous session is shut down or dropped.
    ///
    /// # Returns
    /// The session and the engine event stream to drive it with.
    ///
    /// # Errors
    /// Returns [`SessionError::InitializationFailed`] if the backend cannot be
    /// constructed (another session is alive, no input device, missing
    /// models, ...).
    pub fn new<B, F>(factory: F) -> Result<(Self, EngineEvents)>
    where
        B: RecognitionBackend + 'static,
        F: FnOnce(EventSink) -> anyhow::Result<B>,
    {
        let claim = EngineClaim::acquire().inspect_err(|e| error!("❌ {}", e))?;

        let (sink, events) = EventSink::channel();
        let backend = factory(sink).map_err(|e| {
            error!("❌ Failed to create speech engine: {:#}", e);
            SessionError::initialization(e)
        })?;

        let inner = SessionInner {
            engine: EngineHandle::new(Box::new(backend)),
            phase: SessionPhase::Idle,
            active: None,
            listener: ListenerSlot::default(),
            claim: Some(claim),
        };

        Ok((Self { inner: Arc::new(Mutex::new(inner)) }, events))
    }

    /// Make `phrase` the active grammar.
    ///
    /// Returns immediately. The first call starts recognition; later calls
    /// request an update and the phrase becomes active once the engine
    /// reaches its boundary. Several calls before that boundary collapse into
    /// one swap to the most recent phrase.
    ///
    /// # Errors
    /// - [`SessionError::InvalidGrammar`] for an empty or malformed phrase
    /// - [`SessionError::EngineUnavailable`] after shutdown
    /// - [`SessionError::InitializationFailed`] if the engine fails to start;
    ///   the session is shut down
    /// - [`SessionError::Backend`] if the update request is rejected
    pub fn load(&self, phrase: &str) -> Result<LoadOutcome> {
        let phrase = GrammarPhrase::new(phrase)?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match &inner.phase {
            SessionPhase::Destroyed => Err(SessionError::EngineUnavailable),
            SessionPhase::Idle => {
                if let Err(e) = inner.engine.start(&phrase) {
                    error!("❌ Failed to start recognition: {}", e);
                    inner.shut_down();
                    return Err(e);
                }
                inner.active = Some(phrase);
                inner.phase = SessionPhase::Active;
                Ok(LoadOutcome::Started)
            }
            SessionPhase::Active => {
                let token = inner.engine.request_update()?;
                debug!("Grammar '{}' pending until {}", phrase, token);
                inner.phase = SessionPhase::SwapPending(phrase);
                Ok(LoadOutcome::SwapRequested)
            }
            SessionPhase::SwapPending(previous) => {
                debug!("Grammar '{}' supersedes pending '{}'", phrase, previous);
                inner.phase = SessionPhase::SwapPending(phrase);
                Ok(LoadOutcome::SwapSuperseded)
            }
        }
    }

    /// Process one engine event.
    ///
    /// Failures here have no synchronous caller, so they are logged and
    /// absorbed.
    pub fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::UpdateReached => {
                let mut inner = self.inner.lock();
                if let Err(e) = inner.apply_pending_swap() {
                    warn!("⚠️ {}", e);
                }
            }
            EngineEvent::Recognized(text) => {
                // Lock released before the callback so the listener may call back in
                let listener = {
                    let mut inner = self.inner.lock();
                    if inner.phase == SessionPhase::Destroyed {
                        debug!("Dropping recognition of '{}' after shutdown", text);
                        return;
                    }
                    inner.listener.upgrade()
                };

                match listener {
                    Some(listener) => listener.on_recognized(&text),
                    None => debug!("No listener registered for '{}'", text),
                }
            }
        }
    }

    /// Handle every event already queued on `events`, in order.
    ///
    /// For callers that own a single event loop and want engine events
    /// processed on it. Returns the number of events handled.
    pub fn dispatch_pending(&self, events: &mut EngineEvents) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Register the listener for recognized text, replacing any previous one.
    ///
    /// Only a weak reference is kept; the caller owns the listener.
    pub fn register_listener<L: RecognitionListener + 'static>(&self, listener: &Arc<L>) {
        self.inner.lock().listener.register(listener);
    }

    /// Remove the current listener registration, if any.
    pub fn clear_listener(&self) {
        self.inner.lock().listener.clear();
    }

    /// Destroy the engine, discard any pending swap and the listener. Idempotent.
    pub fn shutdown(&self) {
        self.inner.lock().shut_down();
    }

    /// Current protocol phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase.clone()
    }

    /// The grammar the engine is currently matching against.
    pub fn active_grammar(&self) -> Option<GrammarPhrase> {
        self.inner.lock().active.clone()
    }

    /// The phrase waiting for the next update boundary, if any.
    pub fn pending_grammar(&self) -> Option<GrammarPhrase> {
        match &self.inner.lock().phase {
            SessionPhase::SwapPending(phrase) => Some(phrase.clone()),
            _ => None,
        }
    }

    /// Lifecycle state of the underlying engine.
    pub fn engine_state(&self) -> EngineState {
        self.inner.lock().engine.state()
    }
}

impl SessionInner {
    /// Apply the pending phrase inside the engine's update window.
    fn apply_pending_swap(&mut self) -> Result<()> {
        let phrase = match &self.phase {
            SessionPhase::SwapPending(phrase) => phrase.clone(),
            SessionPhase::Active => return Err(SessionError::ProtocolAnomaly("update boundary reached with no swap pending".to_string())),
            SessionPhase::Idle => return Err(SessionError::ProtocolAnomaly("update boundary reached before recognition started".to_string())),
            SessionPhase::Destroyed => return Err(SessionError::ProtocolAnomaly("update boundary reached after shutdown".to_string())),
        };

        let boundary = self.engine.at_update_boundary(|window| -> Result<_> {
            window.replace_active_grammar(&phrase)?;
            Ok(window.token())
        });

        let applied = match boundary {
            Ok(Some(applied)) => applied,
            Ok(None) => {
                return Err(SessionError::ProtocolAnomaly(format!("update boundary reached but no update was requested for '{}'", phrase)));
            }
            Err(e) => Err(e),
        };

        // The boundary was consumed, whether or not the new grammar took
        self.phase = SessionPhase::Active;

        match applied {
            Ok(token) => {
                info!("🔁 Grammar swapped to '{}' ({})", phrase, token);
                self.active = Some(phrase);
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to load grammar '{}': {}", phrase, e);
                Err(e)
            }
        }
    }

    fn shut_down(&mut self) {
        if self.phase == SessionPhase::Destroyed {
            return;
        }

        if let SessionPhase::SwapPending(phrase) = &self.phase {
            debug!("Discarding pending grammar '{}'", phrase);
        }

        self.engine.destroy();
        self.claim.take();
        self.phase = SessionPhase::Destroyed;
        self.active = None;
        self.listener.clear();
        info!("Grammar session shut down");
    }
}

/// Drive `session` from its engine event stream on a tokio task.
///
/// The task ends once the stream closes, which happens when the session is
/// shut down (the backend drops its sink).
pub fn spawn_event_pump(session: GrammarSession, mut events: EngineEvents) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            session.handle_event(event);
        }
        debug!("Engine event stream closed");
    })
}
