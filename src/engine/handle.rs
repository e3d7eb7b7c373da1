//! Lifecycle and contract enforcement around a [`RecognitionBackend`].

use std::fmt;

use tracing::{debug, info, warn};

use super::backend::RecognitionBackend;
use crate::error::{Result, SessionError};
use crate::grammar::GrammarPhrase;

/// Lifecycle of the recognition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Resource constructed, recognition not started yet.
    Uninitialized,
    /// Continuous recognition is running.
    Running,
    /// Torn down. Terminal.
    Destroyed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Running => write!(f, "running"),
            EngineState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Identifies one `request_update()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateToken(u64);

impl UpdateToken {
    /// Sequence number, starting at 1 for the first update of an engine.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UpdateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update#{}", self.0)
    }
}

/// Owner of the recognition backend.
///
/// Enforces start-once semantics, a single outstanding update request, and
/// grammar replacement only before start or inside an update boundary.
pub struct EngineHandle {
    backend: Box<dyn RecognitionBackend>,
    state: EngineState,
    outstanding: Option<UpdateToken>, // Update requested, boundary not reached yet
    issued: u64,                      // Number of update tokens issued so far
}

impl EngineHandle {
    /// Wrap a freshly constructed backend.
    pub(crate) fn new(backend: Box<dyn RecognitionBackend>) -> Self {
        Self { backend, state: EngineState::Uninitialized, outstanding: None, issued: 0 }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The update request waiting for its boundary, if any.
    pub fn outstanding_update(&self) -> Option<UpdateToken> {
        self.outstanding
    }

    /// Start continuous recognition with `grammar` active. Allowed once.
    ///
    /// # Errors
    /// - [`SessionError::ContractViolation`] if already started
    /// - [`SessionError::EngineUnavailable`] if destroyed
    /// - [`SessionError::InitializationFailed`] if the backend fails to start
    pub fn start(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        match self.state {
            EngineState::Uninitialized => {}
            EngineState::Running => return Err(SessionError::ContractViolation("recognition already started".to_string())),
            EngineState::Destroyed => return Err(SessionError::EngineUnavailable),
        }

        self.backend.start(grammar).map_err(SessionError::initialization)?;
        self.state = EngineState::Running;
        info!("Continuous recognition started with grammar '{}'", grammar);
        Ok(())
    }

    /// Ask the engine to pause at its next safe boundary.
    ///
    /// # Errors
    /// - [`SessionError::ContractViolation`] if not running, or if an earlier
    ///   request has not reached its boundary yet
    /// - [`SessionError::EngineUnavailable`] if destroyed
    /// - [`SessionError::Backend`] if the backend rejects the request
    pub fn request_update(&mut self) -> Result<UpdateToken> {
        match self.state {
            EngineState::Running => {}
            EngineState::Uninitialized => return Err(SessionError::ContractViolation("update requested before start".to_string())),
            EngineState::Destroyed => return Err(SessionError::EngineUnavailable),
        }

        if let Some(token) = self.outstanding {
            return Err(SessionError::ContractViolation(format!("{} is still waiting for its boundary", token)));
        }

        self.backend.request_update().map_err(SessionError::backend)?;

        self.issued += 1;
        let token = UpdateToken(self.issued);
        self.outstanding = Some(token);
        debug!("Requested recognizer update ({})", token);
        Ok(token)
    }

    /// Replace the grammar before recognition has started.
    ///
    /// Once running, grammars can only change inside
    /// [`at_update_boundary`](Self::at_update_boundary).
    ///
    /// # Errors
    /// - [`SessionError::ContractViolation`] if the engine is running
    /// - [`SessionError::EngineUnavailable`] if destroyed
    pub fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        match self.state {
            EngineState::Uninitialized => self.backend.replace_active_grammar(grammar).map_err(SessionError::backend),
            EngineState::Running => Err(SessionError::ContractViolation("grammar can only be replaced at an update boundary".to_string())),
            EngineState::Destroyed => Err(SessionError::EngineUnavailable),
        }
    }

    /// Handle an `UpdateReached` signal: run `apply` with the update window
    /// open, then resume the backend.
    ///
    /// A signal that answers no outstanding request is spurious: the backend
    /// is not paused, so `apply` is skipped, nothing is resumed and `None` is
    /// returned. Otherwise the backend is resumed whatever `apply` did.
    ///
    /// # Errors
    /// - [`SessionError::ContractViolation`] if not started
    /// - [`SessionError::EngineUnavailable`] if destroyed
    /// - [`SessionError::Backend`] if resuming fails
    pub fn at_update_boundary<R>(&mut self, apply: impl FnOnce(&mut UpdateWindow<'_>) -> R) -> Result<Option<R>> {
        match self.state {
            EngineState::Running => {}
            EngineState::Uninitialized => return Err(SessionError::ContractViolation("update boundary before start".to_string())),
            EngineState::Destroyed => return Err(SessionError::EngineUnavailable),
        }

        let Some(token) = self.outstanding.take() else {
            debug!("Update boundary without an outstanding request, ignoring");
            return Ok(None);
        };

        let result = {
            let mut window = UpdateWindow { backend: self.backend.as_mut(), token };
            apply(&mut window)
        };

        self.backend.resume().map_err(SessionError::backend)?;
        Ok(Some(result))
    }

    /// Stop recognition and release the backend. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == EngineState::Destroyed {
            return;
        }

        self.backend.destroy();
        if self.state == EngineState::Running {
            info!("Continuous recognition stopped");
        }
        if let Some(token) = self.outstanding.take() {
            warn!("Discarding {} on engine teardown", token);
        }
        self.state = EngineState::Destroyed;
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Access to the backend while it is paused at an update boundary.
pub struct UpdateWindow<'a> {
    backend: &'a mut dyn RecognitionBackend,
    token: UpdateToken,
}

impl UpdateWindow<'_> {
    /// The request this boundary answers.
    pub fn token(&self) -> UpdateToken {
        self.token
    }

    /// Unload the current grammar and load `grammar`.
    pub fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        self.backend.replace_active_grammar(grammar).map_err(SessionError::backend)
    }
}
