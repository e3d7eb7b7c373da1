//! Error types for the grammar session and the engine handle.

/// Result alias used throughout the session and engine layers.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Errors surfaced by [`GrammarSession`](crate::session::GrammarSession) and
/// [`EngineHandle`](crate::engine::EngineHandle).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The recognition resource could not be constructed or started.
    /// Fatal to the session.
    #[error("speech engine initialization failed: {0}")]
    InitializationFailed(String),

    /// Empty or malformed phrase passed to `load`.
    #[error("invalid grammar: {0}")]
    InvalidGrammar(String),

    /// Operation attempted after the session was shut down.
    #[error("speech engine is unavailable (session was shut down)")]
    EngineUnavailable,

    /// Engine signal that does not fit the current session phase.
    /// Only ever logged, never returned to a caller.
    #[error("protocol anomaly: {0}")]
    ProtocolAnomaly(String),

    /// The engine handle was driven outside its contract
    /// (started twice, grammar replaced outside an update boundary, ...).
    #[error("engine contract violation: {0}")]
    ContractViolation(String),

    /// A running backend reported a failure.
    #[error("speech backend error: {0}")]
    Backend(String),
}

impl SessionError {
    /// Wrap a backend failure, keeping the full context chain.
    pub(crate) fn backend(err: anyhow::Error) -> Self {
        Self::Backend(format!("{:#}", err))
    }

    /// Wrap a construction or start failure, keeping the full context chain.
    pub(crate) fn initialization(err: anyhow::Error) -> Self {
        Self::InitializationFailed(format!("{:#}", err))
    }
}
