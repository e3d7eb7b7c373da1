//! Process-wide ownership of the recognition engine.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{Result, SessionError};

/// Set while a session owns the speech engine anywhere in the process.
static ENGINE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Exclusive claim on the speech engine, released on drop.
#[derive(Debug)]
pub(crate) struct EngineClaim(());

impl EngineClaim {
    /// Claim the engine for one session.
    ///
    /// # Errors
    /// Returns [`SessionError::InitializationFailed`] while another session
    /// still holds the claim.
    pub(crate) fn acquire() -> Result<Self> {
        if ENGINE_CLAIMED.swap(true, Ordering::SeqCst) {
            return Err(SessionError::InitializationFailed("speech engine is already in use by another session".to_string()));
        }
        debug!("Speech engine claimed");
        Ok(Self(()))
    }
}

impl Drop for EngineClaim {
    fn drop(&mut self) {
        ENGINE_CLAIMED.store(false, Ordering::SeqCst);
        debug!("Speech engine claim released");
    }
}
