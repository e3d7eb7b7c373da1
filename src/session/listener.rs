//! Recognized-text listener registration.

use std::sync::{Arc, Weak};

use tracing::debug;

/// Consumer of recognized text.
///
/// Called once per recognized utterance, in arrival order, with the exact
/// phrase text. Interpretation is entirely up to the listener.
pub trait RecognitionListener: Send + Sync {
    fn on_recognized(&self, text: &str);
}

impl<F> RecognitionListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_recognized(&self, text: &str) {
        self(text)
    }
}

/// Holds at most one non-owning listener registration.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    current: Option<Weak<dyn RecognitionListener>>,
}

impl ListenerSlot {
    /// Replace the registration with `listener`.
    pub(crate) fn register<L: RecognitionListener + 'static>(&mut self, listener: &Arc<L>) {
        let listener: Arc<dyn RecognitionListener> = listener.clone();
        if self.current.replace(Arc::downgrade(&listener)).is_some() {
            debug!("Replaced recognition listener");
        }
    }

    pub(crate) fn clear(&mut self) {
        self.current = None;
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self) -> bool {
        self.current.is_some()
    }

    /// Upgrade the registration for one delivery. A listener that has been
    /// dropped by its owner is unregistered here.
    pub(crate) fn upgrade(&mut self) -> Option<Arc<dyn RecognitionListener>> {
        let listener = self.current.as_ref()?.upgrade();
        if listener.is_none() {
            debug!("Recognition listener was dropped, clearing registration");
            self.current = None;
        }
        listener
    }
}
