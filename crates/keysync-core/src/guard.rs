//! Exactly-once acknowledgment callbacks

use std::fmt;

/// Caller-supplied callback receiving whether the pipeline handled an event.
pub type AckCallback = Box<dyn FnOnce(bool)>;

/// Wraps the callback of one hardware event and makes sure it runs exactly
/// once.
///
/// The guard is consumed by either [`CallbackGuard::park`], which hands the
/// callback to the response correlator until the acknowledgment arrives, or
/// [`CallbackGuard::resolve`], which invokes it immediately. Since both take
/// `self`, a second resolution cannot be expressed. Dropping a guard that was
/// never consumed is a contract violation and is reported when it happens.
pub struct CallbackGuard {
    callback: Option<AckCallback>,
}

impl CallbackGuard {
    pub fn new(callback: impl FnOnce(bool) + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Guard for events nobody waits on, such as a modifier catch-up.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Invoke the callback now.
    pub fn resolve(mut self, handled: bool) {
        if let Some(callback) = self.callback.take() {
            callback(handled);
        }
    }

    /// Hand the callback over to be invoked when the acknowledgment arrives.
    pub fn park(mut self) -> AckCallback {
        match self.callback.take() {
            Some(callback) => callback,
            None => Box::new(|_| {}),
        }
    }
}

impl fmt::Debug for CallbackGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGuard")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if self.callback.is_some() && !std::thread::panicking() {
            tracing::error!("Key event callback dropped without being resolved");
            debug_assert!(false, "key event callback dropped without being resolved");
        }
    }
}
