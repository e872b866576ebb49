//! Response correlation
//!
//! Every primary event is sent with a fresh [`ResponseId`]. The consumer
//! acknowledges it later, possibly after other events were sent and in any
//! order relative to other ids. The correlator owns the callbacks waiting for
//! those acknowledgments and guarantees each fires exactly once.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConverterError;
use crate::guard::{AckCallback, CallbackGuard};

/// Identifier correlating a primary event with its acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub u64);

impl ResponseId {
    /// Sentinel meaning "no response expected". Never assigned to an event.
    pub const NONE: ResponseId = ResponseId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of the callbacks awaiting acknowledgment.
#[derive(Default)]
pub struct ResponseCorrelator {
    last_id: u64,
    pending: HashMap<ResponseId, AckCallback>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park the guard's callback under a new response id.
    pub fn register(&mut self, guard: CallbackGuard) -> ResponseId {
        self.last_id += 1;
        let id = ResponseId(self.last_id);
        self.pending.insert(id, guard.park());
        id
    }

    /// Invoke and forget the callback registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConverterError::UnknownResponse`] if `id` was never issued or
    /// was already resolved.
    pub fn resolve(&mut self, id: ResponseId, handled: bool) -> Result<(), ConverterError> {
        match self.pending.remove(&id) {
            Some(callback) => {
                callback(handled);
                Ok(())
            }
            None => {
                tracing::error!("Received acknowledgment for unknown response id {}", id);
                Err(ConverterError::UnknownResponse { id })
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: ResponseId) -> bool {
        self.pending.contains_key(&id)
    }
}

impl fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("last_id", &self.last_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn guard_into(log: &Rc<RefCell<Vec<(u32, bool)>>>, tag: u32) -> CallbackGuard {
        let log = log.clone();
        CallbackGuard::new(move |handled| log.borrow_mut().push((tag, handled)))
    }

    #[test]
    fn test_ids_start_above_sentinel() {
        let mut correlator = ResponseCorrelator::new();
        let id = correlator.register(CallbackGuard::noop());
        assert_eq!(id, ResponseId(1));
        assert!(!id.is_none());
        correlator.resolve(id, true).unwrap();
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut correlator = ResponseCorrelator::new();
        let first = correlator.register(CallbackGuard::noop());
        correlator.resolve(first, true).unwrap();
        let second = correlator.register(CallbackGuard::noop());
        assert!(second > first);
        correlator.resolve(second, true).unwrap();
    }

    #[test]
    fn test_out_of_order_resolution() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut correlator = ResponseCorrelator::new();
        let a = correlator.register(guard_into(&log, 1));
        let b = correlator.register(guard_into(&log, 2));
        let c = correlator.register(guard_into(&log, 3));
        assert_eq!(correlator.pending_count(), 3);

        correlator.resolve(c, true).unwrap();
        correlator.resolve(a, false).unwrap();
        assert!(correlator.is_pending(b));
        correlator.resolve(b, true).unwrap();

        assert_eq!(*log.borrow(), vec![(3, true), (1, false), (2, true)]);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let mut correlator = ResponseCorrelator::new();
        assert_eq!(
            correlator.resolve(ResponseId(7), true),
            Err(ConverterError::UnknownResponse { id: ResponseId(7) })
        );
    }

    #[test]
    fn test_double_resolution_is_an_error() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut correlator = ResponseCorrelator::new();
        let id = correlator.register(guard_into(&log, 1));
        correlator.resolve(id, true).unwrap();
        assert!(correlator.resolve(id, true).is_err());
        assert_eq!(log.borrow().len(), 1);
    }
}
