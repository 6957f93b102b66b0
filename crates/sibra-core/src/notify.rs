//! Reply demultiplexing for reservation requesters.
//!
//! Every outstanding request registers a notify key; the single reply a
//! hop sends back is routed to exactly that listener. Delivery is
//! non-blocking: a full listener buffer drops the reply (the requester's
//! timeout covers recovery). Registering the same key twice is an error.

use std::{collections::HashMap, fmt};

use parking_lot::Mutex;
use sibra_proto::{Index, RequestType, ResvId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Listener buffer depth. Replies beyond this are dropped.
const NOTIFY_BUFFER: usize = 10;

/// Key a requester listens on: reservation id, index and request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyKey {
    /// Reservation id the request targets.
    pub id: ResvId,
    /// Index the request targets.
    pub idx: Index,
    /// Type of the outstanding request.
    pub req_type: RequestType,
}

impl fmt::Display for NotifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id, self.idx, self.req_type)
    }
}

/// Errors from the reply router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// A listener is already registered for the key.
    #[error("listener already registered for {key}")]
    AlreadyRegistered {
        /// The contested key.
        key: NotifyKey,
    },
}

/// Routes each reply to the one registered listener for its key.
#[derive(Debug)]
pub struct ReplyRouter<T> {
    listeners: Mutex<HashMap<NotifyKey, mpsc::Sender<T>>>,
}

impl<T> Default for ReplyRouter<T> {
    fn default() -> Self {
        Self { listeners: Mutex::new(HashMap::new()) }
    }
}

impl<T: Send> ReplyRouter<T> {
    /// Register a listener for `key`. A second registration for the same
    /// key is an error.
    pub fn register(&self, key: NotifyKey) -> Result<mpsc::Receiver<T>, NotifyError> {
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(&key) {
            return Err(NotifyError::AlreadyRegistered { key });
        }
        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        listeners.insert(key, tx);
        Ok(rx)
    }

    /// Drop the listener for `key`.
    pub fn deregister(&self, key: &NotifyKey) {
        self.listeners.lock().remove(key);
    }

    /// Deliver a reply to the listener for `key`, without blocking.
    /// Returns whether the reply reached a listener buffer.
    pub fn route(&self, key: &NotifyKey, reply: T) -> bool {
        let listeners = self.listeners.lock();
        let Some(tx) = listeners.get(key) else {
            warn!(%key, "no listener registered for reply");
            return false;
        };
        match tx.try_send(reply) {
            Ok(()) => true,
            Err(err) => {
                warn!(%key, "listener buffer full, dropping reply: {err}");
                false
            },
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use sibra_proto::As;

    use super::*;

    fn key() -> NotifyKey {
        NotifyKey {
            id: ResvId::steady(As(1), 1),
            idx: Index::ZERO,
            req_type: RequestType::SteadySetup,
        }
    }

    #[test]
    fn double_registration_is_an_error() {
        let router: ReplyRouter<u32> = ReplyRouter::default();
        let _rx = router.register(key()).unwrap();
        assert!(matches!(
            router.register(key()),
            Err(NotifyError::AlreadyRegistered { .. })
        ));
        router.deregister(&key());
        assert!(router.register(key()).is_ok());
    }

    #[test]
    fn routes_to_registered_listener_only() {
        let router: ReplyRouter<u32> = ReplyRouter::default();
        let mut rx = router.register(key()).unwrap();
        assert!(router.route(&key(), 7));
        assert_eq!(rx.try_recv(), Ok(7));

        let other = NotifyKey { req_type: RequestType::SteadyRenewal, ..key() };
        assert!(!router.route(&other, 9));
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let router: ReplyRouter<u32> = ReplyRouter::default();
        let mut rx = router.register(key()).unwrap();
        for i in 0..NOTIFY_BUFFER as u32 {
            assert!(router.route(&key(), i));
        }
        assert!(!router.route(&key(), 99));
        assert_eq!(rx.try_recv(), Ok(0));
    }
}
