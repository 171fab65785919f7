//! The terminal notification raised once per connect/disconnect cycle.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TransportError;

/// A connection cycle ended.
#[derive(Debug, Clone, Default)]
pub struct Closed {
    error: Option<Arc<TransportError>>,
}

impl Closed {
    pub(crate) const fn new(error: Option<Arc<TransportError>>) -> Self {
        Self { error }
    }

    /// Why the transport failed, if it did.
    ///
    /// `None` after an explicit stop or dispose, or when the server ended the
    /// connection cleanly.
    #[must_use]
    pub fn error(&self) -> Option<&TransportError> {
        self.error.as_deref()
    }

    /// The failure as a shareable value.
    #[must_use]
    pub fn shared_error(&self) -> Option<Arc<TransportError>> {
        self.error.clone()
    }
}

/// Receives one [`Closed`] per cycle for as long as it is held.
pub type ClosedReceiver = async_channel::Receiver<Closed>;

/// Everyone waiting to hear about [`Closed`].
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    // Only touched from sync code (`subscribe`, `notify`), never across an await.
    senders: Mutex<Vec<async_channel::Sender<Closed>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> ClosedReceiver {
        let (tx, rx) = async_channel::unbounded();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `closed` to every live subscriber, forgetting dropped ones.
    pub(crate) fn notify(&self, closed: &Closed) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| tx.try_send(closed.clone()).is_ok());
        tracing::debug!(subscribers = senders.len(), failed = closed.error.is_some(), "closed");
    }
}
