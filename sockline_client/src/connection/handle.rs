//! How a running transport reports that it has stopped on its own.

use core::fmt;
use std::sync::{Arc, Weak};

use crate::error::TransportError;

/// Receives transport-originated close reports for one connection.
pub(crate) trait CloseReport: Send + Sync {
    /// The transport started under `generation` ended, cleanly or not.
    fn transport_closed(self: Arc<Self>, generation: u64, error: Option<TransportError>);
}

/// Given to a transport at start so it can report asynchronous termination.
///
/// Reports from a transport that is no longer the connection's active one
/// are ignored, so holding on to a handle past `stop` is harmless.
#[derive(Clone)]
pub struct ConnectionHandle {
    target: Target,
    generation: u64,
}

#[derive(Clone)]
enum Target {
    Connection(Weak<dyn CloseReport>),
    Forward(async_channel::Sender<Option<TransportError>>),
}

impl ConnectionHandle {
    pub(crate) fn new(connection: Weak<dyn CloseReport>, generation: u64) -> Self {
        Self {
            target: Target::Connection(connection),
            generation,
        }
    }

    /// A handle not bound to any connection.
    ///
    /// Every report is forwarded to the returned receiver. Useful for driving
    /// a [`Transport`](crate::Transport) directly.
    #[must_use]
    pub fn forwarding() -> (Self, async_channel::Receiver<Option<TransportError>>) {
        let (tx, rx) = async_channel::unbounded();
        (
            Self {
                target: Target::Forward(tx),
                generation: 0,
            },
            rx,
        )
    }

    /// Report that the transport has stopped.
    ///
    /// `None` means the server ended the connection cleanly. Never blocks;
    /// the resulting teardown runs on its own task.
    pub fn transport_closed(&self, error: Option<TransportError>) {
        match &self.target {
            Target::Connection(connection) => {
                if let Some(connection) = connection.upgrade() {
                    connection.transport_closed(self.generation, error);
                } else {
                    tracing::debug!("transport closed after its connection was dropped");
                }
            }
            Target::Forward(tx) => {
                if tx.try_send(error).is_err() {
                    tracing::debug!("transport close report has no listener");
                }
            }
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            Target::Connection(_) => "connection",
            Target::Forward(_) => "forward",
        };
        f.debug_struct("ConnectionHandle")
            .field("target", &target)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use testresult::TestResult;

    struct Recorder(Mutex<Vec<(u64, bool)>>);

    impl CloseReport for Recorder {
        fn transport_closed(self: Arc<Self>, generation: u64, error: Option<TransportError>) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push((generation, error.is_some()));
            }
        }
    }

    #[test]
    fn reports_reach_the_connection_with_generation() -> TestResult {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let weak: Weak<dyn CloseReport> = Arc::<Recorder>::downgrade(&recorder);
        let handle = ConnectionHandle::new(weak, 7);

        handle.transport_closed(None);
        handle.clone().transport_closed(Some(TransportError::ClosedByServer));

        let seen = recorder.0.lock().map_err(|e| e.to_string())?;
        assert_eq!(*seen, vec![(7, false), (7, true)]);
        Ok(())
    }

    #[test]
    fn reports_after_drop_are_ignored() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let weak: Weak<dyn CloseReport> = Arc::<Recorder>::downgrade(&recorder);
        let handle = ConnectionHandle::new(weak, 1);
        drop(recorder);

        handle.transport_closed(None);
    }

    #[test]
    fn forwarding_handle_delivers_reports() -> TestResult {
        let (handle, reports) = ConnectionHandle::forwarding();
        handle.transport_closed(Some(TransportError::ClosedByServer));

        let report = reports.try_recv()?;
        assert!(matches!(report, Some(TransportError::ClosedByServer)));
        Ok(())
    }
}
