//! The connection lifecycle.
//!
//! ```text
//!                 start()
//! Disconnected ───────────► Starting ──── ok ────► Connected
//!      ▲                       │                      │
//!      │◄──────── failed ──────┘      stop() / dispose() / transport closed
//!      │                                              │
//!      │                                              ▼
//!      └──────────────── stop / failure ────────── Stopping
//!                                                     │
//!                          Disposed ◄──── dispose ────┘
//! ```
//!
//! Every transition happens inside one short critical section on a
//! [`std::sync::Mutex`]; the lock is never held across an `.await`. Work that
//! must wait for an in-flight start or teardown awaits a shared completion
//! future taken from the state while the lock was held.
//!
//! Stop, dispose and transport-originated closes race freely. Whichever
//! reaches a connected state first performs the teardown and decides what
//! [`Closed`] carries; the others wait for it and then observe the result.

pub mod closed;
pub mod handle;


use core::{fmt, mem};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::{FutureExt, channel::oneshot, future::Shared};
use url::Url;

use crate::{
    channel::{self, ApplicationChannel, Frame},
    error::{ConnectionError, InvalidState, TransportError},
    http_client::HttpClient,
    negotiate,
    options::ConnectionOptions,
    transport::{
        DefaultTransportFactory, TransferMode, Transport, TransportFactory, TransportKind,
        selector,
    },
};

use closed::{Closed, ClosedReceiver, Subscribers};
use handle::{CloseReport, ConnectionHandle};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected. `start` is allowed.
    Disconnected,

    /// A start attempt is in flight.
    Starting,

    /// A transport is running.
    Connected,

    /// A teardown is in flight.
    Stopping,

    /// Permanently closed.
    Disposed,
}

/// A persistent duplex connection to a server.
///
/// Cheap to clone; clones share the same connection.
pub struct HttpConnection<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for HttpConnection<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> fmt::Debug for HttpConnection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.inner.lock().phase.state())
            .finish_non_exhaustive()
    }
}

struct Inner<H> {
    url: Url,
    http: H,
    options: ConnectionOptions,
    factory: Box<dyn TransportFactory>,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Subscribers,
}

struct Lifecycle {
    phase: Phase,
    next_generation: u64,
}

/// Resolves (with `Err(Canceled)`) when the owning operation finishes.
type Done = Shared<oneshot::Receiver<()>>;

enum Phase {
    Disconnected,
    Starting { generation: u64, done: Done },
    Connected(Active),
    Stopping { done: Done },
    Disposed,
}

impl Phase {
    const fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Starting { .. } => ConnectionState::Starting,
            Self::Connected(_) => ConnectionState::Connected,
            Self::Stopping { .. } => ConnectionState::Stopping,
            Self::Disposed => ConnectionState::Disposed,
        }
    }
}

/// Everything that exists only while connected.
struct Active {
    generation: u64,
    connection_id: String,
    transport: Box<dyn Transport>,
    kind: TransportKind,
    transfer_mode: TransferMode,
    application: ApplicationChannel,
}

#[derive(Debug)]
enum Teardown {
    Stop,
    Dispose,
    TransportClosed {
        generation: u64,
        error: Option<TransportError>,
    },
}

impl<H: HttpClient> HttpConnection<H> {
    /// Create a connection to `url` using the network transports.
    ///
    /// Nothing is sent until [`start`](Self::start).
    #[must_use]
    pub fn new(url: Url, http: H, options: ConnectionOptions) -> Self {
        let factory = DefaultTransportFactory::new(http.clone(), options.headers.clone());
        Self::with_transport_factory(url, http, options, factory)
    }

    /// Create a connection whose transports come from `factory`.
    ///
    /// `http` is still used for negotiation.
    #[must_use]
    pub fn with_transport_factory(
        url: Url,
        http: H,
        options: ConnectionOptions,
        factory: impl TransportFactory + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url,
                http,
                options,
                factory: Box::new(factory),
                lifecycle: Mutex::new(Lifecycle {
                    phase: Phase::Disconnected,
                    next_generation: 1,
                }),
                subscribers: Subscribers::default(),
            }),
        }
    }

    /// Negotiate, pick a transport and start it.
    ///
    /// The attempt runs on its own task: dropping the returned future does
    /// not abandon the connection in [`ConnectionState::Starting`].
    ///
    /// # Errors
    ///
    /// * [`ConnectionError::InvalidState`] unless the connection is
    ///   [`ConnectionState::Disconnected`].
    /// * Any negotiation, selection or transport start failure. The connection
    ///   is back in [`ConnectionState::Disconnected`] and may be started again.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        let (generation, done) = {
            let mut lifecycle = self.inner.lock();
            if !matches!(lifecycle.phase, Phase::Disconnected) {
                return Err(InvalidState::NotDisconnected.into());
            }

            let generation = lifecycle.next_generation;
            lifecycle.next_generation += 1;

            let (done, waiters) = oneshot::channel();
            lifecycle.phase = Phase::Starting {
                generation,
                done: waiters.shared(),
            };
            (generation, done)
        };

        tracing::info!(url = %self.inner.url, generation, "starting connection");

        let inner = Arc::clone(&self.inner);
        let attempt = tokio::spawn(async move {
            let guard = StartGuard {
                inner: Arc::clone(&inner),
                generation,
                _done: done,
            };
            match inner.attempt_start(generation).await {
                Ok(active) => {
                    guard.commit(active);
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(error = %e, generation, "start failed");
                    Err(e)
                }
            }
        });

        match attempt.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ConnectionError::StartAborted),
        }
    }

    /// Stop the running transport and return to
    /// [`ConnectionState::Disconnected`].
    ///
    /// Waits for an in-flight start to resolve first. Does nothing when the
    /// connection is disconnected or disposed. Transport stop failures are
    /// logged, not returned.
    pub async fn stop(&self) {
        self.inner.teardown(Teardown::Stop).await;
    }

    /// Stop the connection for good.
    ///
    /// Waits for an in-flight start to resolve first. Later calls to
    /// [`start`](Self::start) fail with [`InvalidState::NotDisconnected`].
    /// Idempotent.
    pub async fn dispose(&self) {
        self.inner.teardown(Teardown::Dispose).await;
    }
}

impl<H> HttpConnection<H> {
    /// The base URL this connection talks to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase.state()
    }

    /// The server-assigned id, while connected.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.with_active(|active| active.connection_id.clone())
    }

    /// The running transport, while connected.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.with_active(|active| active.kind)
    }

    /// The negotiated transfer mode, while connected.
    #[must_use]
    pub fn transfer_mode(&self) -> Option<TransferMode> {
        self.with_active(|active| active.transfer_mode)
    }

    /// The application side of the duplex channel, while connected.
    #[must_use]
    pub fn channel(&self) -> Option<ApplicationChannel> {
        self.with_active(|active| active.application.clone())
    }

    /// Subscribe to [`Closed`] notifications.
    ///
    /// The receiver yields one value for every stop, dispose or transport
    /// failure that ends a connected cycle, for as long as it is held.
    #[must_use]
    pub fn closed(&self) -> ClosedReceiver {
        self.inner.subscribers.subscribe()
    }

    /// Send one frame over the running transport.
    ///
    /// # Errors
    ///
    /// * [`InvalidState::NotConnected`] unless the connection is connected.
    /// * [`ConnectionError::Channel`] if the connection closes while the
    ///   frame is waiting for room in the channel.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        let channel = self.channel().ok_or(InvalidState::NotConnected)?;
        channel.send(frame).await?;
        Ok(())
    }

    /// Wait for the next inbound frame.
    ///
    /// Returns `None` when not connected, or once the connection closes and
    /// everything received before that has been read.
    pub async fn recv(&self) -> Option<Frame> {
        self.channel()?.recv().await
    }

    fn with_active<T>(&self, f: impl FnOnce(&Active) -> T) -> Option<T> {
        match &self.inner.lock().phase {
            Phase::Connected(active) => Some(f(active)),
            _ => None,
        }
    }
}

impl<H> Inner<H> {
    // Sync getters and `StartGuard::drop` take this lock, so it is a std mutex.
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: HttpClient> Inner<H> {
    async fn attempt_start(self: &Arc<Self>, generation: u64) -> Result<Active, ConnectionError> {
        let negotiation =
            negotiate::negotiate(&self.http, &self.url, &self.options.headers).await?;
        let (kind, transfer_mode) = selector::select(
            self.options.transport,
            self.options.transfer_mode,
            &negotiation,
        )?;

        tracing::debug!(
            connection_id = %negotiation.connection_id,
            transport = %kind,
            %transfer_mode,
            "selected transport"
        );

        let mut transport = self.factory.create(kind);
        let (application, transport_side) = channel::duplex(self.options.channel_capacity);
        let report: Weak<dyn CloseReport> = Arc::<Self>::downgrade(self);

        transport
            .start(
                self.url.clone(),
                transport_side,
                transfer_mode,
                negotiation.connection_id.clone(),
                ConnectionHandle::new(report, generation),
            )
            .await?;

        Ok(Active {
            generation,
            connection_id: negotiation.connection_id,
            transport,
            kind,
            transfer_mode,
            application,
        })
    }

    /// Run one stop, dispose or close report to completion.
    ///
    /// Once this call owns the teardown, the work moves to its own task, so
    /// dropping the caller's future cannot leave the connection `Stopping`.
    async fn teardown(self: &Arc<Self>, request: Teardown) {
        let (active, done) = loop {
            let wait = {
                let mut lifecycle = self.lock();
                match mem::replace(&mut lifecycle.phase, Phase::Disposed) {
                    Phase::Disposed => return,
                    Phase::Disconnected => {
                        if matches!(request, Teardown::Dispose) {
                            tracing::info!(url = %self.url, "connection disposed");
                        } else {
                            lifecycle.phase = Phase::Disconnected;
                        }
                        return;
                    }
                    Phase::Starting { generation, done } => {
                        lifecycle.phase = Phase::Starting {
                            generation,
                            done: done.clone(),
                        };
                        if request.is_stale(generation) {
                            return;
                        }
                        done
                    }
                    Phase::Stopping { done } => {
                        lifecycle.phase = Phase::Stopping { done: done.clone() };
                        if matches!(request, Teardown::TransportClosed { .. }) {
                            tracing::debug!("transport closed during teardown, ignoring");
                            return;
                        }
                        done
                    }
                    Phase::Connected(active) => {
                        if request.is_stale(active.generation) {
                            tracing::debug!(
                                generation = active.generation,
                                "ignoring close report from a previous transport"
                            );
                            lifecycle.phase = Phase::Connected(active);
                            return;
                        }
                        let (done, waiters) = oneshot::channel::<()>();
                        lifecycle.phase = Phase::Stopping {
                            done: waiters.shared(),
                        };
                        break (active, done);
                    }
                }
            };

            // Either outcome means the owning operation finished.
            let _ = wait.await;
        };

        let inner = Arc::clone(self);
        let finish =
            tokio::spawn(async move { inner.finish_teardown(active, done, request).await });
        match finish.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => tracing::warn!(error = %e, "teardown task aborted"),
        }
    }

    /// Stop the transport, settle the phase, then raise [`Closed`].
    ///
    /// `_done` releases waiting stop and dispose calls when dropped, after the
    /// phase has left `Stopping`.
    async fn finish_teardown(
        &self,
        active: Active,
        _done: oneshot::Sender<()>,
        request: Teardown,
    ) {
        let dispose = matches!(request, Teardown::Dispose);
        let error = match request {
            Teardown::TransportClosed { error, .. } => error.map(Arc::new),
            Teardown::Stop | Teardown::Dispose => None,
        };

        let Active {
            connection_id,
            mut transport,
            kind,
            application,
            ..
        } = active;

        match &error {
            Some(e) => tracing::error!(%connection_id, transport = %kind, error = %e, "transport failed"),
            None => tracing::info!(%connection_id, transport = %kind, dispose, "stopping connection"),
        }

        if let Err(e) = transport.stop().await {
            tracing::warn!(%connection_id, transport = %kind, error = %e, "transport stop failed");
        }
        drop(transport);
        application.abort();

        self.lock().phase = if dispose {
            Phase::Disposed
        } else {
            Phase::Disconnected
        };
        tracing::info!(%connection_id, dispose, "connection closed");

        self.subscribers.notify(&Closed::new(error));
    }
}

impl Teardown {
    /// A close report from a transport other than the one under `generation`.
    fn is_stale(&self, current: u64) -> bool {
        matches!(self, Self::TransportClosed { generation, .. } if *generation != current)
    }
}

impl<H: HttpClient> CloseReport for Inner<H> {
    fn transport_closed(self: Arc<Self>, generation: u64, error: Option<TransportError>) {
        tokio::spawn(async move {
            self.teardown(Teardown::TransportClosed { generation, error })
                .await;
        });
    }
}

/// Resolves a start attempt exactly once.
///
/// If the attempt fails or its task is dropped before [`commit`](Self::commit),
/// the connection returns to `Disconnected`. Dropping the guard
/// releases anything waiting on the attempt.
struct StartGuard<H> {
    inner: Arc<Inner<H>>,
    generation: u64,
    _done: oneshot::Sender<()>,
}

impl<H> StartGuard<H> {
    fn commit(self, active: Active) {
        let mut lifecycle = self.inner.lock();
        if matches!(lifecycle.phase, Phase::Starting { generation, .. } if generation == self.generation)
        {
            tracing::info!(
                connection_id = %active.connection_id,
                transport = %active.kind,
                "connected"
            );
            lifecycle.phase = Phase::Connected(active);
        }
    }
}

impl<H> Drop for StartGuard<H> {
    fn drop(&mut self) {
        let mut lifecycle = self.inner.lock();
        if matches!(lifecycle.phase, Phase::Starting { generation, .. } if generation == self.generation)
        {
            lifecycle.phase = Phase::Disconnected;
        }
    }
}
