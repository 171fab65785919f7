//! Test doubles for connections and transports.
//!
//! * [`TestHttpClient`] answers requests from a chain of handlers and, unless
//!   built [`empty`](TestHttpClient::empty), serves a negotiation response.
//! * [`TestTransportFactory`] builds [`TestTransport`]s whose start and stop
//!   run caller-supplied hooks.
//! * [`SyncPoint`] holds code under test at a known point until released.

use core::future::Future;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::Notify;
use url::Url;

use crate::{
    channel::TransportChannel,
    connection::handle::ConnectionHandle,
    error::TransportError,
    http_client::{HttpClient, HttpRequest, HttpResponse, Method},
    transport::{TransferMode, Transport, TransportFactory, TransportKind},
};

/// The connection id [`TestHttpClient::new`] negotiates.
pub const TEST_CONNECTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Error returned by [`TestHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestHttpError(pub String);

type Reply = BoxFuture<'static, Result<HttpResponse, TestHttpError>>;
type Handler = Arc<dyn Fn(&HttpRequest) -> Option<Reply> + Send + Sync>;

/// A scripted [`HttpClient`].
///
/// Handlers are consulted newest first; the first one that returns `Some`
/// answers the request. Requests nobody answers fail with
/// `Http endpoint not implemented: <method> <url>`.
#[derive(Clone)]
pub struct TestHttpClient {
    handlers: Vec<Handler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl core::fmt::Debug for TestHttpClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TestHttpClient")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl Default for TestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHttpClient {
    /// A client that negotiates every transport for [`TEST_CONNECTION_ID`].
    #[must_use]
    pub fn new() -> Self {
        Self::empty().with_negotiation(negotiation_response(TEST_CONNECTION_ID))
    }

    /// A client that answers nothing until handlers are added.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer `POST .../negotiate` with `body`.
    #[must_use]
    pub fn with_negotiation(self, body: String) -> Self {
        self.on_request(move |request| {
            (request.method == Method::Post && request.url.path().ends_with("/negotiate"))
                .then(|| ready(HttpResponse::new(200, body.clone())))
        })
    }

    /// Add a handler that may answer any request.
    #[must_use]
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<Reply> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Answer `GET` requests for which `handler` returns a response.
    #[must_use]
    pub fn on_get<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
    {
        self.on_request(move |request| {
            if request.method == Method::Get {
                handler(request).map(ready)
            } else {
                None
            }
        })
    }

    /// Answer `POST` requests for which `handler` returns a response.
    #[must_use]
    pub fn on_post<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
    {
        self.on_request(move |request| {
            if request.method == Method::Post {
                handler(request).map(ready)
            } else {
                None
            }
        })
    }

    /// Answer every poll (`GET` carrying a connection id) with `poll()`.
    #[must_use]
    pub fn on_long_poll<F, Fut>(self, poll: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, TestHttpError>> + Send + 'static,
    {
        self.on_request(move |request| {
            (request.method == Method::Get && has_connection_id(&request.url))
                .then(|| poll().boxed())
        })
    }

    /// Answer every outbound frame (`POST` carrying a connection id).
    #[must_use]
    pub fn on_send<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.on_request(move |request| {
            (request.method == Method::Post && has_connection_id(&request.url))
                .then(|| ready(handler(request)))
        })
    }

    /// Every request sent so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HttpClient for TestHttpClient {
    type Error = TestHttpError;

    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, Self::Error>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let reply = self.handlers.iter().rev().find_map(|handler| handler(&request));
        match reply {
            Some(reply) => reply,
            None => {
                let message = format!(
                    "Http endpoint not implemented: {} {}",
                    request.method, request.url
                );
                async move { Err(TestHttpError(message)) }.boxed()
            }
        }
    }
}

fn ready(resp: HttpResponse) -> Reply {
    futures::future::ready(Ok(resp)).boxed()
}

fn has_connection_id(url: &Url) -> bool {
    url.query_pairs()
        .any(|(name, _)| name == crate::CONNECTION_ID_PARAM)
}

/// A negotiation body offering every transport: WebSockets and long polling
/// with both transfer modes, Server-Sent Events with text only.
#[must_use]
pub fn negotiation_response(connection_id: &str) -> String {
    serde_json::json!({
        "connectionId": connection_id,
        "availableTransports": [
            { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] },
            { "transport": "ServerSentEvents", "transferFormats": ["Text"] },
            { "transport": "LongPolling", "transferFormats": ["Text", "Binary"] },
        ],
    })
    .to_string()
}

type StartHook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TransportError>> + Send + Sync>;
type StopHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What a [`TestTransport`] was started with.
#[derive(Debug, Clone)]
pub struct Started {
    /// The transport kind the factory was asked for.
    pub kind: TransportKind,

    /// The base URL.
    pub url: Url,

    /// The negotiated connection id.
    pub connection_id: String,

    /// The negotiated transfer mode.
    pub transfer_mode: TransferMode,

    /// The transport's side of the duplex channel.
    pub channel: TransportChannel,

    /// The handle for reporting asynchronous termination.
    pub handle: ConnectionHandle,
}

#[derive(Default)]
struct FactoryState {
    on_start: Mutex<Option<StartHook>>,
    on_stop: Mutex<Option<StopHook>>,
    started: Mutex<Vec<Started>>,
    created: AtomicUsize,
    stopped: AtomicUsize,
}

/// Builds [`TestTransport`]s sharing one set of hooks and records.
///
/// Clones share state, so keep one clone for assertions and hand the other
/// to the connection.
#[derive(Clone, Default)]
pub struct TestTransportFactory {
    state: Arc<FactoryState>,
}

impl core::fmt::Debug for TestTransportFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TestTransportFactory")
            .field("created", &self.created_count())
            .field("stopped", &self.stop_count())
            .finish_non_exhaustive()
    }
}

impl TestTransportFactory {
    /// A factory whose transports start and stop immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` inside every [`Transport::start`]; its result is the start result.
    #[must_use]
    pub fn on_start<F, Fut>(self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        *self
            .state
            .on_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Run `hook` inside every [`Transport::stop`], before the channel completes.
    #[must_use]
    pub fn on_stop<F, Fut>(self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self
            .state
            .on_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Every start call so far, oldest first.
    #[must_use]
    pub fn started(&self) -> Vec<Started> {
        self.state
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent start call.
    #[must_use]
    pub fn last_started(&self) -> Option<Started> {
        self.started().pop()
    }

    /// How many transports were built.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// How many times a transport's stop began.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.state.stopped.load(Ordering::SeqCst)
    }
}

impl TransportFactory for TestTransportFactory {
    fn create(&self, kind: TransportKind) -> Box<dyn Transport> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Box::new(TestTransport {
            kind,
            state: Arc::clone(&self.state),
            channel: None,
        })
    }
}

/// A transport that moves no frames by itself.
///
/// Tests drive it through the [`Started`] record: write to its channel to
/// simulate inbound traffic, read from it to observe outbound traffic, and
/// report through its handle to simulate failures.
pub struct TestTransport {
    kind: TransportKind,
    state: Arc<FactoryState>,
    channel: Option<TransportChannel>,
}

impl core::fmt::Debug for TestTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TestTransport")
            .field("kind", &self.kind)
            .field("started", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport for TestTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn start(
        &mut self,
        url: Url,
        channel: TransportChannel,
        transfer_mode: TransferMode,
        connection_id: String,
        handle: ConnectionHandle,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        self.state
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Started {
                kind: self.kind,
                url,
                connection_id,
                transfer_mode,
                channel: channel.clone(),
                handle,
            });
        self.channel = Some(channel);

        let hook = self
            .state
            .on_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        async move {
            match hook {
                Some(hook) => hook().await,
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.state.stopped.fetch_add(1, Ordering::SeqCst);
        let hook = self
            .state
            .on_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        async move {
            if let Some(hook) = hook {
                hook().await;
            }
            if let Some(channel) = self.channel.take() {
                channel.complete();
            }
            Ok(())
        }
        .boxed()
    }
}

/// A two-sided rendezvous.
///
/// Code under test calls [`wait_to_continue`](Self::wait_to_continue); the
/// test calls [`wait_for_sync_point`](Self::wait_for_sync_point) to learn it
/// got there, inspects whatever it needs, then [`release`](Self::release)s it.
#[derive(Debug, Default)]
pub struct SyncPoint {
    reached: Notify,
    resume: Notify,
}

impl SyncPoint {
    /// A fresh sync point, shareable between the test and the code under test.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signal arrival, then wait for [`release`](Self::release).
    pub async fn wait_to_continue(&self) {
        self.reached.notify_one();
        self.resume.notified().await;
    }

    /// Wait until the code under test has arrived.
    pub async fn wait_for_sync_point(&self) {
        self.reached.notified().await;
    }

    /// Let the code under test continue.
    pub fn release(&self) {
        self.resume.notify_one();
    }
}
