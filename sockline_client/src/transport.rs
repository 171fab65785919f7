//! Transports move frames between the network and a [`TransportChannel`].
//!
//! Three implementations exist: [`WebSocketTransport`],
//! [`ServerSentEventsTransport`] and [`LongPollingTransport`]. Which one a
//! connection uses is decided by [`selector::select`]; the transports know
//! nothing about each other.

pub mod long_polling;
pub mod selector;
pub mod server_sent_events;
pub mod websocket;

use core::fmt;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    CONNECTION_ID_PARAM,
    channel::{Frame, TransportChannel},
    connection::handle::ConnectionHandle,
    error::TransportError,
    http_client::{HttpClient, HttpRequest},
};

pub use long_polling::LongPollingTransport;
pub use server_sent_events::ServerSentEventsTransport;
pub use websocket::WebSocketTransport;

/// The transports a server can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
    /// A bidirectional WebSocket.
    WebSockets,

    /// A server-to-client event stream plus one `POST` per outbound frame.
    ServerSentEvents,

    /// Repeated blocking `GET`s plus one `POST` per outbound frame.
    LongPolling,
}

impl TransportKind {
    /// The name used for this transport in negotiation responses.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WebSockets => "WebSockets",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
        }
    }

    /// Parse a negotiation-response transport name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "WebSockets" => Some(Self::WebSockets),
            "ServerSentEvents" => Some(Self::ServerSentEvents),
            "LongPolling" => Some(Self::LongPolling),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether frames travel as text or binary payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferMode {
    /// UTF-8 text frames.
    #[default]
    Text,

    /// Opaque binary frames.
    Binary,
}

impl TransferMode {
    /// The name used for this mode in negotiation responses.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        }
    }

    /// Parse a negotiation-response transfer format name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Text" => Some(Self::Text),
            "Binary" => Some(Self::Binary),
            _ => None,
        }
    }

    /// The `Content-Type` used when posting a frame in this mode.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Binary => "application/octet-stream",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which transport the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportPreference {
    /// Pick the best transport the server supports.
    #[default]
    Auto,

    /// Use exactly this transport or fail.
    Only(TransportKind),
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("any transport"),
            Self::Only(kind) => fmt::Display::fmt(kind, f),
        }
    }
}

/// One network strategy for carrying a connection's frames.
///
/// A transport instance serves a single start attempt and is discarded
/// after it stops.
pub trait Transport: Send {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Attach to `channel` and begin moving frames.
    ///
    /// Must not return `Ok` before the transport is attached. Failures after
    /// a successful start are reported through `handle`, never through this
    /// return value.
    fn start(
        &mut self,
        url: Url,
        channel: TransportChannel,
        transfer_mode: TransferMode,
        connection_id: String,
        handle: ConnectionHandle,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Terminate in-flight network operations and complete the channel.
    ///
    /// Returns only after teardown is finished; the caller may drop the
    /// transport as soon as this resolves.
    fn stop(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Builds a fresh transport for each start attempt.
pub trait TransportFactory: Send + Sync {
    /// Create an unstarted transport of the given kind.
    fn create(&self, kind: TransportKind) -> Box<dyn Transport>;
}

/// Builds the three network transports over a shared [`HttpClient`].
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory<H> {
    http: H,
    headers: Vec<(String, String)>,
}

impl<H> DefaultTransportFactory<H> {
    /// Create a factory whose transports send `headers` on every request.
    #[must_use]
    pub const fn new(http: H, headers: Vec<(String, String)>) -> Self {
        Self { http, headers }
    }
}

impl<H: HttpClient> TransportFactory for DefaultTransportFactory<H> {
    fn create(&self, kind: TransportKind) -> Box<dyn Transport> {
        match kind {
            TransportKind::WebSockets => Box::new(WebSocketTransport::new(self.headers.clone())),
            TransportKind::ServerSentEvents => Box::new(ServerSentEventsTransport::new(
                self.http.clone(),
                self.headers.clone(),
            )),
            TransportKind::LongPolling => Box::new(LongPollingTransport::new(
                self.http.clone(),
                self.headers.clone(),
            )),
        }
    }
}

/// `url` with the connection id appended as a query parameter.
pub(crate) fn connection_url(url: &Url, connection_id: &str) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair(CONNECTION_ID_PARAM, connection_id);
    url
}

/// Background tasks of a started transport.
#[derive(Debug)]
pub(crate) struct Background {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    channel: TransportChannel,
}

impl Background {
    pub(crate) const fn new(
        cancel: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
        channel: TransportChannel,
    ) -> Self {
        Self {
            cancel,
            tasks,
            channel,
        }
    }

    /// Cancel every task, wait for them to exit, then complete the channel.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in core::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "transport task ended abnormally");
            }
        }
        self.channel.complete();
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Deliver an inbound frame unless the transport is being cancelled.
///
/// Returns `false` when the loop delivering frames should exit.
pub(crate) async fn deliver(
    channel: &TransportChannel,
    frame: Frame,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        result = channel.write(frame) => {
            if result.is_err() {
                tracing::debug!("inbound side complete, dropping frame");
            }
            result.is_ok()
        }
    }
}

/// Drain the outbound side, `POST`ing each frame as its own request.
///
/// Shared by the Server-Sent Events and long-polling transports.
pub(crate) async fn send_loop<H: HttpClient>(
    http: H,
    url: Url,
    headers: Vec<(String, String)>,
    transfer_mode: TransferMode,
    channel: TransportChannel,
    handle: ConnectionHandle,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("send loop cancelled");
                return;
            }
            frame = channel.read() => {
                if let Some(frame) = frame {
                    frame
                } else {
                    tracing::debug!("outbound channel complete");
                    return;
                }
            }
        };

        tracing::debug!(len = frame.len(), "sending frame");
        let request = HttpRequest::post(url.clone(), frame)
            .with_header("content-type", transfer_mode.content_type())
            .with_headers(&headers);

        let result = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("send loop cancelled mid-request");
                return;
            }
            result = http.send(request) => result,
        };

        match result {
            Ok(resp) if resp.is_success() => {}
            Ok(resp) => {
                tracing::error!(status = resp.status, "send returned unexpected status");
                handle.transport_closed(Some(TransportError::UnexpectedStatus {
                    status: resp.status,
                }));
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "send request error");
                handle.transport_closed(Some(TransportError::Request(e.to_string())));
                return;
            }
        }
    }
}
