//! WebSocket transport.
//!
//! The base URL's `http`/`https` scheme becomes `ws`/`wss` and the connection
//! id is appended as a query parameter. One socket carries both directions:
//!
//! ```text
//! ┌────────────────┐   split   ┌─────────────┐
//! │ WebSocketStream │ ───────► │ receive task │ ──► TransportChannel::write
//! │                 │          └─────────────┘
//! │                 │          ┌─────────────┐
//! │                 │ ◄─────── │  send task   │ ◄── TransportChannel::read
//! └────────────────┘           └─────────────┘
//! ```

use async_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    http::{HeaderName, HeaderValue},
};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt, future::BoxFuture};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    channel::TransportChannel, connection::handle::ConnectionHandle, error::TransportError,
};

use super::{Background, TransferMode, Transport, TransportKind, connection_url, deliver};

/// Carries both directions over one WebSocket.
#[derive(Debug)]
pub struct WebSocketTransport {
    headers: Vec<(String, String)>,
    background: Option<Background>,
}

impl WebSocketTransport {
    /// Create an unstarted transport sending `headers` on the upgrade request.
    #[must_use]
    pub const fn new(headers: Vec<(String, String)>) -> Self {
        Self {
            headers,
            background: None,
        }
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }

    fn start(
        &mut self,
        url: Url,
        channel: TransportChannel,
        transfer_mode: TransferMode,
        connection_id: String,
        handle: ConnectionHandle,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if self.background.is_some() {
                return Err(TransportError::AlreadyStarted);
            }

            let url = websocket_url(&url, &connection_id)?;
            tracing::debug!(%url, "connecting WebSocket");

            let mut request = url.as_str().into_client_request()?;
            for (name, value) in &self.headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| TransportError::Failed(e.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| TransportError::Failed(e.to_string()))?;
                request.headers_mut().append(name, value);
            }

            let (ws, _resp) = async_tungstenite::tokio::connect_async(request).await?;
            let (sink, stream) = StreamExt::split(ws);

            let cancel = CancellationToken::new();
            let receiver = tokio::spawn(receive_loop(
                stream,
                channel.clone(),
                handle.clone(),
                cancel.child_token(),
            ));
            let sender = tokio::spawn(send_loop(
                sink,
                transfer_mode,
                channel.clone(),
                handle,
                cancel.child_token(),
            ));

            self.background = Some(Background::new(cancel, vec![receiver, sender], channel));
            tracing::info!(%connection_id, %transfer_mode, "WebSocket connected");
            Ok(())
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if let Some(background) = self.background.take() {
                background.shutdown().await;
                tracing::info!("WebSocket stopped");
            }
            Ok(())
        }
        .boxed()
    }
}

/// Map the base URL onto the WebSocket scheme and append the connection id.
fn websocket_url(base: &Url, connection_id: &str) -> Result<Url, TransportError> {
    let mut url = connection_url(base, connection_id);
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other:?} in {base}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(base.to_string()))?;
    Ok(url)
}

async fn receive_loop<S>(
    mut stream: S,
    channel: TransportChannel,
    handle: ConnectionHandle,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send,
{
    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("WebSocket receive loop cancelled");
                return;
            }
            msg = stream.next() => msg,
        };

        let frame = match msg {
            Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "server closed the WebSocket");
                handle.transport_closed(None);
                return;
            }
            None | Some(Err(tungstenite::Error::ConnectionClosed)) => {
                tracing::info!("WebSocket ended");
                handle.transport_closed(None);
                return;
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "WebSocket receive failed");
                handle.transport_closed(Some(e.into()));
                return;
            }
        };

        tracing::debug!(len = frame.len(), "WebSocket frame received");
        if !deliver(&channel, frame, &cancel).await {
            return;
        }
    }
}

async fn send_loop<S>(
    mut sink: S,
    transfer_mode: TransferMode,
    channel: TransportChannel,
    handle: ConnectionHandle,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send,
{
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = channel.read() => {
                if let Some(frame) = frame {
                    frame
                } else {
                    tracing::debug!("outbound channel complete");
                    break;
                }
            }
        };

        let msg = match transfer_mode {
            TransferMode::Text => Message::text(String::from_utf8_lossy(&frame).into_owned()),
            TransferMode::Binary => Message::binary(frame),
        };

        if let Err(e) = sink.send(msg).await {
            tracing::error!(error = %e, "WebSocket send failed");
            handle.transport_closed(Some(e.into()));
            return;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "WebSocket close failed");
    }
}
