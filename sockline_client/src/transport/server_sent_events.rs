//! Server-Sent Events transport.
//!
//! Inbound frames arrive as events on one long-lived `GET` with
//! `Accept: text/event-stream`; outbound frames are `POST`ed one per request.
//! Event streams are text, so only [`TransferMode::Text`] is supported.

use futures::{FutureExt, future::BoxFuture};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    channel::{Frame, TransportChannel},
    connection::handle::ConnectionHandle,
    error::TransportError,
    http_client::{HttpClient, HttpRequest, ResponseBody},
};

use super::{
    Background, TransferMode, Transport, TransportKind, connection_url, deliver, send_loop,
};

/// Receives over an event stream and sends with one `POST` per frame.
#[derive(Debug)]
pub struct ServerSentEventsTransport<H> {
    http: H,
    headers: Vec<(String, String)>,
    background: Option<Background>,
}

impl<H: HttpClient> ServerSentEventsTransport<H> {
    /// Create an unstarted transport sending `headers` on every request.
    #[must_use]
    pub const fn new(http: H, headers: Vec<(String, String)>) -> Self {
        Self {
            http,
            headers,
            background: None,
        }
    }
}

impl<H: HttpClient> Transport for ServerSentEventsTransport<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::ServerSentEvents
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
            if transfer_mode != TransferMode::Text {
                return Err(TransportError::UnsupportedTransferMode {
                    transport: TransportKind::ServerSentEvents,
                    transfer_mode,
                });
            }

            let url = connection_url(&url, &connection_id);
            tracing::debug!(%url, "opening event stream");

            let request = HttpRequest::get(url.clone())
                .with_header("accept", "text/event-stream")
                .with_headers(&self.headers);
            let resp = self
                .http
                .send(request)
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;

            if !resp.is_success() {
                return Err(TransportError::UnexpectedStatus {
                    status: resp.status,
                });
            }

            let cancel = CancellationToken::new();
            let reader = tokio::spawn(read_loop(
                resp.body,
                channel.clone(),
                handle.clone(),
                cancel.child_token(),
            ));
            let sender = tokio::spawn(send_loop(
                self.http.clone(),
                url,
                self.headers.clone(),
                transfer_mode,
                channel.clone(),
                handle,
                cancel.child_token(),
            ));

            self.background = Some(Background::new(cancel, vec![reader, sender], channel));
            tracing::info!(%connection_id, "event stream started");
            Ok(())
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if let Some(background) = self.background.take() {
                background.shutdown().await;
                tracing::info!("event stream stopped");
            }
            Ok(())
        }
        .boxed()
    }
}

async fn read_loop(
    mut body: ResponseBody,
    channel: TransportChannel,
    handle: ConnectionHandle,
    cancel: CancellationToken,
) {
    let mut parser = EventStreamParser::default();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("event stream reader cancelled");
                return;
            }
            chunk = body.next_chunk() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in parser.feed(&bytes) {
                    tracing::debug!(len = frame.len(), "event received");
                    if !deliver(&channel, frame, &cancel).await {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "event stream read failed");
                handle.transport_closed(Some(TransportError::Body(e.0)));
                return;
            }
            None => {
                tracing::info!("server ended the event stream");
                handle.transport_closed(None);
                return;
            }
        }
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Only `data` fields matter here: each event's data lines, joined with
/// `\n`, become one frame. Comments and other fields are dropped.
#[derive(Debug, Default)]
struct EventStreamParser {
    line: Vec<u8>,
    data: Option<Vec<u8>>,
    /// The previous chunk ended in `\r`; a leading `\n` belongs to it.
    skip_lf: bool,
}

impl EventStreamParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in bytes {
            if core::mem::take(&mut self.skip_lf) && byte == b'\n' {
                continue;
            }
            match byte {
                b'\r' | b'\n' => {
                    self.skip_lf = byte == b'\r';
                    let line = core::mem::take(&mut self.line);
                    if let Some(frame) = self.end_line(&line) {
                        frames.push(frame);
                    }
                }
                _ => self.line.push(byte),
            }
        }

        frames
    }

    fn end_line(&mut self, line: &[u8]) -> Option<Frame> {
        if line.is_empty() {
            return self.data.take();
        }
        if line.starts_with(b":") {
            return None;
        }

        let (field, value) = match line.iter().position(|&b| b == b':') {
            Some(i) => {
                let value = &line[i + 1..];
                (&line[..i], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };

        if field == b"data" {
            match &mut self.data {
                Some(data) => {
                    data.push(b'\n');
                    data.extend_from_slice(value);
                }
                None => self.data = Some(value.to_vec()),
            }
        }
        None
    }
}
