//! HTTP long-polling transport.
//!
//! ```text
//! GET  <url>?id=<id>  ──► 200 + body   one inbound frame, poll again
//!                     ──► 200 empty    poll timed out, poll again
//!                     ──► 204          server closed the connection
//! POST <url>?id=<id>  ◄── one outbound frame per request
//! ```
//!
//! The first poll runs inside [`Transport::start`] so an endpoint that
//! rejects the connection fails the start instead of the running connection.

use futures::{FutureExt, future::BoxFuture};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    channel::{Frame, TransportChannel},
    connection::handle::ConnectionHandle,
    error::TransportError,
    http_client::{HttpClient, HttpRequest},
};

use super::{
    Background, TransferMode, Transport, TransportKind, connection_url, deliver, send_loop,
};

/// Receives with repeated `GET`s and sends with one `POST` per frame.
#[derive(Debug)]
pub struct LongPollingTransport<H> {
    http: H,
    headers: Vec<(String, String)>,
    background: Option<Background>,
}

impl<H: HttpClient> LongPollingTransport<H> {
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

impl<H: HttpClient> Transport for LongPollingTransport<H> {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
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

            let url = connection_url(&url, &connection_id);
            tracing::debug!(%url, %transfer_mode, "long polling: first poll");

            match poll(&self.http, &url, &self.headers).await? {
                PollOutcome::Frame(frame) => channel.write(frame).await?,
                PollOutcome::Empty => {}
                PollOutcome::Closed => return Err(TransportError::ClosedByServer),
            }

            let cancel = CancellationToken::new();
            let poller = tokio::spawn(poll_loop(
                self.http.clone(),
                url.clone(),
                self.headers.clone(),
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

            self.background = Some(Background::new(cancel, vec![poller, sender], channel));
            tracing::info!(%connection_id, "long polling started");
            Ok(())
        }
        .boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if let Some(background) = self.background.take() {
                background.shutdown().await;
                tracing::info!("long polling stopped");
            }
            Ok(())
        }
        .boxed()
    }
}

#[derive(Debug)]
enum PollOutcome {
    Frame(Frame),
    Empty,
    Closed,
}

async fn poll<H: HttpClient>(
    http: &H,
    url: &Url,
    headers: &[(String, String)],
) -> Result<PollOutcome, TransportError> {
    let request = HttpRequest::get(url.clone()).with_headers(headers);
    let resp = http
        .send(request)
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    match resp.status {
        200 => {
            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| TransportError::Body(e.0))?;
            if body.is_empty() {
                Ok(PollOutcome::Empty)
            } else {
                Ok(PollOutcome::Frame(body))
            }
        }
        204 => Ok(PollOutcome::Closed),
        status => Err(TransportError::UnexpectedStatus { status }),
    }
}

async fn poll_loop<H: HttpClient>(
    http: H,
    url: Url,
    headers: Vec<(String, String)>,
    channel: TransportChannel,
    handle: ConnectionHandle,
    cancel: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("poll loop cancelled");
                return;
            }
            outcome = poll(&http, &url, &headers) => outcome,
        };

        match outcome {
            Ok(PollOutcome::Frame(frame)) => {
                tracing::debug!(len = frame.len(), "poll received frame");
                if !deliver(&channel, frame, &cancel).await {
                    return;
                }
            }
            Ok(PollOutcome::Empty) => {
                tracing::trace!("poll timed out, polling again");
            }
            Ok(PollOutcome::Closed) => {
                tracing::info!("server closed the long-polling connection");
                handle.transport_closed(None);
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "poll failed");
                handle.transport_closed(Some(e));
                return;
            }
        }
    }
}
