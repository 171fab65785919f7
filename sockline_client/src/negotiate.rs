//! The negotiation handshake.
//!
//! One `POST <base>/negotiate` per start attempt. The server answers with the
//! connection id it assigned and the transports it is willing to serve:
//!
//! ```json
//! {
//!   "connectionId": "abc123",
//!   "availableTransports": [
//!     { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] }
//!   ]
//! }
//! ```

use serde::Deserialize;
use url::Url;

use crate::{
    error::NegotiationError,
    http_client::{HttpClient, HttpRequest},
    transport::{TransferMode, TransportKind},
};

/// What the server offered for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResponse {
    /// The id the server assigned to this connection.
    pub connection_id: String,

    /// Transports the server supports, in the order it listed them.
    pub available_transports: Vec<AvailableTransport>,
}

/// One advertised transport and the transfer modes it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableTransport {
    /// The transport.
    pub transport: TransportKind,

    /// Transfer modes the server accepts on this transport.
    pub transfer_formats: Vec<TransferMode>,
}

impl NegotiationResponse {
    /// Parse a negotiation response body.
    ///
    /// Transports and transfer formats with unknown names are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::Malformed`] if the body is not the
    /// expected JSON, or [`NegotiationError::MissingConnectionId`] if the
    /// server assigned an empty id.
    pub fn from_json(body: &[u8]) -> Result<Self, NegotiationError> {
        let raw: RawResponse = serde_json::from_slice(body)?;
        if raw.connection_id.is_empty() {
            return Err(NegotiationError::MissingConnectionId);
        }

        let available_transports = raw
            .available_transports
            .into_iter()
            .filter_map(|entry| {
                let Some(transport) = TransportKind::from_name(&entry.transport) else {
                    tracing::debug!(name = %entry.transport, "skipping unknown transport");
                    return None;
                };
                let transfer_formats = entry
                    .transfer_formats
                    .iter()
                    .filter_map(|name| TransferMode::from_name(name))
                    .collect();
                Some(AvailableTransport {
                    transport,
                    transfer_formats,
                })
            })
            .collect();

        Ok(Self {
            connection_id: raw.connection_id,
            available_transports,
        })
    }

    /// Whether `kind` is advertised with `transfer_mode`.
    #[must_use]
    pub fn supports(&self, kind: TransportKind, transfer_mode: TransferMode) -> bool {
        self.available_transports
            .iter()
            .any(|t| t.transport == kind && t.transfer_formats.contains(&transfer_mode))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    connection_id: String,
    #[serde(default)]
    available_transports: Vec<RawTransport>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransport {
    transport: String,
    #[serde(default)]
    transfer_formats: Vec<String>,
}

/// The negotiate endpoint for `base`: one path segment appended, query kept.
///
/// # Errors
///
/// Returns [`NegotiationError::InvalidUrl`] if `base` cannot carry a path
/// (e.g. a `data:` URL).
pub fn negotiate_url(base: &Url) -> Result<Url, NegotiationError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| NegotiationError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .push("negotiate");
    Ok(url)
}

/// Run the handshake against `base`.
///
/// # Errors
///
/// Returns a [`NegotiationError`] if the request fails, the server answers
/// with a non-2xx status, or the body cannot be parsed.
pub async fn negotiate<H: HttpClient>(
    http: &H,
    base: &Url,
    headers: &[(String, String)],
) -> Result<NegotiationResponse, NegotiationError> {
    let url = negotiate_url(base)?;
    tracing::debug!(%url, "negotiating");

    let request = HttpRequest::post(url, Vec::new()).with_headers(headers);
    let resp = http
        .send(request)
        .await
        .map_err(|e| NegotiationError::Request(e.to_string()))?;

    let status = resp.status;
    let body = resp
        .body
        .collect()
        .await
        .map_err(|e| NegotiationError::Request(e.to_string()))?;

    if !(200..300).contains(&status) {
        let body = String::from_utf8_lossy(&body).into_owned();
        tracing::warn!(status, %body, "negotiation returned unexpected status");
        return Err(NegotiationError::UnexpectedStatus { status, body });
    }

    let response = NegotiationResponse::from_json(&body)?;
    tracing::info!(
        connection_id = %response.connection_id,
        transports = response.available_transports.len(),
        "negotiated"
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http_client::{HttpResponse, Method},
        test_utils::TestHttpClient,
    };
    use testresult::TestResult;

    #[test]
    fn negotiate_url_appends_segment() -> TestResult {
        let url = negotiate_url(&Url::parse("http://fakeuri.org/")?)?;
        assert_eq!(url.as_str(), "http://fakeuri.org/negotiate");

        let url = negotiate_url(&Url::parse("http://fakeuri.org/hub?x=1")?)?;
        assert_eq!(url.as_str(), "http://fakeuri.org/hub/negotiate?x=1");

        let url = negotiate_url(&Url::parse("http://fakeuri.org/hub/")?)?;
        assert_eq!(url.as_str(), "http://fakeuri.org/hub/negotiate");
        Ok(())
    }

    #[test]
    fn negotiate_url_rejects_cannot_be_a_base() -> TestResult {
        let err = negotiate_url(&Url::parse("data:text/plain,hi")?);
        assert!(matches!(err, Err(NegotiationError::InvalidUrl(_))));
        Ok(())
    }

    #[test]
    fn parses_full_response() -> TestResult {
        let body = br#"{
            "connectionId": "abc123",
            "availableTransports": [
                { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] },
                { "transport": "ServerSentEvents", "transferFormats": ["Text"] },
                { "transport": "LongPolling", "transferFormats": ["Text", "Binary"] }
            ]
        }"#;
        let response = NegotiationResponse::from_json(body)?;

        assert_eq!(response.connection_id, "abc123");
        assert_eq!(response.available_transports.len(), 3);
        assert!(response.supports(TransportKind::WebSockets, TransferMode::Binary));
        assert!(response.supports(TransportKind::ServerSentEvents, TransferMode::Text));
        assert!(!response.supports(TransportKind::ServerSentEvents, TransferMode::Binary));
        Ok(())
    }

    #[test]
    fn skips_unknown_names() -> TestResult {
        let body = br#"{
            "connectionId": "abc",
            "availableTransports": [
                { "transport": "ForeverFrame", "transferFormats": ["Text"] },
                { "transport": "LongPolling", "transferFormats": ["Text", "Morse"] }
            ]
        }"#;
        let response = NegotiationResponse::from_json(body)?;

        assert_eq!(
            response.available_transports,
            vec![AvailableTransport {
                transport: TransportKind::LongPolling,
                transfer_formats: vec![TransferMode::Text],
            }]
        );
        Ok(())
    }

    #[test]
    fn missing_transport_list_means_none() -> TestResult {
        let response = NegotiationResponse::from_json(br#"{"connectionId":"abc"}"#)?;
        assert!(response.available_transports.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_empty_connection_id() {
        let err = NegotiationResponse::from_json(br#"{"connectionId":"","availableTransports":[]}"#);
        assert!(matches!(err, Err(NegotiationError::MissingConnectionId)));
    }

    #[test]
    fn rejects_malformed_body() {
        let err = NegotiationResponse::from_json(b"not json");
        assert!(matches!(err, Err(NegotiationError::Malformed(_))));
    }

    #[tokio::test]
    async fn posts_to_negotiate_endpoint() -> TestResult {
        let http = TestHttpClient::new();
        let base = Url::parse("http://fakeuri.org/")?;

        let response = negotiate(&http, &base, &[("x-tenant".into(), "7".into())]).await?;
        assert_eq!(response.available_transports.len(), 3);

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].path_and_query(), "/negotiate");
        assert!(
            requests[0]
                .headers
                .contains(&("x-tenant".to_string(), "7".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() -> TestResult {
        let http = TestHttpClient::empty().on_post(|_| Some(HttpResponse::new(500, "boom")));
        let base = Url::parse("http://fakeuri.org/")?;

        let err = negotiate(&http, &base, &[]).await;
        match err {
            Err(NegotiationError::UnexpectedStatus { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn http_error_is_an_error() -> TestResult {
        let http = TestHttpClient::empty();
        let base = Url::parse("http://fakeuri.org/")?;

        let err = negotiate(&http, &base, &[]).await;
        match err {
            Err(NegotiationError::Request(msg)) => {
                assert!(msg.contains("Http endpoint not implemented"), "{msg}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }
}
