//! [`reqwest`]-backed implementation of [`HttpClient`].

use futures::{FutureExt, TryStreamExt, future::BoxFuture};

use super::{BodyError, HttpClient, HttpRequest, HttpResponse, Method, ResponseBody};

/// Error type for the reqwest-based HTTP client.
#[derive(Debug, thiserror::Error)]
#[error("HTTP request failed: {0}")]
pub struct ReqwestHttpError(#[from] reqwest::Error);

/// A [`reqwest`]-backed implementation of [`HttpClient`].
///
/// No overall request timeout is set: long polls and event streams stay
/// open for as long as the server keeps them open.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new reqwest-backed HTTP client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Wrap an already configured [`reqwest::Client`].
    #[must_use]
    pub const fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    type Error = ReqwestHttpError;

    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, Self::Error>> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.inner.request(method, url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        async move {
            let resp = builder.send().await?;
            let status = resp.status().as_u16();

            let resp_headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect();

            let chunks = resp
                .bytes_stream()
                .map_ok(|chunk| chunk.to_vec())
                .map_err(|e| BodyError(e.to_string()));

            Ok(HttpResponse {
                status,
                headers: resp_headers,
                body: ResponseBody::from_stream(chunks),
            })
        }
        .boxed()
    }
}
