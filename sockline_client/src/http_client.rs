//! Generic HTTP client trait for negotiation and the HTTP-based transports.
//!
//! This abstracts over the HTTP client implementation so the connection can
//! run over [`reqwest`](https://docs.rs/reqwest) in production and over a
//! scripted client in tests.

#[cfg(feature = "reqwest")]
pub mod reqwest_client;

use core::fmt;

use futures::{
    StreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use thiserror::Error;
use url::Url;

#[cfg(feature = "reqwest")]
pub use reqwest_client::{ReqwestHttpClient, ReqwestHttpError};

/// A minimal async HTTP client.
///
/// Implementations handle the mechanics of making HTTP requests (TLS,
/// connection pooling, etc.) while this trait exposes only what the
/// connection and its transports need.
pub trait HttpClient: Clone + Send + Sync + 'static {
    /// The error type for HTTP operations.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Send a request and return the response once its status and headers
    /// are available. The body may still be streaming.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, Self::Error>>;
}

/// The HTTP methods the transports use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,

    /// `POST`
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// The request method.
    pub method: Method,

    /// The absolute request URL.
    pub url: Url,

    /// Request headers.
    pub headers: Vec<(String, String)>,

    /// The request body. Empty for `GET`.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// A `GET` request with no headers.
    #[must_use]
    pub const fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A `POST` request carrying `body`.
    #[must_use]
    pub const fn post(url: Url, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            body,
        }
    }

    /// Add one header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add every header from `headers`.
    #[must_use]
    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }

    /// The path plus query of the request URL, e.g. `/?id=abc`.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }
}

/// A minimal HTTP response with a streaming body.
#[derive(Debug)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// Selected response headers (lowercase keys).
    pub headers: Vec<(String, String)>,

    /// The response body.
    pub body: ResponseBody,
}

impl HttpResponse {
    /// A response with a fully buffered body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::full(body.into()),
        }
    }

    /// A response whose body arrives as a stream of chunks.
    #[must_use]
    pub fn streaming(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// Whether the status is in the `2xx` range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Look up a response header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k == &lower)
            .map(|(_, v)| v.as_str())
    }
}

/// A response body delivered as a stream of byte chunks.
pub struct ResponseBody(BoxStream<'static, Result<Vec<u8>, BodyError>>);

impl ResponseBody {
    /// A body with no content.
    #[must_use]
    pub fn empty() -> Self {
        Self(stream::empty().boxed())
    }

    /// A body delivered as one chunk.
    #[must_use]
    pub fn full(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self(stream::once(async move { Ok(bytes) }).boxed())
    }

    /// A body backed by an arbitrary chunk stream.
    #[must_use]
    pub fn from_stream(
        chunks: impl futures::Stream<Item = Result<Vec<u8>, BodyError>> + Send + 'static,
    ) -> Self {
        Self(chunks.boxed())
    }

    /// Wait for the next chunk. `None` means the body is finished.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, BodyError>> {
        self.0.next().await
    }

    /// Read the whole body into memory.
    ///
    /// # Errors
    ///
    /// Returns the first [`BodyError`] the stream yields.
    pub async fn collect(mut self) -> Result<Vec<u8>, BodyError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

/// Reading a response body failed part way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("response body error: {0}")]
pub struct BodyError(pub String);
