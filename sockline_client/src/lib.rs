//! # Sockline Client
//!
//! A duplex message connection to a server over HTTP. The client negotiates
//! with the server, picks the best transport both sides support, and exposes
//! one [`HttpConnection`] whatever transport carries the frames.
//!
//! # Protocol
//!
//! ```text
//! ┌──────────┐                                 ┌──────────┐
//! │  Client   │                                 │  Server   │
//! └────┬─────┘                                 └────┬─────┘
//!      │                                            │
//!      │  POST /negotiate                           │
//!      │ ─────────────────────────────────────────► │
//!      │  200 {"connectionId", "availableTransports"}│
//!      │ ◄───────────────────────────────────────── │
//!      │                                            │
//!      │  one of:                                   │
//!      │    ws(s)://.../?id=<id>       (WebSockets) │
//!      │    GET  /?id=<id>  event-stream (SSE)      │
//!      │    GET  /?id=<id>  repeated  (LongPolling) │
//!      │  and for SSE / LongPolling outbound:       │
//!      │    POST /?id=<id>  one frame per request   │
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     HttpConnection                       │
//! │                                                          │
//! │  send(frame) ──► outbound ──► [duplex channel] ──► Transport ──► network
//! │  recv()      ◄── inbound  ◄── [duplex channel] ◄── Transport ◄── network
//! │                                                          │
//! │  lifecycle: Disconnected → Starting → Connected          │
//! │             → Stopping → Disconnected | Disposed         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod connection;
pub mod error;
pub mod http_client;
pub mod negotiate;
pub mod options;
pub mod transport;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use channel::{ApplicationChannel, Frame, TransportChannel};
pub use connection::{
    ConnectionState, HttpConnection,
    closed::{Closed, ClosedReceiver},
    handle::ConnectionHandle,
};
pub use error::{ConnectionError, InvalidState, NegotiationError, TransportError};
pub use options::ConnectionOptions;
pub use transport::{TransferMode, Transport, TransportKind, TransportPreference};

/// Query parameter carrying the negotiated connection id on transport requests.
pub const CONNECTION_ID_PARAM: &str = "id";
