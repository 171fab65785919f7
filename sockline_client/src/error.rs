//! Error types for the connection and its transports.

use thiserror::Error;

use crate::transport::{TransferMode, TransportKind, TransportPreference};

/// An operation was attempted in a lifecycle state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum InvalidState {
    /// `start` was called while the connection was not disconnected.
    #[error("Cannot start a connection that is not in the Disconnected state.")]
    NotDisconnected,

    /// `send` was called while the connection was not connected.
    #[error("Cannot send messages when the connection is not in the Connected state.")]
    NotConnected,
}

/// The duplex channel side being written to has been completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// Problem while negotiating with the server.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The base URL cannot carry a path.
    #[error("invalid negotiate URL: {0}")]
    InvalidUrl(String),

    /// HTTP request failed.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// Server returned an unexpected status code.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body as a string.
        body: String,
    },

    /// The response body is not a negotiation response.
    #[error("malformed negotiation response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The response did not assign a connection id.
    #[error("negotiation response is missing a connection id")]
    MissingConnectionId,
}

/// Problem while starting or running a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// Server returned an unexpected status code.
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// Reading a response body failed part way.
    #[error("response body error: {0}")]
    Body(String),

    /// WebSocket error.
    #[error(transparent)]
    WebSocket(#[from] async_tungstenite::tungstenite::Error),

    /// The connection URL cannot be mapped onto this transport.
    #[error("invalid transport URL: {0}")]
    InvalidUrl(String),

    /// The transport cannot carry frames in the requested mode.
    #[error("{transport} does not support the {transfer_mode} transfer mode")]
    UnsupportedTransferMode {
        /// The transport that rejected the mode.
        transport: TransportKind,
        /// The rejected mode.
        transfer_mode: TransferMode,
    },

    /// The server ended the connection while the transport was starting.
    #[error("connection closed by the server")]
    ClosedByServer,

    /// `start` was called twice on the same transport instance.
    #[error("transport already started")]
    AlreadyStarted,

    /// The duplex channel was completed underneath the transport.
    #[error(transparent)]
    Channel(#[from] ChannelClosed),

    /// Any other transport-specific failure.
    #[error("transport failed: {0}")]
    Failed(String),
}

/// Errors returned by [`HttpConnection`](crate::HttpConnection) operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The operation is not allowed in the current lifecycle state.
    #[error(transparent)]
    InvalidState(#[from] InvalidState),

    /// Negotiation with the server failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// None of the server's transports satisfy the request.
    #[error("no compatible transport found for {requested} with the {transfer_mode} transfer mode")]
    NoCompatibleTransport {
        /// The requested transport preference.
        requested: TransportPreference,
        /// The requested transfer mode.
        transfer_mode: TransferMode,
    },

    /// The selected transport failed to start.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The duplex channel is complete.
    #[error(transparent)]
    Channel(#[from] ChannelClosed),

    /// The start attempt was torn down before it could finish.
    #[error("start attempt aborted")]
    StartAborted,
}
