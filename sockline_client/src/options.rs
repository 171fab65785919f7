//! Per-connection configuration.

use crate::transport::{TransferMode, TransportKind, TransportPreference};

/// Configuration for an [`HttpConnection`](crate::HttpConnection).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Which transport to use. Defaults to picking the best one offered.
    pub transport: TransportPreference,

    /// Whether frames are text or binary. Defaults to text.
    pub transfer_mode: TransferMode,

    /// Bound on each direction of the duplex channel. `None` is unbounded.
    pub channel_capacity: Option<usize>,

    /// Extra headers sent on every HTTP request and on the WebSocket upgrade.
    pub headers: Vec<(String, String)>,
}

impl ConnectionOptions {
    /// Restrict the connection to one transport.
    #[must_use]
    pub const fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = TransportPreference::Only(kind);
        self
    }

    /// Set the transfer mode.
    #[must_use]
    pub const fn with_transfer_mode(mut self, transfer_mode: TransferMode) -> Self {
        self.transfer_mode = transfer_mode;
        self
    }

    /// Bound each direction of the duplex channel.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Add a header sent on every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.transport, TransportPreference::Auto);
        assert_eq!(options.transfer_mode, TransferMode::Text);
        assert_eq!(options.channel_capacity, None);
        assert!(options.headers.is_empty());
    }

    #[test]
    fn builders_compose() {
        let options = ConnectionOptions::default()
            .with_transport(TransportKind::LongPolling)
            .with_transfer_mode(TransferMode::Binary)
            .with_channel_capacity(8)
            .with_header("authorization", "Bearer t");

        assert_eq!(
            options.transport,
            TransportPreference::Only(TransportKind::LongPolling)
        );
        assert_eq!(options.transfer_mode, TransferMode::Binary);
        assert_eq!(options.channel_capacity, Some(8));
        assert_eq!(
            options.headers,
            vec![("authorization".to_string(), "Bearer t".to_string())]
        );
    }
}
