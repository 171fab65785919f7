//! Picks one transport from what the server offered.

use crate::{
    error::ConnectionError,
    negotiate::NegotiationResponse,
    transport::{TransferMode, TransportKind, TransportPreference},
};

/// Transports tried under [`TransportPreference::Auto`], best first.
pub const AUTO_ORDER: [TransportKind; 3] = [
    TransportKind::WebSockets,
    TransportKind::ServerSentEvents,
    TransportKind::LongPolling,
];

/// Choose the transport for a start attempt.
///
/// # Errors
///
/// Returns [`ConnectionError::NoCompatibleTransport`] when no advertised
/// transport satisfies both the preference and the transfer mode.
pub fn select(
    preference: TransportPreference,
    transfer_mode: TransferMode,
    negotiation: &NegotiationResponse,
) -> Result<(TransportKind, TransferMode), ConnectionError> {
    let candidates: &[TransportKind] = match &preference {
        TransportPreference::Auto => &AUTO_ORDER,
        TransportPreference::Only(kind) => core::slice::from_ref(kind),
    };

    candidates
        .iter()
        .copied()
        .find(|&kind| negotiation.supports(kind, transfer_mode))
        .map(|kind| (kind, transfer_mode))
        .ok_or(ConnectionError::NoCompatibleTransport {
            requested: preference,
            transfer_mode,
        })
}
