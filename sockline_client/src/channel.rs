//! In-memory duplex pipe between the application and the active transport.
//!
//! ```text
//! ApplicationChannel::send ──► outbound ──► TransportChannel::read
//! ApplicationChannel::recv ◄── inbound  ◄── TransportChannel::write
//! ```
//!
//! Each direction completes independently. Once a direction is complete,
//! writers get [`ChannelClosed`] while readers still drain whatever was
//! buffered before completion.

use crate::error::ChannelClosed;

/// A single message payload.
pub type Frame = Vec<u8>;

/// Create a connected pair of channel halves.
///
/// `capacity` bounds each direction; `None` leaves both unbounded.
#[must_use]
pub fn duplex(capacity: Option<usize>) -> (ApplicationChannel, TransportChannel) {
    let (outbound_tx, outbound_rx) = queue(capacity);
    let (inbound_tx, inbound_rx) = queue(capacity);

    (
        ApplicationChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        },
        TransportChannel {
            outbound: outbound_rx,
            inbound: inbound_tx,
        },
    )
}

fn queue(capacity: Option<usize>) -> (async_channel::Sender<Frame>, async_channel::Receiver<Frame>) {
    match capacity {
        Some(capacity) => async_channel::bounded(capacity.max(1)),
        None => async_channel::unbounded(),
    }
}

/// The application's half: writes outbound frames, reads inbound frames.
#[derive(Debug, Clone)]
pub struct ApplicationChannel {
    outbound: async_channel::Sender<Frame>,
    inbound: async_channel::Receiver<Frame>,
}

impl ApplicationChannel {
    /// Queue a frame for the transport to send.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] once the outbound direction is complete.
    pub async fn send(&self, frame: Frame) -> Result<(), ChannelClosed> {
        self.outbound.send(frame).await.map_err(|_| ChannelClosed)
    }

    /// Wait for the next inbound frame.
    ///
    /// Returns `None` once the inbound direction is complete and drained.
    pub async fn recv(&self) -> Option<Frame> {
        self.inbound.recv().await.ok()
    }

    /// Mark the outbound direction complete; the application will send nothing more.
    pub fn complete(&self) {
        self.outbound.close();
    }

    /// Whether the inbound direction is complete and fully drained.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inbound.is_closed() && self.inbound.is_empty()
    }

    /// Complete both directions.
    pub(crate) fn abort(&self) {
        self.outbound.close();
        self.inbound.close();
    }
}

/// The transport's half: reads outbound frames, writes inbound frames.
#[derive(Debug, Clone)]
pub struct TransportChannel {
    outbound: async_channel::Receiver<Frame>,
    inbound: async_channel::Sender<Frame>,
}

impl TransportChannel {
    /// Wait for the next frame the application wants sent.
    ///
    /// Returns `None` once the application completed the outbound direction
    /// and everything queued before that has been read.
    pub async fn read(&self) -> Option<Frame> {
        self.outbound.recv().await.ok()
    }

    /// Deliver a frame received from the network to the application.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] once the inbound direction is complete.
    pub async fn write(&self, frame: Frame) -> Result<(), ChannelClosed> {
        self.inbound.send(frame).await.map_err(|_| ChannelClosed)
    }

    /// Complete both directions. No further traffic is delivered either way.
    pub fn complete(&self) {
        self.inbound.close();
        self.outbound.close();
    }

    /// Whether [`complete`](Self::complete) has been called.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    #[tokio::test]
    async fn frames_flow_both_ways() -> TestResult {
        let (app, transport) = duplex(None);

        app.send(b"up".to_vec()).await?;
        assert_eq!(transport.read().await, Some(b"up".to_vec()));

        transport.write(b"down".to_vec()).await?;
        assert_eq!(app.recv().await, Some(b"down".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn reader_drains_buffered_frames_after_completion() -> TestResult {
        let (app, transport) = duplex(Some(4));

        transport.write(b"one".to_vec()).await?;
        transport.write(b"two".to_vec()).await?;
        transport.complete();

        assert!(!app.is_finished());
        assert_eq!(app.recv().await, Some(b"one".to_vec()));
        assert_eq!(app.recv().await, Some(b"two".to_vec()));
        assert_eq!(app.recv().await, None);
        assert!(app.is_finished());
        Ok(())
    }

    #[tokio::test]
    async fn writes_after_completion_fail() {
        let (app, transport) = duplex(None);
        transport.complete();

        assert!(transport.is_complete());
        assert_eq!(transport.write(b"late".to_vec()).await, Err(ChannelClosed));
        assert_eq!(app.send(b"late".to_vec()).await, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn application_completion_ends_transport_reads() {
        let (app, transport) = duplex(None);
        app.complete();

        assert_eq!(transport.read().await, None);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let (app, _transport) = duplex(Some(0));
        assert!(app.outbound.capacity() == Some(1));
    }
}
