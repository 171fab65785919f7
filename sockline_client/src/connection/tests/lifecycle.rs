//! Tests for start, stop and dispose without interleaving.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use testresult::TestResult;

use super::common::{
    assert_no_more_closed, last_started, next_closed, test_connection, test_connection_with,
    test_url,
};
use crate::{
    ConnectionError, ConnectionOptions, ConnectionState, InvalidState, TransportError,
    error::NegotiationError,
    test_utils::{TEST_CONNECTION_ID, TestHttpClient, TestTransportFactory},
    transport::{TransferMode, TransportKind, TransportPreference},
};

#[tokio::test]
async fn test_start_connects_with_the_best_transport() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    conn.start().await?;

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.connection_id().as_deref(), Some(TEST_CONNECTION_ID));
    assert_eq!(conn.transport_kind(), Some(TransportKind::WebSockets));
    assert_eq!(conn.transfer_mode(), Some(TransferMode::Text));

    let started = last_started(&factory)?;
    assert_eq!(started.kind, TransportKind::WebSockets);
    assert_eq!(started.url, test_url()?);
    assert_eq!(started.connection_id, TEST_CONNECTION_ID);
    Ok(())
}

#[tokio::test]
async fn test_start_honors_transport_and_transfer_mode_options() -> TestResult {
    let factory = TestTransportFactory::new();
    let options = ConnectionOptions::default()
        .with_transport(TransportKind::LongPolling)
        .with_transfer_mode(TransferMode::Binary);
    let conn = test_connection_with(TestHttpClient::new(), &factory, options)?;

    conn.start().await?;

    assert_eq!(conn.transport_kind(), Some(TransportKind::LongPolling));
    assert_eq!(conn.transfer_mode(), Some(TransferMode::Binary));
    Ok(())
}

#[tokio::test]
async fn test_start_twice_fails_with_invalid_state() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;

    conn.start().await?;
    let err = conn.start().await;

    match err {
        Err(e) => assert_eq!(
            e.to_string(),
            "Cannot start a connection that is not in the Disconnected state."
        ),
        Ok(()) => return Err("second start succeeded".into()),
    }
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(factory.created_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_start_after_dispose_fails() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;

    conn.start().await?;
    conn.dispose().await;
    let err = conn.start().await;

    assert!(matches!(
        err,
        Err(ConnectionError::InvalidState(InvalidState::NotDisconnected))
    ));
    assert_eq!(conn.state(), ConnectionState::Disposed);
    assert_eq!(factory.created_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_dispose_without_start_raises_no_closed() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    let closed = conn.closed();

    conn.dispose().await;

    assert_eq!(conn.state(), ConnectionState::Disposed);
    assert!(conn.start().await.is_err());
    assert_no_more_closed(&closed).await;
    Ok(())
}

#[tokio::test]
async fn test_stop_without_start_is_a_no_op() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    let closed = conn.closed();

    conn.stop().await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(factory.stop_count(), 0);
    assert_no_more_closed(&closed).await;
    Ok(())
}

#[tokio::test]
async fn test_failed_transport_start_allows_retry() -> TestResult {
    let attempts = Arc::new(AtomicUsize::new(0));
    let factory = TestTransportFactory::new().on_start({
        let attempts = Arc::clone(&attempts);
        move || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(TransportError::Failed("first attempt".into()))
                } else {
                    Ok(())
                }
            }
        }
    });
    let conn = test_connection(&factory)?;
    let closed = conn.closed();

    let err = conn.start().await;
    match err {
        Err(ConnectionError::Transport(TransportError::Failed(msg))) => {
            assert_eq!(msg, "first attempt");
        }
        other => return Err(format!("unexpected start result: {other:?}").into()),
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.connection_id(), None);

    conn.start().await?;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(factory.created_count(), 2);
    assert_no_more_closed(&closed).await;
    Ok(())
}

#[tokio::test]
async fn test_start_stop_cycles_each_raise_one_clean_closed() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    let closed = conn.closed();

    for cycle in 1..=2 {
        conn.start().await?;
        conn.stop().await;

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(factory.stop_count(), cycle);
        assert!(next_closed(&closed).await?.error().is_none());
        assert_no_more_closed(&closed).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_dispose_is_idempotent() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    let closed = conn.closed();

    conn.start().await?;
    conn.dispose().await;
    conn.dispose().await;
    conn.stop().await;

    assert_eq!(conn.state(), ConnectionState::Disposed);
    assert_eq!(factory.stop_count(), 1);
    assert!(next_closed(&closed).await?.error().is_none());
    assert_no_more_closed(&closed).await;
    Ok(())
}

#[tokio::test]
async fn test_negotiation_failure_leaves_disconnected() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection_with(
        TestHttpClient::empty(),
        &factory,
        ConnectionOptions::default(),
    )?;

    let err = conn.start().await;

    assert!(matches!(
        err,
        Err(ConnectionError::Negotiation(NegotiationError::Request(_)))
    ));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(factory.created_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_no_compatible_transport_leaves_disconnected() -> TestResult {
    let factory = TestTransportFactory::new();
    let options = ConnectionOptions::default()
        .with_transport(TransportKind::ServerSentEvents)
        .with_transfer_mode(TransferMode::Binary);
    let conn = test_connection_with(TestHttpClient::new(), &factory, options)?;

    let err = conn.start().await;

    assert!(matches!(
        err,
        Err(ConnectionError::NoCompatibleTransport {
            requested: TransportPreference::Only(TransportKind::ServerSentEvents),
            transfer_mode: TransferMode::Binary,
        })
    ));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(factory.created_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_headers_are_sent_on_negotiate() -> TestResult {
    let factory = TestTransportFactory::new();
    let http = TestHttpClient::new();
    let options = ConnectionOptions::default().with_header("authorization", "Bearer t");
    let conn = test_connection_with(http.clone(), &factory, options)?;

    conn.start().await?;

    let negotiate = http.requests().into_iter().next().ok_or("no request")?;
    assert_eq!(negotiate.path_and_query(), "/negotiate");
    assert!(
        negotiate
            .headers
            .contains(&("authorization".to_string(), "Bearer t".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_frames_flow_between_application_and_transport() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    conn.start().await?;
    let started = last_started(&factory)?;

    conn.send(b"up".to_vec()).await?;
    assert_eq!(started.channel.read().await, Some(b"up".to_vec()));

    started.channel.write(b"down".to_vec()).await?;
    assert_eq!(conn.recv().await, Some(b"down".to_vec()));
    Ok(())
}

#[tokio::test]
async fn test_send_when_not_connected_fails() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;

    let err = conn.send(b"early".to_vec()).await;

    match err {
        Err(e) => assert_eq!(
            e.to_string(),
            "Cannot send messages when the connection is not in the Connected state."
        ),
        Ok(()) => return Err("send succeeded while disconnected".into()),
    }
    assert_eq!(conn.recv().await, None);
    Ok(())
}

#[tokio::test]
async fn test_stop_completes_the_application_channel() -> TestResult {
    let factory = TestTransportFactory::new();
    let conn = test_connection(&factory)?;
    conn.start().await?;
    let channel = conn.channel().ok_or("no channel while connected")?;
    let started = last_started(&factory)?;

    conn.stop().await;

    assert!(started.channel.is_complete());
    assert_eq!(channel.recv().await, None);
    assert!(channel.send(b"late".to_vec()).await.is_err());
    assert!(conn.channel().is_none());
    Ok(())
}
