//! Common test utilities and helpers.

use core::time::Duration;
use std::sync::OnceLock;

use testresult::TestResult;
use url::Url;

use crate::{
    ConnectionOptions, ConnectionState, HttpConnection,
    connection::closed::{Closed, ClosedReceiver},
    test_utils::{Started, TestHttpClient, TestTransportFactory},
};

/// Upper bound on any single wait in these tests.
const WAIT: Duration = Duration::from_secs(5);

static TRACING: OnceLock<()> = OnceLock::new();

pub(super) fn init_tracing() {
    TRACING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();
    });
}

pub(super) fn test_url() -> TestResult<Url> {
    Ok(Url::parse("http://fakeuri.org/")?)
}

/// A connection that negotiates successfully and builds transports from `factory`.
pub(super) fn test_connection(
    factory: &TestTransportFactory,
) -> TestResult<HttpConnection<TestHttpClient>> {
    test_connection_with(TestHttpClient::new(), factory, ConnectionOptions::default())
}

pub(super) fn test_connection_with(
    http: TestHttpClient,
    factory: &TestTransportFactory,
    options: ConnectionOptions,
) -> TestResult<HttpConnection<TestHttpClient>> {
    init_tracing();
    Ok(HttpConnection::with_transport_factory(
        test_url()?,
        http,
        options,
        factory.clone(),
    ))
}

/// The record of the most recent transport start.
pub(super) fn last_started(factory: &TestTransportFactory) -> TestResult<Started> {
    Ok(factory.last_started().ok_or("no transport was started")?)
}

pub(super) async fn next_closed(closed: &ClosedReceiver) -> TestResult<Closed> {
    Ok(tokio::time::timeout(WAIT, closed.recv()).await??)
}

/// Give spawned tasks a chance to run, then check nothing more was raised.
pub(super) async fn assert_no_more_closed(closed: &ClosedReceiver) {
    settle().await;
    assert!(closed.try_recv().is_err(), "unexpected extra Closed");
}

pub(super) async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub(super) async fn wait_for_state(
    conn: &HttpConnection<TestHttpClient>,
    state: ConnectionState,
) -> TestResult {
    tokio::time::timeout(WAIT, async {
        while conn.state() != state {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    Ok(())
}
