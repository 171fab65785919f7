//! Interactive connection: stdin lines go out as frames, frames come back on stdout.

use anyhow::Result;
use sockline_client::{
    ConnectionOptions, HttpConnection, TransferMode, TransportKind,
    http_client::ReqwestHttpClient,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Arguments for the connect command.
#[derive(Debug, clap::Parser)]
pub(crate) struct ConnectArgs {
    /// Base URL of the server endpoint
    #[arg(short, long, env = "SOCKLINE_URL")]
    pub(crate) url: Url,

    /// Transport to use
    #[arg(short, long, value_enum, default_value_t = TransportArg::Auto)]
    pub(crate) transport: TransportArg,

    /// Send and receive binary frames instead of text
    #[arg(short, long)]
    pub(crate) binary: bool,

    /// Bound on buffered frames in each direction
    #[arg(short, long)]
    pub(crate) capacity: Option<usize>,

    /// Extra request header as `name:value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub(crate) headers: Vec<(String, String)>,
}

/// Transport choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum TransportArg {
    Auto,
    #[value(name = "websockets")]
    WebSockets,
    #[value(name = "sse")]
    ServerSentEvents,
    #[value(name = "longpolling")]
    LongPolling,
}

impl ConnectArgs {
    fn options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::default();
        options = match self.transport {
            TransportArg::Auto => options,
            TransportArg::WebSockets => options.with_transport(TransportKind::WebSockets),
            TransportArg::ServerSentEvents => {
                options.with_transport(TransportKind::ServerSentEvents)
            }
            TransportArg::LongPolling => options.with_transport(TransportKind::LongPolling),
        };
        if self.binary {
            options = options.with_transfer_mode(TransferMode::Binary);
        }
        if let Some(capacity) = self.capacity {
            options = options.with_channel_capacity(capacity);
        }
        for (name, value) in &self.headers {
            options = options.with_header(name, value);
        }
        options
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected name:value, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Run one connection until stdin ends, the server closes it, or `token` fires.
pub(crate) async fn run(args: ConnectArgs, token: CancellationToken) -> Result<()> {
    let options = args.options();
    let conn = HttpConnection::new(args.url, ReqwestHttpClient::new(), options);
    let closed = conn.closed();

    conn.start().await?;
    tracing::info!(
        connection_id = %conn.connection_id().unwrap_or_default(),
        transport = ?conn.transport_kind(),
        transfer_mode = ?conn.transfer_mode(),
        "connected to {}",
        conn.url()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let ended = loop {
        tokio::select! {
            () = token.cancelled() => break None,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = conn.send(line.into_bytes()).await {
                        tracing::warn!(error = %e, "could not send line");
                    }
                }
                None => {
                    tracing::info!("stdin closed");
                    break None;
                }
            },
            frame = conn.recv() => {
                let Some(frame) = frame else {
                    break closed.recv().await.ok();
                };
                stdout.write_all(String::from_utf8_lossy(&frame).as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            event = closed.recv() => break event.ok(),
        }
    };

    conn.dispose().await;

    let event = match ended {
        Some(event) => Some(event),
        None => closed.try_recv().ok(),
    };
    match event.as_ref().and_then(|event| event.error()) {
        Some(e) => {
            tracing::error!(error = %e, "connection lost");
            Err(anyhow::anyhow!("connection lost: {e}"))
        }
        None => {
            tracing::info!("connection closed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_splits_on_first_colon() {
        assert_eq!(
            parse_header("authorization: Bearer a:b"),
            Ok(("authorization".to_string(), "Bearer a:b".to_string()))
        );
    }

    #[test]
    fn test_parse_header_rejects_missing_colon() {
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(":value").is_err());
    }

    #[test]
    fn test_options_follow_flags() -> Result<(), url::ParseError> {
        let args = ConnectArgs {
            url: Url::parse("http://localhost:5000/echo")?,
            transport: TransportArg::LongPolling,
            binary: true,
            capacity: Some(8),
            headers: vec![("x-tenant".into(), "blue".into())],
        };

        let expected = ConnectionOptions::default()
            .with_transport(TransportKind::LongPolling)
            .with_transfer_mode(TransferMode::Binary)
            .with_channel_capacity(8)
            .with_header("x-tenant", "blue");
        assert_eq!(args.options(), expected);
        Ok(())
    }
}
