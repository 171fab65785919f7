//! Command line client for sockline connections.

mod connect;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let token = CancellationToken::new();
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let token = token.clone();
        let hits = hits.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_ok() {
                    if hits.fetch_add(1, Ordering::Relaxed) == 0 {
                        eprintln!("Ctrl+C, stopping the connection (press again to force)");
                        token.cancel();
                    } else {
                        eprintln!("Force exiting.");
                        std::process::exit(130);
                    }
                }
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let t = token.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = signal(SignalKind::terminate()) {
                term.recv().await;
                eprintln!("SIGTERM, stopping the connection");
                t.cancel();
            }
        });
    }

    let args = Arguments::parse();
    match args.command {
        Command::Connect(connect_args) => connect::run(connect_args, token).await,
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "CLI for sockline connections")]
struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to a server, send stdin lines as frames and print incoming frames
    Connect(connect::ConnectArgs),
}
