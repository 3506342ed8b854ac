use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use treewatch::WatchConfig;

mod cli;
use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the change feed; logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())))
        .init();

    let config = cli
        .into_config()
        .validate()
        .context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(watch(config));
    // A blocking stdin read may still be parked on the runtime.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

#[cfg(target_os = "linux")]
async fn watch(config: WatchConfig) -> Result<()> {
    use treewatch::{InotifyBackend, OutputWriter, WatchSession};

    let backend = InotifyBackend::open().context("cannot start inotify")?;
    let mut session = WatchSession::new(backend, &config);
    session
        .start()
        .with_context(|| format!("cannot watch {}", config.root.display()))?;

    let mut sink = OutputWriter::new(std::io::stdout().lock(), config.format);
    session
        .run(&mut sink, shutdown_signal(config.stdin_control))
        .await?;

    session.close()?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn watch(_config: WatchConfig) -> Result<()> {
    anyhow::bail!("no notification backend is available on this platform")
}

/// Completes on end of stdin, a line on stdin, Ctrl-C or SIGTERM.
async fn shutdown_signal(stdin_control: bool) {
    let stdin = async {
        if !stdin_control {
            return std::future::pending::<()>().await;
        }
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(_)) => info!("Shutdown line received"),
            Ok(None) => info!("End of input"),
            Err(e) => warn!("stdin failed: {e}"),
        }
    };

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = stdin => {}
        () = ctrl_c => {}
        () = terminate => {}
    }
}
