//! Main entry point for the styxy daemon.
//!
//! Boot order: parse flags, initialize tracing, bootstrap the daemon
//! (which runs startup recovery), start the snapshot writer and the
//! reaper, then serve HTTP on loopback until interrupted. Shutdown
//! cancels the reaper, flushes the save queue, and writes a final
//! snapshot.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use styxy::{Daemon, DaemonOptions};
use styxy_daemon::{build_router, AppState, Cli};

fn main() {
    let cli = Cli::parse();

    let filter = cli
        .log
        .clone()
        .map_or_else(
            || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            EnvFilter::new,
        );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "daemon failed");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let daemon = Arc::new(
        Daemon::bootstrap(DaemonOptions {
            config_dir: cli.config_dir.clone(),
            ..DaemonOptions::default()
        })
        .context("daemon bootstrap failed")?,
    );

    let token = styxy_daemon::auth::load_token(daemon.paths());
    if token.is_some() {
        tracing::info!("bearer auth enabled");
    }

    let writer_handle = {
        let source = Arc::clone(&daemon);
        styxy::spawn_writer(
            daemon.snapshot_store(),
            daemon.save_signal(),
            Duration::from_millis(cli.save_debounce_ms),
            move || source.snapshot(),
        )
    };
    let reaper_handle = if cli.no_reaper {
        None
    } else {
        Some(styxy::spawn_reaper(Arc::clone(&daemon)))
    };

    let router = build_router(AppState {
        daemon: Arc::clone(&daemon),
        token,
    });
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, cli.port))
        .await
        .with_context(|| format!("cannot bind 127.0.0.1:{}", cli.port))?;
    tracing::info!(port = cli.port, config_dir = %daemon.paths().root().display(), "styxy daemon listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    if let Some(handle) = reaper_handle {
        handle.stop();
    }
    writer_handle.finish();
    daemon
        .save_snapshot_now()
        .context("final snapshot save failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
