//! porttray - a live menu of the HTTP servers listening on this machine
//!
//! Every few seconds it:
//! - Enumerates listening TCP sockets with lsof
//! - Probes each one once with a HEAD request to find the HTTP servers
//! - Updates a menu from which each server can be opened, copied or stopped

mod config;
mod discovery;
mod error;
mod listener;
mod menu;
mod poll;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use discovery::lsof::{LsofCwdResolver, LsofSource};
use discovery::probe::{HttpClassifier, HttpProber};
use discovery::PortScanner;
use menu::actions::OsActions;
use menu::console::{self, ConsoleMenu};
use menu::{Clicks, MenuReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = config::Config::load()?;

    // Use LOG_FORMAT=gcp for structured JSON logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Starting porttray...");

    let prober = Arc::new(HttpProber::new(&config.probe.host)?);
    let classifier = Arc::new(HttpClassifier::new(prober));
    let scanner = PortScanner::new(
        Arc::new(LsofSource::new(&config.scan.lsof)),
        Arc::new(LsofCwdResolver::new(&config.scan.lsof)),
        classifier,
    );

    let surface = ConsoleMenu::new();
    let quit = menu::install_header(&surface);
    let reconciler = MenuReconciler::new(surface.clone(), Arc::new(OsActions));

    console::spawn_command_reader(surface)?;
    tokio::spawn(poll::run(scanner, reconciler));
    info!("Polling every {}s", poll::POLL_INTERVAL.as_secs());

    wait_for_quit(quit).await;
    info!("Shutting down");

    Ok(())
}

/// The menu's Quit item or Ctrl-C, whichever comes first
async fn wait_for_quit(mut quit: Clicks) {
    tokio::select! {
        _ = quit.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
