//! # Navigation Relay Entry Point
//!
//! This binary wires the notification listener to the serial transport and
//! replays a captured package dump through them. It supports both relay mode
//! (writes to the configured peripheral) and development mode (ASCII preview).

use anyhow::Context;
use clap::Parser;
use nav_relay_lib::backend::{AlwaysReady, SerialBackend};
use nav_relay_lib::config::Config;
use nav_relay_lib::link::BackendKind;
use nav_relay_lib::listener::{relay_to_transport, ListenerInput, NotificationFilter, NotificationListener};
use nav_relay_lib::preview::draw_ascii;
use nav_relay_lib::scraper::NotificationScraper;
use nav_relay_lib::service::TransportService;
use nav_relay_lib::view_tree::PackageDump;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "nav-relay", version, about)]
struct Args {
    /// Configuration file (defaults to ./nav-relay.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Captured package dump (JSON) to replay
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Print an ASCII preview of each scraped notification and exit
    #[arg(long)]
    stdout: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_dump(path: &Path) -> anyhow::Result<PackageDump> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    PackageDump::from_json(&text).with_context(|| format!("parse {}", path.display()))
}

/// Development mode: scrape every accepted notification and print it.
fn preview_dump(config: &Config, dump: &PackageDump) {
    let filter = NotificationFilter::from_config(&config.scraper);
    let scraper = NotificationScraper::from_config(&config.scraper);

    let mut shown = 0;
    for notification in dump.notifications.iter().filter(|n| filter.accepts(n)) {
        match scraper.scrape(dump, notification) {
            Ok(snapshot) => draw_ascii(Some(&snapshot)),
            Err(error) => log::error!("notification {} skipped: {error}", notification.id),
        }
        shown += 1;
    }
    if shown == 0 {
        log::warn!("no notification from {} in the dump", config.scraper.source_package);
        draw_ascii(None);
    }
}

/// Relay mode: listener + serial transport until Ctrl-C.
async fn relay(config: Config, dump: PackageDump) -> anyhow::Result<()> {
    if config.transport.backend != BackendKind::Serial {
        log::warn!("only the serial backend is available here, ignoring {:?}", config.transport.backend);
    }

    let backend = SerialBackend::new(config.transport.connect_timeout());
    let (transport, mut status, service_task) = TransportService::spawn_from_config(&config, backend, AlwaysReady);

    let notifications = dump.notifications.clone();
    let (events_tx, events_rx) = mpsc::channel(16);
    let listener = NotificationListener::new(&config.scraper, Arc::new(dump), events_tx);
    let (inputs, _listener_task) = listener.spawn();
    tokio::spawn(relay_to_transport(events_rx, transport.clone()));

    tokio::spawn(async move {
        while let Some(event) = status.recv().await {
            log::info!("{event:?}");
        }
    });

    match config.transport.device_id() {
        Some(device) => transport.connect(device)?,
        None => log::warn!("no [transport] device configured, waiting for navigation only"),
    }

    for notification in notifications {
        inputs
            .send(ListenerInput::Posted(notification))
            .await
            .map_err(|_| anyhow::anyhow!("notification listener stopped"))?;
    }

    tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
    log::info!("shutting down");

    inputs.send(ListenerInput::Disabled).await.ok();
    transport.shutdown()?;
    service_task.await.context("transport task")?;
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let dump = match &args.dump {
        Some(path) => load_dump(path)?,
        None => PackageDump {
            package: config.scraper.source_package.clone(),
            ..PackageDump::default()
        },
    };

    // Development mode: ASCII output for testing
    if args.stdout {
        preview_dump(&config, &dump);
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(relay(config, dump))
}
