//! Pipewatch CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load the monitor config (JSON) and validate it.
//! 2. **Wire observability**: install a `tracing-subscriber` with the chosen
//!    output format and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OTLP
//!    exporter. All `tracing` events from every crate flow through it.
//! 3. **Construct infrastructure**: an in-process loopback transport,
//!    authorisation provider and, optionally, a seeded system of record.
//! 4. **Drive the monitor**: watch the session, replay recorded broadcasts,
//!    poll the system of record once, and print the final snapshot as
//!    JSON on stdout. With `--follow` the monitor keeps running until Ctrl-C.

mod observability;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use listener::{
    InMemorySystemOfRecord, LoopbackAuthorization, LoopbackTransport, MonitorConfig,
    PipelineMonitor,
};
use pipeline::{PipelineNotification, SessionId, SystemOfRecord, Topic};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::observability::LogFormat;

/// Follow a multi-worker pipeline session over a realtime channel.
#[derive(Debug, Parser)]
#[command(name = "pipewatch", version, about)]
struct Args {
    /// Session to watch.
    #[arg(long)]
    session: String,

    /// Monitor configuration file (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded broadcasts to replay, one JSON object per line.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Persisted session state for the polling fallback (JSON).
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep monitoring after the replay until interrupted.
    #[arg(long)]
    follow: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _telemetry = observability::init(args.log_format)?;

    let config = match &args.config {
        Some(path) => MonitorConfig::from_json_file(path)?,
        None => MonitorConfig::default(),
    };
    let session =
        SessionId::new(args.session.as_str()).context("--session must not be empty")?;
    let topic = Topic::for_session(&config.scope, &session)
        .context("Session id cannot form a topic name")?;

    let events = match &args.replay {
        Some(path) => replay::load_events(path)?,
        None => Vec::new(),
    };
    let store = match &args.store {
        Some(path) => {
            let seed = replay::load_seed(path)?;
            let store = Arc::new(InMemorySystemOfRecord::default());
            store.set_session_status(session.clone(), seed.status);
            if let Some(artifact) = seed.artifact {
                store.insert_artifact(session.clone(), artifact);
            }
            Some(store as Arc<dyn SystemOfRecord>)
        }
        None => None,
    };

    let (transport, mut inbound) = LoopbackTransport::new();
    let (mut monitor, mut channels) = PipelineMonitor::new(
        config,
        transport.clone(),
        Arc::new(LoopbackAuthorization::default()),
        store,
    );
    let cancel = CancellationToken::new();

    let state = monitor.watch_session(Some(session.clone()), &cancel).await;
    info!(session = %session, topic = %topic, state = %state, "Watching session");

    for recorded in events {
        if !transport.broadcast(&topic, &recorded.event, recorded.payload) {
            warn!(event = %recorded.event, "Channel not joined; broadcast dropped");
        }
        while let Ok(message) = inbound.try_recv() {
            monitor.handle_message(&message);
        }
    }
    if monitor.poll_now().await {
        info!("Applied persisted session status");
    }
    while let Ok(notification) = channels.notifications.try_recv() {
        report(&notification);
    }

    let snapshot = if args.follow {
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
        let mut notifications = channels.notifications;
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                report(&notification);
            }
        });
        let (_commands, command_rx) = mpsc::unbounded_channel();
        monitor.run(inbound, command_rx, cancel).await
    } else {
        monitor.unsubscribe().await;
        monitor.snapshot()
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialise snapshot")?
    );
    Ok(())
}

fn report(notification: &PipelineNotification) {
    match notification {
        PipelineNotification::Completed(outcome) => info!(
            status = outcome.status.as_deref().unwrap_or("complete"),
            correlation_id = ?outcome.correlation_id.as_ref().map(|c| c.as_str()),
            score = ?outcome.score.map(|s| s.as_f64()),
            "Pipeline completed"
        ),
        PipelineNotification::Failed(outcome) => warn!(
            error = outcome.error.as_deref().unwrap_or("unspecified"),
            "Pipeline failed"
        ),
        PipelineNotification::FollowupReady(prompt) => info!(
            action = ?prompt.action,
            "Follow-up ready"
        ),
    }
}
