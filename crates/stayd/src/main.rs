//! stayd - presence sampling daemon
//!
//! Counts people in the camera snapshot every interval, keeps the counts in a
//! local sample log, and once a day sends the estimated stay time.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use stayd::config;
use stayd::detect::{CommandDetector, SnapshotSource};
use stayd::notify::{LogNotifier, Notifier, WebhookNotifier};
use stayd::{Collaborators, DailySchedule, JsonFileStore, SampleStore, Sampler, StayError};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "stayd", version, about = "Presence sampling and daily stay-time report")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = config::CONFIG_PATH)]
    config: PathBuf,

    /// Override store.data_path
    #[arg(long)]
    data_path: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let args = Args::parse();
    let mut cfg = config::load(&args.config)?;
    if let Some(path) = args.data_path {
        cfg.store.data_path = path;
    }

    info!(target: "stayd", "starting {}", env!("CARGO_PKG_VERSION"));

    let store = match JsonFileStore::open(&cfg.store.data_path) {
        Ok(store) => store,
        Err(err @ StayError::StorageCorrupt { .. }) => {
            error!(target: "stayd", "{err}");
            bail!(
                "sample log {} is corrupt; move it aside to start a new log",
                cfg.store.data_path.display()
            );
        }
        Err(err) => return Err(err).context("open sample log"),
    };
    let existing = store.read_all().context("read sample log")?.len();
    info!(
        target: "stayd",
        "sample log {} holds {} observations",
        store.path().display(),
        existing
    );

    let schedule = DailySchedule::new(&Local::now(), cfg.schedule.daily_at);
    info!(target: "stayd", "target time: {}", schedule.next_deadline().to_rfc3339());

    let notifier: Box<dyn Notifier> = match &cfg.notify.endpoint {
        Some(endpoint) => {
            let mut webhook =
                WebhookNotifier::new(endpoint, &cfg.notify.recipient, cfg.notify.timeout())?;
            if let Some(token) = &cfg.notify.access_token {
                webhook = webhook.with_access_token(token);
            }
            info!(target: "stayd", "reports go to {}", webhook.endpoint());
            Box::new(webhook)
        }
        None => {
            warn!(target: "stayd", "notify.endpoint not set, reports are only logged");
            Box::new(LogNotifier)
        }
    };

    let detector = CommandDetector::new(
        cfg.detector.command.clone(),
        cfg.detector.args.clone(),
        Duration::from_secs(cfg.detector.timeout_secs),
    )
    .with_person_filter(cfg.detector.min_score, cfg.detector.person_class);

    let collaborators = Collaborators {
        frames: Box::new(SnapshotSource::new(
            &cfg.detector.snapshot_path,
            Duration::from_secs(cfg.detector.max_frame_age_secs),
        )),
        detector: Box::new(detector),
        notifier,
    };

    let sampler = Sampler::new(store, schedule, collaborators, cfg.sampler.interval())
        .with_notify_timeout(cfg.notify.timeout())
        .with_retention_days(cfg.store.retention_days);

    sampler
        .run(shutdown_signal())
        .await
        .context("sampling loop")?;

    info!(target: "stayd", "shutting down gracefully");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(target: "stayd", "failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "stayd", "failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
