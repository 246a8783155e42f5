//! Alarm clock daemon.
//!
//! Loads alarms from the data directory, keeps the next wake armed, and
//! serves the HTTP API until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use reveille_alarm::api::{self, SharedState};
use reveille_alarm::clock::{Clock, SystemClock};
use reveille_alarm::config::Config;
use reveille_alarm::manager::AlarmsManager;
use reveille_alarm::store::JsonFileStore;
use reveille_alarm::time_watch::TimeWatcher;
use reveille_alarm::tracing::{self, prelude::*};
use reveille_alarm::wake::TokioWakeTimer;

const WAKE_CHANNEL_CAPACITY: usize = 16;
const CLOCK_CHANNEL_CAPACITY: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::from_env()?;
    info!(?config, "Starting alarm daemon");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (timer, wake_rx) = TokioWakeTimer::channel(clock.clone(), WAKE_CHANNEL_CAPACITY);
    let store = JsonFileStore::open(&config.data_dir)
        .await
        .with_context(|| format!("failed to open store in {}", config.data_dir.display()))?;
    info!(path = %store.path().display(), "Using alarm store");

    let manager = AlarmsManager::new(Arc::new(store), clock.clone(), Arc::new(timer));
    manager.load().await.context("failed to load alarms")?;

    let shutdown = CancellationToken::new();
    let (clock_tx, clock_rx) = mpsc::channel(CLOCK_CHANNEL_CAPACITY);
    let watcher = TimeWatcher::new(
        clock,
        config.clock_check_interval,
        config.clock_jump_tolerance,
        clock_tx,
    );

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(watcher.run(shutdown.clone()));
    tasks.spawn(manager.clone().run(
        wake_rx,
        clock_rx,
        config.fault_retry_interval,
        shutdown.clone(),
    ));
    tasks.spawn(log_notifications(manager.clone(), shutdown.clone()));

    let api_shutdown = shutdown.clone();
    let state = SharedState::new(manager, config.defaults);
    let api_addr = config.api_addr;
    tasks.spawn(async move {
        if let Err(e) = api::serve(api_addr, state, api_shutdown.clone()).await {
            error!("API server error: {e:#}");
            api_shutdown.cancel();
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    while tasks.join_next().await.is_some() {}
    info!("Alarm daemon stopped");
    Ok(())
}

/// Log alarm effects. Sound playback and presentation hook in here.
async fn log_notifications(manager: AlarmsManager, shutdown: CancellationToken) {
    let mut notifications = BroadcastStream::new(manager.notifications());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = notifications.next() => match next {
                Some(Ok(notification)) => {
                    info!(alarm = %notification.id, effect = %notification.effect, "Alarm effect");
                }
                Some(Err(e)) => warn!(error = %e, "Missed alarm notifications"),
                None => break,
            },
        }
    }
}
