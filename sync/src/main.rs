//! Shelf Sync - synchronizes a local library directory with the canonical
//! service.
//!
//! Runs one sync cycle and exits, or keeps syncing on
//! `SHELF_SYNC_INTERVAL_SECS` until interrupted.

use shelf_sync::{
    Config, FileLocalStore, FileStateStore, HttpRemoteStore, Orchestrator, SyncError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelf_sync=info,shelf_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        owner_id = %config.owner_id,
        data_dir = %config.data_dir.display(),
        remote = %config.remote_url,
        "Starting Shelf Sync"
    );

    let orchestrator = Orchestrator::new_shared(
        config.sync_config(),
        Arc::new(FileLocalStore::new(config.entities_dir())),
        Arc::new(HttpRemoteStore::from_config(&config)?),
        Arc::new(FileStateStore::new(config.snapshot_path())),
    )?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
        }
    });

    match config.sync_interval {
        None => run_once(&orchestrator, &cancel).await,
        Some(interval) => {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => run_once(&orchestrator, &cancel).await,
                }
            }
        }
    }

    let state = orchestrator.state().await;
    let pending = orchestrator.pending_count().await;
    tracing::info!(
        last_sync_at = ?state.last_sync_at,
        pending,
        "Shelf Sync stopped"
    );

    Ok(())
}

async fn run_once(orchestrator: &Orchestrator, cancel: &CancellationToken) {
    match orchestrator.sync_all_with_cancel(cancel.child_token()).await {
        Ok(result) if result.success => {
            tracing::info!(
                synced = result.synced_count,
                pending = result.pending_count,
                last_sync_at = ?result.last_sync_at,
                "Sync finished"
            );
        }
        Ok(result) => {
            for error in &result.errors {
                tracing::warn!(
                    kind = %error.kind,
                    mutation_id = ?error.mutation_id,
                    message = %error.message,
                    "Sync failed"
                );
            }
            tracing::info!(
                synced = result.synced_count,
                pending = result.pending_count,
                last_sync_at = ?result.last_sync_at,
                "Retry available on the next run"
            );
        }
        Err(SyncError::AlreadySyncing) => {
            tracing::debug!("Previous cycle still running, skipping tick");
        }
        Err(e) => tracing::warn!(error = %e, "Sync could not start"),
    }
}
