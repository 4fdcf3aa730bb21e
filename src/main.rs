//! matchday-sync binary entrypoint wiring the store client, chat platform, and sync drivers.

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matchday_sync::{
    config::SyncConfig,
    platform::{
        ChatPlatform,
        discord::{DiscordConfig, DiscordRestClient},
    },
    store::{HttpRsvpStore, RsvpStore, StoreConfig},
    sync::{governor::ConcurrencyGovernor, manager::SyncManager, scheduler::ScheduledSyncDriver},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let sync_config = SyncConfig::from_env();
    let discord_config =
        DiscordConfig::from_env().context("loading chat platform configuration")?;
    let store_config = StoreConfig::from_env();

    let self_user_id: u64 = env::var("DISCORD_BOT_USER_ID")
        .context("DISCORD_BOT_USER_ID must be set")?
        .parse()
        .context("DISCORD_BOT_USER_ID must be a numeric user id")?;

    let platform: Arc<dyn ChatPlatform> = Arc::new(
        DiscordRestClient::new(discord_config).context("building chat platform client")?,
    );
    let store: Arc<dyn RsvpStore> =
        Arc::new(HttpRsvpStore::new(store_config).context("building store client")?);
    let governor = Arc::new(ConcurrencyGovernor::new(
        sync_config.per_match_limit,
        sync_config.global_limit,
    ));

    let manager = Arc::new(SyncManager::new(
        platform.clone(),
        store.clone(),
        governor.clone(),
        sync_config.clone(),
        self_user_id,
    ));
    let driver = ScheduledSyncDriver::new(
        platform,
        store,
        governor,
        sync_config.clone(),
        self_user_id,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut startup = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run_startup_check().await })
    };
    let heartbeat = {
        let manager = manager.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { manager.run_heartbeat_loop(shutdown).await })
    };
    let periodic = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { driver.run(shutdown).await })
    };

    tokio::select! {
        outcome = &mut startup => {
            let outcome = outcome.context("startup check task panicked")?;
            info!(
                outcome = ?outcome,
                instance_id = manager.instance_id(),
                "worker ready"
            );
            shutdown_signal().await;
            info!("shutdown signal received");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received during startup");
            startup.abort();
        }
    }

    let _ = shutdown_tx.send(true);

    // Give the loops one poll interval plus slack to observe the signal.
    let grace = sync_config.shutdown_poll_interval + Duration::from_secs(5);
    let drained = tokio::time::timeout(grace, async {
        let _ = heartbeat.await;
        let _ = periodic.await;
    })
    .await;
    if drained.is_err() {
        warn!("background tasks did not stop within the grace period");
    }

    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the worker down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
