//! Bridge Relayer
//!
//! Relays EVM burns to L1 unlocks and L1 locks to EVM mints.

use std::sync::Arc;
use std::time::Instant;

use eyre::WrapErr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bridge_relayer::api::{self, AppState};
use bridge_relayer::config::Config;
use bridge_relayer::coordinator::{Coordinator, CoordinatorConfig};
use bridge_relayer::db::{self, PgStore, RelayStore};
use bridge_relayer::l1_client::L1Client;
use bridge_relayer::watchers::WatcherManager;
use bridge_relayer::writers::{Destination, EvmWriter, L1Writer};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();
    let started_at = Instant::now();

    info!("Starting bridge relayer");

    let config = Config::load()?;
    info!(
        evm_chain_id = config.evm.chain_id,
        l1_rpc = %config.l1.rpc_url,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    info!("Database connected");
    db::run_migrations(&pool).await?;
    info!("Database migrations complete");
    let store: Arc<dyn RelayStore> = Arc::new(PgStore::new(pool));

    let l1_client = Arc::new(L1Client::new(&config.l1.rpc_url)?);
    let to_l1: Arc<dyn Destination> =
        Arc::new(L1Writer::new(l1_client.clone(), &config.l1).wrap_err("Failed to create L1 writer")?);
    let to_evm: Arc<dyn Destination> =
        Arc::new(EvmWriter::new(&config.evm).wrap_err("Failed to create EVM writer")?);

    let (coordinator, mut alerts) = Coordinator::new(
        store.clone(),
        to_l1,
        to_evm,
        CoordinatorConfig::from(&config.relayer),
    );

    tokio::spawn(async move {
        while let Some(alert) = alerts.recv().await {
            error!(
                direction = %alert.key.direction,
                nonce = alert.key.nonce,
                source_tx = %alert.source_tx_ref,
                dest_tx = ?alert.dest_tx_ref,
                reason = %alert.reason,
                "ALERT: relay failed, manual reconciliation required"
            );
        }
    });

    let resumed = coordinator.recover().await?;
    info!(resumed, "Recovered unfinished relays");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_cancel.cancel();
    });

    let api_state = AppState {
        store,
        coordinator: coordinator.clone(),
        started_at,
    };
    let api_bind = config.api.bind_address.clone();
    let api_cancel = cancel.clone();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api::start_api_server(&api_bind, api_state, api_cancel).await {
            error!(error = %e, "API server error");
        }
    });

    let watchers = WatcherManager::new(&config, l1_client, coordinator.clone())?;
    info!("Watchers initialized, starting processing");
    let result = watchers.run(cancel.clone()).await;

    cancel.cancel();
    if !coordinator.shutdown(config.relayer.shutdown_timeout()).await {
        warn!("Some relays were still running at shutdown");
    }
    let _ = api_task.await;

    match result {
        Ok(()) => {
            info!("Bridge relayer stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Bridge relayer stopped on a fatal error");
            Err(e)
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relayer=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
