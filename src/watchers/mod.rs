use std::sync::Arc;

use eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::l1_client::L1Client;

pub mod evm;
pub mod l1;

pub use evm::{AlloyLogFeed, EvmLogFeed, EvmWatcher, EvmWatcherConfig};
pub use l1::{BridgeTransactions, L1EventSource, L1Watcher, L1WatcherConfig};

/// Runs the EVM and L1 watchers side by side
pub struct WatcherManager {
    evm_watcher: EvmWatcher,
    l1_watcher: L1Watcher,
}

impl WatcherManager {
    /// Build both watchers against the live chains
    pub fn new(config: &Config, l1_client: Arc<L1Client>, coordinator: Coordinator) -> Result<Self> {
        let evm_feed = AlloyLogFeed::new(&config.evm)?;
        let evm_watcher = EvmWatcher::new(
            Box::new(evm_feed),
            coordinator.clone(),
            EvmWatcherConfig::from(&config.evm),
        );

        let l1_source = BridgeTransactions::new(l1_client, config.l1.bridge_object_id.clone());
        let l1_watcher = L1Watcher::new(
            Box::new(l1_source),
            coordinator,
            L1WatcherConfig::from(&config.l1),
        );

        info!("Watcher manager created");
        Ok(Self::from_parts(evm_watcher, l1_watcher))
    }

    pub fn from_parts(evm_watcher: EvmWatcher, l1_watcher: L1Watcher) -> Self {
        Self {
            evm_watcher,
            l1_watcher,
        }
    }

    /// Run both watchers concurrently.
    /// Returns Ok on cancellation, Err when either watcher stops by itself.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        let evm_watcher = self.evm_watcher;
        let evm_cancel = cancel.clone();
        join_set.spawn(async move { evm_watcher.run(evm_cancel).await });

        let l1_watcher = self.l1_watcher;
        let l1_cancel = cancel.clone();
        join_set.spawn(async move { l1_watcher.run(l1_cancel).await });

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutdown signal received, stopping watchers");
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) if cancel.is_cancelled() => Ok(()),
                    Some(Ok(Ok(()))) => {
                        error!("A watcher exited unexpectedly without error");
                        Err(eyre::eyre!("watcher exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "A watcher stopped with error");
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A watcher task panicked: {:?}", e);
                        Err(eyre::eyre!("watcher task panicked: {}", e))
                    }
                    None => {
                        error!("All watcher tasks exited unexpectedly");
                        Err(eyre::eyre!("all watcher tasks exited unexpectedly"))
                    }
                }
            }
        };

        // Let the other watcher observe cancellation and finish its step
        cancel.cancel();
        while join_set.join_next().await.is_some() {}
        info!("Watchers stopped");
        result
    }
}
