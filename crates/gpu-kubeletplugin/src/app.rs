//! Long-running plugin loop: publish the inventory and keep it current.

use core::error::Error;
use std::sync::Arc;
use std::time::Duration;

use api_types::PreparedClaims;
use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::checkpoint::CheckpointStore;
use crate::device::CanonicalName;
use crate::device::InventoryDiff;
use crate::device::InventoryHandle;
use crate::device::ModelError;
use crate::discovery::Discovery;
use crate::platform::HardwareQuery;

pub struct PluginApp<Q> {
    discovery: Discovery<Q>,
    inventory: Arc<InventoryHandle>,
    checkpoint: CheckpointStore,
}

impl<Q: HardwareQuery> PluginApp<Q> {
    pub fn new(discovery: Discovery<Q>, checkpoint: CheckpointStore) -> Self {
        Self {
            discovery,
            inventory: Arc::new(InventoryHandle::default()),
            checkpoint,
        }
    }

    pub fn inventory(&self) -> Arc<InventoryHandle> {
        Arc::clone(&self.inventory)
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Restore prepared claims and publish the first inventory.
    ///
    /// Claims that name devices missing from the inventory are reported but
    /// kept; dropping them is up to the allocation layer.
    pub fn start(&self) -> Result<PreparedClaims, Report<StartupError>> {
        let claims = self
            .checkpoint
            .get_or_create()
            .change_context(StartupError::Checkpoint)?;
        self.rescan()
            .change_context(StartupError::Discovery)?;

        let snapshot = self.inventory.snapshot();
        for (claim, devices) in &claims {
            for device in devices {
                let known = CanonicalName::parse(device)
                    .is_ok_and(|name| snapshot.get(&name).is_some());
                if !known {
                    warn!(
                        "Prepared claim {} references unknown device {}",
                        claim, device
                    );
                }
            }
        }
        Ok(claims)
    }

    /// Scan once and publish the result
    pub fn rescan(&self) -> Result<InventoryDiff, Report<ModelError>> {
        let next = self.discovery.scan()?;
        let previous = self.inventory.snapshot();
        let diff = previous.diff(&next);
        self.inventory.replace(next);
        Ok(diff)
    }

    /// Rescan every `interval` until `token` is cancelled
    pub async fn run(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately and start() has just scanned
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Rescan loop shutdown requested");
                    break;
                }
                _ = ticker.tick() => match self.rescan() {
                    Ok(diff) if diff.is_empty() => {}
                    Ok(diff) => info!(
                        added = ?diff.added.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        removed = ?diff.removed.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        changed = ?diff.changed.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "Device inventory changed"
                    ),
                    Err(e) => error!("Rescan failed, keeping previous inventory: {e:?}"),
                },
            }
        }
    }
}

#[derive(Debug, Display)]
pub enum StartupError {
    #[display("Failed to restore prepared claims")]
    Checkpoint,
    #[display("Failed to build the device inventory")]
    Discovery,
}

impl Error for StartupError {}
