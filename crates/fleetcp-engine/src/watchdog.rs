//! Background reaper for orphaned transfer state
//!
//! A transfer that crashed mid-flight leaves bookkeeping in the active
//! set, the progress aggregator, and the process registry. The watchdog
//! sweeps on a fixed interval and tears down transfers past the stale
//! threshold, but only when the registry reports no live handle: stale
//! age alone never kills running work.

use crate::progress::ProgressAggregator;
use crate::scheduler::ActiveTransfers;
use crate::transfer::TransferStatus;
use fleetcp_config::WatchdogConfig;
use fleetcp_remote::ProcessRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Sweeps the active set for abandoned transfers
#[derive(Debug)]
pub struct Watchdog {
    interval: Duration,
    stale_after: Duration,
    active: Arc<ActiveTransfers>,
    registry: Arc<ProcessRegistry>,
    progress: Arc<ProgressAggregator>,
}

impl Watchdog {
    /// Create a watchdog over the shared services
    pub fn new(
        config: &WatchdogConfig,
        active: Arc<ActiveTransfers>,
        registry: Arc<ProcessRegistry>,
        progress: Arc<ProgressAggregator>,
    ) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            active,
            registry,
            progress,
        }
    }

    /// One sweep over the active set; returns how many transfers were
    /// torn down.
    pub fn sweep(&self) -> usize {
        let mut reaped = 0;
        for transfer in self.active.snapshot() {
            if transfer.age() < self.stale_after {
                continue;
            }
            if self.registry.has_live(transfer.id) {
                debug!(
                    "Transfer {} is stale ({}s) but still has live work",
                    transfer.id,
                    transfer.age().as_secs()
                );
                continue;
            }
            info!(
                "Reaping stale transfer {} ({}s old, no live handles)",
                transfer.id,
                transfer.age().as_secs()
            );
            self.active.remove(transfer.id);
            self.registry.remove_transfer(transfer.id);
            self.progress.clear(transfer.id);
            transfer.set_status(TransferStatus::Failed);
            reaped += 1;
        }
        reaped
    }

    /// Run sweeps forever on the configured interval
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let reaped = self.sweep();
                if reaped > 0 {
                    debug!("Watchdog reaped {} transfers", reaped);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Transfer, TransferRequest};
    use fleetcp_remote::{ChannelHandle, ProcessHandle};
    use fleetcp_types::FileItem;

    fn services() -> (Arc<ActiveTransfers>, Arc<ProcessRegistry>, Arc<ProgressAggregator>) {
        (
            Arc::new(ActiveTransfers::new(8)),
            Arc::new(ProcessRegistry::new()),
            Arc::new(ProgressAggregator::new()),
        )
    }

    fn watchdog(
        stale_after_secs: u64,
        active: &Arc<ActiveTransfers>,
        registry: &Arc<ProcessRegistry>,
        progress: &Arc<ProgressAggregator>,
    ) -> Watchdog {
        Watchdog::new(
            &WatchdogConfig {
                interval_secs: 60,
                stale_after_secs,
            },
            Arc::clone(active),
            Arc::clone(registry),
            Arc::clone(progress),
        )
    }

    fn transfer() -> Arc<Transfer> {
        Arc::new(Transfer::new(
            TransferRequest::new("10.20.0.5", "localhost", "/backup")
                .with_items(vec![FileItem::new("/srv/a.bin", false)]),
        ))
    }

    #[test]
    fn test_reaps_stale_transfer_without_live_work() {
        let (active, registry, progress) = services();
        let t = transfer();
        let id = t.id;
        active.admit(t).unwrap();
        progress.register(id, (50.0, 55.0));

        // Stale threshold of zero makes every transfer eligible
        let dog = watchdog(0, &active, &registry, &progress);
        assert_eq!(dog.sweep(), 1);
        assert!(!active.contains(id));
        assert_eq!(progress.tracked(), 0);
    }

    #[test]
    fn test_never_reaps_live_work() {
        let (active, registry, progress) = services();
        let t = transfer();
        let id = t.id;
        active.admit(t).unwrap();
        registry.register(
            id,
            "item-0".to_string(),
            ProcessHandle::RemoteChannel(ChannelHandle::new()),
        );

        let dog = watchdog(0, &active, &registry, &progress);
        assert_eq!(dog.sweep(), 0);
        assert!(active.contains(id));
    }

    #[test]
    fn test_fresh_transfers_left_alone() {
        let (active, registry, progress) = services();
        let t = transfer();
        let id = t.id;
        active.admit(t).unwrap();

        let dog = watchdog(43_200, &active, &registry, &progress);
        assert_eq!(dog.sweep(), 0);
        assert!(active.contains(id));
    }
}
