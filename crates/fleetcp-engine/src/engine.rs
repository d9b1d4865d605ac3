//! Engine facade owning the shared services
//!
//! Construction wires every shared structure exactly once: one connection
//! pool, one process registry, one progress aggregator, one listing
//! cache, one active-transfer set. Everything else borrows them through
//! `Arc` handles. The control surface holds only opaque transfer IDs.

use crate::audit::{AuditLog, AuditRecord, RememberedPaths};
use crate::hosts::HostRegistry;
use crate::listing::ListingCache;
use crate::mode::LocalAliases;
use crate::ops::HostOps;
use crate::progress::ProgressAggregator;
use crate::runner::CommandRunner;
use crate::scheduler::{ActiveTransfers, Scheduler};
use crate::transfer::{Transfer, TransferEvent, TransferRequest, TransferStatus};
use crate::watchdog::Watchdog;
use fleetcp_config::Config;
use fleetcp_remote::{ProcessRegistry, SessionPool};
use fleetcp_types::{DirEntry, Result, TransferId};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the event channel; slow observers drop old events rather
/// than stalling workers
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Builder for [`TransferEngine`]
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: Config,
    aliases: Option<LocalAliases>,
}

impl EngineBuilder {
    /// Start from defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Override control-host alias detection, mainly for tests
    pub fn with_aliases(mut self, aliases: LocalAliases) -> Self {
        self.aliases = Some(aliases);
        self
    }

    /// Wire the engine
    pub fn build(self) -> TransferEngine {
        let aliases = self
            .aliases
            .unwrap_or_else(|| LocalAliases::detect(&self.config.control.address));
        TransferEngine::with_aliases(self.config, aliases)
    }
}

/// The transfer orchestration engine
#[derive(Debug)]
pub struct TransferEngine {
    config: Config,
    hosts: Arc<HostRegistry>,
    pool: Arc<SessionPool>,
    registry: Arc<ProcessRegistry>,
    progress: Arc<ProgressAggregator>,
    cache: Arc<ListingCache>,
    active: Arc<ActiveTransfers>,
    scheduler: Scheduler,
    ops: HostOps,
    audit: Arc<AuditLog>,
    remembered: Arc<RememberedPaths>,
    events: broadcast::Sender<TransferEvent>,
    watchdog_task: StdMutex<Option<JoinHandle<()>>>,
}

impl TransferEngine {
    /// Create an engine, detecting the control host's aliases
    pub fn new(config: Config) -> Self {
        EngineBuilder::new().with_config(config).build()
    }

    fn with_aliases(config: Config, aliases: LocalAliases) -> Self {
        let command_timeout = Duration::from_secs(config.transfer.command_timeout_secs);
        let hosts = Arc::new(HostRegistry::new(config.servers.clone(), aliases));
        let pool = Arc::new(SessionPool::new(config.pool.clone()));
        let registry = Arc::new(ProcessRegistry::new());
        let progress = Arc::new(ProgressAggregator::new());
        let cache = Arc::new(ListingCache::new(&config.cache));
        let active = Arc::new(ActiveTransfers::new(config.transfer.max_active_transfers));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let runner = CommandRunner::new(
            Arc::clone(&hosts),
            Arc::clone(&pool),
            Arc::clone(&registry),
            command_timeout,
        );
        let scheduler = Scheduler::new(
            config.transfer.clone(),
            Arc::clone(&hosts),
            runner,
            Arc::clone(&registry),
            Arc::clone(&progress),
            Arc::clone(&cache),
            Arc::clone(&active),
            events.clone(),
        );
        let ops = HostOps::new(
            Arc::clone(&hosts),
            Arc::clone(&pool),
            Arc::clone(&cache),
            command_timeout,
        );
        let audit = Arc::new(AuditLog::new(&config.audit));
        let remembered = Arc::new(RememberedPaths::load(
            config.audit.remembered_paths_path.clone(),
        ));

        Self {
            config,
            hosts,
            pool,
            registry,
            progress,
            cache,
            active,
            scheduler,
            ops,
            audit,
            remembered,
            events,
            watchdog_task: StdMutex::new(None),
        }
    }

    /// Subscribe to the engine's event stream
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// The host registry
    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    /// Submit a transfer; it runs in the background and its ID is
    /// returned immediately.
    pub fn submit(&self, request: TransferRequest) -> Result<TransferId> {
        request.validate()?;
        let transfer = Arc::new(Transfer::new(request));
        let id = transfer.id;
        self.active.admit(Arc::clone(&transfer))?;
        info!(
            "Transfer {} submitted: {} -> {} ({} items)",
            id,
            transfer.request.source_host,
            transfer.request.target_host,
            transfer.request.items.len()
        );

        let scheduler = self.scheduler.clone();
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move {
            let result = scheduler.run(Arc::clone(&transfer)).await;
            let mut record = AuditRecord::new("transfer", transfer.request.client.clone())
                .with_source(
                    transfer.request.source_host.clone(),
                    transfer
                        .request
                        .items
                        .first()
                        .map(|item| item.path.clone())
                        .unwrap_or_default(),
                )
                .with_target(
                    transfer.request.target_host.clone(),
                    transfer.request.dest_path.clone(),
                )
                .with_outcome(result.status, result.elapsed.as_secs_f64());
            if let Some(first) = result.warnings.first() {
                record = record.with_error(first.clone());
            }
            if let Err(err) = audit.append(&record) {
                warn!("Audit append failed for {}: {}", id, err);
            }
        });
        Ok(id)
    }

    /// Cancel a transfer: remove it from the active set first, then
    /// terminate every registered handle. `force` skips the graceful
    /// signal and kills outright. Idempotent once the transfer is gone.
    pub async fn cancel(&self, id: TransferId, force: bool) {
        let Some(transfer) = self.active.remove(id) else {
            debug!("Cancel for unknown or finished transfer {}", id);
            return;
        };
        transfer.cancel.cancel();
        transfer.set_status(TransferStatus::Cancelled);
        let terminated = self.registry.terminate_all(id, force).await;
        info!(
            "Transfer {} cancelled, {} live handles terminated",
            id, terminated
        );
    }

    /// Lifecycle state of a live transfer, or `None` once it is gone
    pub fn status(&self, id: TransferId) -> Option<TransferStatus> {
        self.active.get(id).map(|transfer| transfer.status())
    }

    /// Monotonic byte total observed for a transfer so far
    pub fn bytes_transferred(&self, id: TransferId) -> u64 {
        self.progress.total(id)
    }

    /// Number of live transfers
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// List a directory on any registered host
    pub async fn list_directory(
        &self,
        host: &str,
        path: Option<&str>,
        show_hidden: bool,
        force_refresh: bool,
    ) -> Result<Vec<DirEntry>> {
        self.ops.list(host, path, show_hidden, force_refresh).await
    }

    /// Delete paths on a host
    pub async fn delete_paths(&self, client: &str, host: &str, paths: &[String]) -> Result<()> {
        let started = std::time::Instant::now();
        let result = self.ops.delete(host, paths).await;
        self.audit_op("delete", client, host, paths.first(), started, &result);
        result
    }

    /// Rename a path on a host
    pub async fn rename(
        &self,
        client: &str,
        host: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let started = std::time::Instant::now();
        let result = self.ops.rename(host, old_path, new_path).await;
        self.audit_op(
            "rename",
            client,
            host,
            Some(&old_path.to_string()),
            started,
            &result,
        );
        result
    }

    /// Create a directory on a host
    pub async fn create_dir(&self, client: &str, host: &str, dir_path: &str) -> Result<()> {
        let started = std::time::Instant::now();
        let result = self.ops.create_dir(host, dir_path).await;
        self.audit_op(
            "create_dir",
            client,
            host,
            Some(&dir_path.to_string()),
            started,
            &result,
        );
        result
    }

    fn audit_op(
        &self,
        action: &str,
        client: &str,
        host: &str,
        path: Option<&String>,
        started: std::time::Instant,
        result: &Result<()>,
    ) {
        let status = if result.is_ok() {
            fleetcp_types::TerminalStatus::Success
        } else {
            fleetcp_types::TerminalStatus::Error
        };
        let mut record = AuditRecord::new(action, client)
            .with_target(host, path.cloned().unwrap_or_default())
            .with_outcome(status, started.elapsed().as_secs_f64());
        if let Err(err) = result {
            record = record.with_error(err.to_string());
        }
        if let Err(err) = self.audit.append(&record) {
            warn!("Audit append failed: {}", err);
        }
    }

    /// Remember the path a client last browsed in a panel
    pub fn remember_path(&self, client: &str, panel: &str, path: &str) -> Result<()> {
        self.remembered.set(client, panel, path)
    }

    /// Last path a client browsed in a panel
    pub fn last_path(&self, client: &str, panel: &str) -> Option<String> {
        self.remembered.get(client, panel)
    }

    /// Start the background watchdog; idempotent
    pub fn start_watchdog(&self) {
        let mut slot = self.watchdog_task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let watchdog = Arc::new(Watchdog::new(
            &self.config.watchdog,
            Arc::clone(&self.active),
            Arc::clone(&self.registry),
            Arc::clone(&self.progress),
        ));
        *slot = Some(watchdog.start());
    }

    /// Stop background work and drop pooled sessions
    pub async fn shutdown(&self) {
        if let Some(task) = self
            .watchdog_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        for transfer in self.active.snapshot() {
            self.cancel(transfer.id, false).await;
        }
        self.pool.clear().await;
        self.cache.clear();
        info!("Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcp_types::FileItem;

    fn engine() -> TransferEngine {
        let mut config = Config::default();
        config.audit.enabled = false;
        EngineBuilder::new()
            .with_config(config)
            .with_aliases(LocalAliases::from_aliases(["localhost", "127.0.0.1"]))
            .build()
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_requests() {
        let engine = engine();
        let empty = TransferRequest::new("localhost", "localhost", "/tmp");
        assert!(engine.submit(empty).is_err());
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_host_transfer_resolves_to_error() {
        let engine = engine();
        let mut events = engine.subscribe();
        let request = TransferRequest::new("localhost", "10.99.0.1", "/tmp")
            .with_items(vec![FileItem::new("/tmp/missing.txt", false)]);
        let id = engine.submit(request).unwrap();

        loop {
            match events.recv().await {
                Ok(TransferEvent::Complete { id: done, status, .. }) if done == id => {
                    assert_eq!(status, fleetcp_types::TerminalStatus::Error);
                    break;
                }
                Ok(_) => {}
                Err(err) => panic!("event stream closed: {}", err),
            }
        }
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_transfer_is_idempotent() {
        let engine = engine();
        let id = TransferId::new();
        engine.cancel(id, false).await;
        engine.cancel(id, true).await;
        assert_eq!(engine.active_count(), 0);
    }
}
