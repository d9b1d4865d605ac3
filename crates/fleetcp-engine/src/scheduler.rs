//! Transfer scheduling and execution
//!
//! Each transfer runs as an independent unit of work. The scheduler
//! resolves its topology, walks the strategy chain, fans items across a
//! bounded worker pool when allowed, and reconciles accounting at
//! finalizing time: completed plus failed must equal submitted, with any
//! unreported item conservatively counted as failed.
//!
//! Workers never report an outcome for a transfer that has left the active
//! set; cancellation removes the transfer first and terminates registered
//! handles second, so late results are discarded rather than resurrected.

use crate::command::{self, CommandRun, Endpoint, ItemPlan};
use crate::hosts::HostRegistry;
use crate::listing::ListingCache;
use crate::progress::ProgressAggregator;
use crate::runner::CommandRunner;
use crate::strategy::{self, StrategyKind};
use crate::transfer::{CancelToken, Transfer, TransferEvent, TransferResult, TransferStatus};
use fleetcp_config::TransferConfig;
use futures::future::join_all;
use fleetcp_remote::{CommandOutput, ProcessRegistry};
use fleetcp_types::{
    path, Error, FileItem, OsKind, TerminalStatus, Topology, TransferId, TransferIntent,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

/// Outcome of one item, recorded by whichever worker ran it
#[derive(Debug, Clone)]
enum ItemOutcome {
    /// The item copied (or moved) successfully
    Completed {
        /// The command itself moved the source; finalizing must not
        /// delete it again
        moved_inline: bool,
    },
    /// The item failed with the given message; `aborts` marks connection
    /// failures that poison the rest of a sequential queue
    Failed {
        message: String,
        aborts: bool,
    },
}

type Outcomes = Arc<StdMutex<HashMap<usize, ItemOutcome>>>;

/// The set of transfers the engine currently owns, with an admission
/// bound.
#[derive(Debug)]
pub struct ActiveTransfers {
    inner: StdMutex<HashMap<TransferId, Arc<Transfer>>>,
    bound: usize,
}

impl ActiveTransfers {
    /// Create an empty set admitting at most `bound` transfers
    pub fn new(bound: usize) -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
            bound,
        }
    }

    /// Admit a transfer, rejecting when the set is full
    pub fn admit(&self, transfer: Arc<Transfer>) -> fleetcp_types::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.len() >= self.bound {
            return Err(Error::validation(format!(
                "active transfer limit reached ({})",
                self.bound
            )));
        }
        inner.insert(transfer.id, transfer);
        Ok(())
    }

    /// Look up a live transfer
    pub fn get(&self, id: TransferId) -> Option<Arc<Transfer>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(&id).cloned()
    }

    /// Whether the transfer is still active
    pub fn contains(&self, id: TransferId) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.contains_key(&id)
    }

    /// Remove a transfer, returning it if it was present
    pub fn remove(&self, id: TransferId) -> Option<Arc<Transfer>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&id)
    }

    /// Owned snapshot of all live transfers
    pub fn snapshot(&self) -> Vec<Arc<Transfer>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.values().cloned().collect()
    }

    /// Number of live transfers
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.len()
    }

    /// Whether no transfer is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives transfers from submission to their terminal state
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: TransferConfig,
    hosts: Arc<HostRegistry>,
    runner: CommandRunner,
    registry: Arc<ProcessRegistry>,
    progress: Arc<ProgressAggregator>,
    cache: Arc<ListingCache>,
    active: Arc<ActiveTransfers>,
    events: broadcast::Sender<TransferEvent>,
}

impl Scheduler {
    /// Wire a scheduler over the shared services
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TransferConfig,
        hosts: Arc<HostRegistry>,
        runner: CommandRunner,
        registry: Arc<ProcessRegistry>,
        progress: Arc<ProgressAggregator>,
        cache: Arc<ListingCache>,
        active: Arc<ActiveTransfers>,
        events: broadcast::Sender<TransferEvent>,
    ) -> Self {
        Self {
            config,
            hosts,
            runner,
            registry,
            progress,
            cache,
            active,
            events,
        }
    }

    /// Run one transfer to a terminal state and tear down its shared
    /// bookkeeping.
    pub async fn run(&self, transfer: Arc<Transfer>) -> TransferResult {
        let id = transfer.id;
        transfer.set_status(TransferStatus::Resolving);

        let resolved = self
            .hosts
            .resolve_pair(&transfer.request.source_host, &transfer.request.target_host);
        let (source, target, topology) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => return self.finish_resolve_failure(&transfer, err),
        };
        info!(
            "Transfer {} resolved as {} ({} items, {})",
            id,
            topology,
            transfer.request.items.len(),
            transfer.request.intent,
        );

        let band = if source.os().is_windows() || target.os().is_windows() {
            self.config.windows_speed_band_mbps
        } else {
            self.config.speed_band_mbps
        };
        self.progress.register(id, band);
        let ticker = self.spawn_progress_ticker(id, known_total(&transfer.request.items));

        let outcomes: Outcomes = Arc::new(StdMutex::new(HashMap::new()));
        for kind in
            strategy::strategy_chain(transfer.request.parallel, transfer.request.items.len())
        {
            if transfer.cancel.is_cancelled() {
                break;
            }
            match kind {
                StrategyKind::Batch => {
                    if !strategy::batch_applicable(
                        topology,
                        &source,
                        &target,
                        &transfer.request.items,
                        self.config.batch_max_files,
                    ) {
                        continue;
                    }
                    transfer.set_status(TransferStatus::Batching);
                    if self
                        .run_batch(&transfer, topology, &source, &target, &outcomes)
                        .await
                    {
                        break;
                    }
                    // Silent fallback: the whole set is re-run per item
                    debug!("Transfer {} batch attempt failed, going parallel", id);
                }
                StrategyKind::Parallel => {
                    transfer.set_status(TransferStatus::Parallel);
                    self.run_parallel(&transfer, topology, &source, &target, &outcomes)
                        .await;
                    break;
                }
                StrategyKind::Sequential => {
                    transfer.set_status(TransferStatus::Sequential);
                    self.run_sequential(&transfer, topology, &source, &target, &outcomes)
                        .await;
                    break;
                }
            }
        }

        let result = self
            .finalize(&transfer, &source, &target, topology, &outcomes)
            .await;
        ticker.abort();
        result
    }

    fn spawn_progress_ticker(
        &self,
        id: TransferId,
        total_hint: Option<u64>,
    ) -> tokio::task::JoinHandle<()> {
        let progress = Arc::clone(&self.progress);
        let active = Arc::clone(&self.active);
        let events = self.events.clone();
        let interval_ms = self.config.progress_interval_ms.max(50);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !active.contains(id) {
                    break;
                }
                let bytes = progress.total(id);
                let percent = total_hint
                    .filter(|total| *total > 0)
                    .map(|total| (bytes as f64 / total as f64 * 100.0).min(100.0));
                let _ = events.send(TransferEvent::Progress {
                    id,
                    bytes,
                    percent,
                    speed_mbps: progress.tick_speed(id),
                });
            }
        })
    }

    async fn run_batch(
        &self,
        transfer: &Arc<Transfer>,
        topology: Topology,
        source: &Endpoint,
        target: &Endpoint,
        outcomes: &Outcomes,
    ) -> bool {
        let id = transfer.id;
        let item_paths: Vec<String> = transfer
            .request
            .items
            .iter()
            .map(|item| item.path.clone())
            .collect();
        let Some(built) = command::build_batch_command(
            topology,
            source,
            target,
            &item_paths,
            &transfer.request.dest_path,
            true,
        ) else {
            return false;
        };

        let part = "batch".to_string();
        let sink = chunk_sink(
            Arc::clone(&self.progress),
            self.events.clone(),
            id,
            part.clone(),
        );
        let result = self
            .runner
            .run(id, part.clone(), built.run, &transfer.cancel, sink)
            .await
            .and_then(CommandOutput::into_result);
        self.progress
            .finalize(id, &part, known_total(&transfer.request.items));

        match result {
            Ok(_) => {
                let mut map = outcomes.lock().unwrap_or_else(|e| e.into_inner());
                for index in 0..transfer.request.items.len() {
                    map.insert(index, ItemOutcome::Completed { moved_inline: false });
                }
                true
            }
            Err(err) => {
                debug!("Transfer {} batch command failed: {}", id, err);
                false
            }
        }
    }

    async fn run_parallel(
        &self,
        transfer: &Arc<Transfer>,
        topology: Topology,
        source: &Endpoint,
        target: &Endpoint,
        outcomes: &Outcomes,
    ) {
        let workers = transfer
            .request
            .max_workers
            .unwrap_or(self.config.max_workers)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = Vec::with_capacity(transfer.request.items.len());

        for (index, item) in transfer.request.items.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let scheduler = self.clone();
            let transfer = Arc::clone(transfer);
            let source = source.clone();
            let target = target.clone();
            let outcomes = Arc::clone(outcomes);
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if transfer.cancel.is_cancelled() {
                    return;
                }
                let outcome = scheduler
                    .run_item(&transfer, topology, &source, &target, index, &item)
                    .await;
                // Results for transfers no longer active are discarded
                if scheduler.active.contains(transfer.id) {
                    let mut map = outcomes.lock().unwrap_or_else(|e| e.into_inner());
                    map.insert(index, outcome);
                }
            }));
        }
        let _ = join_all(tasks).await;
    }

    async fn run_sequential(
        &self,
        transfer: &Arc<Transfer>,
        topology: Topology,
        source: &Endpoint,
        target: &Endpoint,
        outcomes: &Outcomes,
    ) {
        let mut abort_message: Option<String> = None;
        for (index, item) in transfer.request.items.iter().enumerate() {
            if transfer.cancel.is_cancelled() {
                break;
            }
            if let Some(message) = &abort_message {
                let mut map = outcomes.lock().unwrap_or_else(|e| e.into_inner());
                map.insert(
                    index,
                    ItemOutcome::Failed {
                        message: message.clone(),
                        aborts: false,
                    },
                );
                continue;
            }
            let outcome = self
                .run_item(transfer, topology, source, target, index, item)
                .await;
            if let ItemOutcome::Failed { message, aborts: true } = &outcome {
                warn!(
                    "Transfer {} aborting sequential queue at item {}: {}",
                    transfer.id, index, message
                );
                abort_message = Some(message.clone());
            }
            if self.active.contains(transfer.id) {
                let mut map = outcomes.lock().unwrap_or_else(|e| e.into_inner());
                map.insert(index, outcome);
            }
        }
    }

    async fn run_item(
        &self,
        transfer: &Arc<Transfer>,
        topology: Topology,
        source: &Endpoint,
        target: &Endpoint,
        index: usize,
        item: &FileItem,
    ) -> ItemOutcome {
        let id = transfer.id;
        let part = format!("item-{}", index);
        let plan = ItemPlan {
            source,
            target,
            source_path: &item.path,
            dest_path: &transfer.request.dest_path,
            item_name: &item.name,
            is_dir: item.is_dir,
            intent: transfer.request.intent,
            progress: true,
        };
        let built = command::build_item_command(topology, &plan);
        let moved_inline = built.moves_source;

        let sink = chunk_sink(
            Arc::clone(&self.progress),
            self.events.clone(),
            id,
            part.clone(),
        );
        let result = self
            .runner
            .run(id, part.clone(), built.run, &transfer.cancel, sink)
            .await
            .and_then(CommandOutput::into_result);
        self.progress.finalize(id, &part, item.size);

        match result {
            Ok(_) => ItemOutcome::Completed { moved_inline },
            Err(err) => {
                debug!("Transfer {} item {} failed: {}", id, item.name, err);
                ItemOutcome::Failed {
                    aborts: err.aborts_queue(),
                    message: err.to_string(),
                }
            }
        }
    }

    async fn finalize(
        &self,
        transfer: &Arc<Transfer>,
        source: &Endpoint,
        target: &Endpoint,
        topology: Topology,
        outcomes: &Outcomes,
    ) -> TransferResult {
        let id = transfer.id;
        transfer.set_status(TransferStatus::Finalizing);

        let map = {
            let guard = outcomes.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let submitted = transfer.request.items.len();
        let completed = map
            .values()
            .filter(|o| matches!(o, ItemOutcome::Completed { .. }))
            .count();
        // Items no worker reported on count as failures
        let failed = submitted - completed;
        let cancelled = transfer.cancel.is_cancelled();
        let mut warnings = Vec::new();

        if transfer.request.intent == TransferIntent::Move && !cancelled {
            let leftovers: Vec<&FileItem> = transfer
                .request
                .items
                .iter()
                .enumerate()
                .filter(|(index, _)| {
                    matches!(
                        map.get(index),
                        Some(ItemOutcome::Completed { moved_inline: false })
                    )
                })
                .map(|(_, item)| item)
                .collect();
            if !leftovers.is_empty() {
                warnings.extend(self.delete_sources(transfer, source, &leftovers).await);
            }
        }

        self.invalidate_after(transfer, source, target, topology);

        let status = if failed == 0 {
            TerminalStatus::Success
        } else if completed > 0 {
            TerminalStatus::PartialSuccess
        } else {
            TerminalStatus::Error
        };
        let elapsed = transfer.age();

        self.active.remove(id);
        self.registry.remove_transfer(id);
        self.progress.clear(id);

        if cancelled {
            transfer.set_status(TransferStatus::Cancelled);
            info!("Transfer {} cancelled after {:.1}s", id, elapsed.as_secs_f64());
        } else {
            transfer.set_status(match status {
                TerminalStatus::Success => TransferStatus::Succeeded,
                TerminalStatus::PartialSuccess => TransferStatus::PartiallyFailed,
                TerminalStatus::Error => TransferStatus::Failed,
            });
            info!(
                "Transfer {} finished {} ({}/{} items, {:.1}s)",
                id,
                status,
                completed,
                submitted,
                elapsed.as_secs_f64()
            );
            let _ = self.events.send(TransferEvent::Complete {
                id,
                status,
                elapsed_secs: elapsed.as_secs_f64(),
                completed,
                failed,
            });
        }

        TransferResult {
            status,
            completed,
            failed,
            elapsed,
            warnings,
        }
    }

    /// Delete copied move sources, trying an elevated variant first on
    /// POSIX hosts and falling back to per-path deletes. Failures are
    /// warnings, never transfer failures.
    async fn delete_sources(
        &self,
        transfer: &Arc<Transfer>,
        source: &Endpoint,
        items: &[&FileItem],
    ) -> Vec<String> {
        let id = transfer.id;
        let cancel = &transfer.cancel;
        let paths: Vec<String> = items.iter().map(|item| item.path.clone()).collect();
        let mut warnings = Vec::new();

        match source {
            Endpoint::Local => {
                if self
                    .try_delete(id, cancel, local_rm(&paths, true))
                    .await
                    .is_err()
                    && self
                        .try_delete(id, cancel, local_rm(&paths, false))
                        .await
                        .is_err()
                {
                    for p in &paths {
                        let single = vec![p.clone()];
                        if let Err(err) =
                            self.try_delete(id, cancel, local_rm(&single, false)).await
                        {
                            warnings.push(format!("could not delete source {}: {}", p, err));
                        }
                    }
                }
            }
            Endpoint::Remote(server) if server.os == OsKind::Windows => {
                let script = command::build_windows_delete_script(&paths);
                let batch = CommandRun::Remote {
                    host: server.address.clone(),
                    command: script,
                };
                if self.try_delete(id, cancel, batch).await.is_err() {
                    for p in &paths {
                        let single = CommandRun::Remote {
                            host: server.address.clone(),
                            command: command::build_windows_delete_single(p),
                        };
                        if let Err(err) = self.try_delete(id, cancel, single).await {
                            warnings.push(format!("could not delete source {}: {}", p, err));
                        }
                    }
                }
            }
            Endpoint::Remote(server) => {
                let (elevated, plain) = command::build_posix_delete(&paths);
                let run = |cmd: String| CommandRun::Remote {
                    host: server.address.clone(),
                    command: cmd,
                };
                if self.try_delete(id, cancel, run(elevated)).await.is_err()
                    && self.try_delete(id, cancel, run(plain)).await.is_err()
                {
                    for p in &paths {
                        let single = vec![p.clone()];
                        let (_, plain_single) = command::build_posix_delete(&single);
                        if let Err(err) = self.try_delete(id, cancel, run(plain_single)).await {
                            warnings.push(format!("could not delete source {}: {}", p, err));
                        }
                    }
                }
            }
        }

        for warning in &warnings {
            warn!("Transfer {}: {}", id, warning);
            let _ = self.events.send(TransferEvent::Log {
                id,
                line: warning.clone(),
            });
        }
        warnings
    }

    async fn try_delete(
        &self,
        id: TransferId,
        cancel: &CancelToken,
        run: CommandRun,
    ) -> fleetcp_types::Result<()> {
        self.runner
            .run(id, "finalize-delete".to_string(), run, cancel, |_chunk: &str| {})
            .await
            .and_then(CommandOutput::into_result)
            .map(|_| ())
    }

    /// Drop cached listings for every directory the transfer touched
    fn invalidate_after(
        &self,
        transfer: &Arc<Transfer>,
        source: &Endpoint,
        target: &Endpoint,
        _topology: Topology,
    ) {
        let source_os = source.os();
        let parents: BTreeSet<String> = transfer
            .request
            .items
            .iter()
            .map(|item| path::parent_dir(&item.path, source_os))
            .collect();
        for parent in parents {
            self.cache.invalidate(source.address(), &parent);
        }
        // A moved directory takes every cached listing beneath it along
        if transfer.request.intent == TransferIntent::Move {
            for item in transfer.request.items.iter().filter(|item| item.is_dir) {
                self.cache.invalidate_prefix(source.address(), &item.path);
            }
        }
        self.cache
            .invalidate(target.address(), &transfer.request.dest_path);
    }

    fn finish_resolve_failure(&self, transfer: &Arc<Transfer>, err: Error) -> TransferResult {
        let id = transfer.id;
        warn!("Transfer {} failed to resolve: {}", id, err);
        transfer.set_status(TransferStatus::Failed);
        self.active.remove(id);
        self.progress.clear(id);
        let failed = transfer.request.items.len();
        let _ = self.events.send(TransferEvent::Complete {
            id,
            status: TerminalStatus::Error,
            elapsed_secs: transfer.age().as_secs_f64(),
            completed: 0,
            failed,
        });
        TransferResult {
            status: TerminalStatus::Error,
            completed: 0,
            failed,
            elapsed: transfer.age(),
            warnings: vec![err.to_string()],
        }
    }
}

/// Total byte size of the item set, when every item's size is known
fn known_total(items: &[FileItem]) -> Option<u64> {
    items.iter().map(|item| item.size).sum()
}

fn local_rm(paths: &[String], elevated: bool) -> CommandRun {
    let mut argv = if elevated {
        vec!["sudo".to_string(), "-n".to_string()]
    } else {
        Vec::new()
    };
    argv.extend(["rm".to_string(), "-rf".to_string(), "--".to_string()]);
    argv.extend(paths.iter().cloned());
    CommandRun::Local(argv)
}

/// Streams raw output chunks into the progress aggregator; chunks without
/// a progress counter pass through as log lines.
fn chunk_sink(
    progress: Arc<ProgressAggregator>,
    events: broadcast::Sender<TransferEvent>,
    id: TransferId,
    part: String,
) -> impl FnMut(&str) + Send + 'static {
    move |chunk: &str| {
        if progress.observe_chunk(id, &part, chunk).is_none() {
            for line in chunk.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    let _ = events.send(TransferEvent::Log {
                        id,
                        line: line.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferRequest;

    fn request() -> TransferRequest {
        TransferRequest::new("10.20.0.5", "10.20.0.9", "/backup")
            .with_items(vec![FileItem::new("/srv/a.bin", false)])
    }

    #[test]
    fn test_active_set_admission_bound() {
        let active = ActiveTransfers::new(2);
        let first = Arc::new(Transfer::new(request()));
        let second = Arc::new(Transfer::new(request()));
        let third = Arc::new(Transfer::new(request()));
        assert!(active.admit(Arc::clone(&first)).is_ok());
        assert!(active.admit(Arc::clone(&second)).is_ok());
        assert!(active.admit(Arc::clone(&third)).is_err());

        active.remove(first.id);
        assert!(active.admit(third).is_ok());
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn test_active_set_lookup_and_removal() {
        let active = ActiveTransfers::new(8);
        let transfer = Arc::new(Transfer::new(request()));
        let id = transfer.id;
        active.admit(transfer).unwrap();
        assert!(active.contains(id));
        assert!(active.get(id).is_some());
        assert!(active.remove(id).is_some());
        assert!(active.remove(id).is_none());
        assert!(active.is_empty());
    }

    #[test]
    fn test_known_total_requires_all_sizes() {
        let sized = vec![
            FileItem::new("/a", false).with_size(100),
            FileItem::new("/b", false).with_size(200),
        ];
        assert_eq!(known_total(&sized), Some(300));

        let mixed = vec![
            FileItem::new("/a", false).with_size(100),
            FileItem::new("/dir", true),
        ];
        assert_eq!(known_total(&mixed), None);
    }
}
