//! Transfer requests, lifecycle state, and events

use chrono::{DateTime, Utc};
use fleetcp_types::{Error, FileItem, Result, TerminalStatus, TransferId, TransferIntent};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Request to transfer a set of items between two hosts
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Source host name or address
    pub source_host: String,
    /// Target host name or address
    pub target_host: String,
    /// Destination directory on the target host
    pub dest_path: String,
    /// Ordered items to transfer
    pub items: Vec<FileItem>,
    /// Copy or move
    pub intent: TransferIntent,
    /// Identity of the requesting client, for audit records
    pub client: String,
    /// Whether per-item parallel execution is allowed
    pub parallel: bool,
    /// Override of the worker pool bound for this transfer
    pub max_workers: Option<usize>,
}

impl TransferRequest {
    /// Create a copy request with parallelism enabled
    pub fn new<S1, S2, S3>(source_host: S1, target_host: S2, dest_path: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            source_host: source_host.into(),
            target_host: target_host.into(),
            dest_path: dest_path.into(),
            items: Vec::new(),
            intent: TransferIntent::Copy,
            client: String::new(),
            parallel: true,
            max_workers: None,
        }
    }

    /// Set the items to transfer
    pub fn with_items(mut self, items: Vec<FileItem>) -> Self {
        self.items = items;
        self
    }

    /// Set the transfer intent
    pub fn with_intent(mut self, intent: TransferIntent) -> Self {
        self.intent = intent;
        self
    }

    /// Set the requesting client identity
    pub fn with_client<S: Into<String>>(mut self, client: S) -> Self {
        self.client = client.into();
        self
    }

    /// Enable or disable per-item parallelism
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Cap this transfer's worker pool
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Reject malformed requests before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.source_host.trim().is_empty() {
            return Err(Error::validation("source host is required"));
        }
        if self.target_host.trim().is_empty() {
            return Err(Error::validation("target host is required"));
        }
        if self.dest_path.trim().is_empty() {
            return Err(Error::validation("destination path is required"));
        }
        if self.items.is_empty() {
            return Err(Error::validation("at least one item is required"));
        }
        if self.items.iter().any(|i| i.path.trim().is_empty()) {
            return Err(Error::validation("every item needs a non-empty path"));
        }
        Ok(())
    }
}

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Accepted, not yet classified
    Submitted,
    /// Resolving topology and host descriptors
    Resolving,
    /// Attempting the one-shot batched command
    Batching,
    /// Fan-out across the bounded worker pool
    Parallel,
    /// One item at a time, in submission order
    Sequential,
    /// Deleting move sources and invalidating caches
    Finalizing,
    /// Every item completed
    Succeeded,
    /// Some items completed, some failed
    PartiallyFailed,
    /// No items completed, or a top-level failure
    Failed,
    /// Cancelled by request
    Cancelled,
}

impl TransferStatus {
    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::PartiallyFailed | Self::Failed | Self::Cancelled
        )
    }
}

/// Cancellation token shared between the scheduler and workers.
///
/// Backed by a watch channel so waiting is race-free: a worker either
/// observes the flag already set or is woken by the send.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Raise the cancellation flag, waking all waiters
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Closed sender means the transfer is gone, which counts too
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A live transfer owned by the engine
#[derive(Debug)]
pub struct Transfer {
    /// Unique identifier
    pub id: TransferId,
    /// The request that created it
    pub request: TransferRequest,
    /// Cancellation token checked by every worker
    pub cancel: CancelToken,
    /// Wall-clock creation time, for audit records
    pub created_at: DateTime<Utc>,
    /// Monotonic creation time, for age checks
    pub started: Instant,
    status: StdMutex<TransferStatus>,
}

impl Transfer {
    /// Create a transfer in the `Submitted` state
    pub fn new(request: TransferRequest) -> Self {
        Self {
            id: TransferId::new(),
            request,
            cancel: CancelToken::new(),
            created_at: Utc::now(),
            started: Instant::now(),
            status: StdMutex::new(TransferStatus::Submitted),
        }
    }

    /// Current lifecycle state
    pub fn status(&self) -> TransferStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to a new lifecycle state
    pub fn set_status(&self, status: TransferStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Age of the transfer
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outcome of a finished transfer
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// Terminal status
    pub status: TerminalStatus,
    /// Items that completed
    pub completed: usize,
    /// Items that failed
    pub failed: usize,
    /// Elapsed wall time
    pub elapsed: Duration,
    /// Non-fatal warnings, e.g. a move that copied but could not delete
    /// its source
    pub warnings: Vec<String>,
}

/// Event emitted to progress/log observers at bounded intervals
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A log line attributed to a transfer
    Log {
        /// Transfer the line belongs to
        id: TransferId,
        /// The line itself
        line: String,
    },
    /// Byte/percentage/speed update
    Progress {
        /// Transfer being reported
        id: TransferId,
        /// Monotonic total bytes observed
        bytes: u64,
        /// Percent complete, when total size is known
        percent: Option<f64>,
        /// Simulated instantaneous speed in MB/s
        speed_mbps: f64,
    },
    /// Single terminal event per transfer
    Complete {
        /// Transfer being reported
        id: TransferId,
        /// Terminal status
        status: TerminalStatus,
        /// Elapsed seconds
        elapsed_secs: f64,
        /// Items completed
        completed: usize,
        /// Items failed
        failed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransferRequest {
        TransferRequest::new("10.20.0.5", "10.20.0.9", "/backup")
            .with_items(vec![FileItem::new("/srv/data/a.bin", false)])
            .with_client("198.51.100.10")
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        assert!(request().validate().is_ok());
        assert!(TransferRequest::new("", "h", "/d")
            .with_items(vec![FileItem::new("/x", false)])
            .validate()
            .is_err());
        assert!(request().with_items(Vec::new()).validate().is_err());
    }

    #[test]
    fn test_status_transitions() {
        let transfer = Transfer::new(request());
        assert_eq!(transfer.status(), TransferStatus::Submitted);
        assert!(!transfer.status().is_terminal());
        transfer.set_status(TransferStatus::Parallel);
        transfer.set_status(TransferStatus::Succeeded);
        assert!(transfer.status().is_terminal());
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        task.await.unwrap();
        assert!(token.is_cancelled());
    }
}
