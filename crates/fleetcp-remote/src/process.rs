//! Registry of spawned subprocesses and remote channels
//!
//! Every unit of work a transfer launches (one local subprocess or one
//! remote command channel) is registered here under its transfer ID and
//! part ID, so cancellation and the watchdog can probe liveness and
//! terminate work without knowing how it was launched.
//!
//! The registry lock guards only the bookkeeping maps. Termination and
//! liveness checks operate on snapshots taken under the lock, because
//! signaling a process group or waiting out the grace period can block.

use fleetcp_types::{PartId, TransferId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Grace period between the polite signal and the forced kill
const TERM_GRACE: Duration = Duration::from_secs(1);

/// Handle to a local subprocess, addressed by its process group.
///
/// The child itself is owned by the task that spawned it; this handle
/// carries the pid (equal to the group id, since children are spawned
/// into their own group) and a completion flag set by the waiter.
#[derive(Debug, Clone)]
pub struct SubprocessHandle {
    pid: u32,
    done: Arc<AtomicBool>,
}

impl SubprocessHandle {
    /// Create a handle for a spawned child
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process ID (and process group ID) of the child
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Mark the child as exited; called by whoever awaits it
    pub fn mark_finished(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Whether the child has not yet exited
    pub fn is_live(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: i32) {
        // Negative pid addresses the whole process group
        unsafe {
            libc::kill(-(self.pid as i32), signal);
        }
    }

    /// Graceful terminate with escalation, or an immediate kill when
    /// `force` is set.
    pub async fn terminate(&self, force: bool) {
        #[cfg(unix)]
        {
            if force {
                self.signal_group(libc::SIGKILL);
                return;
            }
            self.signal_group(libc::SIGTERM);
            let deadline = tokio::time::Instant::now() + TERM_GRACE;
            while self.is_live() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.is_live() {
                warn!("Process group {} survived SIGTERM, killing", self.pid);
                self.signal_group(libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = force;
            warn!("Process termination is unsupported on this platform");
        }
    }
}

/// Handle to a remote command channel.
///
/// libssh2 cannot deliver signals over a non-pty channel, so interruption
/// is cooperative: the executing loop polls the cancel flag and closes the
/// channel when it is raised.
#[derive(Debug, Clone, Default)]
pub struct ChannelHandle {
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl ChannelHandle {
    /// Create a fresh channel handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the executing loop to close the channel
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Mark the remote command as finished (exit status available)
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Whether the remote command's exit status is not yet available
    pub fn is_live(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }
}

/// One spawned unit of work: a local subprocess or a remote channel
#[derive(Debug, Clone)]
pub enum ProcessHandle {
    /// Locally spawned subprocess
    Subprocess(SubprocessHandle),
    /// Remote command channel over SSH
    RemoteChannel(ChannelHandle),
}

impl ProcessHandle {
    /// Whether the underlying work has not yet finished
    pub fn is_live(&self) -> bool {
        match self {
            Self::Subprocess(h) => h.is_live(),
            Self::RemoteChannel(h) => h.is_live(),
        }
    }

    /// Terminate the underlying work
    pub async fn terminate(&self, force: bool) {
        match self {
            Self::Subprocess(h) => h.terminate(force).await,
            Self::RemoteChannel(h) => {
                // Cooperative interrupt; the channel is closed by its
                // executing loop whether or not the remote end reacts.
                h.request_cancel();
            }
        }
    }
}

/// A registered handle together with the part it belongs to
#[derive(Debug, Clone)]
pub struct RegisteredHandle {
    /// Part identifier within the transfer
    pub part: PartId,
    /// The handle itself
    pub handle: ProcessHandle,
}

/// Registry of every live handle, keyed by transfer
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: StdMutex<HashMap<TransferId, Vec<RegisteredHandle>>>,
}

impl ProcessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handle to a transfer's list. Multiple handles coexist for
    /// parallel and batched sub-transfers; registration never replaces.
    pub fn register(&self, transfer: TransferId, part: PartId, handle: ProcessHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(transfer)
            .or_default()
            .push(RegisteredHandle { part, handle });
    }

    /// Owned copy of a transfer's current handles, for iteration that must
    /// not hold the registry lock.
    pub fn snapshot(&self, transfer: TransferId) -> Vec<RegisteredHandle> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(&transfer).cloned().unwrap_or_default()
    }

    /// Whether any of a transfer's handles is still live
    pub fn has_live(&self, transfer: TransferId) -> bool {
        self.snapshot(transfer).iter().any(|r| r.handle.is_live())
    }

    /// Drop one finished part's handle
    pub fn finalize_part(&self, transfer: TransferId, part: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handles) = inner.get_mut(&transfer) {
            handles.retain(|r| r.part != part);
            if handles.is_empty() {
                inner.remove(&transfer);
            }
        }
    }

    /// Drop all bookkeeping for a transfer
    pub fn remove_transfer(&self, transfer: TransferId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&transfer);
    }

    /// Terminate every registered handle of a transfer.
    ///
    /// Takes a snapshot first: signaling and the grace wait must not run
    /// under the registry lock.
    pub async fn terminate_all(&self, transfer: TransferId, force: bool) -> usize {
        let handles = self.snapshot(transfer);
        let mut terminated = 0;
        for registered in &handles {
            if registered.handle.is_live() {
                debug!(
                    "Terminating part {} of transfer {}",
                    registered.part, transfer
                );
                registered.handle.terminate(force).await;
                terminated += 1;
            }
        }
        terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_entry() -> (ChannelHandle, ProcessHandle) {
        let handle = ChannelHandle::new();
        (handle.clone(), ProcessHandle::RemoteChannel(handle))
    }

    #[test]
    fn test_register_appends() {
        let registry = ProcessRegistry::new();
        let id = TransferId::new();
        registry.register(id, "part-0".to_string(), channel_entry().1);
        registry.register(id, "part-1".to_string(), channel_entry().1);
        assert_eq!(registry.snapshot(id).len(), 2);
    }

    #[test]
    fn test_liveness_follows_finish_flag() {
        let registry = ProcessRegistry::new();
        let id = TransferId::new();
        let (channel, handle) = channel_entry();
        registry.register(id, "part-0".to_string(), handle);
        assert!(registry.has_live(id));
        channel.mark_finished();
        assert!(!registry.has_live(id));
    }

    #[test]
    fn test_finalize_part_removes_only_that_part() {
        let registry = ProcessRegistry::new();
        let id = TransferId::new();
        registry.register(id, "part-0".to_string(), channel_entry().1);
        registry.register(id, "part-1".to_string(), channel_entry().1);
        registry.finalize_part(id, "part-0");
        let rest = registry.snapshot(id);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].part, "part-1");
    }

    #[tokio::test]
    async fn test_terminate_all_targets_live_handles_only() {
        let registry = ProcessRegistry::new();
        let id = TransferId::new();
        let (done_channel, done_handle) = channel_entry();
        done_channel.mark_finished();
        let (live_channel, live_handle) = channel_entry();
        registry.register(id, "part-0".to_string(), done_handle);
        registry.register(id, "part-1".to_string(), live_handle);

        let terminated = registry.terminate_all(id, false).await;
        assert_eq!(terminated, 1);
        assert!(live_channel.is_cancel_requested());
        assert!(!done_channel.is_cancel_requested());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = ProcessRegistry::new();
        let id = TransferId::new();
        registry.register(id, "part-0".to_string(), channel_entry().1);
        let snapshot = registry.snapshot(id);
        registry.remove_transfer(id);
        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot(id).is_empty());
    }
}
