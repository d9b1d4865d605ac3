//! Shared fixtures for the integration scenarios

use fleetcp_config::Config;
use fleetcp_engine::{EngineBuilder, LocalAliases, TransferEngine, TransferEvent};
use fleetcp_types::{TerminalStatus, TransferId};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

/// How long a local transfer scenario may take before the test fails
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for an engine that only talks to the control host
///
/// Audit output is disabled so tests do not write outside their temp
/// directories; scenarios that exercise auditing re-enable it with a
/// path of their own.
pub fn local_config() -> Config {
    let mut config = Config::default();
    config.audit.enabled = false;
    config
}

/// Build an engine whose alias set is pinned instead of detected
///
/// Pinning keeps topology resolution deterministic on CI hosts with
/// unusual hostname or interface setups.
pub fn local_engine(config: Config) -> TransferEngine {
    EngineBuilder::new()
        .with_config(config)
        .with_aliases(LocalAliases::from_aliases(["localhost", "127.0.0.1"]))
        .build()
}

/// Create a file with the given content and return its path
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("failed to create test file");
    path
}

/// Create a directory tree with a few files and a nested subdirectory
pub fn create_test_tree(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("nested")).expect("failed to create test tree");
    fs::write(dir.join("alpha.txt"), b"alpha contents").expect("failed to write alpha.txt");
    fs::write(dir.join("beta.bin"), vec![0u8; 4096]).expect("failed to write beta.bin");
    fs::write(dir.join("nested").join("gamma.txt"), b"gamma").expect("failed to write gamma.txt");
    dir
}

/// Outcome of a finished transfer as reported by its terminal event
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// Terminal status
    pub status: TerminalStatus,
    /// Items completed
    pub completed: usize,
    /// Items failed
    pub failed: usize,
}

/// Drain the event stream until the transfer's terminal event arrives
///
/// Panics if the stream closes or [`SCENARIO_TIMEOUT`] elapses first.
pub async fn wait_for_complete(
    events: &mut broadcast::Receiver<TransferEvent>,
    id: TransferId,
) -> Completion {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(TransferEvent::Complete {
                    id: done,
                    status,
                    completed,
                    failed,
                    ..
                }) if done == id => {
                    return Completion {
                        status,
                        completed,
                        failed,
                    };
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream closed before transfer {} completed", id);
                }
            }
        }
    };
    tokio::time::timeout(SCENARIO_TIMEOUT, wait)
        .await
        .expect("timed out waiting for transfer completion")
}
