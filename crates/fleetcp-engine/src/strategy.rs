//! Strategy selection for a transfer's item set
//!
//! The chain is plain data: an ordered list of strategies the scheduler
//! attempts in turn. Batching is an optimization with strict
//! applicability; when it cannot apply or its single command fails, the
//! same item set falls through to per-item parallel execution. Sequential
//! replaces both when the request disables parallelism.

use crate::command::Endpoint;
use fleetcp_types::{path, FileItem, Topology};

/// One way to execute a transfer's items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// One multi-source command for the whole set
    Batch,
    /// Per-item commands across a bounded worker pool
    Parallel,
    /// Per-item commands, one at a time, in submission order
    Sequential,
}

/// Ordered strategies to attempt for a request. A single item gains
/// nothing from fan-out and runs sequentially even when parallelism is
/// on.
pub fn strategy_chain(parallel: bool, item_count: usize) -> Vec<StrategyKind> {
    if parallel && item_count > 1 {
        vec![StrategyKind::Batch, StrategyKind::Parallel]
    } else {
        vec![StrategyKind::Sequential]
    }
}

/// Whether one batched command can carry the whole item set: never for a
/// purely local transfer or a same-host pair, and only when two or more
/// items share a single parent directory.
pub fn batch_applicable(
    topology: Topology,
    source: &Endpoint,
    target: &Endpoint,
    items: &[FileItem],
    max_files: usize,
) -> bool {
    if topology == Topology::LocalToLocal || source.address() == target.address() {
        return false;
    }
    if items.len() < 2 || items.len() > max_files {
        return false;
    }
    let os = source.os();
    let mut parents = items.iter().map(|item| path::parent_dir(&item.path, os));
    let Some(first) = parents.next() else {
        return false;
    };
    parents.all(|parent| parent == first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcp_config::ServerDescriptor;
    use fleetcp_types::OsKind;

    fn server(address: &str) -> Endpoint {
        Endpoint::Remote(ServerDescriptor {
            name: address.to_string(),
            address: address.to_string(),
            user: "ops".to_string(),
            password: Some("pw".to_string()),
            key_path: None,
            os: OsKind::Posix,
            port: None,
            default_path: None,
        })
    }

    fn items(paths: &[&str]) -> Vec<FileItem> {
        paths.iter().map(|p| FileItem::new(*p, false)).collect()
    }

    #[test]
    fn test_chain_follows_parallel_flag() {
        assert_eq!(
            strategy_chain(true, 3),
            [StrategyKind::Batch, StrategyKind::Parallel]
        );
        assert_eq!(strategy_chain(false, 3), [StrategyKind::Sequential]);
    }

    #[test]
    fn test_single_item_resolves_sequential() {
        assert_eq!(strategy_chain(true, 1), [StrategyKind::Sequential]);
    }

    #[test]
    fn test_batch_needs_shared_parent() {
        let source = Endpoint::Local;
        let target = server("10.20.0.5");
        assert!(batch_applicable(
            Topology::LocalToRemote,
            &source,
            &target,
            &items(&["/srv/data/a", "/srv/data/b"]),
            200,
        ));
        assert!(!batch_applicable(
            Topology::LocalToRemote,
            &source,
            &target,
            &items(&["/srv/data/a", "/srv/other/b"]),
            200,
        ));
    }

    #[test]
    fn test_batch_rejects_small_sets_and_same_host() {
        let source = server("10.20.0.5");
        let target = server("10.20.0.5");
        assert!(!batch_applicable(
            Topology::RemoteToRemote,
            &source,
            &target,
            &items(&["/a/x", "/a/y"]),
            200,
        ));
        assert!(!batch_applicable(
            Topology::LocalToRemote,
            &Endpoint::Local,
            &server("10.20.0.5"),
            &items(&["/a/x"]),
            200,
        ));
    }

    #[test]
    fn test_batch_never_local_to_local() {
        assert!(!batch_applicable(
            Topology::LocalToLocal,
            &Endpoint::Local,
            &Endpoint::Local,
            &items(&["/a/x", "/a/y"]),
            200,
        ));
    }

    #[test]
    fn test_batch_respects_file_cap() {
        let source = Endpoint::Local;
        let target = server("10.20.0.5");
        let many: Vec<String> = (0..10).map(|i| format!("/a/f{}", i)).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(!batch_applicable(
            Topology::LocalToRemote,
            &source,
            &target,
            &items(&refs),
            5,
        ));
    }
}
