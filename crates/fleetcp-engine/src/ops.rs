//! Direct host operations: list, delete, rename, create
//!
//! Each is a pass-through to the right filesystem call or remote command
//! for the host's OS, followed by the same listing-cache invalidation a
//! transfer's finalizing step performs on the directories it touched.

use crate::command::{self, Endpoint};
use crate::hosts::HostRegistry;
use crate::listing::{self, ListingCache};
use fleetcp_config::ServerDescriptor;
use fleetcp_remote::{shell_quote, CommandOutput, RemoteExecutor, SessionPool};
use fleetcp_types::{path as fpath, DirEntry, Error, OsKind, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes direct operations against any registered host
#[derive(Debug, Clone)]
pub struct HostOps {
    hosts: Arc<HostRegistry>,
    pool: Arc<SessionPool>,
    executor: RemoteExecutor,
    cache: Arc<ListingCache>,
}

impl HostOps {
    /// Wire host operations over the shared services
    pub fn new(
        hosts: Arc<HostRegistry>,
        pool: Arc<SessionPool>,
        cache: Arc<ListingCache>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            hosts,
            pool,
            executor: RemoteExecutor::new(command_timeout),
            cache,
        }
    }

    async fn exec(&self, server: &ServerDescriptor, command: String) -> Result<CommandOutput> {
        let session = self.pool.acquire(server).await?;
        self.executor.run(session, command).await
    }

    /// List a directory, serving from the cache unless `force_refresh`
    /// is set. `path` defaults to the host's configured browse root.
    pub async fn list(
        &self,
        host: &str,
        path: Option<&str>,
        show_hidden: bool,
        force_refresh: bool,
    ) -> Result<Vec<DirEntry>> {
        let endpoint = self.hosts.resolve(host)?;
        let dir_path = path
            .map(str::to_string)
            .unwrap_or_else(|| self.hosts.default_path(host));
        let cache_host = endpoint.address().to_string();

        if !force_refresh {
            if let Some(entries) = self.cache.get(&cache_host, &dir_path, show_hidden) {
                debug!("Listing cache hit for {}:{}", cache_host, dir_path);
                return Ok(entries);
            }
        }

        let entries = match &endpoint {
            Endpoint::Local => listing::list_local(&dir_path, show_hidden)?,
            Endpoint::Remote(server) if server.os == OsKind::Windows => {
                self.list_remote_windows(server, &dir_path, show_hidden)
                    .await?
            }
            Endpoint::Remote(server) => {
                let output = self
                    .exec(server, listing::posix_listing_command(&dir_path))
                    .await?
                    .into_result()?;
                listing::parse_posix_listing(&output.stdout, &dir_path, show_hidden)
            }
        };

        self.cache
            .put(&cache_host, &dir_path, show_hidden, entries.clone());
        Ok(entries)
    }

    /// Windows servers normalize paths differently depending on their SSH
    /// stack, so each candidate spelling is tried until one lists.
    async fn list_remote_windows(
        &self,
        server: &ServerDescriptor,
        dir_path: &str,
        show_hidden: bool,
    ) -> Result<Vec<DirEntry>> {
        let mut last_err = Error::validation(format!("no candidate spelling for {}", dir_path));
        for candidate in fpath::candidate_paths(dir_path) {
            let command = listing::windows_listing_command(&candidate, show_hidden);
            match self.exec(server, command).await.and_then(CommandOutput::into_result) {
                Ok(output) => {
                    return Ok(listing::parse_windows_listing(&output.stdout, dir_path));
                }
                Err(err) => {
                    debug!(
                        "Listing candidate {} failed on {}: {}",
                        candidate, server.address, err
                    );
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Delete paths on a host, trying elevated then plain then per-path
    /// on POSIX, and batch-script then per-path on Windows.
    pub async fn delete(&self, host: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let endpoint = self.hosts.resolve(host)?;
        let failed: Vec<String> = match &endpoint {
            Endpoint::Local => delete_local(paths),
            Endpoint::Remote(server) if server.os == OsKind::Windows => {
                self.delete_remote_windows(server, paths).await
            }
            Endpoint::Remote(server) => self.delete_remote_posix(server, paths).await,
        };

        self.invalidate_parents(&endpoint, paths);
        // Deleted directories take their cached sub-listings with them
        for p in paths {
            self.cache.invalidate_prefix(endpoint.address(), p);
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "could not delete: {}",
                failed.join(", ")
            )))
        }
    }

    async fn delete_remote_posix(&self, server: &ServerDescriptor, paths: &[String]) -> Vec<String> {
        let (elevated, plain) = command::build_posix_delete(paths);
        if self.exec_ok(server, elevated).await || self.exec_ok(server, plain).await {
            return Vec::new();
        }
        let mut failed = Vec::new();
        for p in paths {
            let (_, single) = command::build_posix_delete(std::slice::from_ref(p));
            if !self.exec_ok(server, single).await {
                failed.push(p.clone());
            }
        }
        failed
    }

    async fn delete_remote_windows(
        &self,
        server: &ServerDescriptor,
        paths: &[String],
    ) -> Vec<String> {
        match self
            .exec(server, command::build_windows_delete_script(paths))
            .await
        {
            Ok(output) if output.success() => return Vec::new(),
            Ok(output) => {
                // The batch script reports its failures as JSON; trust that
                // list rather than re-running deletes that already succeeded
                if let Some(failed) = parse_windows_delete_failures(&output.stdout) {
                    return failed;
                }
            }
            Err(err) => warn!("Batch delete on {} failed: {}", server.address, err),
        }
        let mut failed = Vec::new();
        for p in paths {
            if !self
                .exec_ok(server, command::build_windows_delete_single(p))
                .await
            {
                failed.push(p.clone());
            }
        }
        failed
    }

    async fn exec_ok(&self, server: &ServerDescriptor, cmd: String) -> bool {
        match self.exec(server, cmd).await {
            Ok(output) => output.success(),
            Err(err) => {
                warn!("Command on {} failed: {}", server.address, err);
                false
            }
        }
    }

    /// Rename (or move) a path on a host. Identical old and new paths are
    /// a successful no-op.
    pub async fn rename(&self, host: &str, old_path: &str, new_path: &str) -> Result<()> {
        let endpoint = self.hosts.resolve(host)?;
        if fpath::normalize_windows_path(old_path) == fpath::normalize_windows_path(new_path) {
            return Ok(());
        }
        match &endpoint {
            Endpoint::Local => {
                std::fs::rename(old_path, new_path)
                    .map_err(|e| Error::validation(format!("rename {}: {}", old_path, e)))?;
            }
            Endpoint::Remote(server) if server.os == OsKind::Windows => {
                let old = fpath::normalize_for_shell(old_path, OsKind::Windows).replace('\'', "''");
                let new = fpath::normalize_for_shell(new_path, OsKind::Windows).replace('\'', "''");
                let command = format!(
                    "powershell -NoProfile -Command \
                     \"Move-Item -LiteralPath '{}' -Destination '{}' -Force -ErrorAction Stop\"",
                    old, new
                );
                self.exec(server, command).await?.into_result()?;
            }
            Endpoint::Remote(server) => {
                let command = format!("mv -f {} {}", shell_quote(old_path), shell_quote(new_path));
                self.exec(server, command).await?.into_result()?;
            }
        }
        let both = [old_path.to_string(), new_path.to_string()];
        self.invalidate_parents(&endpoint, &both);
        Ok(())
    }

    /// Create a directory, parents included
    pub async fn create_dir(&self, host: &str, dir_path: &str) -> Result<()> {
        let endpoint = self.hosts.resolve(host)?;
        match &endpoint {
            Endpoint::Local => {
                std::fs::create_dir_all(dir_path)
                    .map_err(|e| Error::validation(format!("mkdir {}: {}", dir_path, e)))?;
            }
            Endpoint::Remote(server) if server.os == OsKind::Windows => {
                let win = fpath::normalize_for_shell(dir_path, OsKind::Windows).replace('\'', "''");
                let command = format!(
                    "powershell -NoProfile -Command \
                     \"New-Item -ItemType Directory -Force -Path '{}' | Out-Null\"",
                    win
                );
                self.exec(server, command).await?.into_result()?;
            }
            Endpoint::Remote(server) => {
                let command = format!("mkdir -p {}", shell_quote(dir_path));
                self.exec(server, command).await?.into_result()?;
            }
        }
        let paths = [dir_path.to_string()];
        self.invalidate_parents(&endpoint, &paths);
        Ok(())
    }

    fn invalidate_parents(&self, endpoint: &Endpoint, paths: &[String]) {
        let os = endpoint.os();
        for p in paths {
            self.cache
                .invalidate(endpoint.address(), &fpath::parent_dir(p, os));
        }
    }
}

/// Extract the failed paths from a batch delete script's JSON output.
///
/// `ConvertTo-Json` emits a bare object for a single failure and an array
/// for several; anything else means the script died before reporting and
/// the caller falls back to per-path deletes.
fn parse_windows_delete_failures(stdout: &str) -> Option<Vec<String>> {
    let trimmed = stdout.trim();
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let objects = match value {
        serde_json::Value::Array(items) => items,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => return None,
    };
    let mut failed = Vec::with_capacity(objects.len());
    for obj in objects {
        failed.push(obj.get("path")?.as_str()?.to_string());
    }
    Some(failed)
}

/// Delete local paths directly; returns the ones that could not be
/// removed.
fn delete_local(paths: &[String]) -> Vec<String> {
    let mut failed = Vec::new();
    for p in paths {
        let metadata = match std::fs::symlink_metadata(p) {
            Ok(metadata) => metadata,
            // Already gone counts as deleted
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(_) => {
                failed.push(p.clone());
                continue;
            }
        };
        let result = if metadata.is_dir() {
            std::fs::remove_dir_all(p)
        } else {
            std::fs::remove_file(p)
        };
        if result.is_err() {
            failed.push(p.clone());
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_local_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let sub = dir.path().join("sub");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("inner.txt"), b"x").unwrap();

        let paths = vec![
            file.to_string_lossy().into_owned(),
            sub.to_string_lossy().into_owned(),
        ];
        assert!(delete_local(&paths).is_empty());
        assert!(!file.exists());
        assert!(!sub.exists());
    }

    #[test]
    fn test_delete_local_missing_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").to_string_lossy().into_owned();
        assert!(delete_local(&[missing]).is_empty());
    }

    #[test]
    fn test_parse_batch_delete_single_failure() {
        let out = r#"{"path":"C:\\share\\locked.txt","error":"in use"}"#;
        assert_eq!(
            parse_windows_delete_failures(out),
            Some(vec!["C:\\share\\locked.txt".to_string()])
        );
    }

    #[test]
    fn test_parse_batch_delete_one_of_three_failed() {
        // Three submitted, two deleted, exactly one reported back
        let out = r#"[{"path":"C:\\share\\locked.txt","error":"in use"}]"#;
        let failed = parse_windows_delete_failures(out).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0], "C:\\share\\locked.txt");
    }

    #[test]
    fn test_parse_batch_delete_rejects_non_json() {
        assert_eq!(parse_windows_delete_failures("Access is denied."), None);
        assert_eq!(parse_windows_delete_failures(""), None);
        assert_eq!(parse_windows_delete_failures("[1,2]"), None);
    }
}
