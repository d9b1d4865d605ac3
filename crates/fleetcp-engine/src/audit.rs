//! Audit trail and per-client remembered paths
//!
//! Both stores are plain files the engine appends to or rewrites: an
//! append-only JSON-lines audit log, and a small JSON document mapping
//! client → panel → last browsed path. Neither participates in transfer
//! correctness; failures here are logged and swallowed by callers that
//! choose to.

use chrono::{DateTime, Utc};
use fleetcp_config::AuditConfig;
use fleetcp_types::{Error, Result, TerminalStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tracing::debug;

/// One audit record, serialized as a single JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the action finished
    pub timestamp: DateTime<Utc>,
    /// Action name, e.g. `transfer`, `delete`, `rename`
    pub action: String,
    /// Requesting client identity
    pub client: String,
    /// Source host, when the action has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_host: Option<String>,
    /// Source path or a representative one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Target host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
    /// Target path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    /// Wall-clock duration in seconds
    pub duration_secs: f64,
    /// Outcome
    pub status: String,
    /// Error message for failed actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Start a record for an action by a client
    pub fn new<S1: Into<String>, S2: Into<String>>(action: S1, client: S2) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            client: client.into(),
            source_host: None,
            source_path: None,
            target_host: None,
            target_path: None,
            duration_secs: 0.0,
            status: String::new(),
            error: None,
        }
    }

    /// Attach source host and path
    pub fn with_source<S1: Into<String>, S2: Into<String>>(mut self, host: S1, path: S2) -> Self {
        self.source_host = Some(host.into());
        self.source_path = Some(path.into());
        self
    }

    /// Attach target host and path
    pub fn with_target<S1: Into<String>, S2: Into<String>>(mut self, host: S1, path: S2) -> Self {
        self.target_host = Some(host.into());
        self.target_path = Some(path.into());
        self
    }

    /// Attach the outcome
    pub fn with_outcome(mut self, status: TerminalStatus, duration_secs: f64) -> Self {
        self.status = status.to_string();
        self.duration_secs = duration_secs;
        self
    }

    /// Attach an error message
    pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Append-only JSON-lines audit log
#[derive(Debug)]
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
    write_lock: StdMutex<()>,
}

impl AuditLog {
    /// Create a log writing to the configured path
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            enabled: config.enabled,
            path: config.log_path.clone(),
            write_lock: StdMutex::new(()),
        }
    }

    /// Append one record. A disabled log accepts and drops records.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let line = serde_json::to_string(record)
            .map_err(|e| Error::other(format!("audit serialize: {}", e)))?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Last browsed path per client and panel, persisted across sessions
#[derive(Debug)]
pub struct RememberedPaths {
    path: PathBuf,
    entries: StdMutex<HashMap<String, HashMap<String, String>>>,
}

impl RememberedPaths {
    /// Load the store, starting empty when the file is missing or
    /// unreadable.
    pub fn load(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: StdMutex::new(entries),
        }
    }

    /// Last path a client browsed in a panel
    pub fn get(&self, client: &str, panel: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(client)?.get(panel).cloned()
    }

    /// Record a browsed path and persist the store
    pub fn set(&self, client: &str, panel: &str, path: &str) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .entry(client.to_string())
                .or_default()
                .insert(panel.to_string(), path.to_string());
            entries.clone()
        };
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::other(format!("remembered paths serialize: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, raw)?;
        debug!("Remembered {} panel {} -> {}", client, panel, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(&AuditConfig {
            enabled: true,
            log_path: dir.path().join("audit.jsonl"),
            remembered_paths_path: dir.path().join("paths.json"),
        });

        log.append(
            &AuditRecord::new("transfer", "198.51.100.10")
                .with_source("10.20.0.5", "/srv/a.bin")
                .with_target("10.20.0.9", "/backup")
                .with_outcome(TerminalStatus::Success, 12.5),
        )
        .unwrap();
        log.append(
            &AuditRecord::new("delete", "198.51.100.10")
                .with_target("10.20.0.9", "/backup/a.bin")
                .with_outcome(TerminalStatus::Error, 0.3)
                .with_error("permission denied"),
        )
        .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action, "transfer");
        assert_eq!(first.status, "success");
        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_disabled_audit_drops_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&AuditConfig {
            enabled: false,
            log_path: path.clone(),
            remembered_paths_path: dir.path().join("paths.json"),
        });
        log.append(&AuditRecord::new("transfer", "client")).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remembered_paths_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paths.json");

        let store = RememberedPaths::load(path.clone());
        assert_eq!(store.get("client-a", "left"), None);
        store.set("client-a", "left", "/srv/data").unwrap();
        store.set("client-a", "right", "D:/share").unwrap();

        let reloaded = RememberedPaths::load(path);
        assert_eq!(reloaded.get("client-a", "left").as_deref(), Some("/srv/data"));
        assert_eq!(reloaded.get("client-a", "right").as_deref(), Some("D:/share"));
    }
}
