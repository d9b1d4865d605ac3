//! Core data types for fleetcp
//!
//! Shared value types used across the fleetcp crates: transfer identifiers,
//! host OS kinds, transfer topologies and intents, file items, and directory
//! entries returned by listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a logical transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Create a new random transfer ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one independently tracked unit of work (one running
/// command) within a transfer
pub type PartId = String;

/// Operating system family of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    /// Linux, NAS appliances, and everything else with a POSIX shell
    Posix,
    /// Windows hosts driven through cmd/PowerShell and Cygwin-style tools
    Windows,
}

impl OsKind {
    /// Whether this host speaks Windows path and shell conventions
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl Default for OsKind {
    fn default() -> Self {
        Self::Posix
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Posix => write!(f, "posix"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// Classification of a transfer by which side(s) are the control host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Both endpoints resolve to the control host
    LocalToLocal,
    /// Control host to a remote host
    LocalToRemote,
    /// Remote host to the control host
    RemoteToLocal,
    /// Two remote hosts
    RemoteToRemote,
}

impl Topology {
    /// Whether either endpoint is a remote host
    pub fn involves_remote(&self) -> bool {
        !matches!(self, Self::LocalToLocal)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalToLocal => "local_to_local",
            Self::LocalToRemote => "local_to_remote",
            Self::RemoteToLocal => "remote_to_local",
            Self::RemoteToRemote => "remote_to_remote",
        };
        write!(f, "{}", name)
    }
}

/// Whether a transfer copies or moves its items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferIntent {
    /// Copy items, leaving the sources in place
    Copy,
    /// Copy items, then delete the sources during finalization
    Move,
}

impl TransferIntent {
    /// Whether sources must be deleted after a successful copy
    pub fn deletes_source(&self) -> bool {
        matches!(self, Self::Move)
    }
}

impl fmt::Display for TransferIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
        }
    }
}

/// One item of a transfer request
///
/// Paths are carried as strings rather than `PathBuf` because they name
/// files on the item's own host, which may follow Windows conventions the
/// control host does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    /// Absolute path on the item's host
    pub path: String,
    /// Display name (last path component)
    pub name: String,
    /// Whether the item is a directory
    pub is_dir: bool,
    /// Size in bytes, best effort; unknown at submission time for
    /// directories and remote items
    pub size: Option<u64>,
}

impl FileItem {
    /// Create a file item, deriving the display name from the path
    pub fn new<S: Into<String>>(path: S, is_dir: bool) -> Self {
        let path = path.into();
        let name = path
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&path)
            .to_string();
        Self {
            path,
            name,
            is_dir,
            size: None,
        }
    }

    /// Set the best-effort size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// Full path on the listed host
    pub path: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes; `None` for directories
    pub size: Option<u64>,
    /// Last modification time, when the listing format provides one
    pub modified: Option<DateTime<Utc>>,
}

/// Terminal status of a finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Every item completed
    Success,
    /// Some items completed, some failed
    PartialSuccess,
    /// No items completed, or a top-level failure
    Error,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}
