//! Core type system and error handling for fleetcp
//!
//! This crate provides the foundational types shared by the fleetcp
//! transfer orchestration engine:
//!
//! - **Error handling**: Structured error taxonomy with kinds and severity
//! - **Core types**: Transfer identifiers, topologies, intents, file items
//! - **Path translation**: Pure conversions between POSIX, Windows, and
//!   Cygwin-style path forms
//!
//! # Examples
//!
//! ```rust
//! use fleetcp_types::{path, OsKind};
//!
//! let remote = path::to_remote_tool_path("C:\\Users\\ops\\data", OsKind::Windows);
//! assert_eq!(remote, "/cygdrive/c/Users/ops/data");
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod path;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use types::*;
