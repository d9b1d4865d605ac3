//! SSH session pooling, remote execution, and process supervision for fleetcp
//!
//! This crate owns every authenticated session and every spawned unit of
//! work in the fleetcp engine:
//!
//! - **Session pool**: per-host bounded pool of live ssh2 sessions with
//!   key-then-password authentication and FIFO eviction
//! - **Remote execution**: one-shot and streaming command execution over a
//!   pooled session, with a hard time ceiling
//! - **Process registry**: tracks subprocesses and remote channels per
//!   transfer for liveness probing and graceful/forced termination
//!
//! All ssh2 work is blocking and runs inside `tokio::task::spawn_blocking`;
//! no lock is ever held across process or channel waits.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod exec;
pub mod pool;
pub mod process;

pub use exec::{shell_quote, CommandOutput, RemoteExecutor};
pub use pool::{PoolStats, SessionPool};
pub use process::{ChannelHandle, ProcessHandle, ProcessRegistry, SubprocessHandle};
