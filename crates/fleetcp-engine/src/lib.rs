//! Transfer orchestration engine for FleetCP
//!
//! This crate is the core of FleetCP: it classifies a requested copy/move
//! into one of four topologies, walks a strategy chain (batched command,
//! per-item parallel, sequential), supervises every spawned subprocess
//! and remote channel, aggregates byte progress across concurrent parts,
//! and caches directory listings with precise invalidation.
//!
//! # Examples
//!
//! ```rust,no_run
//! use fleetcp_engine::{TransferEngine, TransferRequest};
//! use fleetcp_config::Config;
//! use fleetcp_types::FileItem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TransferEngine::new(Config::default());
//! engine.start_watchdog();
//!
//! let request = TransferRequest::new("lin01", "nas01", "/backup")
//!     .with_items(vec![FileItem::new("/srv/data/report.bin", false)]);
//! let id = engine.submit(request)?;
//! println!("transfer {} running", id);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod command;
pub mod engine;
pub mod hosts;
pub mod listing;
pub mod mode;
pub mod ops;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod strategy;
pub mod transfer;
pub mod watchdog;

pub use audit::{AuditLog, AuditRecord, RememberedPaths};
pub use command::{BuiltCommand, CommandRun, Endpoint, ItemPlan};
pub use engine::{EngineBuilder, TransferEngine};
pub use hosts::HostRegistry;
pub use listing::ListingCache;
pub use mode::LocalAliases;
pub use ops::HostOps;
pub use progress::{ProgressAggregator, SpeedSimulator};
pub use runner::CommandRunner;
pub use scheduler::{ActiveTransfers, Scheduler};
pub use strategy::StrategyKind;
pub use transfer::{
    CancelToken, Transfer, TransferEvent, TransferRequest, TransferResult, TransferStatus,
};
pub use watchdog::Watchdog;
