//! Result type alias for fleetcp operations

use crate::error::Error;

/// Result type used throughout the fleetcp ecosystem
pub type Result<T> = std::result::Result<T, Error>;
