//! Error types for the sensor exchange

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::producer::ProducerState;

/// Result type for sensor exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Errors that can occur while publishing or reading the shared region
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The region or the mutex could not be created, opened, sized or mapped
    #[error("Failed to allocate '{name}': {source}")]
    Allocation {
        name: String,
        #[source]
        source: io::Error,
    },

    /// An existing region belongs to a genuine monitoring agent
    #[error(
        "Region '{name}' is owned by a genuine monitoring agent \
         ({sensor_count} sensors, threshold {threshold}); close it before starting the emulator"
    )]
    RegionConflict {
        name: String,
        sensor_count: u32,
        threshold: u32,
    },

    /// The region does not exist (yet, or any more)
    #[error("Shared region '{name}' not found")]
    NotFound { name: String },

    /// The mapped region does not look like a valid sensor exchange
    #[error("Shared region '{name}' has an invalid format: {reason}")]
    InvalidFormat { name: String, reason: String },

    /// The named mutex could not be acquired within the bound
    #[error("Timed out after {timeout:?} waiting for mutex '{name}'")]
    LockTimeout { name: String, timeout: Duration },

    /// Operation not permitted in the producer's current state
    #[error("Cannot {operation} while producer is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ProducerState,
    },

    /// A protocol name cannot be mapped to a shared-memory object name
    #[error("Invalid object name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
}

impl ExchangeError {
    /// Whether a polling loop should simply try again on its next tick
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NotFound { .. }
                | ExchangeError::InvalidFormat { .. }
                | ExchangeError::LockTimeout { .. }
        )
    }

    pub(crate) fn allocation(name: &str, source: impl Into<io::Error>) -> Self {
        ExchangeError::Allocation {
            name: name.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_format(name: &str, reason: impl Into<String>) -> Self {
        ExchangeError::InvalidFormat {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
