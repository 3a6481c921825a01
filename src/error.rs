//! Error types for FlashMap.
//!
//! Ordinary map traffic never fails: a missing or expired key is `None`, and
//! a sweep triggered while another is running returns zero. The variants
//! below cover configuration mistakes, counter arithmetic and the
//! diagnostic JSON view.

use thiserror::Error;

/// Errors that can occur when building or driving a map.
#[derive(Debug, Error)]
pub enum Error {
    /// A `MapConfig` value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The background sweeper was requested outside a Tokio runtime.
    #[error("no Tokio runtime available to run the sweep scheduler")]
    NoRuntime,

    /// A counter operation would leave the `i64` range.
    #[error("counter overflow on key {key:?} (current value {current})")]
    Overflow { key: String, current: i64 },

    /// The detail view could not be rendered as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
