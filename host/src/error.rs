//! ==============================================================================
//! error.rs - error kinds for the lux host
//! ==============================================================================
//!
//! purpose:
//!     typed failures for the three places the host talks to the outside world.
//!     none of these are fatal inside the core: fetch and persistence errors
//!     are caught where they happen, logged and swallowed. only config errors
//!     surface, and only at startup or from the settings api.
//!
//! relationships:
//!     - FetchError: sensor.rs, setup.rs (network + protocol failures)
//!     - PersistenceError: persist.rs, store.rs (snapshot read/write)
//!     - ConfigError: config.rs, poll.rs (settings validation)
//!
//! ==============================================================================

use thiserror::Error;

/// a sensor (or setup endpoint) request that did not produce a usable answer
#[derive(Debug, Error)]
pub enum FetchError {
    /// request could not complete (connect refused, dns, timeout)
    #[error("network failure: {0}")]
    Network(String),

    /// endpoint answered with a non-2xx status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// body was not the expected json shape
    #[error("malformed response body: {0}")]
    Body(String),
}

impl FetchError {
    /// network vs protocol split used in log lines
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else if e.is_decode() {
            FetchError::Body(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot storage unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}
