//! Error types for region operations.

/// Error type for region operations.
///
/// Auxiliary failures never appear here: they are logged and treated as
/// "that auxiliary had no effect".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Region configuration was rejected at creation time.
    #[error("Invalid configuration: {0}")]
    Config(#[from] tiercache_config::ConfigError),

    /// The key violates the key contract (e.g. an empty string).
    #[error("Invalid key in region '{region}': {key}")]
    InvalidKey { region: String, key: String },

    /// The region has been disposed.
    #[error("Region disposed: {0}")]
    Disposed(String),

    /// The `get_matching` pattern is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Flushing memory during dispose did not finish in time.
    #[error("Dispose of region '{region}' timed out after {timeout_ms}ms")]
    DisposeTimeout { region: String, timeout_ms: u64 },

    /// Flushing memory during dispose failed.
    #[error("Flush of region '{region}' failed: {reason}")]
    Flush { region: String, reason: String },
}

/// Result type for region operations.
pub type Result<T> = std::result::Result<T, Error>;
