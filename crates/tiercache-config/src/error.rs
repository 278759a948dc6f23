//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading or validating region configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The memory policy name is not one of the known policies.
    #[error("unknown memory policy '{0}' (expected one of: lru, soft, hash-ordered)")]
    UnknownPolicy(String),

    /// A capacity setting cannot be satisfied.
    #[error("invalid capacity for region '{region}': {field} must be greater than zero")]
    InvalidCapacity { region: String, field: &'static str },

    /// A setting is outside its accepted range.
    #[error("invalid value for '{field}' in region '{region}': {reason}")]
    InvalidValue {
        region: String,
        field: &'static str,
        reason: String,
    },
}
