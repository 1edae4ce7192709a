use thiserror::Error;

/// Top-level error type for camscan shared types and configuration.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("Invalid CIDR block {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Unknown device role: {0}")]
    UnknownRole(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
