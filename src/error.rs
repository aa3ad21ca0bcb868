use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

/// Errors that abort a sweep before any probing starts.
#[derive(Error, Debug)]
pub enum SweepError {
    /// The target is not a well-formed IPv4 CIDR
    #[error("invalid CIDR range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },

    /// A port spec entry is outside 1-65535 or malformed
    #[error("invalid port '{0}': ports must be in 1-65535")]
    InvalidPort(String),

    #[error("unsupported output format '{0}' (expected xml, json, grepable or normal)")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SweepError {
    pub(crate) fn invalid_range(input: &str, reason: impl Into<String>) -> Self {
        SweepError::InvalidRange {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
