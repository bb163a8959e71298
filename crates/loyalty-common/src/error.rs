//! Configuration error shared by all loaders

use thiserror::Error;

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Raised before any network traffic when settings are missing or malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    /// Create a missing-setting error
    pub fn missing(name: impl Into<String>) -> Self {
        Self::Missing(name.into())
    }

    /// Create an invalid-value error
    pub fn invalid(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending setting
    pub fn setting(&self) -> &str {
        match self {
            ConfigError::Missing(name) => name,
            ConfigError::Invalid { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_setting() {
        let err = ConfigError::invalid("INGEST_BATCH_SIZE", 0, "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid value for INGEST_BATCH_SIZE: '0' (must be greater than 0)"
        );
        assert_eq!(err.setting(), "INGEST_BATCH_SIZE");

        let err = ConfigError::missing("TD_API_KEY");
        assert_eq!(err.to_string(), "Missing required setting: TD_API_KEY");
    }
}
