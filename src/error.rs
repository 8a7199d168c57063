//! Error types for hotstore.

use std::fmt;

/// Result type alias for hotstore operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when working with a configuration store.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A candidate failed validation and the store kept its previous value.
    #[error("Update rejected by validator: {0}")]
    ValidationRejected(#[source] ValidationError),

    /// Bootstrap could not obtain an initial value from a source.
    #[error("Failed to load from source '{source_id}': {cause}")]
    SourceLoadFailed {
        /// Identifier of the failing source
        source_id: String,
        /// Underlying failure
        #[source]
        cause: Box<ConfigError>,
    },

    /// A source's watch loop terminated abnormally.
    #[error("Watch on source '{source_id}' failed: {cause}")]
    SourceWatchFailed {
        /// Identifier of the failing source
        source_id: String,
        /// Underlying failure
        #[source]
        cause: Box<ConfigError>,
    },

    /// Failed to load configuration from a source.
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// Failed to deserialize configuration.
    #[error("Failed to deserialize configuration: {0}")]
    DeserializationError(String),

    /// File watching or a change feed failed.
    #[error("Watch error: {0}")]
    WatchError(String),

    /// Asynchronous validation did not finish in time.
    #[error("Validation timed out after {attempts} attempt(s)")]
    ValidationTimeout {
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "history")]
    /// Not enough history to revert the requested number of steps.
    #[error("Insufficient history: cannot revert {requested} steps (only {available} available)")]
    InsufficientHistory {
        /// Number of steps requested
        requested: usize,
        /// Number of earlier versions available
        available: usize,
    },

    #[cfg(feature = "history")]
    /// The requested version is not (or no longer) in history.
    #[error("Version {0} not found in history")]
    VersionNotFound(u64),

    /// Generic error for other cases.
    #[error("Configuration error: {0}")]
    Other(String),
}

impl ConfigError {
    /// Wrap `cause` as a bootstrap failure for `source_id`.
    pub fn source_load(source_id: impl Into<String>, cause: ConfigError) -> Self {
        Self::SourceLoadFailed {
            source_id: source_id.into(),
            cause: Box::new(cause),
        }
    }

    /// Wrap `cause` as a watch-loop failure for `source_id`.
    pub fn source_watch(source_id: impl Into<String>, cause: ConfigError) -> Self {
        Self::SourceWatchFailed {
            source_id: source_id.into(),
            cause: Box::new(cause),
        }
    }

    /// Returns true if this error is a validator rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ValidationRejected(_))
    }
}

/// Validation error for configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ConfigError {
    fn from(err: ValidationError) -> Self {
        ConfigError::ValidationRejected(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_display() {
        let err = ValidationError::invalid_field("port", "must be >= 1024");
        assert_eq!(err.to_string(), "Field 'port' is invalid: must be >= 1024");
    }

    #[test]
    fn test_multiple_display_numbers_entries() {
        let err = ValidationError::Multiple(vec![
            ValidationError::custom("first"),
            ValidationError::custom("second"),
        ]);
        let text = err.to_string();
        assert!(text.contains("1. first"));
        assert!(text.contains("2. second"));
    }

    #[test]
    fn test_source_load_keeps_cause() {
        let err = ConfigError::source_load("file:a.yaml", ConfigError::LoadError("missing".into()));
        let text = err.to_string();
        assert!(text.contains("file:a.yaml"));
        assert!(text.contains("missing"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_validation_error_converts_to_rejection() {
        let err: ConfigError = ValidationError::custom("nope").into();
        assert!(err.is_rejection());
    }
}
