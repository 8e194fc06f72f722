//! Error types for plugin and reader operations.
//!
//! These errors are raised by the hardware side of the system (plugins,
//! readers, reader setup hooks). The card resource service never surfaces
//! them to allocation callers: pool plugin failures are swallowed and reader
//! setup failures only keep the affected reader out of the service.

/// Result type alias for plugin operations.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Errors that can occur while talking to a plugin or one of its readers.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The named reader is unknown to the plugin.
    #[error("Reader not found: {reader}")]
    ReaderNotFound { reader: String },

    /// The reader is no longer connected.
    #[error("Reader disconnected: {reader}")]
    Disconnected { reader: String },

    /// Communication with the reader or the card failed.
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// The reader setup hook failed.
    #[error("Reader setup failed: {message}")]
    SetupFailed { message: String },

    /// Operation is not supported by this plugin or reader.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// A card filter pattern could not be compiled.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl PluginError {
    /// Create a new reader not found error.
    pub fn reader_not_found(reader: impl Into<String>) -> Self {
        Self::ReaderNotFound {
            reader: reader.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(reader: impl Into<String>) -> Self {
        Self::Disconnected {
            reader: reader.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Create a new reader setup error.
    pub fn setup_failed(message: impl Into<String>) -> Self {
        Self::SetupFailed {
            message: message.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_not_found_error() {
        let error = PluginError::reader_not_found("ACR122U 00 00");
        assert!(matches!(error, PluginError::ReaderNotFound { .. }));
        assert_eq!(error.to_string(), "Reader not found: ACR122U 00 00");
    }

    #[test]
    fn test_disconnected_error() {
        let error = PluginError::disconnected("SAM-1");
        assert_eq!(error.to_string(), "Reader disconnected: SAM-1");
    }

    #[test]
    fn test_setup_failed_error() {
        let error = PluginError::setup_failed("protocol not supported");
        assert!(matches!(error, PluginError::SetupFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Reader setup failed: protocol not supported"
        );
    }

    #[test]
    fn test_invalid_pattern_from_regex() {
        let error: PluginError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(error, PluginError::InvalidPattern(_)));
        assert!(error.to_string().starts_with("Invalid pattern:"));
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            PluginError::communication("APDU timeout"),
            PluginError::unsupported("start_card_detection"),
            PluginError::other("pool closed"),
        ];

        for error in errors {
            let _ = format!("{}", error);
            let _ = format!("{:?}", error);
        }
    }
}
