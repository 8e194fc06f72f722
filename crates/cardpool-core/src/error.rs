use thiserror::Error;

/// Errors reported synchronously by the card resource service.
///
/// "No resource available" is not an error: allocation returns `Ok(None)`
/// once the search (or the blocking deadline) is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The configuration was rejected while being built.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `start()` was called on a service that never received a configuration.
    #[error("The card resource service is not configured")]
    NotConfigured,

    /// An allocate/release/remove request reached a stopped service.
    #[error("Card resource service not started")]
    NotStarted,

    /// The requested profile name is blank or was never declared.
    #[error("Unknown card resource profile: {0:?}")]
    UnknownProfile(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new unknown profile error.
    pub fn unknown_profile(name: impl Into<String>) -> Self {
        Self::UnknownProfile(name.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = Error::config("No plugin configured");
        assert_eq!(error.to_string(), "Configuration error: No plugin configured");
    }

    #[test]
    fn test_unknown_profile_display() {
        let error = Error::unknown_profile("");
        assert!(matches!(error, Error::UnknownProfile(_)));
        assert_eq!(error.to_string(), "Unknown card resource profile: \"\"");
    }

    #[test]
    fn test_state_errors_are_distinct() {
        assert_ne!(Error::NotStarted, Error::NotConfigured);
        assert_eq!(Error::NotStarted.to_string(), "Card resource service not started");
    }
}
