use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`CardResourceService`](crate::CardResourceService).
///
/// ```text
///            start()
///   Stopped ─────────► Started
///      ▲                  │
///      └──────────────────┘
///            stop()
/// ```
///
/// Calling `start()` on a started service stops it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    /// No monitoring, no reader or profile managers.
    #[default]
    Stopped,

    /// Readers are managed and allocation requests are served.
    Started,
}

impl ServiceState {
    /// Returns `true` if the service serves allocation requests.
    #[must_use]
    pub fn is_started(self) -> bool {
        self == Self::Started
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "STOPPED"),
            ServiceState::Started => write!(f, "STARTED"),
        }
    }
}
