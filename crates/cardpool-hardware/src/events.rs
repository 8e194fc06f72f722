//! Plugin and reader events.
//!
//! Observable plugins report reader connection changes and observable
//! readers report card presence changes. Each source delivers its events to
//! a single registered observer, on whatever thread the source runs.
//!
//! ```text
//! ┌──────────┐  PluginEvent   ┌──────────────────┐
//! │ Plugin   │───────────────►│                  │
//! └──────────┘                │  Observer        │──────► Card resource service
//! ┌──────────┐  ReaderEvent   │  (sole listener) │
//! │ Reader   │───────────────►│                  │
//! └──────────┘                └──────────────────┘
//! ```

use crate::error::PluginError;

/// Reader connection change reported by an observable plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PluginEvent {
    /// One or more readers were connected.
    ReaderConnected {
        /// Name of the plugin owning the readers.
        plugin_name: String,

        /// Names of the connected readers.
        reader_names: Vec<String>,
    },

    /// One or more readers were disconnected.
    ReaderDisconnected {
        /// Name of the plugin owning the readers.
        plugin_name: String,

        /// Names of the disconnected readers.
        reader_names: Vec<String>,
    },
}

impl PluginEvent {
    /// Get the name of the plugin that raised the event.
    pub fn plugin_name(&self) -> &str {
        match self {
            Self::ReaderConnected { plugin_name, .. }
            | Self::ReaderDisconnected { plugin_name, .. } => plugin_name,
        }
    }

    /// Get the names of the readers concerned by the event.
    pub fn reader_names(&self) -> &[String] {
        match self {
            Self::ReaderConnected { reader_names, .. }
            | Self::ReaderDisconnected { reader_names, .. } => reader_names,
        }
    }
}

/// Card presence change reported by an observable reader.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReaderEvent {
    /// A card was inserted.
    CardInserted { reader_name: String },

    /// A card was inserted and matched the reader's default selection.
    CardMatched { reader_name: String },

    /// The card was removed.
    CardRemoved { reader_name: String },

    /// The reader was unregistered from its plugin.
    Unregistered { reader_name: String },
}

impl ReaderEvent {
    /// Get the name of the reader that raised the event.
    pub fn reader_name(&self) -> &str {
        match self {
            Self::CardInserted { reader_name }
            | Self::CardMatched { reader_name }
            | Self::CardRemoved { reader_name }
            | Self::Unregistered { reader_name } => reader_name,
        }
    }

    /// Returns `true` if the event announces a new card in the reader.
    pub fn is_card_arrival(&self) -> bool {
        matches!(self, Self::CardInserted { .. } | Self::CardMatched { .. })
    }
}

/// Receiver of plugin events.
pub trait PluginObserver: Send + Sync {
    /// Handle a reader connection change.
    fn on_plugin_event(&self, event: PluginEvent);

    /// Handle a failure of the plugin's observation process.
    fn on_plugin_observation_error(&self, plugin_name: &str, error: PluginError);
}

/// Receiver of reader events.
pub trait ReaderObserver: Send + Sync {
    /// Handle a card presence change.
    fn on_reader_event(&self, event: ReaderEvent);

    /// Handle a failure of the reader's observation process.
    fn on_reader_observation_error(&self, reader_name: &str, error: PluginError);
}
