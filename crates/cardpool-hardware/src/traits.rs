//! Plugin, reader and card matching trait definitions.
//!
//! This module defines the contract between the card resource service and
//! the hardware layer. Plugins enumerate readers, pool plugins lend readers
//! on demand, matchers decide whether the card inserted in a reader satisfies
//! a profile, and reader configurators prepare a reader the first time it is
//! used.
//!
//! Unlike the peripheral traits of an event-loop driven device stack, every
//! method here is synchronous: allocation requests run on the caller's
//! thread and hardware callbacks arrive on plugin threads. All traits are
//! object-safe and require `Send + Sync`, so implementations are shared as
//! `Arc<dyn Trait>`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use cardpool_core::SmartCard;

use crate::error::PluginResult;
use crate::events::{PluginObserver, ReaderObserver};

/// Vendor-specific reader extension object.
///
/// Plugins hand out whatever type their readers expose; consumers downcast
/// to the concrete type they expect.
pub type ReaderExtension = Arc<dyn Any + Send + Sync>;

/// How an observable reader keeps detecting cards once a card is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionMode {
    /// Detect a single card, then stop.
    SingleShot,

    /// Go back to card detection after every removal.
    Repeating,
}

/// A card reader exposed by a plugin.
///
/// The reader name is stable for the lifetime of the reader and is used as
/// its identity key by the service.
pub trait CardReader: Send + Sync + fmt::Debug {
    /// Get the reader name.
    fn name(&self) -> &str;

    /// Check whether a card is currently inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader cannot be queried.
    fn is_card_present(&self) -> PluginResult<bool>;

    /// Power on and select the inserted card, returning its identity.
    ///
    /// Returns `Ok(None)` when no card is present.
    ///
    /// # Errors
    ///
    /// Returns an error if communication with the reader or card fails.
    fn read_card(&self) -> PluginResult<Option<SmartCard>>;

    /// Get the observable capability of this reader, if any.
    fn as_observable(&self) -> Option<&dyn ObservableReader> {
        None
    }
}

/// A reader able to notify card insertion and removal.
///
/// A reader has at most one observer; subscribing replaces the previous one.
pub trait ObservableReader: Send + Sync {
    /// Register the observer that receives card events.
    fn subscribe(&self, observer: Arc<dyn ReaderObserver>);

    /// Remove the registered observer.
    fn unsubscribe(&self);

    /// Start detecting cards.
    fn start_card_detection(&self, mode: DetectionMode);

    /// Stop detecting cards.
    fn stop_card_detection(&self);
}

/// A hardware backend exposing a set of named readers.
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Get the plugin name. Plugin names are unique within a configuration.
    fn name(&self) -> &str;

    /// List the readers currently connected.
    fn readers(&self) -> Vec<Arc<dyn CardReader>>;

    /// Get a connected reader by name.
    fn reader(&self, name: &str) -> Option<Arc<dyn CardReader>> {
        self.readers().into_iter().find(|reader| reader.name() == name)
    }

    /// Get the vendor extension of a reader.
    fn reader_extension(&self, _reader_name: &str) -> Option<ReaderExtension> {
        None
    }

    /// Get the observable capability of this plugin, if any.
    fn as_observable(&self) -> Option<&dyn ObservablePlugin> {
        None
    }
}

/// A plugin able to notify reader connection and disconnection.
///
/// A plugin has at most one observer; subscribing replaces the previous one.
pub trait ObservablePlugin: Send + Sync {
    /// Register the observer that receives reader events.
    fn subscribe(&self, observer: Arc<dyn PluginObserver>);

    /// Remove the registered observer.
    fn unsubscribe(&self);
}

/// A hardware backend lending readers on demand from an internal pool.
pub trait PoolPlugin: Send + Sync + fmt::Debug {
    /// Get the plugin name. Plugin names are unique within a configuration.
    fn name(&self) -> &str;

    /// List the reader group references this pool can serve.
    fn reader_group_references(&self) -> Vec<String>;

    /// Take a reader out of the pool.
    ///
    /// Returns `Ok(None)` when no reader of the requested group is free.
    /// Without a group reference any free reader may be returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be queried.
    fn allocate_reader(
        &self,
        reader_group_reference: Option<&str>,
    ) -> PluginResult<Option<Arc<dyn CardReader>>>;

    /// Give a reader back to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader was not allocated by this pool.
    fn release_reader(&self, reader: &dyn CardReader) -> PluginResult<()>;

    /// Get the card already selected by the pool in an allocated reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader was not allocated by this pool.
    fn selected_smart_card(&self, reader: &dyn CardReader) -> PluginResult<Option<SmartCard>>;

    /// Get the vendor extension of a reader.
    fn reader_extension(&self, _reader_name: &str) -> Option<ReaderExtension> {
        None
    }
}

/// Decides whether a card satisfies a card resource profile.
pub trait CardProfileMatcher: Send + Sync + fmt::Debug {
    /// Select the card inserted in the reader and check it against the
    /// profile. Returns the matched identity, or `None` when no card is
    /// present or the card does not fit.
    fn matches(&self, reader: &dyn CardReader) -> Option<SmartCard>;

    /// Check a card that has already been selected, without selecting again.
    fn matches_selected(&self, smart_card: &SmartCard) -> Option<SmartCard>;
}

/// Reader-specific setup, run once per reader the first time a profile
/// accepts it.
pub trait ReaderConfigurator: Send + Sync + fmt::Debug {
    /// Prepare the reader for use.
    ///
    /// # Errors
    ///
    /// A failure keeps the reader out of the service.
    fn setup_reader(&self, reader: &dyn CardReader) -> PluginResult<()>;
}
