//! Plugin and reader abstraction layer for the card resource service.
//!
//! This crate defines the hardware-facing contracts the service is built on:
//! plugins that expose named card readers, pool plugins that lend readers on
//! demand, card profile matchers, and reader setup hooks. Implementations
//! wrap a concrete reader stack (PC/SC, vendor SDKs, remote readers) behind
//! these traits.
//!
//! # Design Philosophy
//!
//! - **Synchronous**: Allocation runs on the caller's thread and hardware
//!   callbacks arrive on plugin threads. No runtime is assumed.
//! - **Object-safe**: Every trait is used as `Arc<dyn Trait>`.
//! - **Thread-safe**: Every trait requires `Send + Sync`.
//! - **Capability discovery**: Observability is optional and discovered at
//!   runtime through `as_observable()`.
//!
//! # Plugins and Readers
//!
//! ```no_run
//! use cardpool_hardware::traits::{CardProfileMatcher, Plugin};
//!
//! fn matching_readers(plugin: &dyn Plugin, matcher: &dyn CardProfileMatcher) -> Vec<String> {
//!     plugin
//!         .readers()
//!         .into_iter()
//!         .filter(|reader| matcher.matches(reader.as_ref()).is_some())
//!         .map(|reader| reader.name().to_string())
//!         .collect()
//! }
//! ```
//!
//! # Events
//!
//! Observable plugins report reader connection changes through
//! [`PluginEvent`]; observable readers report card presence changes through
//! [`ReaderEvent`]. See the [`events`] module.
//!
//! # Mock Implementations
//!
//! With the `mock` feature (enabled by default), the [`mock`] module provides
//! programmable in-memory plugins, readers and pools for development and
//! testing without physical hardware.

pub mod error;
pub mod events;
pub mod matcher;
#[cfg(feature = "mock")]
pub mod mock;
pub mod traits;

// Re-export commonly used types for convenience
pub use error::{PluginError, PluginResult};
pub use events::{PluginEvent, PluginObserver, ReaderEvent, ReaderObserver};
pub use matcher::PowerOnDataMatcher;
pub use traits::{
    CardProfileMatcher, CardReader, DetectionMode, ObservablePlugin, ObservableReader, Plugin,
    PoolPlugin, ReaderConfigurator, ReaderExtension,
};
