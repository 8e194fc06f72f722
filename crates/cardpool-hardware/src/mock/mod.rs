//! Mock plugin implementations for testing and development.
//!
//! This module provides simulated plugins, readers and pools that can be
//! controlled programmatically without requiring physical hardware. Every
//! mock is shared as an `Arc`; the test drives it through its inherent
//! methods while the service sees it through the hardware traits.

pub mod configurator;
pub mod plugin;
pub mod pool;
pub mod reader;

// Re-export commonly used types
pub use configurator::MockReaderConfigurator;
pub use plugin::{MockPlugin, MockReaderExtension};
pub use pool::MockPoolPlugin;
pub use reader::MockReader;
