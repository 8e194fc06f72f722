//! Configuration defaults and bounds.
//!
//! Durations are expressed with millisecond granularity: anything shorter
//! than [`MIN_CYCLE_DURATION`] or [`MIN_BLOCKING_TIMEOUT`] is rejected when a
//! configuration is built.

use std::time::Duration;

use crate::types::AllocationStrategy;

/// Strategy applied when none is configured.
pub const DEFAULT_ALLOCATION_STRATEGY: AllocationStrategy = AllocationStrategy::First;

/// Usage timeout applied when none is configured. Zero means a lock never expires.
pub const DEFAULT_USAGE_TIMEOUT: Duration = Duration::ZERO;

/// By default regular plugins are searched before pool plugins.
pub const DEFAULT_USE_POOL_FIRST: bool = false;

/// Shortest accepted pause between two blocking allocation attempts.
pub const MIN_CYCLE_DURATION: Duration = Duration::from_millis(1);

/// Shortest accepted overall blocking allocation timeout.
pub const MIN_BLOCKING_TIMEOUT: Duration = Duration::from_millis(1);
