//! Card resource allocation service.
//!
//! This crate allocates smart-card readers, together with the card inserted
//! in them, to named application profiles. A profile states which plugins
//! and readers it draws from and which cards it accepts; the service keeps a
//! candidate list per profile, reserves readers for exclusive use, and keeps
//! every list consistent as readers and cards come and go.
//!
//! # Components
//!
//! - [`CardResourceService`]: the entry point. Starts and stops monitoring,
//!   dispatches allocation requests and hardware events.
//! - `ReaderManager` (internal): per-reader activation, card resources and
//!   the usage lock with timeout-based reclamation.
//! - `ProfileManager` (internal): per-profile ordered candidate list and the
//!   allocation search (strategy, pool precedence, blocking retries).
//! - [`CardResource`]: a reader paired with a matched card.
//!
//! # Configuration
//!
//! See [`config`] for the builder and its validation rules.

pub mod card_resource;
pub mod config;
mod profile_manager;
mod reader_manager;
pub mod service;
pub mod state;

pub use card_resource::CardResource;
pub use config::{
    BlockingMode, ObservationErrorHandler, PluginConfig, ProfileConfig, ServiceConfig,
    ServiceConfigBuilder,
};
pub use service::CardResourceService;
pub use state::ServiceState;
