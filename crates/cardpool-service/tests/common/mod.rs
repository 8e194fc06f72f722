//! Common test utilities for the card resource service integration tests.
//!
//! Every fixture builds on the mock hardware of `cardpool-hardware`: plugins,
//! readers and pools are created in memory and driven from the test thread.
//! Events raised by observable mocks are delivered synchronously, so a test
//! can assert on the service state right after inserting or removing a card.
//!
//! Set `RUST_LOG=cardpool_service=debug` to see the service logs.

#![allow(dead_code)]

use std::sync::Arc;

use cardpool_core::SmartCard;
use cardpool_hardware::PowerOnDataMatcher;
use cardpool_hardware::mock::{MockPlugin, MockReader};
use cardpool_hardware::traits::CardProfileMatcher;
use cardpool_service::{CardResourceService, PluginConfig, ProfileConfig, ServiceConfig};
use tracing_subscriber::EnvFilter;

/// Power-on data of the SAM cards used across the tests.
pub const SAM_ATR: &str = "3B3F9600805A4880C1205017AEC11F8A";

/// Power-on data of the contactless user cards used across the tests.
pub const USER_ATR: &str = "3B8F8001804F0CA0000003060300030000000068";

/// Profile name used by single-profile fixtures.
pub const PROFILE: &str = "SAM";

/// Install a `RUST_LOG` driven subscriber once for the whole test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A SAM card.
pub fn sam_card() -> SmartCard {
    SmartCard::new(Some(SAM_ATR))
}

/// A contactless user card.
pub fn user_card() -> SmartCard {
    SmartCard::iso(Some(USER_ATR), vec![0x6F, 0x23, 0x90, 0x00])
}

/// Matcher accepting any card.
pub fn any_card() -> Arc<dyn CardProfileMatcher> {
    Arc::new(PowerOnDataMatcher::any())
}

/// Matcher accepting SAM cards only.
pub fn sam_only() -> Arc<dyn CardProfileMatcher> {
    Arc::new(PowerOnDataMatcher::new("3B3F.*").expect("valid pattern"))
}

/// Create a plain reader holding the given card.
pub fn reader_with(name: &str, card: Option<SmartCard>) -> Arc<MockReader> {
    let reader = MockReader::new(name);
    if let Some(card) = card {
        reader.insert_card(card);
    }
    reader
}

/// Create a plain plugin owning plain readers, each holding a SAM card.
pub fn sam_plugin(name: &str, reader_names: &[&str]) -> (Arc<MockPlugin>, Vec<Arc<MockReader>>) {
    let plugin = MockPlugin::new(name);
    let readers: Vec<_> = reader_names
        .iter()
        .map(|reader_name| reader_with(reader_name, Some(sam_card())))
        .collect();
    for reader in &readers {
        plugin.add_reader(Arc::clone(reader));
    }
    (plugin, readers)
}

/// Build and start a service with one plugin and one profile accepting any card.
pub fn started_service(plugin: Arc<MockPlugin>) -> CardResourceService {
    let config = ServiceConfig::builder()
        .with_plugin(PluginConfig::new(plugin))
        .with_profile(ProfileConfig::new(PROFILE, any_card()))
        .build()
        .expect("valid configuration");
    start(config)
}

/// Create and start a service.
pub fn start(config: ServiceConfig) -> CardResourceService {
    init_tracing();
    let service = CardResourceService::new(config);
    service.start().expect("configured service starts");
    service
}

/// Allocate from [`PROFILE`] and return the reader name, or `None`.
pub fn allocate_reader_name(service: &CardResourceService) -> Option<String> {
    service
        .allocate(PROFILE)
        .expect("started service")
        .map(|resource| {
            let name = resource.reader_name().to_string();
            service.release(&resource).expect("started service");
            name
        })
}
