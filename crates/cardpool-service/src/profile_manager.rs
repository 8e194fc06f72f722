//! Per-profile candidate list and allocation search.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use cardpool_core::AllocationStrategy;
use cardpool_hardware::{CardReader, Plugin, PluginResult, PoolPlugin};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::card_resource::CardResource;
use crate::config::{BlockingMode, ProfileConfig, ServiceConfig};
use crate::reader_manager::{LockOutcome, ReaderSession};
use crate::service::ServiceInner;

/// Manager of one allocation profile.
///
/// The candidate list only holds resources from regular plugins; its order
/// is the search order and is changed by the allocation strategy after each
/// successful allocation.
pub(crate) struct ProfileManager {
    profile: ProfileConfig,
    plugins: Vec<Arc<dyn Plugin>>,
    pool_plugins: Vec<Arc<dyn PoolPlugin>>,
    strategy: AllocationStrategy,
    use_pool_first: bool,
    blocking_mode: Option<BlockingMode>,
    card_resources: Mutex<Vec<CardResource>>,
}

impl ProfileManager {
    pub(crate) fn new(profile: &ProfileConfig, config: &ServiceConfig) -> Self {
        let (plugins, pool_plugins) = if profile.uses_default_plugins() {
            (
                config
                    .plugins()
                    .iter()
                    .map(|entry| Arc::clone(entry.plugin()))
                    .collect(),
                config.pool_plugins().to_vec(),
            )
        } else {
            let mut plugins = Vec::new();
            let mut pool_plugins = Vec::new();
            for name in profile.plugin_names() {
                if let Some(entry) = config.plugin(name) {
                    plugins.push(Arc::clone(entry.plugin()));
                } else if let Some(pool) = config
                    .pool_plugins()
                    .iter()
                    .find(|pool| pool.name() == name.as_str())
                {
                    pool_plugins.push(Arc::clone(pool));
                }
            }
            (plugins, pool_plugins)
        };

        Self {
            profile: profile.clone(),
            plugins,
            pool_plugins,
            strategy: config.allocation_strategy(),
            use_pool_first: config.use_pool_first(),
            blocking_mode: config.blocking_mode(),
            card_resources: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.profile.name()
    }

    /// Regular plugins scanned by this profile, in search order.
    pub(crate) fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub(crate) fn card_resources(&self) -> Vec<CardResource> {
        self.card_resources.lock().clone()
    }

    /// Offer a newly connected reader, or a reader with a new card.
    ///
    /// Readers of plugins this profile does not draw from are ignored.
    pub(crate) fn on_reader_connected(&self, session: &mut ReaderSession<'_>) -> PluginResult<()> {
        let plugin_name = session.manager().plugin_name();
        if self.profile.uses_default_plugins()
            || self
                .profile
                .plugin_names()
                .iter()
                .any(|name| name == plugin_name)
        {
            self.offer(session)?;
        }
        Ok(())
    }

    /// Accept the reader if its name passes the filter, activate it and try
    /// to match its card.
    ///
    /// # Errors
    ///
    /// Returns the reader setup failure, if any.
    pub(crate) fn offer(&self, session: &mut ReaderSession<'_>) -> PluginResult<()> {
        if !self.profile.accepts_reader(session.manager().reader_name()) {
            return Ok(());
        }
        session.activate()?;

        let Some(resource) = session.try_match(self.profile.matcher().as_ref()) else {
            return Ok(());
        };
        let mut card_resources = self.card_resources.lock();
        if card_resources.contains(&resource) {
            info!(profile = %self.name(), "{resource} already present in profile");
        } else {
            info!(profile = %self.name(), "Add {resource} to profile");
            card_resources.push(resource);
        }
        Ok(())
    }

    /// Drop a resource from the candidate list only.
    pub(crate) fn remove_card_resource(&self, resource: &CardResource) {
        let mut card_resources = self.card_resources.lock();
        let before = card_resources.len();
        card_resources.retain(|candidate| candidate != resource);
        if card_resources.len() != before {
            info!(profile = %self.name(), "Remove {resource} from profile");
        }
    }

    /// Search a free resource, retrying until the deadline in blocking mode.
    ///
    /// The search gives up as soon as the service is stopped. A deadline too
    /// far away to be represented means waiting without limit.
    pub(crate) fn allocate(&self, service: &ServiceInner) -> Option<CardResource> {
        let deadline = self
            .blocking_mode
            .map(|mode| Instant::now().checked_add(mode.timeout));
        loop {
            if !service.is_started() {
                return None;
            }
            let found = self.search(service);
            if found.is_some() {
                return found;
            }
            let (Some(mode), Some(deadline)) = (self.blocking_mode, deadline) else {
                return None;
            };
            thread::sleep(mode.cycle);
            if deadline.is_some_and(|deadline| Instant::now() > deadline) {
                return None;
            }
        }
    }

    fn search(&self, service: &ServiceInner) -> Option<CardResource> {
        match (self.plugins.is_empty(), self.pool_plugins.is_empty()) {
            (true, _) => self.pool_search(service),
            (false, true) => self.regular_search(service),
            (false, false) if self.use_pool_first => self
                .pool_search(service)
                .or_else(|| self.regular_search(service)),
            (false, false) => self
                .regular_search(service)
                .or_else(|| self.pool_search(service)),
        }
    }

    fn regular_search(&self, service: &ServiceInner) -> Option<CardResource> {
        let candidates = self.card_resources();
        let matcher = self.profile.matcher().as_ref();
        let mut unusable = Vec::new();
        let mut result = None;

        for candidate in candidates {
            let Some(manager) = service.reader_manager(candidate.reader_name()) else {
                unusable.push(candidate);
                continue;
            };
            let outcome = manager.session().lock(&candidate, matcher);
            match outcome {
                LockOutcome::Locked => {
                    self.reorder(&candidate);
                    result = Some(candidate);
                    break;
                }
                LockOutcome::Busy => {}
                LockOutcome::Stale => unusable.push(candidate),
            }
        }

        for resource in &unusable {
            debug!(profile = %self.name(), "Purging unusable {resource}");
            service.purge_card_resource(resource);
        }
        result
    }

    fn reorder(&self, allocated: &CardResource) {
        let mut card_resources = self.card_resources.lock();
        match self.strategy {
            AllocationStrategy::First => {}
            AllocationStrategy::Cyclic => {
                if let Some(index) = card_resources.iter().position(|c| c == allocated) {
                    card_resources.rotate_left(index + 1);
                }
            }
            AllocationStrategy::Random => card_resources.shuffle(&mut rand::rng()),
        }
    }

    fn pool_search(&self, service: &ServiceInner) -> Option<CardResource> {
        let matcher = self.profile.matcher().as_ref();
        let group = self.profile.reader_group_reference();

        for pool in &self.pool_plugins {
            let reader = match pool.allocate_reader(group) {
                Ok(Some(reader)) => reader,
                Ok(None) => continue,
                Err(e) => {
                    debug!(plugin = %pool.name(), "Pool reader allocation failed: {e}");
                    continue;
                }
            };

            let matched = match pool.selected_smart_card(reader.as_ref()) {
                Ok(Some(selected)) => matcher.matches_selected(&selected),
                Ok(None) => matcher.matches(reader.as_ref()),
                Err(e) => {
                    debug!(plugin = %pool.name(), "Unable to get the selected card: {e}");
                    None
                }
            };

            match matched {
                Some(smart_card) => {
                    let extension = pool.reader_extension(reader.name());
                    let resource = CardResource::new(reader, extension, smart_card);
                    if service.register_pool_card_resource(&resource, Arc::clone(pool)) {
                        return Some(resource);
                    }
                    release_silently(pool.as_ref(), resource.reader().as_ref());
                    return None;
                }
                None => release_silently(pool.as_ref(), reader.as_ref()),
            }
        }
        None
    }
}

fn release_silently(pool: &dyn PoolPlugin, reader: &dyn CardReader) {
    if let Err(e) = pool.release_reader(reader) {
        debug!(plugin = %pool.name(), reader = %reader.name(), "Pool reader release failed: {e}");
    }
}
