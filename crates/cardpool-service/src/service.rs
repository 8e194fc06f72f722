//! The card resource service.
//!
//! The service owns one [`ReaderManager`] per managed reader and one
//! [`ProfileManager`] per declared profile. Allocation requests come from
//! client threads; plugin and reader events come from hardware threads. Both
//! sides meet on per-reader sessions, so different readers are handled
//! independently.
//!
//! # Lock order
//!
//! Reader session, then profile candidate list. The shared maps are only
//! held long enough to clone an entry out of them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use cardpool_core::{Error, Result};
use cardpool_hardware::{
    CardReader, DetectionMode, PluginError, PluginEvent, PluginObserver, PoolPlugin, ReaderEvent,
    ReaderObserver,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::card_resource::CardResource;
use crate::config::{PluginConfig, ServiceConfig};
use crate::profile_manager::ProfileManager;
use crate::reader_manager::{ReaderManager, ReaderSession};
use crate::state::ServiceState;

/// Allocates card resources to named profiles.
///
/// The service is created stopped. [`start`](Self::start) scans the
/// configured plugins, builds the candidate lists of every profile and
/// starts the requested monitoring. Dropping the service stops it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use cardpool_core::SmartCard;
/// use cardpool_hardware::PowerOnDataMatcher;
/// use cardpool_hardware::mock::{MockPlugin, MockReader};
/// use cardpool_service::{CardResourceService, PluginConfig, ProfileConfig, ServiceConfig};
///
/// let reader = MockReader::new("R1");
/// reader.insert_card(SmartCard::new(Some("3B00")));
/// let plugin = MockPlugin::new("PCSC");
/// plugin.add_reader(reader);
///
/// let config = ServiceConfig::builder()
///     .with_plugin(PluginConfig::new(plugin))
///     .with_profile(ProfileConfig::new("ANY", Arc::new(PowerOnDataMatcher::any())))
///     .build()
///     .unwrap();
///
/// let service = CardResourceService::new(config);
/// service.start().unwrap();
///
/// let resource = service.allocate("ANY").unwrap().unwrap();
/// assert_eq!(resource.reader_name(), "R1");
/// assert!(service.allocate("ANY").unwrap().is_none());
///
/// service.release(&resource).unwrap();
/// ```
pub struct CardResourceService {
    inner: Arc<ServiceInner>,
}

impl CardResourceService {
    /// Create a stopped service using the given configuration.
    pub fn new(config: ServiceConfig) -> Self {
        let service = Self::unconfigured();
        *service.inner.config.write() = Some(Arc::new(config));
        service
    }

    /// Create a stopped service without configuration.
    ///
    /// [`start`](Self::start) fails until [`configure`](Self::configure) is called.
    pub fn unconfigured() -> Self {
        Self {
            inner: ServiceInner::new(),
        }
    }

    /// Apply a new configuration.
    ///
    /// A started service is stopped, reconfigured and started again.
    ///
    /// # Errors
    ///
    /// Returns an error if the restart fails.
    pub fn configure(&self, config: ServiceConfig) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        info!("Applying new card resource service configuration");
        let restart = self.inner.state().is_started();
        if restart {
            self.inner.stop();
        }
        *self.inner.config.write() = Some(Arc::new(config));
        if restart {
            self.inner.start()?;
        }
        info!("New card resource service configuration applied");
        Ok(())
    }

    /// Start the service, stopping it first if it is already started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if no configuration was provided.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.start()
    }

    /// Stop the service: detach every observer, give lent pool readers back
    /// and forget every reader and profile.
    pub fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.stop();
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> ServiceState {
        self.inner.state()
    }

    /// Returns `true` if the service is started.
    pub fn is_started(&self) -> bool {
        self.inner.state().is_started()
    }

    /// Get the applied configuration.
    pub fn config(&self) -> Option<Arc<ServiceConfig>> {
        self.inner.config()
    }

    /// Allocate a free card resource of the named profile.
    ///
    /// Returns `Ok(None)` when no resource is available, after the blocking
    /// deadline if blocking allocation is configured. The returned resource
    /// stays reserved until [`release`](Self::release) or
    /// [`remove`](Self::remove) is called, or until the usage timeout lets
    /// another caller reclaim it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the service is stopped and
    /// [`Error::UnknownProfile`] if the name is blank or undeclared.
    pub fn allocate(&self, profile_name: &str) -> Result<Option<CardResource>> {
        debug!(profile = profile_name, "Searching available card resource");
        self.inner.ensure_started()?;
        let profile = self.inner.profile(profile_name)?;

        let resource = profile.allocate(&self.inner);
        match &resource {
            Some(resource) => debug!(profile = profile_name, "Card resource found: {resource}"),
            None => debug!(profile = profile_name, "No card resource available"),
        }
        Ok(resource)
    }

    /// Give a card resource back.
    ///
    /// Releasing a resource the service no longer knows is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the service is stopped.
    pub fn release(&self, resource: &CardResource) -> Result<()> {
        debug!("Releasing {resource}");
        self.inner.ensure_started()?;
        self.inner.release(resource);
        debug!("Card resource released");
        Ok(())
    }

    /// Release a card resource and forget it everywhere.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the service is stopped.
    pub fn remove(&self, resource: &CardResource) -> Result<()> {
        self.inner.ensure_started()?;
        self.inner.release(resource);
        self.inner.purge_card_resource(resource);
        info!("Card resource removed: {resource}");
        Ok(())
    }

    /// Get a snapshot of the named profile's candidate list, in search order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if the service is stopped and
    /// [`Error::UnknownProfile`] if the name is blank or undeclared.
    pub fn card_resources(&self, profile_name: &str) -> Result<Vec<CardResource>> {
        self.inner.ensure_started()?;
        Ok(self.inner.profile(profile_name)?.card_resources())
    }

    /// Get the names of the managed readers, sorted.
    pub fn reader_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.readers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of pool resources currently lent.
    pub fn pool_resource_count(&self) -> usize {
        self.inner.pool_resources.lock().len()
    }
}

impl Default for CardResourceService {
    fn default() -> Self {
        Self::unconfigured()
    }
}

impl Drop for CardResourceService {
    fn drop(&mut self) {
        if self.inner.state().is_started() {
            self.inner.stop();
        }
    }
}

impl fmt::Debug for CardResourceService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardResourceService")
            .field("state", &self.inner.state())
            .field("readers", &self.reader_names())
            .field("pool_resources", &self.pool_resource_count())
            .finish()
    }
}

/// Shared service state, also reachable from hardware threads through the
/// observer.
pub(crate) struct ServiceInner {
    lifecycle: Mutex<()>,
    state: RwLock<ServiceState>,
    config: RwLock<Option<Arc<ServiceConfig>>>,
    readers: RwLock<HashMap<String, Arc<ReaderManager>>>,
    profiles: RwLock<HashMap<String, Arc<ProfileManager>>>,
    pool_resources: Mutex<HashMap<Uuid, (CardResource, Arc<dyn PoolPlugin>)>>,
    observed_readers: RwLock<HashMap<String, HashSet<String>>>,
    observer: Arc<ServiceObserver>,
}

impl ServiceInner {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|service| Self {
            lifecycle: Mutex::new(()),
            state: RwLock::new(ServiceState::Stopped),
            config: RwLock::new(None),
            readers: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            pool_resources: Mutex::new(HashMap::new()),
            observed_readers: RwLock::new(HashMap::new()),
            observer: Arc::new(ServiceObserver {
                service: service.clone(),
            }),
        })
    }

    fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.state().is_started()
    }

    fn config(&self) -> Option<Arc<ServiceConfig>> {
        self.config.read().clone()
    }

    fn ensure_started(&self) -> Result<()> {
        if self.state().is_started() {
            Ok(())
        } else {
            Err(Error::NotStarted)
        }
    }

    fn profile(&self, name: &str) -> Result<Arc<ProfileManager>> {
        if name.trim().is_empty() {
            return Err(Error::unknown_profile(name));
        }
        self.profiles
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_profile(name))
    }

    fn profile_managers(&self) -> Vec<Arc<ProfileManager>> {
        self.profiles.read().values().cloned().collect()
    }

    pub(crate) fn reader_manager(&self, reader_name: &str) -> Option<Arc<ReaderManager>> {
        self.readers.read().get(reader_name).cloned()
    }

    /// Record a lent pool resource. Returns `false`, recording nothing, once
    /// the service is stopped.
    pub(crate) fn register_pool_card_resource(
        &self,
        resource: &CardResource,
        pool: Arc<dyn PoolPlugin>,
    ) -> bool {
        let mut pool_resources = self.pool_resources.lock();
        if !self.is_started() {
            return false;
        }
        pool_resources.insert(resource.id(), (resource.clone(), pool));
        true
    }

    fn start(&self) -> Result<()> {
        let config = self.config().ok_or(Error::NotConfigured)?;
        if self.state().is_started() {
            self.stop();
        }
        // Late events of a previous run may have left entries behind
        self.clear();
        info!("Starting card resource service");

        for entry in config.plugins() {
            for reader in entry.plugin().readers() {
                self.register_reader(reader, entry, &config);
            }
        }

        for profile_config in config.profiles() {
            let profile = Arc::new(ProfileManager::new(profile_config, &config));
            for plugin in profile.plugins() {
                for reader in plugin.readers() {
                    let Some(manager) = self.reader_manager(reader.name()) else {
                        continue;
                    };
                    if let Err(e) = profile.offer(&mut manager.session()) {
                        warn!(
                            profile = %profile.name(),
                            reader = %reader.name(),
                            "Reader setup failed, reader left out of the service: {e}"
                        );
                    }
                }
            }
            self.profiles
                .write()
                .insert(profile.name().to_string(), profile);
        }

        let unused: Vec<Arc<ReaderManager>> = self
            .readers
            .read()
            .values()
            .filter(|manager| !manager.is_active())
            .cloned()
            .collect();
        for manager in &unused {
            debug!(reader = %manager.reader_name(), "Reader not used by any profile");
            self.unregister_reader(manager);
        }

        *self.state.write() = ServiceState::Started;
        self.start_monitoring(&config);
        info!(
            readers = self.readers.read().len(),
            profiles = config.profiles().len(),
            "Card resource service started"
        );
        Ok(())
    }

    fn stop(&self) {
        *self.state.write() = ServiceState::Stopped;
        if let Some(config) = self.config() {
            self.stop_monitoring(&config);
        }
        self.clear();
        info!("Card resource service stopped");
    }

    fn clear(&self) {
        self.readers.write().clear();
        self.profiles.write().clear();
        self.observed_readers.write().clear();

        let lent: Vec<_> = self
            .pool_resources
            .lock()
            .drain()
            .map(|(_, lent)| lent)
            .collect();
        for (resource, pool) in lent {
            debug!(plugin = %pool.name(), "Giving back {resource}");
            if let Err(e) = pool.release_reader(resource.reader().as_ref()) {
                debug!(plugin = %pool.name(), "Pool reader release failed: {e}");
            }
        }
    }

    fn register_reader(
        &self,
        reader: Arc<dyn CardReader>,
        entry: &PluginConfig,
        config: &ServiceConfig,
    ) -> Arc<ReaderManager> {
        let reader_name = reader.name().to_string();
        let observable = reader.as_observable().is_some();
        let manager = Arc::new(ReaderManager::new(
            reader,
            entry.plugin().reader_extension(&reader_name),
            entry.name(),
            entry.reader_configurator().cloned(),
            config.usage_timeout(),
        ));

        self.readers
            .write()
            .insert(reader_name.clone(), Arc::clone(&manager));
        if observable {
            self.observed_readers
                .write()
                .entry(entry.name().to_string())
                .or_default()
                .insert(reader_name);
        }
        manager
    }

    fn unregister_reader(&self, manager: &Arc<ReaderManager>) {
        let reader_name = manager.reader_name();
        {
            let mut readers = self.readers.write();
            if readers
                .get(reader_name)
                .is_some_and(|current| Arc::ptr_eq(current, manager))
            {
                readers.remove(reader_name);
            }
        }

        if let Some(names) = self.observed_readers.write().get_mut(manager.plugin_name()) {
            names.remove(reader_name);
        }
        if let Some(observable) = manager.reader().as_observable() {
            observable.stop_card_detection();
            observable.unsubscribe();
        }
    }

    fn start_monitoring(&self, config: &ServiceConfig) {
        for entry in config.plugins() {
            if entry.is_plugin_monitoring()
                && let Some(observable) = entry.plugin().as_observable()
            {
                info!(plugin = %entry.name(), "Plugin monitoring start requested");
                observable.subscribe(Arc::clone(&self.observer) as Arc<dyn PluginObserver>);
            }

            if entry.is_reader_monitoring() {
                for manager in self.observed_managers(entry.name()) {
                    self.start_reader_observation(manager.reader().as_ref());
                }
            }
        }
    }

    fn stop_monitoring(&self, config: &ServiceConfig) {
        for entry in config.plugins() {
            if entry.is_plugin_monitoring()
                && let Some(observable) = entry.plugin().as_observable()
            {
                observable.unsubscribe();
                info!(plugin = %entry.name(), "Plugin monitoring stopped");
            }

            if entry.is_reader_monitoring() {
                for manager in self.observed_managers(entry.name()) {
                    if let Some(observable) = manager.reader().as_observable() {
                        observable.stop_card_detection();
                        observable.unsubscribe();
                        info!(reader = %manager.reader_name(), "Reader monitoring stopped");
                    }
                }
            }
        }
    }

    fn observed_managers(&self, plugin_name: &str) -> Vec<Arc<ReaderManager>> {
        let names: Vec<String> = self
            .observed_readers
            .read()
            .get(plugin_name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names
            .iter()
            .filter_map(|name| self.reader_manager(name))
            .collect()
    }

    fn start_reader_observation(&self, reader: &dyn CardReader) {
        if let Some(observable) = reader.as_observable() {
            info!(reader = %reader.name(), "Reader monitoring start requested");
            observable.subscribe(Arc::clone(&self.observer) as Arc<dyn ReaderObserver>);
            observable.start_card_detection(DetectionMode::Repeating);
        }
    }

    fn release(&self, resource: &CardResource) {
        let pooled = self.pool_resources.lock().remove(&resource.id());
        if let Some((_, pool)) = pooled {
            if let Err(e) = pool.release_reader(resource.reader().as_ref()) {
                debug!(plugin = %pool.name(), "Pool reader release failed: {e}");
            }
            return;
        }

        if let Some(manager) = self.reader_manager(resource.reader_name()) {
            let mut session = manager.session();
            if session.owns(resource) {
                session.unlock();
            }
        }
    }

    /// Forget a resource in its reader and in every profile.
    pub(crate) fn purge_card_resource(&self, resource: &CardResource) {
        let manager = self.reader_manager(resource.reader_name());
        let mut session = manager.as_ref().map(|manager| manager.session());
        if let Some(session) = session.as_mut() {
            session.remove_card_resource(resource);
        }
        for profile in self.profile_managers() {
            profile.remove_card_resource(resource);
        }
    }

    fn remove_all_card_resources(&self, session: &mut ReaderSession<'_>) {
        let profiles = self.profile_managers();
        for resource in session.card_resources() {
            session.unlock();
            session.remove_card_resource(&resource);
            for profile in &profiles {
                profile.remove_card_resource(&resource);
            }
            info!("Card resource removed: {resource}");
        }
    }

    fn offer_to_profiles(&self, session: &mut ReaderSession<'_>) {
        for profile in self.profile_managers() {
            if let Err(e) = profile.on_reader_connected(session) {
                warn!(
                    profile = %profile.name(),
                    reader = %session.manager().reader_name(),
                    "Reader setup failed, reader left out of the service: {e}"
                );
                break;
            }
        }
    }

    fn on_plugin_event(&self, event: PluginEvent) {
        if !self.state().is_started() {
            return;
        }
        let Some(config) = self.config() else {
            return;
        };
        let Some(entry) = config.plugin(event.plugin_name()) else {
            debug!(plugin = %event.plugin_name(), "Event from an unmanaged plugin ignored");
            return;
        };

        match &event {
            PluginEvent::ReaderConnected { reader_names, .. } => {
                for reader_name in reader_names {
                    if let Some(reader) = entry.plugin().reader(reader_name) {
                        self.on_reader_connected(reader, entry, &config);
                    }
                }
            }
            PluginEvent::ReaderDisconnected { reader_names, .. } => {
                for reader_name in reader_names {
                    if let Some(manager) = self.reader_manager(reader_name) {
                        self.on_reader_disconnected(&manager);
                    }
                }
            }
            _ => debug!("Unsupported plugin event ignored: {event:?}"),
        }
    }

    fn on_reader_connected(
        &self,
        reader: Arc<dyn CardReader>,
        entry: &PluginConfig,
        config: &ServiceConfig,
    ) {
        if let Some(previous) = self.reader_manager(reader.name()) {
            self.on_reader_disconnected(&previous);
        }

        let manager = self.register_reader(reader, entry, config);
        let active = {
            let mut session = manager.session();
            self.offer_to_profiles(&mut session);
            session.is_active()
        };

        if active {
            info!(reader = %manager.reader_name(), "Reader connected and accepted");
            if entry.is_reader_monitoring() {
                self.start_reader_observation(manager.reader().as_ref());
            }
        } else {
            debug!(reader = %manager.reader_name(), "Connected reader not used by any profile");
            self.unregister_reader(&manager);
        }
    }

    fn on_reader_disconnected(&self, manager: &Arc<ReaderManager>) {
        info!(
            reader = %manager.reader_name(),
            "Removing disconnected reader and all associated card resources"
        );
        self.remove_all_card_resources(&mut manager.session());
        self.unregister_reader(manager);
    }

    fn on_plugin_observation_error(&self, plugin_name: &str, error: PluginError) {
        error!(plugin = plugin_name, "Plugin observation error: {error}");
        let handler = self.config().and_then(|config| {
            config
                .plugin(plugin_name)
                .and_then(|entry| entry.plugin_observation_error_handler().cloned())
        });
        if let Some(handler) = handler {
            handler(plugin_name, &error);
        }
    }

    fn on_reader_observation_error(&self, reader_name: &str, error: PluginError) {
        error!(reader = reader_name, "Reader observation error: {error}");
        let Some(config) = self.config() else {
            return;
        };
        let entry = match self.reader_manager(reader_name) {
            Some(manager) => config.plugin(manager.plugin_name()),
            None => config
                .plugins()
                .iter()
                .find(|entry| entry.plugin().reader(reader_name).is_some()),
        };
        if let Some(handler) = entry.and_then(PluginConfig::reader_observation_error_handler) {
            handler(reader_name, &error);
        }
    }

    fn on_reader_event(&self, event: ReaderEvent) {
        if !self.state().is_started() {
            return;
        }
        let Some(manager) = self.reader_manager(event.reader_name()) else {
            return;
        };

        let mut session = manager.session();
        if event.is_card_arrival() {
            info!(
                reader = %event.reader_name(),
                "Creating new card resources matching the new card inserted"
            );
            self.offer_to_profiles(&mut session);
        } else {
            info!(
                reader = %event.reader_name(),
                "Removing all card resources caused by a card removal or reader unregistration"
            );
            self.remove_all_card_resources(&mut session);
        }
    }
}

/// The single observer the service registers on plugins and readers.
struct ServiceObserver {
    service: Weak<ServiceInner>,
}

impl PluginObserver for ServiceObserver {
    fn on_plugin_event(&self, event: PluginEvent) {
        if let Some(service) = self.service.upgrade() {
            service.on_plugin_event(event);
        }
    }

    fn on_plugin_observation_error(&self, plugin_name: &str, error: PluginError) {
        if let Some(service) = self.service.upgrade() {
            service.on_plugin_observation_error(plugin_name, error);
        }
    }
}

impl ReaderObserver for ServiceObserver {
    fn on_reader_event(&self, event: ReaderEvent) {
        if let Some(service) = self.service.upgrade() {
            service.on_reader_event(event);
        }
    }

    fn on_reader_observation_error(&self, reader_name: &str, error: PluginError) {
        if let Some(service) = self.service.upgrade() {
            service.on_reader_observation_error(reader_name, error);
        }
    }
}
