//! Service configuration.
//!
//! A configuration is assembled with [`ServiceConfig::builder`] and validated
//! once by [`ServiceConfigBuilder::build`]. The resulting [`ServiceConfig`] is
//! immutable; the service shares it as an `Arc`.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use cardpool_core::AllocationStrategy;
//! use cardpool_hardware::PowerOnDataMatcher;
//! use cardpool_hardware::mock::MockPlugin;
//! use cardpool_service::{PluginConfig, ProfileConfig, ServiceConfig};
//! use std::sync::Arc;
//!
//! let plugin = MockPlugin::new("PCSC");
//! let config = ServiceConfig::builder()
//!     .with_plugin(PluginConfig::new(plugin).with_reader_monitoring())
//!     .with_allocation_strategy(AllocationStrategy::Cyclic)
//!     .with_usage_timeout(Duration::from_secs(30))
//!     .with_profile(
//!         ProfileConfig::new("SAM", Arc::new(PowerOnDataMatcher::any()))
//!             .with_reader_name_regex(".*SAM.*"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.allocation_strategy(), AllocationStrategy::Cyclic);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cardpool_core::constants::{
    DEFAULT_ALLOCATION_STRATEGY, DEFAULT_USAGE_TIMEOUT, DEFAULT_USE_POOL_FIRST,
    MIN_BLOCKING_TIMEOUT, MIN_CYCLE_DURATION,
};
use cardpool_core::{AllocationStrategy, Error, Result};
use cardpool_hardware::{CardProfileMatcher, Plugin, PluginError, PoolPlugin, ReaderConfigurator};
use regex::Regex;

/// Application callback receiving the name of the plugin or reader whose
/// observation failed, and the failure.
pub type ObservationErrorHandler = Arc<dyn Fn(&str, &PluginError) + Send + Sync>;

/// A regular plugin together with its monitoring options.
#[derive(Clone)]
pub struct PluginConfig {
    plugin: Arc<dyn Plugin>,
    reader_configurator: Option<Arc<dyn ReaderConfigurator>>,
    with_plugin_monitoring: bool,
    with_reader_monitoring: bool,
    plugin_observation_error_handler: Option<ObservationErrorHandler>,
    reader_observation_error_handler: Option<ObservationErrorHandler>,
}

impl PluginConfig {
    /// Create a plugin entry without setup hook or monitoring.
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            plugin,
            reader_configurator: None,
            with_plugin_monitoring: false,
            with_reader_monitoring: false,
            plugin_observation_error_handler: None,
            reader_observation_error_handler: None,
        }
    }

    /// Run this hook once on each reader the first time a profile accepts it.
    pub fn with_reader_configurator(mut self, configurator: Arc<dyn ReaderConfigurator>) -> Self {
        self.reader_configurator = Some(configurator);
        self
    }

    /// Observe reader connections and disconnections, if the plugin is observable.
    pub fn with_plugin_monitoring(mut self) -> Self {
        self.with_plugin_monitoring = true;
        self
    }

    /// Observe card insertions and removals on the managed observable readers.
    pub fn with_reader_monitoring(mut self) -> Self {
        self.with_reader_monitoring = true;
        self
    }

    /// Notify the application when the plugin reports an observation failure.
    pub fn with_plugin_observation_error_handler(mut self, handler: ObservationErrorHandler) -> Self {
        self.plugin_observation_error_handler = Some(handler);
        self
    }

    /// Notify the application when one of the plugin's readers reports an
    /// observation failure.
    pub fn with_reader_observation_error_handler(mut self, handler: ObservationErrorHandler) -> Self {
        self.reader_observation_error_handler = Some(handler);
        self
    }

    /// Get the plugin.
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Get the plugin name.
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Get the reader setup hook.
    pub fn reader_configurator(&self) -> Option<&Arc<dyn ReaderConfigurator>> {
        self.reader_configurator.as_ref()
    }

    /// Returns `true` if plugin monitoring is requested.
    pub fn is_plugin_monitoring(&self) -> bool {
        self.with_plugin_monitoring
    }

    /// Returns `true` if reader monitoring is requested.
    pub fn is_reader_monitoring(&self) -> bool {
        self.with_reader_monitoring
    }

    pub(crate) fn plugin_observation_error_handler(&self) -> Option<&ObservationErrorHandler> {
        self.plugin_observation_error_handler.as_ref()
    }

    pub(crate) fn reader_observation_error_handler(&self) -> Option<&ObservationErrorHandler> {
        self.reader_observation_error_handler.as_ref()
    }
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("plugin", &self.plugin.name())
            .field("reader_configurator", &self.reader_configurator.is_some())
            .field("with_plugin_monitoring", &self.with_plugin_monitoring)
            .field("with_reader_monitoring", &self.with_reader_monitoring)
            .field(
                "plugin_observation_error_handler",
                &self.plugin_observation_error_handler.is_some(),
            )
            .field(
                "reader_observation_error_handler",
                &self.reader_observation_error_handler.is_some(),
            )
            .finish()
    }
}

/// A named allocation profile.
#[derive(Clone)]
pub struct ProfileConfig {
    name: String,
    matcher: Arc<dyn CardProfileMatcher>,
    plugin_names: Vec<String>,
    reader_name_regex: Option<String>,
    reader_name_filter: Option<Regex>,
    reader_group_reference: Option<String>,
}

impl ProfileConfig {
    /// Create a profile drawing from every configured plugin.
    pub fn new(name: impl Into<String>, matcher: Arc<dyn CardProfileMatcher>) -> Self {
        Self {
            name: name.into(),
            matcher,
            plugin_names: Vec::new(),
            reader_name_regex: None,
            reader_name_filter: None,
            reader_group_reference: None,
        }
    }

    /// Restrict the profile to the named plugins (regular or pool).
    pub fn with_plugins<I, S>(mut self, plugin_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugin_names = plugin_names.into_iter().map(Into::into).collect();
        self
    }

    /// Only accept readers whose whole name matches this regular expression.
    pub fn with_reader_name_regex(mut self, pattern: impl Into<String>) -> Self {
        self.reader_name_regex = Some(pattern.into());
        self
    }

    /// Group reference passed to pool plugins when allocating a reader.
    pub fn with_reader_group_reference(mut self, reference: impl Into<String>) -> Self {
        self.reader_group_reference = Some(reference.into());
        self
    }

    /// Get the profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the card matcher.
    pub fn matcher(&self) -> &Arc<dyn CardProfileMatcher> {
        &self.matcher
    }

    /// Get the plugins the profile is restricted to. Empty means every plugin.
    pub fn plugin_names(&self) -> &[String] {
        &self.plugin_names
    }

    /// Returns `true` if the profile draws from every configured plugin.
    pub fn uses_default_plugins(&self) -> bool {
        self.plugin_names.is_empty()
    }

    /// Get the reader name pattern as configured.
    pub fn reader_name_regex(&self) -> Option<&str> {
        self.reader_name_regex.as_deref()
    }

    /// Get the pool reader group reference.
    pub fn reader_group_reference(&self) -> Option<&str> {
        self.reader_group_reference.as_deref()
    }

    /// Check a reader name against the profile filter.
    pub fn accepts_reader(&self, reader_name: &str) -> bool {
        self.reader_name_filter
            .as_ref()
            .is_none_or(|filter| filter.is_match(reader_name))
    }

    fn compile_filter(&mut self) -> Result<()> {
        if let Some(pattern) = &self.reader_name_regex {
            let filter = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                Error::config(format!(
                    "Invalid reader name regex for profile {:?}: {e}",
                    self.name
                ))
            })?;
            self.reader_name_filter = Some(filter);
        }
        Ok(())
    }
}

impl fmt::Debug for ProfileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileConfig")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("plugin_names", &self.plugin_names)
            .field("reader_name_regex", &self.reader_name_regex)
            .field("reader_group_reference", &self.reader_group_reference)
            .finish()
    }
}

/// Blocking allocation: retry every `cycle` until `timeout` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingMode {
    /// Pause between two attempts.
    pub cycle: Duration,

    /// Overall deadline, counted from the allocation call.
    pub timeout: Duration,
}

/// Validated, immutable service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    plugins: Vec<PluginConfig>,
    pool_plugins: Vec<Arc<dyn PoolPlugin>>,
    allocation_strategy: AllocationStrategy,
    usage_timeout: Duration,
    use_pool_first: bool,
    profiles: Vec<ProfileConfig>,
    blocking_mode: Option<BlockingMode>,
}

impl ServiceConfig {
    /// Create a configuration builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::new()
    }

    /// Get the regular plugins, in declaration order.
    pub fn plugins(&self) -> &[PluginConfig] {
        &self.plugins
    }

    /// Get a regular plugin entry by name.
    pub fn plugin(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|plugin| plugin.name() == name)
    }

    /// Get the pool plugins, in declaration order.
    pub fn pool_plugins(&self) -> &[Arc<dyn PoolPlugin>] {
        &self.pool_plugins
    }

    /// Get the allocation strategy.
    pub fn allocation_strategy(&self) -> AllocationStrategy {
        self.allocation_strategy
    }

    /// Get the reader usage timeout. Zero means locks never expire.
    pub fn usage_timeout(&self) -> Duration {
        self.usage_timeout
    }

    /// Returns `true` if pool plugins are searched before regular plugins.
    pub fn use_pool_first(&self) -> bool {
        self.use_pool_first
    }

    /// Get the profiles, in declaration order.
    pub fn profiles(&self) -> &[ProfileConfig] {
        &self.profiles
    }

    /// Get the blocking allocation settings, if enabled.
    pub fn blocking_mode(&self) -> Option<BlockingMode> {
        self.blocking_mode
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    plugins: Vec<PluginConfig>,
    pool_plugins: Vec<Arc<dyn PoolPlugin>>,
    allocation_strategy: Option<AllocationStrategy>,
    usage_timeout: Option<Duration>,
    use_pool_first: Option<bool>,
    profiles: Vec<ProfileConfig>,
    blocking_mode: Option<BlockingMode>,
    repeated: Vec<&'static str>,
}

impl ServiceConfigBuilder {
    fn new() -> Self {
        Self {
            plugins: Vec::new(),
            pool_plugins: Vec::new(),
            allocation_strategy: None,
            usage_timeout: None,
            use_pool_first: None,
            profiles: Vec::new(),
            blocking_mode: None,
            repeated: Vec::new(),
        }
    }

    /// Add a regular plugin.
    pub fn with_plugin(mut self, plugin: PluginConfig) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Add a pool plugin.
    pub fn with_pool_plugin(mut self, plugin: Arc<dyn PoolPlugin>) -> Self {
        self.pool_plugins.push(plugin);
        self
    }

    /// Set the candidate ordering strategy.
    pub fn with_allocation_strategy(mut self, strategy: AllocationStrategy) -> Self {
        if self.allocation_strategy.replace(strategy).is_some() {
            self.repeated.push("allocation strategy");
        }
        self
    }

    /// Set the duration after which a reader lock may be reclaimed.
    pub fn with_usage_timeout(mut self, timeout: Duration) -> Self {
        if self.usage_timeout.replace(timeout).is_some() {
            self.repeated.push("usage timeout");
        }
        self
    }

    /// Search pool plugins before regular plugins.
    pub fn use_pool_first(mut self, pool_first: bool) -> Self {
        if self.use_pool_first.replace(pool_first).is_some() {
            self.repeated.push("pool precedence");
        }
        self
    }

    /// Add an allocation profile.
    pub fn with_profile(mut self, profile: ProfileConfig) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Retry allocation every `cycle` until `timeout` elapses.
    pub fn with_blocking_allocation_mode(mut self, cycle: Duration, timeout: Duration) -> Self {
        if self
            .blocking_mode
            .replace(BlockingMode { cycle, timeout })
            .is_some()
        {
            self.repeated.push("blocking allocation mode");
        }
        self
    }

    /// Validate and build the configuration.
    ///
    /// Plugins used by no profile are left out of the result, unless some
    /// profile draws from every plugin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a section is configured twice, if no
    /// plugin or no profile is declared, if plugin or profile names are
    /// duplicated or blank, if a profile names an undeclared plugin, if a
    /// reader name regex is invalid, or if a duration is below one
    /// millisecond.
    pub fn build(self) -> Result<ServiceConfig> {
        let Self {
            mut plugins,
            mut pool_plugins,
            allocation_strategy,
            usage_timeout,
            use_pool_first,
            mut profiles,
            blocking_mode,
            repeated,
        } = self;

        if let Some(section) = repeated.first() {
            return Err(Error::config(format!("The {section} is already configured")));
        }

        if plugins.is_empty() && pool_plugins.is_empty() {
            return Err(Error::config("No plugin configured"));
        }
        if profiles.is_empty() {
            return Err(Error::config("No card resource profile configured"));
        }

        let mut plugin_names = HashSet::new();
        let declared = plugins
            .iter()
            .map(|plugin| plugin.name())
            .chain(pool_plugins.iter().map(|plugin| plugin.name()));
        for name in declared {
            if !plugin_names.insert(name.to_string()) {
                return Err(Error::config(format!(
                    "Plugin {name:?} is configured more than once"
                )));
            }
        }

        let mut profile_names = HashSet::new();
        for profile in &mut profiles {
            if profile.name.trim().is_empty() {
                return Err(Error::config("A card resource profile has a blank name"));
            }
            if !profile_names.insert(profile.name.clone()) {
                return Err(Error::config(
                    "Some card resource profiles are configured with the same profile name",
                ));
            }
            if let Some(unknown) = profile
                .plugin_names
                .iter()
                .find(|name| !plugin_names.contains(*name))
            {
                return Err(Error::config(format!(
                    "Profile {:?} specifies plugin {unknown:?} which is not configured in the global list",
                    profile.name
                )));
            }
            profile.compile_filter()?;
        }

        if let Some(timeout) = usage_timeout
            && timeout < Duration::from_millis(1)
        {
            return Err(Error::config("The usage timeout must be at least 1 ms"));
        }
        if let Some(mode) = blocking_mode {
            if mode.cycle < MIN_CYCLE_DURATION {
                return Err(Error::config("The cycle duration must be at least 1 ms"));
            }
            if mode.timeout < MIN_BLOCKING_TIMEOUT {
                return Err(Error::config("The blocking timeout must be at least 1 ms"));
            }
        }

        if !profiles.iter().any(ProfileConfig::uses_default_plugins) {
            let used: HashSet<&str> = profiles
                .iter()
                .flat_map(|profile| profile.plugin_names.iter().map(String::as_str))
                .collect();
            plugins.retain(|plugin| used.contains(plugin.name()));
            pool_plugins.retain(|plugin| used.contains(plugin.name()));
        }

        Ok(ServiceConfig {
            plugins,
            pool_plugins,
            allocation_strategy: allocation_strategy.unwrap_or(DEFAULT_ALLOCATION_STRATEGY),
            usage_timeout: usage_timeout.unwrap_or(DEFAULT_USAGE_TIMEOUT),
            use_pool_first: use_pool_first.unwrap_or(DEFAULT_USE_POOL_FIRST),
            profiles,
            blocking_mode,
        })
    }
}
