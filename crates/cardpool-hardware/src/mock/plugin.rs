//! Mock plugin implementation for testing and development.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::PluginError;
use crate::events::{PluginEvent, PluginObserver};
use crate::mock::MockReader;
use crate::traits::{CardReader, ObservablePlugin, Plugin, ReaderExtension};

/// Vendor extension handed out by [`MockPlugin`] for each of its readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReaderExtension {
    /// Name of the reader the extension belongs to
    pub reader_name: String,
}

/// Mock plugin owning a programmable set of [`MockReader`]s.
///
/// Readers added with [`MockPlugin::add_reader`] are present from the start.
/// [`MockPlugin::connect_reader`] and [`MockPlugin::disconnect_reader`]
/// simulate hot-plugging and notify the observer of an observable plugin.
///
/// # Examples
///
/// ```
/// use cardpool_hardware::mock::{MockPlugin, MockReader};
/// use cardpool_hardware::traits::Plugin;
///
/// let plugin = MockPlugin::new("PCSC");
/// plugin.add_reader(MockReader::new("ACR122U 00 00"));
///
/// assert_eq!(plugin.readers().len(), 1);
/// assert!(plugin.reader("ACR122U 00 00").is_some());
/// ```
pub struct MockPlugin {
    /// Plugin name
    name: String,

    /// Whether the plugin exposes the observable capability
    observable: bool,

    /// Connected readers and observer
    state: Mutex<MockPluginState>,
}

#[derive(Default)]
struct MockPluginState {
    readers: Vec<Arc<MockReader>>,
    observer: Option<Arc<dyn PluginObserver>>,
}

impl MockPlugin {
    /// Create a plain (non-observable) mock plugin.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name.into(), false))
    }

    /// Create an observable mock plugin.
    pub fn observable(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name.into(), true))
    }

    fn build(name: String, observable: bool) -> Self {
        Self {
            name,
            observable,
            state: Mutex::new(MockPluginState::default()),
        }
    }

    /// Add a reader without raising any event.
    pub fn add_reader(&self, reader: Arc<MockReader>) {
        self.state.lock().readers.push(reader);
    }

    /// Connect a reader and emit [`PluginEvent::ReaderConnected`].
    pub fn connect_reader(&self, reader: Arc<MockReader>) {
        let reader_name = reader.name().to_string();
        let observer = {
            let mut state = self.state.lock();
            state.readers.push(reader);
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.on_plugin_event(PluginEvent::ReaderConnected {
                plugin_name: self.name.clone(),
                reader_names: vec![reader_name],
            });
        }
    }

    /// Disconnect a reader and emit [`PluginEvent::ReaderDisconnected`].
    ///
    /// Returns `false` if the reader is unknown.
    pub fn disconnect_reader(&self, reader_name: &str) -> bool {
        let observer = {
            let mut state = self.state.lock();
            let before = state.readers.len();
            state.readers.retain(|reader| reader.name() != reader_name);
            if state.readers.len() == before {
                return false;
            }
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.on_plugin_event(PluginEvent::ReaderDisconnected {
                plugin_name: self.name.clone(),
                reader_names: vec![reader_name.to_string()],
            });
        }
        true
    }

    /// Report an observation failure to the observer, if any.
    pub fn raise_observation_error(&self, error: PluginError) {
        let observer = self.state.lock().observer.clone();
        if let Some(observer) = observer {
            observer.on_plugin_observation_error(&self.name, error);
        }
    }

    /// Returns `true` if an observer is subscribed.
    pub fn has_observer(&self) -> bool {
        self.state.lock().observer.is_some()
    }
}

impl fmt::Debug for MockPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockPlugin")
            .field("name", &self.name)
            .field("observable", &self.observable)
            .field("readers", &state.readers.len())
            .finish()
    }
}

impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn readers(&self) -> Vec<Arc<dyn CardReader>> {
        self.state
            .lock()
            .readers
            .iter()
            .map(|reader| Arc::clone(reader) as Arc<dyn CardReader>)
            .collect()
    }

    fn reader_extension(&self, reader_name: &str) -> Option<ReaderExtension> {
        let known = self
            .state
            .lock()
            .readers
            .iter()
            .any(|reader| reader.name() == reader_name);
        known.then(|| {
            Arc::new(MockReaderExtension {
                reader_name: reader_name.to_string(),
            }) as ReaderExtension
        })
    }

    fn as_observable(&self) -> Option<&dyn ObservablePlugin> {
        if self.observable { Some(self) } else { None }
    }
}

impl ObservablePlugin for MockPlugin {
    fn subscribe(&self, observer: Arc<dyn PluginObserver>) {
        self.state.lock().observer = Some(observer);
    }

    fn unsubscribe(&self) {
        self.state.lock().observer = None;
    }
}
