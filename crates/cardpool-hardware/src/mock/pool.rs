//! Mock pool plugin implementation for testing and development.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cardpool_core::SmartCard;
use parking_lot::Mutex;

use crate::error::{PluginError, PluginResult};
use crate::mock::MockReader;
use crate::traits::{CardReader, PoolPlugin};

/// Mock pool plugin lending [`MockReader`]s grouped by reference.
///
/// # Examples
///
/// ```
/// use cardpool_hardware::mock::{MockPoolPlugin, MockReader};
/// use cardpool_hardware::traits::PoolPlugin;
///
/// let pool = MockPoolPlugin::new("HSM");
/// pool.add_reader("SAM", MockReader::new("SAM-1"));
///
/// let reader = pool.allocate_reader(Some("SAM")).unwrap().unwrap();
/// assert_eq!(pool.available_count(), 0);
///
/// pool.release_reader(reader.as_ref()).unwrap();
/// assert_eq!(pool.available_count(), 1);
/// ```
#[derive(Debug)]
pub struct MockPoolPlugin {
    /// Plugin name
    name: String,

    /// Free and lent readers
    state: Mutex<MockPoolState>,
}

#[derive(Debug, Default)]
struct MockPoolState {
    available: Vec<(String, Arc<MockReader>)>,
    allocated: Vec<(String, Arc<MockReader>)>,
    selected: HashMap<String, SmartCard>,
    fail_allocations: bool,
}

impl MockPoolPlugin {
    /// Create an empty mock pool plugin.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(MockPoolState::default()),
        })
    }

    /// Add a free reader to a group.
    pub fn add_reader(&self, reader_group_reference: impl Into<String>, reader: Arc<MockReader>) {
        self.state
            .lock()
            .available
            .push((reader_group_reference.into(), reader));
    }

    /// Set the card the pool reports as already selected in a reader.
    pub fn set_selected_smart_card(&self, reader_name: impl Into<String>, card: SmartCard) {
        self.state.lock().selected.insert(reader_name.into(), card);
    }

    /// Make subsequent allocations fail (or succeed again).
    pub fn fail_allocations(&self, fail: bool) {
        self.state.lock().fail_allocations = fail;
    }

    /// Get the number of readers currently lent.
    pub fn allocated_count(&self) -> usize {
        self.state.lock().allocated.len()
    }

    /// Get the number of free readers.
    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }
}

impl PoolPlugin for MockPoolPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn reader_group_references(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .available
            .iter()
            .chain(state.allocated.iter())
            .map(|(group, _)| group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn allocate_reader(
        &self,
        reader_group_reference: Option<&str>,
    ) -> PluginResult<Option<Arc<dyn CardReader>>> {
        let mut state = self.state.lock();
        if state.fail_allocations {
            return Err(PluginError::other(format!("{}: pool unavailable", self.name)));
        }

        let position = state.available.iter().position(|(group, _)| {
            reader_group_reference.is_none_or(|wanted| wanted == group.as_str())
        });
        let Some(position) = position else {
            return Ok(None);
        };

        let entry = state.available.remove(position);
        let reader = Arc::clone(&entry.1);
        state.allocated.push(entry);
        Ok(Some(reader as Arc<dyn CardReader>))
    }

    fn release_reader(&self, reader: &dyn CardReader) -> PluginResult<()> {
        let mut state = self.state.lock();
        let position = state
            .allocated
            .iter()
            .position(|(_, lent)| lent.name() == reader.name())
            .ok_or_else(|| PluginError::reader_not_found(reader.name()))?;

        let entry = state.allocated.remove(position);
        state.available.push(entry);
        Ok(())
    }

    fn selected_smart_card(&self, reader: &dyn CardReader) -> PluginResult<Option<SmartCard>> {
        let state = self.state.lock();
        if !state
            .allocated
            .iter()
            .any(|(_, lent)| lent.name() == reader.name())
        {
            return Err(PluginError::reader_not_found(reader.name()));
        }
        Ok(state.selected.get(reader.name()).cloned())
    }
}
