//! Mock reader configurator for testing and development.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PluginError, PluginResult};
use crate::traits::{CardReader, ReaderConfigurator};

/// Reader configurator recording every setup call.
///
/// Setup fails for the reader names passed to
/// [`MockReaderConfigurator::failing_for`].
#[derive(Debug, Default)]
pub struct MockReaderConfigurator {
    failing: HashSet<String>,
    configured: Mutex<Vec<String>>,
}

impl MockReaderConfigurator {
    /// Create a configurator accepting every reader.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a configurator failing for the given readers.
    pub fn failing_for<I, S>(reader_names: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            failing: reader_names.into_iter().map(Into::into).collect(),
            configured: Mutex::new(Vec::new()),
        })
    }

    /// Get the names of the readers set up successfully, in call order.
    pub fn configured_readers(&self) -> Vec<String> {
        self.configured.lock().clone()
    }

    /// Get the number of times the given reader was set up successfully.
    pub fn setup_count(&self, reader_name: &str) -> usize {
        self.configured
            .lock()
            .iter()
            .filter(|name| *name == reader_name)
            .count()
    }
}

impl ReaderConfigurator for MockReaderConfigurator {
    fn setup_reader(&self, reader: &dyn CardReader) -> PluginResult<()> {
        if self.failing.contains(reader.name()) {
            return Err(PluginError::setup_failed(format!(
                "{}: protocol not supported",
                reader.name()
            )));
        }
        self.configured.lock().push(reader.name().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockReader;

    #[test]
    fn test_setup_recorded() {
        let configurator = MockReaderConfigurator::failing_for(["R2"]);
        let r1 = MockReader::new("R1");
        let r2 = MockReader::new("R2");

        configurator.setup_reader(r1.as_ref()).unwrap();
        assert!(configurator.setup_reader(r2.as_ref()).is_err());

        assert_eq!(configurator.configured_readers(), vec!["R1"]);
        assert_eq!(configurator.setup_count("R1"), 1);
        assert_eq!(configurator.setup_count("R2"), 0);
    }
}
