//! Mock card reader implementation for testing and development.
//!
//! This module provides a simulated card reader whose card slot can be
//! controlled programmatically. An observable mock reader notifies its
//! observer of insertions and removals once card detection is started.

use std::fmt;
use std::sync::Arc;

use cardpool_core::SmartCard;
use parking_lot::Mutex;

use crate::error::{PluginError, PluginResult};
use crate::events::{ReaderEvent, ReaderObserver};
use crate::traits::{CardReader, DetectionMode, ObservableReader};

/// Mock card reader for testing and development.
///
/// # Examples
///
/// ```
/// use cardpool_core::SmartCard;
/// use cardpool_hardware::mock::MockReader;
/// use cardpool_hardware::traits::CardReader;
///
/// let reader = MockReader::new("Mock Reader 1");
/// assert!(!reader.is_card_present().unwrap());
///
/// reader.insert_card(SmartCard::new(Some("3B00")));
/// let card = reader.read_card().unwrap().unwrap();
/// assert_eq!(card.power_on_data(), Some("3B00"));
/// ```
pub struct MockReader {
    /// Reader name
    name: String,

    /// Whether the reader exposes the observable capability
    observable: bool,

    /// Card slot, observer and counters
    state: Mutex<MockReaderState>,
}

#[derive(Default)]
struct MockReaderState {
    card: Option<SmartCard>,
    observer: Option<Arc<dyn ReaderObserver>>,
    detection: Option<DetectionMode>,
    read_count: usize,
    fail_reads: bool,
}

impl MockReader {
    /// Create a plain (non-observable) mock reader.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name.into(), false))
    }

    /// Create an observable mock reader.
    pub fn observable(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::build(name.into(), true))
    }

    fn build(name: String, observable: bool) -> Self {
        Self {
            name,
            observable,
            state: Mutex::new(MockReaderState::default()),
        }
    }

    /// Insert a card, replacing any card already present.
    ///
    /// Emits [`ReaderEvent::CardInserted`] when card detection is running.
    pub fn insert_card(&self, card: SmartCard) {
        self.state.lock().card = Some(card);
        self.emit(ReaderEvent::CardInserted {
            reader_name: self.name.clone(),
        });
    }

    /// Remove the inserted card.
    ///
    /// Emits [`ReaderEvent::CardRemoved`] when card detection is running.
    /// In single-shot mode detection stops after the removal.
    pub fn remove_card(&self) {
        let had_card = self.state.lock().card.take().is_some();
        if !had_card {
            return;
        }
        self.emit(ReaderEvent::CardRemoved {
            reader_name: self.name.clone(),
        });
        let mut state = self.state.lock();
        if state.detection == Some(DetectionMode::SingleShot) {
            state.detection = None;
        }
    }

    /// Notify the observer that the reader was unregistered from its plugin.
    pub fn unregister(&self) {
        self.emit(ReaderEvent::Unregistered {
            reader_name: self.name.clone(),
        });
    }

    /// Report an observation failure to the observer, if any.
    pub fn raise_observation_error(&self, error: PluginError) {
        let observer = self.state.lock().observer.clone();
        if let Some(observer) = observer {
            observer.on_reader_observation_error(&self.name, error);
        }
    }

    /// Make subsequent card reads fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Get the inserted card.
    pub fn inserted_card(&self) -> Option<SmartCard> {
        self.state.lock().card.clone()
    }

    /// Returns `true` if an observer is subscribed.
    pub fn has_observer(&self) -> bool {
        self.state.lock().observer.is_some()
    }

    /// Get the running detection mode, if card detection is started.
    pub fn detection_mode(&self) -> Option<DetectionMode> {
        self.state.lock().detection
    }

    /// Get the number of card reads performed so far.
    pub fn read_count(&self) -> usize {
        self.state.lock().read_count
    }

    // The observer is invoked without holding the state lock.
    fn emit(&self, event: ReaderEvent) {
        let observer = {
            let state = self.state.lock();
            if state.detection.is_some() {
                state.observer.clone()
            } else {
                None
            }
        };
        if let Some(observer) = observer {
            observer.on_reader_event(event);
        }
    }
}

impl fmt::Debug for MockReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockReader")
            .field("name", &self.name)
            .field("observable", &self.observable)
            .field("card", &state.card)
            .field("detection", &state.detection)
            .finish()
    }
}

impl CardReader for MockReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_card_present(&self) -> PluginResult<bool> {
        Ok(self.state.lock().card.is_some())
    }

    fn read_card(&self) -> PluginResult<Option<SmartCard>> {
        let mut state = self.state.lock();
        state.read_count += 1;
        if state.fail_reads {
            return Err(PluginError::communication(format!(
                "{}: card did not answer",
                self.name
            )));
        }
        Ok(state.card.clone())
    }

    fn as_observable(&self) -> Option<&dyn ObservableReader> {
        if self.observable { Some(self) } else { None }
    }
}

impl ObservableReader for MockReader {
    fn subscribe(&self, observer: Arc<dyn ReaderObserver>) {
        self.state.lock().observer = Some(observer);
    }

    fn unsubscribe(&self) {
        self.state.lock().observer = None;
    }

    fn start_card_detection(&self, mode: DetectionMode) {
        self.state.lock().detection = Some(mode);
    }

    fn stop_card_detection(&self) {
        self.state.lock().detection = None;
    }
}
