//! Per-reader state: activation, card resources and the usage lock.
//!
//! Every read-test-and-set sequence on a reader goes through a
//! [`ReaderSession`], which holds the reader's exclusivity region for its
//! whole lifetime. Sessions on different readers never block each other.
//!
//! # Lock protocol
//!
//! ```text
//!              lock() ok                    unlock() / try_match()
//!   Free ────────────────────► Busy ───────────────────────────────► Free
//!                               │
//!                               │ usage timeout elapsed
//!                               ▼
//!                          reclaimable: the next lock() succeeds
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use cardpool_hardware::{
    CardProfileMatcher, CardReader, PluginResult, ReaderConfigurator, ReaderExtension,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::card_resource::CardResource;

/// Result of a lock attempt on a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockOutcome {
    /// The reader is now held by the caller.
    Locked,

    /// The reader is held by someone else and the hold has not expired.
    Busy,

    /// The card in the reader no longer corresponds to the requested resource.
    Stale,
}

/// Manager of a single reader of a regular plugin.
pub(crate) struct ReaderManager {
    reader: Arc<dyn CardReader>,
    reader_extension: Option<ReaderExtension>,
    plugin_name: String,
    reader_configurator: Option<Arc<dyn ReaderConfigurator>>,
    usage_timeout: Duration,
    state: Mutex<ReaderState>,
}

#[derive(Default)]
struct ReaderState {
    card_resources: Vec<CardResource>,
    selected: Option<Uuid>,
    lock_expiry: Option<Instant>,
    busy: bool,
    active: bool,
}

impl ReaderManager {
    pub(crate) fn new(
        reader: Arc<dyn CardReader>,
        reader_extension: Option<ReaderExtension>,
        plugin_name: impl Into<String>,
        reader_configurator: Option<Arc<dyn ReaderConfigurator>>,
        usage_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            reader_extension,
            plugin_name: plugin_name.into(),
            reader_configurator,
            usage_timeout,
            state: Mutex::new(ReaderState::default()),
        }
    }

    pub(crate) fn reader(&self) -> &Arc<dyn CardReader> {
        &self.reader
    }

    pub(crate) fn reader_name(&self) -> &str {
        self.reader.name()
    }

    pub(crate) fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Enter the reader's exclusivity region, blocking until it is free.
    pub(crate) fn session(&self) -> ReaderSession<'_> {
        ReaderSession {
            manager: self,
            state: self.state.lock(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

/// Exclusive access to a reader's state.
pub(crate) struct ReaderSession<'a> {
    manager: &'a ReaderManager,
    state: MutexGuard<'a, ReaderState>,
}

impl ReaderSession<'_> {
    pub(crate) fn manager(&self) -> &ReaderManager {
        self.manager
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.active
    }

    /// Run the reader setup hook on first call, then mark the reader active.
    pub(crate) fn activate(&mut self) -> PluginResult<()> {
        if self.state.active {
            return Ok(());
        }
        if let Some(configurator) = &self.manager.reader_configurator {
            configurator.setup_reader(self.manager.reader.as_ref())?;
        }
        self.state.active = true;
        debug!(reader = %self.manager.reader_name(), "Reader activated");
        Ok(())
    }

    /// Probe the inserted card with the matcher.
    ///
    /// A matched card already known to this reader reuses its resource. The
    /// matched resource becomes the selected one. The reader is always
    /// unlocked afterwards.
    pub(crate) fn try_match(&mut self, matcher: &dyn CardProfileMatcher) -> Option<CardResource> {
        let resource = match matcher.matches(self.manager.reader.as_ref()) {
            Some(smart_card) => {
                let existing = self
                    .state
                    .card_resources
                    .iter()
                    .find(|resource| resource.smart_card().is_same_card(&smart_card))
                    .cloned();
                let resource = existing.unwrap_or_else(|| {
                    let created = CardResource::new(
                        Arc::clone(&self.manager.reader),
                        self.manager.reader_extension.clone(),
                        smart_card,
                    );
                    self.state.card_resources.push(created.clone());
                    created
                });
                self.state.selected = Some(resource.id());
                Some(resource)
            }
            None => None,
        };
        self.unlock();
        resource
    }

    /// Try to take the reader for the given resource.
    pub(crate) fn lock(
        &mut self,
        resource: &CardResource,
        matcher: &dyn CardProfileMatcher,
    ) -> LockOutcome {
        if self.state.busy {
            let expired = self
                .state
                .lock_expiry
                .is_some_and(|expiry| Instant::now() >= expiry);
            if !expired {
                return LockOutcome::Busy;
            }
            warn!(
                reader = %self.manager.reader_name(),
                usage_timeout = ?self.manager.usage_timeout,
                "Reader usage timeout elapsed, reclaiming the lock"
            );
        }

        if self.state.selected != Some(resource.id()) {
            let matched = self.try_match(matcher);
            if matched.as_ref().map(CardResource::id) != Some(resource.id()) {
                self.state.selected = None;
                return LockOutcome::Stale;
            }
        }

        // Zero, or too long to represent, never expires
        self.state.lock_expiry = if self.manager.usage_timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(self.manager.usage_timeout)
        };
        self.state.busy = true;
        LockOutcome::Locked
    }

    /// Free the reader. Has no effect on a free reader.
    pub(crate) fn unlock(&mut self) {
        self.state.busy = false;
        self.state.lock_expiry = None;
    }

    #[cfg(test)]
    pub(crate) fn is_busy(&self) -> bool {
        self.state.busy
    }

    pub(crate) fn owns(&self, resource: &CardResource) -> bool {
        self.state.card_resources.contains(resource)
    }

    pub(crate) fn card_resources(&self) -> Vec<CardResource> {
        self.state.card_resources.clone()
    }

    /// Drop a resource from this reader, clearing the selection if needed.
    pub(crate) fn remove_card_resource(&mut self, resource: &CardResource) {
        self.state.card_resources.retain(|owned| owned != resource);
        if self.state.selected == Some(resource.id()) {
            self.state.selected = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardpool_core::SmartCard;
    use cardpool_hardware::PowerOnDataMatcher;
    use cardpool_hardware::mock::{MockReader, MockReaderConfigurator};
    use std::thread;

    fn manager(reader: &Arc<MockReader>, usage_timeout: Duration) -> ReaderManager {
        ReaderManager::new(
            Arc::clone(reader) as Arc<dyn CardReader>,
            None,
            "PCSC",
            None,
            usage_timeout,
        )
    }

    #[test]
    fn test_activate_runs_setup_once() {
        let reader = MockReader::new("R1");
        let configurator = MockReaderConfigurator::new();
        let manager = ReaderManager::new(
            Arc::clone(&reader) as Arc<dyn CardReader>,
            None,
            "PCSC",
            Some(configurator.clone() as Arc<dyn ReaderConfigurator>),
            Duration::ZERO,
        );

        assert!(!manager.is_active());
        manager.session().activate().unwrap();
        manager.session().activate().unwrap();
        assert!(manager.is_active());
        assert_eq!(configurator.setup_count("R1"), 1);
    }

    #[test]
    fn test_activate_failure_keeps_reader_inactive() {
        let reader = MockReader::new("R1");
        let manager = ReaderManager::new(
            Arc::clone(&reader) as Arc<dyn CardReader>,
            None,
            "PCSC",
            Some(MockReaderConfigurator::failing_for(["R1"]) as Arc<dyn ReaderConfigurator>),
            Duration::ZERO,
        );

        assert!(manager.session().activate().is_err());
        assert!(!manager.is_active());
    }

    #[test]
    fn test_try_match_without_card() {
        let reader = MockReader::new("R1");
        let manager = manager(&reader, Duration::ZERO);
        assert!(manager.session().try_match(&PowerOnDataMatcher::any()).is_none());
    }

    #[test]
    fn test_try_match_reuses_same_card() {
        let reader = MockReader::new("R1");
        reader.insert_card(SmartCard::iso(Some("3B00"), vec![0x90, 0x00]));
        let manager = manager(&reader, Duration::ZERO);
        let matcher = PowerOnDataMatcher::any();

        let first = manager.session().try_match(&matcher).unwrap();
        let second = manager.session().try_match(&matcher).unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.session().card_resources().len(), 1);

        reader.insert_card(SmartCard::iso(Some("3B00"), vec![0x6A, 0x82]));
        let third = manager.session().try_match(&matcher).unwrap();
        assert_ne!(first, third);
        assert_eq!(manager.session().card_resources().len(), 2);
    }

    #[test]
    fn test_lock_busy_then_unlock() {
        let reader = MockReader::new("R1");
        reader.insert_card(SmartCard::new(Some("3B00")));
        let manager = manager(&reader, Duration::ZERO);
        let matcher = PowerOnDataMatcher::any();
        let resource = manager.session().try_match(&matcher).unwrap();

        let mut session = manager.session();
        assert_eq!(session.lock(&resource, &matcher), LockOutcome::Locked);
        assert_eq!(session.lock(&resource, &matcher), LockOutcome::Busy);
        session.unlock();
        session.unlock();
        assert!(!session.is_busy());
        assert_eq!(session.lock(&resource, &matcher), LockOutcome::Locked);
    }

    #[test]
    fn test_lock_reclaimed_after_usage_timeout() {
        let reader = MockReader::new("R1");
        reader.insert_card(SmartCard::new(Some("3B00")));
        let manager = manager(&reader, Duration::from_millis(20));
        let matcher = PowerOnDataMatcher::any();
        let resource = manager.session().try_match(&matcher).unwrap();

        assert_eq!(manager.session().lock(&resource, &matcher), LockOutcome::Locked);
        assert_eq!(manager.session().lock(&resource, &matcher), LockOutcome::Busy);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(manager.session().lock(&resource, &matcher), LockOutcome::Locked);
    }

    #[test]
    fn test_lock_with_unbounded_usage_timeout() {
        let reader = MockReader::new("R1");
        reader.insert_card(SmartCard::new(Some("3B00")));
        let manager = manager(&reader, Duration::MAX);
        let matcher = PowerOnDataMatcher::any();
        let resource = manager.session().try_match(&matcher).unwrap();

        assert_eq!(manager.session().lock(&resource, &matcher), LockOutcome::Locked);
        assert_eq!(manager.session().lock(&resource, &matcher), LockOutcome::Busy);
    }

    #[test]
    fn test_lock_detects_stale_resource() {
        let reader = MockReader::new("R1");
        reader.insert_card(SmartCard::new(Some("3B00")));
        let manager = manager(&reader, Duration::ZERO);
        let matcher = PowerOnDataMatcher::any();
        let old = manager.session().try_match(&matcher).unwrap();

        reader.insert_card(SmartCard::new(Some("3B01")));
        let new = manager.session().try_match(&matcher).unwrap();

        let mut session = manager.session();
        assert_eq!(session.lock(&old, &matcher), LockOutcome::Stale);
        assert!(!session.is_busy());
        assert_eq!(session.lock(&new, &matcher), LockOutcome::Locked);
    }

    #[test]
    fn test_lock_rematches_when_not_selected() {
        let reader = MockReader::new("R1");
        reader.insert_card(SmartCard::new(Some("3B00")));
        let manager = manager(&reader, Duration::ZERO);
        let matcher = PowerOnDataMatcher::any();
        let resource = manager.session().try_match(&matcher).unwrap();
        let reads = reader.read_count();

        // Selected resource: no new card read
        assert_eq!(manager.session().lock(&resource, &matcher), LockOutcome::Locked);
        assert_eq!(reader.read_count(), reads);

        let mut session = manager.session();
        session.unlock();
        session.remove_card_resource(&resource);
        assert!(!session.owns(&resource));

        // The card is still there but the resource was dropped
        assert_eq!(session.lock(&resource, &matcher), LockOutcome::Stale);
        assert_eq!(reader.read_count(), reads + 1);
    }
}
