//! Card resources handed out by the service.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cardpool_core::SmartCard;
use cardpool_hardware::{CardReader, ReaderExtension};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A reader paired with the smart card a profile matcher confirmed in it.
///
/// A card resource is immutable and cheap to clone: clones share the same
/// identity. Two resources are equal only if they come from the same
/// creation (same [`id`](CardResource::id)), even when they describe the
/// same physical card.
#[derive(Clone)]
pub struct CardResource {
    inner: Arc<CardResourceInner>,
}

struct CardResourceInner {
    id: Uuid,
    reader: Arc<dyn CardReader>,
    reader_extension: Option<ReaderExtension>,
    smart_card: SmartCard,
    created_at: DateTime<Utc>,
}

impl CardResource {
    pub(crate) fn new(
        reader: Arc<dyn CardReader>,
        reader_extension: Option<ReaderExtension>,
        smart_card: SmartCard,
    ) -> Self {
        Self {
            inner: Arc::new(CardResourceInner {
                id: Uuid::new_v4(),
                reader,
                reader_extension,
                smart_card,
                created_at: Utc::now(),
            }),
        }
    }

    /// Get the unique identity of this resource.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Get the reader holding the card.
    pub fn reader(&self) -> &Arc<dyn CardReader> {
        &self.inner.reader
    }

    /// Get the name of the reader holding the card.
    pub fn reader_name(&self) -> &str {
        self.inner.reader.name()
    }

    /// Get the vendor extension of the reader, downcast to `T`.
    ///
    /// Returns `None` if the plugin exposes no extension for this reader or
    /// if the extension is not a `T`.
    pub fn reader_extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner
            .reader_extension
            .clone()?
            .downcast::<T>()
            .ok()
    }

    /// Get the matched smart card.
    pub fn smart_card(&self) -> &SmartCard {
        &self.inner.smart_card
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }
}

impl PartialEq for CardResource {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for CardResource {}

impl Hash for CardResource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for CardResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardResource")
            .field("id", &self.inner.id)
            .field("reader", &self.reader_name())
            .field("smart_card", &self.inner.smart_card)
            .field("created_at", &self.inner.created_at)
            .finish()
    }
}

impl fmt::Display for CardResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CardResource[id={}, reader={}, {}]",
            self.inner.id,
            self.reader_name(),
            self.inner.smart_card
        )
    }
}
