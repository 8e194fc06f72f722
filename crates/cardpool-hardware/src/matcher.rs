//! Ready-made card profile matchers.

use cardpool_core::SmartCard;
use regex::Regex;

use crate::error::PluginResult;
use crate::traits::{CardProfileMatcher, CardReader};

/// Matches cards whose power-on data fits a regular expression.
///
/// The pattern must cover the whole power-on data. Cards without power-on
/// data only match [`PowerOnDataMatcher::any`].
///
/// # Examples
///
/// ```
/// use cardpool_core::SmartCard;
/// use cardpool_hardware::matcher::PowerOnDataMatcher;
/// use cardpool_hardware::traits::CardProfileMatcher;
///
/// let matcher = PowerOnDataMatcher::new("3B8F.*").unwrap();
/// let card = SmartCard::new(Some("3B8F8001804F"));
/// assert!(matcher.matches_selected(&card).is_some());
/// assert!(matcher.matches_selected(&SmartCard::new(Some("3B00"))).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PowerOnDataMatcher {
    pattern: Option<Regex>,
}

impl PowerOnDataMatcher {
    /// Create a matcher for the given power-on data pattern.
    ///
    /// Matching is case-insensitive since power-on data is normalized to
    /// uppercase hex.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidPattern`](crate::PluginError::InvalidPattern)
    /// if the pattern does not compile.
    pub fn new(pattern: &str) -> PluginResult<Self> {
        let pattern = Regex::new(&format!("(?i)^(?:{pattern})$"))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Create a matcher accepting any card.
    pub fn any() -> Self {
        Self { pattern: None }
    }

    fn accepts(&self, smart_card: &SmartCard) -> bool {
        match (&self.pattern, smart_card.power_on_data()) {
            (None, _) => true,
            (Some(pattern), Some(power_on_data)) => pattern.is_match(power_on_data),
            (Some(_), None) => false,
        }
    }
}

impl CardProfileMatcher for PowerOnDataMatcher {
    fn matches(&self, reader: &dyn CardReader) -> Option<SmartCard> {
        // Read errors count as "no match"; the reader stays a candidate.
        let smart_card = reader.read_card().ok()??;
        self.accepts(&smart_card).then_some(smart_card)
    }

    fn matches_selected(&self, smart_card: &SmartCard) -> Option<SmartCard> {
        self.accepts(smart_card).then(|| smart_card.clone())
    }
}
