use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a smart card confirmed by a profile matcher.
///
/// A card is described by its power-on data (the ATR, as an uppercase hex
/// string) and, for ISO 7816-4 cards, by the response to the application
/// selection command. The select response being present is what marks a
/// card as belonging to the ISO family.
///
/// `PartialEq` compares every field. Rediscovery of the same physical card
/// uses the looser [`SmartCard::is_same_card`] relation instead.
///
/// # Examples
///
/// ```
/// use cardpool_core::SmartCard;
///
/// let first = SmartCard::iso(Some("3b8f8001804f0ca0000003060300030000000068"), vec![0x6F, 0x00]);
/// let again = SmartCard::iso(Some("3B8F8001804F0CA0000003060300030000000068"), vec![0x6F, 0x00]);
/// assert!(first.is_same_card(&again));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmartCard {
    power_on_data: Option<String>,
    select_application_response: Option<Vec<u8>>,
}

impl SmartCard {
    /// Create a card identity outside the ISO family.
    ///
    /// The power-on data is normalized (trimmed and converted to uppercase).
    pub fn new(power_on_data: Option<&str>) -> Self {
        Self {
            power_on_data: power_on_data.map(normalize_hex),
            select_application_response: None,
        }
    }

    /// Create an ISO 7816-4 card identity.
    ///
    /// An empty select response is valid and still marks the card as ISO.
    pub fn iso(power_on_data: Option<&str>, select_application_response: Vec<u8>) -> Self {
        Self {
            power_on_data: power_on_data.map(normalize_hex),
            select_application_response: Some(select_application_response),
        }
    }

    /// Get the power-on data, if the card reported any.
    #[must_use]
    pub fn power_on_data(&self) -> Option<&str> {
        self.power_on_data.as_deref()
    }

    /// Get the select application response of an ISO card.
    #[must_use]
    pub fn select_application_response(&self) -> Option<&[u8]> {
        self.select_application_response.as_deref()
    }

    /// Returns `true` if the card belongs to the ISO family.
    #[must_use]
    pub fn is_iso(&self) -> bool {
        self.select_application_response.is_some()
    }

    /// Check whether two identities describe the same physical card.
    ///
    /// The power-on data must be equal (or absent on both sides). When both
    /// cards are ISO cards, their select application responses must also be
    /// equal.
    #[must_use]
    pub fn is_same_card(&self, other: &SmartCard) -> bool {
        if self.power_on_data != other.power_on_data {
            return false;
        }
        match (
            &self.select_application_response,
            &other.select_application_response,
        ) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}

impl fmt::Display for SmartCard {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SmartCard[powerOnData={}",
            self.power_on_data.as_deref().unwrap_or("none")
        )?;
        if let Some(response) = &self.select_application_response {
            write!(f, ", selectApplicationResponse=")?;
            for byte in response {
                write!(f, "{byte:02X}")?;
            }
        }
        write!(f, "]")
    }
}

fn normalize_hex(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Ordering rule applied to a profile's candidate list after a successful
/// allocation.
///
/// The list is never reordered on failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStrategy {
    /// Keep a stable order: earlier candidates are always preferred.
    #[default]
    First,

    /// Move the allocated candidate to the end of the list (round-robin).
    Cyclic,

    /// Shuffle the whole list.
    Random,
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocationStrategy::First => write!(f, "FIRST"),
            AllocationStrategy::Cyclic => write!(f, "CYCLIC"),
            AllocationStrategy::Random => write!(f, "RANDOM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ATR: &str = "3B8880010000000000718100F9";

    #[test]
    fn test_power_on_data_normalized() {
        let card = SmartCard::new(Some(" 3b88800100 "));
        assert_eq!(card.power_on_data(), Some("3B88800100"));
        assert!(!card.is_iso());
    }

    #[rstest]
    #[case(SmartCard::new(Some(ATR)), SmartCard::new(Some(ATR)), true)]
    #[case(SmartCard::new(None), SmartCard::new(None), true)]
    #[case(SmartCard::new(Some(ATR)), SmartCard::new(None), false)]
    #[case(SmartCard::new(Some(ATR)), SmartCard::new(Some("3B00")), false)]
    #[case(SmartCard::iso(Some(ATR), vec![0x6F, 0x10]), SmartCard::iso(Some(ATR), vec![0x6F, 0x10]), true)]
    #[case(SmartCard::iso(Some(ATR), vec![0x6F, 0x10]), SmartCard::iso(Some(ATR), vec![0x6F, 0x11]), false)]
    #[case(SmartCard::iso(None, vec![]), SmartCard::iso(None, vec![]), true)]
    // Only one side is ISO: the select response is not compared
    #[case(SmartCard::iso(Some(ATR), vec![0x6F]), SmartCard::new(Some(ATR)), true)]
    fn test_is_same_card(#[case] a: SmartCard, #[case] b: SmartCard, #[case] expected: bool) {
        assert_eq!(a.is_same_card(&b), expected);
        assert_eq!(b.is_same_card(&a), expected);
    }

    #[test]
    fn test_smart_card_display() {
        let card = SmartCard::iso(Some("3B00"), vec![0x90, 0x00]);
        assert_eq!(
            card.to_string(),
            "SmartCard[powerOnData=3B00, selectApplicationResponse=9000]"
        );
        assert_eq!(
            SmartCard::new(None).to_string(),
            "SmartCard[powerOnData=none]"
        );
    }

    #[test]
    fn test_allocation_strategy_default() {
        assert_eq!(AllocationStrategy::default(), AllocationStrategy::First);
    }

    #[rstest]
    #[case(AllocationStrategy::First, "\"FIRST\"")]
    #[case(AllocationStrategy::Cyclic, "\"CYCLIC\"")]
    #[case(AllocationStrategy::Random, "\"RANDOM\"")]
    fn test_allocation_strategy_serialization(
        #[case] strategy: AllocationStrategy,
        #[case] json: &str,
    ) {
        assert_eq!(serde_json::to_string(&strategy).unwrap(), json);
        let parsed: AllocationStrategy = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, strategy);
        assert_eq!(format!("\"{strategy}\""), json);
    }
}
