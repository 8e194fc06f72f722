//! Property-based tests for the smart card equivalence relation.
//!
//! Deduplication of rediscovered cards relies on `is_same_card` behaving as a
//! reflexive and symmetric relation that ignores hex digit case.

use cardpool_core::SmartCard;
use proptest::prelude::*;

/// Strategy for generating optional power-on data (even-length hex strings).
fn power_on_data() -> impl Strategy<Value = Option<String>> {
    prop::option::of(
        prop::string::string_regex("([0-9a-fA-F]{2}){2,33}")
            .expect("Failed to create power-on data regex strategy"),
    )
}

/// Strategy for generating ISO and non-ISO card identities.
fn smart_card() -> impl Strategy<Value = SmartCard> {
    (
        power_on_data(),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
    )
        .prop_map(|(atr, response)| match response {
            Some(response) => SmartCard::iso(atr.as_deref(), response),
            None => SmartCard::new(atr.as_deref()),
        })
}

proptest! {
    /// Property: every card is the same card as itself.
    #[test]
    fn prop_same_card_is_reflexive(card in smart_card()) {
        prop_assert!(card.is_same_card(&card));
        prop_assert!(card.is_same_card(&card.clone()));
    }

    /// Property: the relation does not depend on argument order.
    #[test]
    fn prop_same_card_is_symmetric(a in smart_card(), b in smart_card()) {
        prop_assert_eq!(a.is_same_card(&b), b.is_same_card(&a));
    }

    /// Property: power-on data case never distinguishes two cards.
    #[test]
    fn prop_power_on_data_case_insensitive(
        atr in prop::string::string_regex("([0-9a-f]{2}){2,33}").unwrap(),
        response in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let lower = SmartCard::iso(Some(&atr), response.clone());
        let upper = SmartCard::iso(Some(&atr.to_uppercase()), response);
        prop_assert!(lower.is_same_card(&upper));
        prop_assert_eq!(lower, upper);
    }

    /// Property: different power-on data always means different cards.
    #[test]
    fn prop_different_power_on_data_differs(a in power_on_data(), b in power_on_data()) {
        prop_assume!(a.as_deref().map(str::to_uppercase) != b.as_deref().map(str::to_uppercase));
        let first = SmartCard::new(a.as_deref());
        let second = SmartCard::new(b.as_deref());
        prop_assert!(!first.is_same_card(&second));
    }
}
