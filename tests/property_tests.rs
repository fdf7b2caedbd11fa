//! Property-based tests for signature verification and cart amount integrity.

use checkout_api::{
    models::CartItem,
    services::{payment_verification::SignatureVerifier, validation::validate_cart_items},
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn reference_strategy(prefix: &'static str) -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{8,20}".prop_map(move |s| format!("{}_{}", prefix, s))
}

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000_00).prop_map(|paise| Decimal::new(paise, 2))
}

fn item(unit_price: Decimal, quantity: i64, total_price: Decimal) -> CartItem {
    CartItem {
        id: "prod-1".into(),
        name: "Ghee 500ml".into(),
        image: None,
        unit_price,
        quantity,
        total_price,
        is_subscription: false,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn correct_signature_always_verifies(
        order_ref in reference_strategy("order"),
        payment_ref in reference_strategy("pay"),
    ) {
        let verifier = SignatureVerifier::new("gateway_test_secret");
        let signature = verifier.sign(&order_ref, &payment_ref);
        prop_assert!(verifier.verify(&order_ref, &payment_ref, &signature));
    }

    #[test]
    fn any_single_bit_flip_fails(
        order_ref in reference_strategy("order"),
        payment_ref in reference_strategy("pay"),
        bit in 0usize..256,
    ) {
        let verifier = SignatureVerifier::new("gateway_test_secret");
        let mut raw = hex::decode(verifier.sign(&order_ref, &payment_ref)).unwrap();
        raw[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(!verifier.verify(&order_ref, &payment_ref, &hex::encode(raw)));
    }

    #[test]
    fn other_secret_never_verifies(
        order_ref in reference_strategy("order"),
        payment_ref in reference_strategy("pay"),
    ) {
        let signature = SignatureVerifier::new("attacker_secret").sign(&order_ref, &payment_ref);
        let verifier = SignatureVerifier::new("gateway_test_secret");
        prop_assert!(!verifier.verify(&order_ref, &payment_ref, &signature));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn consistent_line_totals_pass(unit_price in price_strategy(), quantity in 1i64..=100) {
        let total = unit_price * Decimal::from(quantity);
        let report = validate_cart_items(&[item(unit_price, quantity, total)]);
        prop_assert!(report.is_valid(), "{:?}", report);
    }

    #[test]
    fn line_totals_off_by_more_than_one_unit_fail(
        unit_price in price_strategy(),
        quantity in 1i64..=100,
        skew in (101i64..10_000_000).prop_flat_map(|p| prop_oneof![Just(p), Just(-p)]),
    ) {
        let total = unit_price * Decimal::from(quantity) + Decimal::new(skew, 2);
        let good = item(Decimal::new(100, 2), 1, Decimal::new(100, 2));
        let report = validate_cart_items(&[good, item(unit_price, quantity, total)]);
        prop_assert!(!report.is_valid());
        prop_assert!(report.errors().iter().any(|e| e.contains("does not match")));
    }
}
