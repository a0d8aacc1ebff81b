//! Revenue split properties

use proptest::prelude::*;
use rust_decimal::Decimal;
use settlement::{gross_from_cents, RevenueSplit};

proptest! {
    #[test]
    fn shares_add_up_to_gross(cents in 0i64..10_000_000, rate_bp in 100i64..=10_000) {
        let gross = gross_from_cents(cents);
        let rate = Decimal::new(rate_bp, 2);
        let split = RevenueSplit::compute(gross, rate);

        prop_assert_eq!(split.platform_share + split.provider_share, gross);
        prop_assert!(split.platform_share >= Decimal::ZERO);
        prop_assert!(split.provider_share >= Decimal::ZERO);
        prop_assert!(split.platform_share.scale() <= 2);
    }

    #[test]
    fn higher_rate_never_takes_less(cents in 0i64..10_000_000, low in 100i64..5_000, extra in 1i64..5_000) {
        let gross = gross_from_cents(cents);
        let low_split = RevenueSplit::compute(gross, Decimal::new(low, 2));
        let high_split = RevenueSplit::compute(gross, Decimal::new(low + extra, 2));
        prop_assert!(high_split.platform_share >= low_split.platform_share);
    }
}
