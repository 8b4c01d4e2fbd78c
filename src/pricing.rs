//! Storage price calculation
//!
//! Pure function of size and duration. Prices are quoted in FIL per GiB
//! per month with a percentage markup; content below the minimum deal
//! size is priced as if it were minimum-sized.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::Args;

const BYTES_PER_GIB: u64 = 1 << 30;
const DAYS_PER_MONTH: i64 = 30;

/// Decimal places kept on quoted prices (FIL precision)
const PRICE_SCALE: u32 = 8;

/// Pricing configuration and calculator
#[derive(Debug, Clone)]
pub struct PricingService {
    base_price_per_gb_month: Decimal,
    markup_percent: Decimal,
    minimum_deal_size: u64,
}

/// Public pricing summary for the quote endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PricingInfo {
    pub base_price_per_gb_per_month: Decimal,
    pub markup_percentage: Decimal,
    pub minimum_deal_size: u64,
    pub currency: &'static str,
}

impl PricingService {
    pub fn new(base_price_per_gb_month: Decimal, markup_percent: Decimal, minimum_deal_size: u64) -> Self {
        Self {
            base_price_per_gb_month,
            markup_percent,
            minimum_deal_size,
        }
    }

    pub fn from_args(args: &Args) -> Self {
        Self::new(
            args.base_price_per_gb_month,
            args.markup_percent,
            args.minimum_deal_size,
        )
    }

    /// Calculate the storage price in FIL for a size and duration.
    ///
    /// Deterministic and monotonically non-decreasing in both inputs;
    /// never negative.
    pub fn calculate_price(&self, size_bytes: u64, duration_days: i64) -> Decimal {
        let quoted = self.marked_up_price(size_bytes, duration_days);

        // Small content is priced at the minimum-deal-size floor
        if size_bytes < self.minimum_deal_size {
            let floor = self.marked_up_price(self.minimum_deal_size, duration_days);
            return quoted.max(floor).round_dp(PRICE_SCALE);
        }

        quoted.round_dp(PRICE_SCALE)
    }

    fn marked_up_price(&self, size_bytes: u64, duration_days: i64) -> Decimal {
        let size_gb = Decimal::from(size_bytes) / Decimal::from(BYTES_PER_GIB);
        let duration_months = Decimal::from(duration_days) / Decimal::from(DAYS_PER_MONTH);

        let base = size_gb * duration_months * self.base_price_per_gb_month;
        let markup = base * self.markup_percent / Decimal::from(100);

        base + markup
    }

    /// Current pricing configuration, for the public quote endpoint
    pub fn pricing_info(&self) -> PricingInfo {
        PricingInfo {
            base_price_per_gb_per_month: self.base_price_per_gb_month,
            markup_percentage: self.markup_percent,
            minimum_deal_size: self.minimum_deal_size,
            currency: "FIL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn service() -> PricingService {
        PricingService::new(
            Decimal::from_str("0.001").unwrap(),
            Decimal::from(20),
            1_048_576,
        )
    }

    #[test]
    fn test_one_gib_one_month() {
        // 1 GiB for 30 days at 0.001 FIL/GiB/month with 20% markup
        let price = service().calculate_price(1_073_741_824, 30);
        assert_eq!(price, Decimal::from_str("0.0012").unwrap());
    }

    #[test]
    fn test_minimum_size_floor() {
        let svc = service();
        // 1 KiB is priced as if it were 1 MiB
        let tiny = svc.calculate_price(1024, 30);
        let floor = svc.calculate_price(1_048_576, 30);
        assert_eq!(tiny, floor);
        assert!(tiny > Decimal::ZERO);
    }

    #[test]
    fn test_monotonic_in_size() {
        let svc = service();
        let mut last = Decimal::ZERO;
        for size in [1u64 << 20, 1 << 24, 1 << 28, 1 << 30, 1 << 34] {
            let price = svc.calculate_price(size, 90);
            assert!(price >= last, "price must not decrease with size");
            last = price;
        }
    }

    #[test]
    fn test_monotonic_in_duration() {
        let svc = service();
        let mut last = Decimal::ZERO;
        for days in [1, 7, 30, 180, 365, 1095] {
            let price = svc.calculate_price(1 << 30, days);
            assert!(price >= last, "price must not decrease with duration");
            last = price;
        }
    }

    #[test]
    fn test_deterministic() {
        let svc = service();
        let a = svc.calculate_price(5_000_000_000, 365);
        let b = svc.calculate_price(5_000_000_000, 365);
        assert_eq!(a, b);
    }
}
