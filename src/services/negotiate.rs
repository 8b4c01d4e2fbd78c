//! Provider selection and deal negotiation
//!
//! Shared by the pin pipeline (initial deal) and the renewal manager
//! (successor deals). Selection is a pure, deterministic ranking so the
//! same provider list always yields the same choice.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::clients::{DealLedger, ProviderInfo, StartDealParams};
use crate::db::schemas::{PinRequestDoc, StorageDealDoc};
use crate::types::{HoldfastError, Result};

/// Ranking weights. Arbitrary but fixed: reputation dominates, raw power
/// counts for scale, cheaper asks win the remainder.
const WEIGHT_REPUTATION: f64 = 0.5;
const WEIGHT_POWER: f64 = 0.3;
const WEIGHT_PRICE: f64 = 0.2;

/// Log scale ceiling for power normalization (1e18 ~ EiB-class providers)
const POWER_LOG_CEILING: f64 = 18.0;

/// Opens storage deals against the ledger
pub struct DealBroker {
    ledger: Arc<dyn DealLedger>,
    wallet_address: String,
    epochs_per_day: i64,
}

impl DealBroker {
    pub fn new(ledger: Arc<dyn DealLedger>, wallet_address: String, epochs_per_day: i64) -> Self {
        Self {
            ledger,
            wallet_address,
            epochs_per_day,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn DealLedger> {
        &self.ledger
    }

    /// Negotiate a deal for a request at the given total price: pick a
    /// provider, fetch the current epoch, and propose the deal. Returns
    /// the deal row ready to be persisted (status pending).
    ///
    /// Not persisted here; the caller decides how the row is committed.
    pub async fn negotiate(
        &self,
        request: &PinRequestDoc,
        total_price_fil: Decimal,
    ) -> Result<StorageDealDoc> {
        let providers = self.ledger.available_providers().await?;
        let provider = select_provider(&providers).ok_or_else(|| {
            HoldfastError::Permanent("no storage providers available".to_string())
        })?;

        let current_epoch = self.ledger.current_epoch().await?;
        let duration_epochs = request.duration_days * self.epochs_per_day;

        let total_price = total_price_fil.to_f64().unwrap_or(0.0);
        let price_per_epoch = total_price / duration_epochs as f64;

        let deal_cid = self
            .ledger
            .start_deal(StartDealParams {
                cid: request.cid.clone(),
                provider_id: provider.id.clone(),
                duration_epochs,
                price_per_epoch_fil: price_per_epoch,
                wallet: self.wallet_address.clone(),
                verified: false,
            })
            .await?;

        info!(
            request_id = %request.id,
            deal_cid = %deal_cid,
            provider = %provider.id,
            start_epoch = current_epoch,
            end_epoch = current_epoch + duration_epochs,
            "Storage deal proposed"
        );

        Ok(StorageDealDoc::new(
            request.id,
            deal_cid,
            provider.id.clone(),
            current_epoch,
            current_epoch + duration_epochs,
            total_price,
        ))
    }
}

/// Composite ranking score for a provider
pub fn provider_score(provider: &ProviderInfo) -> f64 {
    let power_score = ((provider.power.max(1)) as f64).log10() / POWER_LOG_CEILING;
    let price_score = 1.0 / (1.0 + provider.price.max(0.0));

    WEIGHT_REPUTATION * provider.reputation.clamp(0.0, 1.0)
        + WEIGHT_POWER * power_score.clamp(0.0, 1.0)
        + WEIGHT_PRICE * price_score
}

/// Pick the best available provider. Stable: identical inputs always
/// return the same provider, with score ties broken by ascending id.
pub fn select_provider(providers: &[ProviderInfo]) -> Option<&ProviderInfo> {
    providers
        .iter()
        .filter(|p| p.available)
        .min_by(|a, b| {
            provider_score(b)
                .partial_cmp(&provider_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, power: i64, price: f64, reputation: f64) -> ProviderInfo {
        ProviderInfo {
            id: id.to_string(),
            power,
            available: true,
            price,
            reputation,
        }
    }

    #[test]
    fn test_reputation_dominates() {
        let providers = vec![
            provider("f01", 1 << 50, 0.001, 0.2),
            provider("f02", 1 << 30, 0.001, 0.95),
        ];
        assert_eq!(select_provider(&providers).unwrap().id, "f02");
    }

    #[test]
    fn test_cheaper_wins_all_else_equal() {
        let providers = vec![
            provider("f01", 1 << 40, 0.5, 0.8),
            provider("f02", 1 << 40, 0.001, 0.8),
        ];
        assert_eq!(select_provider(&providers).unwrap().id, "f02");
    }

    #[test]
    fn test_ties_break_by_id() {
        let providers = vec![
            provider("f09", 1 << 40, 0.001, 0.8),
            provider("f01", 1 << 40, 0.001, 0.8),
            provider("f05", 1 << 40, 0.001, 0.8),
        ];
        assert_eq!(select_provider(&providers).unwrap().id, "f01");
    }

    #[test]
    fn test_unavailable_filtered() {
        let mut best = provider("f01", 1 << 50, 0.001, 1.0);
        best.available = false;
        let providers = vec![best, provider("f02", 1 << 20, 0.01, 0.3)];
        assert_eq!(select_provider(&providers).unwrap().id, "f02");
    }

    #[test]
    fn test_empty_list() {
        assert!(select_provider(&[]).is_none());
    }

    #[test]
    fn test_selection_is_stable() {
        let providers = vec![
            provider("f03", 1 << 35, 0.002, 0.7),
            provider("f01", 1 << 45, 0.001, 0.6),
            provider("f02", 1 << 40, 0.003, 0.65),
        ];
        let first = select_provider(&providers).unwrap().id.clone();
        for _ in 0..10 {
            assert_eq!(select_provider(&providers).unwrap().id, first);
        }
    }
}
