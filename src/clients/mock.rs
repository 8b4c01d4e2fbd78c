//! In-memory collaborator mocks
//!
//! Deterministic stand-ins for the IPFS node and the Lotus ledger, used
//! by unit and integration tests. Failure modes are toggled per call
//! site so tests can exercise the transient/permanent error paths.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use super::ipfs::ContentStore;
use super::lotus::{DealLedger, ProviderInfo, StartDealParams};
use crate::types::{HoldfastError, Result};

/// Mock content store backed by a size table
#[derive(Default)]
pub struct MockContentStore {
    sizes: Mutex<HashMap<String, u64>>,
    pinned: Mutex<Vec<String>>,
    pub fail_pin: AtomicBool,
    pub unreachable: AtomicBool,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register content with a known size
    pub fn with_content(self, cid: &str, size: u64) -> Self {
        self.sizes.lock().unwrap().insert(cid.to_string(), size);
        self
    }

    pub fn insert_content(&self, cid: &str, size: u64) {
        self.sizes.lock().unwrap().insert(cid.to_string(), size);
    }

    pub fn pins(&self) -> Vec<String> {
        self.pinned.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(HoldfastError::Transient("ipfs unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn add(&self, data: Vec<u8>) -> Result<String> {
        self.check_reachable()?;
        let cid = format!("Qm{:044}", data.len());
        self.sizes.lock().unwrap().insert(cid.clone(), data.len() as u64);
        Ok(cid)
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        self.check_reachable()?;
        if self.fail_pin.load(Ordering::Relaxed) {
            return Err(HoldfastError::Permanent(format!("pin refused for {cid}")));
        }
        let mut pinned = self.pinned.lock().unwrap();
        // Idempotent: re-pinning is success, recorded once
        if !pinned.iter().any(|p| p == cid) {
            pinned.push(cid.to_string());
        }
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        self.check_reachable()?;
        self.pinned.lock().unwrap().retain(|p| p != cid);
        Ok(())
    }

    async fn exists(&self, cid: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.sizes.lock().unwrap().contains_key(cid))
    }

    async fn stat_size(&self, cid: &str) -> Result<u64> {
        self.check_reachable()?;
        self.sizes
            .lock()
            .unwrap()
            .get(cid)
            .copied()
            .ok_or_else(|| HoldfastError::Permanent(format!("content {cid} not found")))
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let size = self.stat_size(cid).await?;
        Ok(vec![0u8; size as usize])
    }
}

/// Mock ledger with a scripted provider list and deal-state table
pub struct MockLedger {
    pub epoch: AtomicI64,
    providers: Mutex<Vec<ProviderInfo>>,
    deal_states: Mutex<HashMap<String, String>>,
    started: Mutex<Vec<StartDealParams>>,
    pub fail_start_deal: AtomicBool,
    pub unreachable: AtomicBool,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self {
            epoch: AtomicI64::new(100_000),
            providers: Mutex::new(vec![ProviderInfo {
                id: "f01000".into(),
                power: 1 << 40,
                available: true,
                price: 0.001,
                reputation: 0.9,
            }]),
            deal_states: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            fail_start_deal: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
        }
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(self, providers: Vec<ProviderInfo>) -> Self {
        *self.providers.lock().unwrap() = providers;
        self
    }

    pub fn set_deal_state(&self, deal_cid: &str, state: &str) {
        self.deal_states
            .lock()
            .unwrap()
            .insert(deal_cid.to_string(), state.to_string());
    }

    /// Deals proposed through this mock, in order
    pub fn started_deals(&self) -> Vec<StartDealParams> {
        self.started.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(HoldfastError::Transient("lotus unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DealLedger for MockLedger {
    async fn start_deal(&self, params: StartDealParams) -> Result<String> {
        self.check_reachable()?;
        if self.fail_start_deal.load(Ordering::Relaxed) {
            return Err(HoldfastError::Permanent("deal proposal rejected".into()));
        }

        let mut started = self.started.lock().unwrap();
        started.push(params.clone());
        let handle = format!("bafydeal{:08}", started.len());
        self.deal_states
            .lock()
            .unwrap()
            .insert(handle.clone(), "StorageDealWaitingForData".to_string());
        Ok(handle)
    }

    async fn deal_status(&self, deal_cid: &str) -> Result<String> {
        self.check_reachable()?;
        self.deal_states
            .lock()
            .unwrap()
            .get(deal_cid)
            .cloned()
            .ok_or_else(|| HoldfastError::Permanent(format!("deal {deal_cid} not found")))
    }

    async fn current_epoch(&self) -> Result<i64> {
        self.check_reachable()?;
        Ok(self.epoch.load(Ordering::Relaxed))
    }

    async fn available_providers(&self) -> Result<Vec<ProviderInfo>> {
        self.check_reachable()?;
        Ok(self.providers.lock().unwrap().clone())
    }

    async fn wallet_balance(&self, _address: &str) -> Result<f64> {
        self.check_reachable()?;
        Ok(42.0)
    }
}
