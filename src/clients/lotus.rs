//! Lotus JSON-RPC client
//!
//! Implements the deal-ledger surface: starting deals, reading deal and
//! chain state, listing providers, and wallet balances. All calls go over
//! a single authenticated JSON-RPC endpoint.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::types::{HoldfastError, Result};

/// attoFIL per FIL
const ATTO_PER_FIL: f64 = 1e18;

/// Providers probed per listing call; the miner set is large and the
/// listing endpoint only needs a ranked sample.
const PROVIDER_PROBE_LIMIT: usize = 50;

/// Parameters for opening a new storage deal
#[derive(Debug, Clone)]
pub struct StartDealParams {
    pub cid: String,
    pub provider_id: String,
    pub duration_epochs: i64,
    pub price_per_epoch_fil: f64,
    pub wallet: String,
    pub verified: bool,
}

/// A capacity provider in the deal market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub power: i64,
    pub available: bool,
    pub price: f64,
    pub reputation: f64,
}

/// Capability surface of the ledger collaborator
#[async_trait]
pub trait DealLedger: Send + Sync {
    /// Propose a storage deal; returns the external deal handle
    async fn start_deal(&self, params: StartDealParams) -> Result<String>;

    /// Current on-chain state string for a deal handle
    async fn deal_status(&self, deal_cid: &str) -> Result<String>;

    /// Current chain epoch
    async fn current_epoch(&self) -> Result<i64>;

    /// Providers currently accepting deals
    async fn available_providers(&self) -> Result<Vec<ProviderInfo>>;

    /// Wallet balance in FIL
    async fn wallet_balance(&self, address: &str) -> Result<f64>;
}

/// JSON-RPC client for a Lotus full node
#[derive(Clone)]
pub struct LotusClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Lotus represents CIDs as `{"/": "bafy..."}`
#[derive(Serialize, Deserialize)]
struct CidRef {
    #[serde(rename = "/")]
    cid: String,
}

#[derive(Deserialize)]
struct ChainHead {
    #[serde(rename = "Height")]
    height: i64,
}

#[derive(Deserialize)]
struct DealInfo {
    #[serde(rename = "State")]
    state: i64,
}

#[derive(Deserialize)]
struct MinerPower {
    #[serde(rename = "MinerPower")]
    miner_power: PowerClaim,
}

#[derive(Deserialize)]
struct PowerClaim {
    #[serde(rename = "QualityAdjPower")]
    quality_adj_power: String,
}

impl LotusClient {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| HoldfastError::Config(format!("Failed to build Lotus client: {e}")))?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            token,
        })
    }

    /// One JSON-RPC round trip. Transport failures are transient; an RPC
    /// error answered by the node is permanent.
    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let mut request = self.http.post(&self.api_url).json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        }));

        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(HoldfastError::Transient(format!(
                "Lotus {method} returned HTTP {}",
                response.status()
            )));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| HoldfastError::Transient(format!("Bad Lotus response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(HoldfastError::Permanent(format!(
                "Lotus {method} failed ({}): {}",
                err.code, err.message
            )));
        }

        parsed
            .result
            .ok_or_else(|| HoldfastError::Permanent(format!("Lotus {method} returned no result")))
    }
}

#[async_trait]
impl DealLedger for LotusClient {
    async fn start_deal(&self, params: StartDealParams) -> Result<String> {
        let epoch_price_atto = (params.price_per_epoch_fil * ATTO_PER_FIL).round() as u128;

        let deal_params = json!({
            "Data": {
                "TransferType": "graphsync",
                "Root": { "/": params.cid },
            },
            "Wallet": params.wallet,
            "Miner": params.provider_id,
            "EpochPrice": epoch_price_atto.to_string(),
            "MinBlocksDuration": params.duration_epochs,
            "VerifiedDeal": params.verified,
        });

        debug!(
            cid = %params.cid,
            provider = %params.provider_id,
            epochs = params.duration_epochs,
            "Proposing storage deal"
        );

        let handle: CidRef = self
            .rpc("Filecoin.ClientStartDeal", json!([deal_params]))
            .await?;
        Ok(handle.cid)
    }

    async fn deal_status(&self, deal_cid: &str) -> Result<String> {
        let info: DealInfo = self
            .rpc(
                "Filecoin.ClientGetDealInfo",
                json!([{ "/": deal_cid }]),
            )
            .await?;
        Ok(deal_state_name(info.state))
    }

    async fn current_epoch(&self) -> Result<i64> {
        let head: ChainHead = self.rpc("Filecoin.ChainHead", json!([])).await?;
        Ok(head.height)
    }

    async fn available_providers(&self) -> Result<Vec<ProviderInfo>> {
        let miners: Vec<String> = self
            .rpc("Filecoin.StateListMiners", json!([null]))
            .await?;

        let mut providers = Vec::new();
        for miner in miners.into_iter().take(PROVIDER_PROBE_LIMIT) {
            let power: MinerPower = match self
                .rpc("Filecoin.StateMinerPower", json!([miner, null]))
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    // Skip providers we cannot inspect
                    warn!(provider = %miner, error = %e, "Skipping provider");
                    continue;
                }
            };

            let quality_power = power
                .miner_power
                .quality_adj_power
                .parse::<i64>()
                .unwrap_or(0);

            providers.push(ProviderInfo {
                id: miner,
                power: quality_power,
                // The chain does not expose ask state here; deal proposal
                // is where unavailability actually surfaces.
                available: true,
                price: 0.001,
                reputation: 1.0,
            });
        }

        Ok(providers)
    }

    async fn wallet_balance(&self, address: &str) -> Result<f64> {
        let balance: String = self
            .rpc("Filecoin.WalletBalance", json!([address]))
            .await?;

        let atto = balance
            .parse::<f64>()
            .map_err(|e| HoldfastError::Permanent(format!("Bad balance '{balance}': {e}")))?;
        Ok(atto / ATTO_PER_FIL)
    }
}

/// Map a numeric storagemarket deal state to its canonical name.
/// Unknown codes keep the number so the monitor can log them.
fn deal_state_name(state: i64) -> String {
    match state {
        1 => "StorageDealProposalAccepted",
        5 => "StorageDealProposalRejected",
        6 => "StorageDealProposalNotFound",
        7 => "StorageDealStaged",
        8 => "StorageDealSealing",
        11 => "StorageDealWaitingForData",
        13 => "StorageDealTransferring",
        16 => "StorageDealAwaitingPreCommit",
        18 => "StorageDealPublish",
        19 => "StorageDealPublishing",
        20 => "StorageDealError",
        21 => "StorageDealFailing",
        22 => "StorageDealExpired",
        23 => "StorageDealSlashed",
        26 => "StorageDealActive",
        other => return format!("StorageDealUnknown({other})"),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deal_state_names() {
        assert_eq!(deal_state_name(26), "StorageDealActive");
        assert_eq!(deal_state_name(23), "StorageDealSlashed");
        assert_eq!(deal_state_name(99), "StorageDealUnknown(99)");
    }
}
