//! IPFS HTTP API client
//!
//! Implements the content-store surface the pipeline needs: add, pin,
//! unpin, existence, size, cat. Pinning is idempotent: a CID that is
//! already pinned reports success.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::types::{HoldfastError, Result};

/// Capability surface of the storage network collaborator
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Add raw bytes, returning the content identifier
    async fn add(&self, data: Vec<u8>) -> Result<String>;

    /// Instruct the node to retain the content. Already-pinned is success.
    async fn pin(&self, cid: &str) -> Result<()>;

    /// Release a pin. Not-pinned is success.
    async fn unpin(&self, cid: &str) -> Result<()>;

    /// Whether the content is resolvable on the network
    async fn exists(&self, cid: &str) -> Result<bool>;

    /// Cumulative content size in bytes
    async fn stat_size(&self, cid: &str) -> Result<u64>;

    /// Fetch the content
    async fn cat(&self, cid: &str) -> Result<Vec<u8>>;
}

/// Client for the IPFS node HTTP API (`/api/v0/...`)
#[derive(Clone)]
pub struct IpfsClient {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct ObjectStatResponse {
    #[serde(rename = "CumulativeSize")]
    cumulative_size: u64,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "Message")]
    message: String,
}

impl IpfsClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HoldfastError::Config(format!("Failed to build IPFS client: {e}")))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, path)
    }

    /// POST an API call with a single `arg` parameter and return the body.
    /// Transport failures are transient; an answered error is permanent
    /// and carries the node's message.
    async fn call(&self, path: &str, arg: &str) -> Result<bytes::Bytes> {
        let response = self
            .http
            .post(self.endpoint(path))
            .query(&[("arg", arg)])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return Ok(body);
        }

        let message = serde_json::from_slice::<ApiError>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());

        Err(HoldfastError::Permanent(format!(
            "IPFS {path} failed for {cid}: {message}",
            cid = arg
        )))
    }
}

#[async_trait]
impl ContentStore for IpfsClient {
    async fn add(&self, data: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(data).file_name("file");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoint("add"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HoldfastError::Permanent(format!(
                "IPFS add failed: {}",
                response.status()
            )));
        }

        let parsed: AddResponse = response.json().await?;
        Ok(parsed.hash)
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        match self.call("pin/add", cid).await {
            Ok(_) => Ok(()),
            // Re-pinning an already pinned CID is not a failure
            Err(HoldfastError::Permanent(msg)) if msg.contains("already pinned") => {
                debug!(cid = %cid, "Content already pinned");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn unpin(&self, cid: &str) -> Result<()> {
        match self.call("pin/rm", cid).await {
            Ok(_) => Ok(()),
            Err(HoldfastError::Permanent(msg)) if msg.contains("not pinned") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, cid: &str) -> Result<bool> {
        match self.call("object/stat", cid).await {
            Ok(_) => Ok(true),
            Err(HoldfastError::Permanent(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stat_size(&self, cid: &str) -> Result<u64> {
        let body = self.call("object/stat", cid).await?;
        let stat: ObjectStatResponse = serde_json::from_slice(&body)
            .map_err(|e| HoldfastError::Permanent(format!("Bad object/stat response: {e}")))?;
        Ok(stat.cumulative_size)
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let body = self.call("cat", cid).await?;
        Ok(body.to_vec())
    }
}

/// Basic CID format validation: v0 (`Qm...`) or v1 base32 (`bafy...` /
/// `bafk...`) prefixes.
pub fn validate_cid(cid: &str) -> Result<()> {
    if cid.is_empty() {
        return Err(HoldfastError::Validation("CID cannot be empty".into()));
    }

    let plausible = (cid.starts_with("Qm") && cid.len() == 46)
        || ((cid.starts_with("bafy") || cid.starts_with("bafk")) && cid.len() > 8);

    if !plausible {
        return Err(HoldfastError::Validation(format!("Invalid CID format: {cid}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cid_v0() {
        assert!(validate_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").is_ok());
    }

    #[test]
    fn test_validate_cid_v1() {
        assert!(validate_cid("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").is_ok());
        assert!(validate_cid("bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy").is_ok());
    }

    #[test]
    fn test_validate_cid_rejects_garbage() {
        assert!(validate_cid("").is_err());
        assert!(validate_cid("Qm").is_err());
        assert!(validate_cid("notacid").is_err());
        assert!(validate_cid("QmTooShort").is_err());
    }
}
