//! Chain access.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ChainError;
use crate::identity::to_hex;
use crate::types::{BlockRecord, MinerChainInfo, PunishmentEvent, RewardInfo};

/// Queries the engine needs from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Number of the best block.
    async fn current_block_height(&self) -> Result<u64, ChainError>;

    /// Block with its punishment events.
    async fn block_by_number(&self, number: u64) -> Result<BlockRecord, ChainError>;

    async fn miner_info(&self, public_key: &[u8; 32]) -> Result<MinerChainInfo, ChainError>;

    async fn reward_info(&self, public_key: &[u8; 32]) -> Result<RewardInfo, ChainError>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC 2.0 client with ordered endpoint failover.
///
/// The endpoint that last answered is tried first on the next call.
pub struct RpcChainClient {
    endpoints: Vec<String>,
    preferred: AtomicUsize,
    next_id: AtomicU64,
    client: reqwest::Client,
}

impl RpcChainClient {
    pub fn new(endpoints: Vec<String>) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::NoEndpoints);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Transport {
                endpoint: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            endpoints,
            preferred: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            client,
        })
    }

    /// Call `method`, failing over to the next endpoint on transport errors.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let start = self.preferred.load(Ordering::Relaxed);
        let mut last_error = ChainError::NoEndpoints;

        for offset in 0..self.endpoints.len() {
            let index = (start + offset) % self.endpoints.len();
            let endpoint = &self.endpoints[index];
            match self.call_endpoint(endpoint, method, &params).await {
                Ok(result) => {
                    self.preferred.store(index, Ordering::Relaxed);
                    return serde_json::from_value(result)
                        .map_err(|e| ChainError::Decode(format!("{}: {}", method, e)));
                }
                Err(e @ ChainError::Transport { .. }) => {
                    warn!("{}, trying next endpoint", e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn call_endpoint(
        &self,
        endpoint: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("RPC {} -> {}", method, endpoint);

        let transport = |e: reqwest::Error| ChainError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        };
        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(ChainError::Transport {
                endpoint: endpoint.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        let body: RpcResponse = response.json().await.map_err(transport)?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct HeaderView {
    #[serde(deserialize_with = "de_u128")]
    number: u128,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockView {
    #[serde(deserialize_with = "de_u128")]
    number: u128,
    hash: String,
    #[serde(default, deserialize_with = "de_u128")]
    timestamp: u128,
    #[serde(default)]
    punishments: Vec<PunishmentView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PunishmentView {
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    extrinsic_hash: String,
    #[serde(default)]
    extrinsic_name: String,
    #[serde(default)]
    amount: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinerInfoView {
    state: String,
    #[serde(default, deserialize_with = "de_u128")]
    collaterals: u128,
    #[serde(default, deserialize_with = "de_u128")]
    debt: u128,
    #[serde(default, deserialize_with = "de_u128")]
    declaration_space: u128,
    #[serde(default, deserialize_with = "de_u128")]
    idle_space: u128,
    #[serde(default, deserialize_with = "de_u128")]
    service_space: u128,
    #[serde(default, deserialize_with = "de_u128")]
    lock_space: u128,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewardView {
    #[serde(default, deserialize_with = "de_u128")]
    total_reward: u128,
    #[serde(default, deserialize_with = "de_u128")]
    reward_issued: u128,
}

fn to_u64(value: u128, field: &str) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::Decode(format!("{} out of range", field)))
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn current_block_height(&self) -> Result<u64, ChainError> {
        let header: HeaderView = self.call("chain_getHeader", json!([])).await?;
        to_u64(header.number, "block number")
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockRecord, ChainError> {
        let view: Option<BlockView> = self.call("minerguard_blockData", json!([number])).await?;
        let view = view.ok_or(ChainError::BlockNotFound(number))?;

        let number = to_u64(view.number, "block number")?;
        let timestamp = to_u64(view.timestamp, "timestamp")?;
        let punishments = view
            .punishments
            .into_iter()
            .map(|p| PunishmentEvent {
                from: p.from,
                to: p.to,
                extrinsic_hash: p.extrinsic_hash,
                extrinsic_name: p.extrinsic_name,
                amount: p.amount,
                block_number: number,
                block_hash: view.hash.clone(),
                timestamp,
            })
            .collect();

        Ok(BlockRecord {
            number,
            hash: view.hash,
            timestamp,
            punishments,
        })
    }

    async fn miner_info(&self, public_key: &[u8; 32]) -> Result<MinerChainInfo, ChainError> {
        let view: MinerInfoView = self
            .call("minerguard_minerInfo", json!([to_hex(public_key)]))
            .await?;
        Ok(MinerChainInfo {
            state: view.state,
            collaterals: view.collaterals,
            debt: view.debt,
            declaration_space: view.declaration_space,
            idle_space: view.idle_space,
            service_space: view.service_space,
            lock_space: view.lock_space,
        })
    }

    async fn reward_info(&self, public_key: &[u8; 32]) -> Result<RewardInfo, ChainError> {
        let view: RewardView = self
            .call("minerguard_rewardInfo", json!([to_hex(public_key)]))
            .await?;
        Ok(RewardInfo {
            total_reward: view.total_reward,
            reward_issued: view.reward_issued,
        })
    }
}

/// Accepts a JSON number, a decimal string or a `0x` hex string.
fn de_u128<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    struct U128Visitor;

    impl Visitor<'_> for U128Visitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned integer, decimal string or 0x hex string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v as u128)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(|_| E::custom("negative value"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            parse_u128(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(U128Visitor)
}

fn parse_u128(raw: &str) -> Result<u128, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some("") => Ok(0),
        Some(hex) => u128::from_str_radix(hex, 16),
        None => raw.parse::<u128>(),
    };
    parsed.map_err(|e| format!("invalid integer {:?}: {}", raw, e))
}
