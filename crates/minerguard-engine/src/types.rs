//! Data model shared by the engine components.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A penalty transaction against a miner, with its block denormalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunishmentEvent {
    /// Punished account.
    pub from: String,
    /// Receiving account.
    pub to: String,
    pub extrinsic_hash: String,
    pub extrinsic_name: String,
    pub amount: String,
    pub block_number: u64,
    pub block_hash: String,
    pub timestamp: u64,
}

/// One block as retained by the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub timestamp: u64,
    pub punishments: Vec<PunishmentEvent>,
}

/// Container as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Unix seconds.
    pub created: i64,
}

/// Resource usage of a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_usage: u64,
}

/// Raw miner entry from the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinerChainInfo {
    pub state: String,
    pub collaterals: u128,
    pub debt: u128,
    pub declaration_space: u128,
    pub idle_space: u128,
    pub service_space: u128,
    pub lock_space: u128,
}

/// Reward totals from the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardInfo {
    pub total_reward: u128,
    pub reward_issued: u128,
}

/// On-chain miner state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MinerStatus {
    Positive,
    Frozen,
    Other(String),
    #[default]
    Unknown,
}

impl MinerStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Self::Positive,
            "frozen" => Self::Frozen,
            "" => Self::Unknown,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive)
    }
}

impl fmt::Display for MinerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => f.write_str("positive"),
            Self::Frozen => f.write_str("frozen"),
            Self::Other(s) => f.write_str(s),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl From<String> for MinerStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<MinerStatus> for String {
    fn from(status: MinerStatus) -> Self {
        status.to_string()
    }
}

/// Chain view of a miner, converted for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStat {
    pub status: MinerStatus,
    pub collaterals: String,
    pub debt: String,
    pub declaration_space: String,
    pub idle_space: String,
    pub service_space: String,
    pub lock_space: String,
    pub total_reward: String,
    pub reward_issued: String,
    /// Punishments for this account in blocks still held by the window.
    pub punishments: Vec<PunishmentEvent>,
}

/// Settings read from a miner container's own configuration.
///
/// The mnemonic is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerSettings {
    pub workspace: String,
    pub port: u16,
    pub max_use_space: u64,
    pub cores: u32,
    pub api_endpoint: String,
    pub staking_account: String,
    pub earnings_account: String,
    pub rpcs: Vec<String>,
    pub tees: Vec<String>,
    pub timeout: u64,
}

/// A discovered miner on one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerRecord {
    pub signature_account: String,
    pub container: ContainerInfo,
    pub settings: MinerSettings,
    pub stats: ContainerStats,
    pub chain: ChainStat,
}

/// Owned view of one host's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    pub host: String,
    /// Miners sorted by signature account.
    pub miners: Vec<MinerRecord>,
}

/// Whether a host is mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    Running,
    Sleeping,
}
