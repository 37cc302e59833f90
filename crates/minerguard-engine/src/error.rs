//! Engine errors.

use std::time::Duration;

use thiserror::Error;

use crate::types::ChainStat;

/// Chain query errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("RPC method {method} returned error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Unexpected RPC response: {0}")]
    Decode(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("No RPC endpoints configured")]
    NoEndpoints,
}

/// Container runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container engine request failed: {0}")]
    Request(String),

    #[error("Container engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid container engine response: {0}")]
    Decode(String),
}

/// Failure of one [`ChainStatReader`](crate::chain_stat::ChainStatReader) read,
/// named by the stage that failed.
#[derive(Debug, Error)]
pub enum ChainStatError {
    #[error("Invalid account {account}: {message}")]
    AccountDecode { account: String, message: String },

    #[error("Failed to query miner status: {0}")]
    Status(#[source] ChainError),

    /// The status was already read and converted.
    #[error("Failed to query latest block: {source}")]
    Height {
        #[source]
        source: ChainError,
        partial: Box<ChainStat>,
    },

    /// The status was already read and converted.
    #[error("Failed to query reward: {source}")]
    Reward {
        #[source]
        source: ChainError,
        partial: Box<ChainStat>,
    },
}

impl ChainStatError {
    /// Status converted before the failing stage, if any.
    pub fn partial(&self) -> Option<&ChainStat> {
        match self {
            Self::Height { partial, .. } | Self::Reward { partial, .. } => Some(&**partial),
            _ => None,
        }
    }
}

/// Errors raised while reading a miner's in-container configuration.
#[derive(Debug, Error)]
pub enum MinerConfigError {
    #[error("Config output is shorter than the stream header")]
    Truncated,

    #[error("Failed to parse miner config: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("Miner config has no mnemonic")]
    MissingMnemonic,

    #[error("Failed to derive key: {0}")]
    Key(String),
}

/// Engine error types.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Config error: {0}")]
    Config(#[from] minerguard_config::ConfigError),

    #[error("Container {container}: {source}")]
    MinerConfig {
        container: String,
        #[source]
        source: MinerConfigError,
    },

    #[error("Container {container}: {source}")]
    Container {
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Miner {account}: {source}")]
    ChainStat {
        account: String,
        #[source]
        source: ChainStatError,
    },

    #[error("Failed to start monitors: {}", .0.join("; "))]
    Startup(Vec<String>),

    #[error("Reload deadline of {0:?} elapsed before monitors were idle")]
    ReloadDeadline(Duration),

    #[error("Monitors still collecting after {0} checks")]
    ReloadExhausted(u32),
}
