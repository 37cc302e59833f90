//! # minerguard Engine
//!
//! Collection side of the minerguard fleet monitor.
//!
//! ## Features
//!
//! - Rolling window of recent blocks and their punishment events
//! - Chain statistics for miner accounts over JSON-RPC
//! - Per-host monitors that discover miner containers through the Docker
//!   Engine API and raise alerts
//! - Fleet lifecycle with quiescent hot reload

pub mod block_window;
pub mod chain;
pub mod chain_stat;
pub mod error;
pub mod fleet;
pub mod host_monitor;
pub mod identity;
pub mod runtime;
pub mod types;

#[cfg(test)]
mod test_support;

pub use block_window::{window_capacity, BlockWindow, BlockWindowCache, WindowStatus};
pub use chain::{ChainClient, RpcChainClient};
pub use chain_stat::ChainStatReader;
pub use error::{ChainError, ChainStatError, EngineError, MinerConfigError, RuntimeError};
pub use fleet::{ClientFactory, DefaultClientFactory, FleetOrchestrator, HostClients, ReloadPolicy};
pub use host_monitor::{
    AlertPolicy, CycleOutcome, CycleReport, HostMonitor, HostMonitorSettings, Jitter,
};
pub use identity::account_from_mnemonic;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use types::*;
