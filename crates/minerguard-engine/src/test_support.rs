//! Hand-written mocks shared by the engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minerguard_monitor::{AlertChannel, AlertDispatcher, AlertMessage, MonitorError};
use parking_lot::Mutex;

use crate::chain::ChainClient;
use crate::error::{ChainError, RuntimeError};
use crate::identity::public_key_of;
use crate::runtime::ContainerRuntime;
use crate::types::{
    BlockRecord, ContainerInfo, ContainerStats, MinerChainInfo, PunishmentEvent, RewardInfo,
};

pub const MINER_IMAGE: &str = "cesslab/cess-miner";

pub fn block(number: u64, punished: &[&str]) -> BlockRecord {
    BlockRecord {
        number,
        hash: format!("0x{:064x}", number),
        timestamp: 1_700_000_000 + number * 6,
        punishments: punished
            .iter()
            .map(|account| PunishmentEvent {
                from: account.to_string(),
                to: "cXtreasury".to_string(),
                extrinsic_hash: format!("0xe{}", number),
                extrinsic_name: "NoSubmitSvcProof".to_string(),
                amount: "100".to_string(),
                block_number: number,
                block_hash: format!("0x{:064x}", number),
                timestamp: 1_700_000_000 + number * 6,
            })
            .collect(),
    }
}

/// In-memory chain. Unknown blocks at or below the height are empty.
#[derive(Default)]
pub struct MockChain {
    height: AtomicU64,
    fail_height: AtomicBool,
    blocks: Mutex<HashMap<u64, BlockRecord>>,
    failing_blocks: Mutex<HashSet<u64>>,
    miners: Mutex<HashMap<[u8; 32], String>>,
    rewards: Mutex<HashMap<[u8; 32], RewardInfo>>,
    pub block_calls: AtomicUsize,
    pub miner_calls: AtomicUsize,
}

impl MockChain {
    pub fn new(height: u64) -> Self {
        let chain = Self::default();
        chain.height.store(height, Ordering::SeqCst);
        chain
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn fail_height(&self, fail: bool) {
        self.fail_height.store(fail, Ordering::SeqCst);
    }

    pub fn add_block(&self, record: BlockRecord) {
        self.blocks.lock().insert(record.number, record);
    }

    pub fn fail_block(&self, number: u64) {
        self.failing_blocks.lock().insert(number);
    }

    pub fn set_miner(&self, account: &str, state: &str) {
        if let Ok(key) = public_key_of(account) {
            self.miners.lock().insert(key, state.to_string());
            self.rewards.lock().entry(key).or_default();
        }
    }

    pub fn set_reward(&self, account: &str, total: u128, issued: u128) {
        if let Ok(key) = public_key_of(account) {
            self.rewards.lock().insert(
                key,
                RewardInfo {
                    total_reward: total,
                    reward_issued: issued,
                },
            );
        }
    }

    pub fn remove_reward(&self, account: &str) {
        if let Ok(key) = public_key_of(account) {
            self.rewards.lock().remove(&key);
        }
    }
}

fn decode(message: &str) -> ChainError {
    ChainError::Decode(message.to_string())
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_block_height(&self) -> Result<u64, ChainError> {
        if self.fail_height.load(Ordering::SeqCst) {
            return Err(ChainError::Transport {
                endpoint: "mock".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockRecord, ChainError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_blocks.lock().contains(&number) {
            return Err(decode("corrupt block"));
        }
        if let Some(record) = self.blocks.lock().get(&number) {
            return Ok(record.clone());
        }
        if number <= self.height.load(Ordering::SeqCst) {
            return Ok(block(number, &[]));
        }
        Err(ChainError::BlockNotFound(number))
    }

    async fn miner_info(&self, public_key: &[u8; 32]) -> Result<MinerChainInfo, ChainError> {
        self.miner_calls.fetch_add(1, Ordering::SeqCst);
        let state = self
            .miners
            .lock()
            .get(public_key)
            .cloned()
            .ok_or_else(|| decode("miner not registered"))?;
        Ok(MinerChainInfo {
            state,
            collaterals: 4_000_000_000_000_000_000_000,
            declaration_space: 1 << 40,
            ..Default::default()
        })
    }

    async fn reward_info(&self, public_key: &[u8; 32]) -> Result<RewardInfo, ChainError> {
        self.rewards
            .lock()
            .get(public_key)
            .copied()
            .ok_or_else(|| decode("no reward entry"))
    }
}

/// Framed `cat config.yaml` output for a miner with `mnemonic`.
pub fn miner_config_output(mnemonic: &str) -> Vec<u8> {
    let mut raw = vec![1, 0, 0, 0, 0, 0, 0, 0];
    raw.extend_from_slice(
        format!(
            "app:\n  port: 15001\n  cores: 2\nchain:\n  mnemonic: \"{}\"\n  earningsacc: cXearnings\n",
            mnemonic
        )
        .as_bytes(),
    );
    raw
}

/// In-memory container engine.
#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<Vec<ContainerInfo>>,
    configs: Mutex<HashMap<String, Vec<u8>>>,
    failing_stats: Mutex<HashSet<String>>,
    list_delay: Mutex<Duration>,
    pub list_calls: AtomicUsize,
    pub exec_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running miner container whose config holds `mnemonic`.
    pub fn add_miner(&self, id: &str, created: i64, mnemonic: &str) {
        self.add_container(ContainerInfo {
            id: id.to_string(),
            name: format!("miner-{}", id),
            image: format!("{}:testnet", MINER_IMAGE),
            created,
        });
        self.configs
            .lock()
            .insert(id.to_string(), miner_config_output(mnemonic));
    }

    pub fn add_container(&self, container: ContainerInfo) {
        self.containers.lock().push(container);
    }

    pub fn set_config(&self, id: &str, raw: Vec<u8>) {
        self.configs.lock().insert(id.to_string(), raw);
    }

    pub fn remove_container(&self, id: &str) {
        self.containers.lock().retain(|c| c.id != id);
    }

    pub fn fail_stats(&self, id: &str) {
        self.failing_stats.lock().insert(id.to_string());
    }

    /// Make listing take `delay`, keeping a cycle in flight.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = delay;
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.containers.lock().clone())
    }

    async fn exec(&self, id: &str, _cmd: &[&str], _workdir: &str) -> Result<Vec<u8>, RuntimeError> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        self.configs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::Request(format!("no such container: {}", id)))
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, RuntimeError> {
        if self.failing_stats.lock().contains(id) {
            return Err(RuntimeError::Status {
                status: 500,
                body: "stats unavailable".to_string(),
            });
        }
        Ok(ContainerStats {
            cpu_percent: 12.5,
            memory_percent: 40.0,
            memory_usage: 4096,
        })
    }
}

/// Alert channel that records every delivered body.
#[derive(Default)]
pub struct RecordingChannel {
    bodies: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().clone()
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), MonitorError> {
        self.bodies.lock().push(message.body.clone());
        Ok(())
    }
}

/// An enabled dispatcher delivering to a fresh [`RecordingChannel`].
pub fn recording_dispatcher() -> (Arc<AlertDispatcher>, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::default());
    let mut dispatcher = AlertDispatcher::new(true);
    dispatcher.add_channel(channel.clone());
    (Arc::new(dispatcher), channel)
}
