//! Per-host monitoring cycle.

#[cfg(test)]
#[path = "host_monitor_tests.rs"]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use minerguard_config::Config;
use minerguard_monitor::{AlertDispatcher, AlertEvent};
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::block_window::BlockWindowCache;
use crate::chain_stat::ChainStatReader;
use crate::error::{EngineError, MinerConfigError};
use crate::identity::account_from_mnemonic;
use crate::runtime::{parse_miner_config, ContainerRuntime, MINER_WORKDIR};
use crate::types::{ChainStat, ClientStatus, ContainerInfo, HostSnapshot, MinerRecord};

/// Command reading the miner's own configuration.
const READ_CONFIG_CMD: [&str; 2] = ["cat", "config.yaml"];

/// Capacity of the per-cycle error queue.
const ERROR_QUEUE_SIZE: usize = 64;

const NO_SUBMIT_SVC_PROOF: &str = "NoSubmitSvcProof";
const SVC_PROOF_RES_INCORRECT: &str = "SvcProofResIncorrect";

/// Random delay before a cycle and before each chain read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Jitter {
    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis = rand::thread_rng()
            .gen_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }

    async fn wait(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

/// When a miner deserves an alert.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Containers younger than this never raise status alerts.
    pub grace_period: Duration,
    pub explorer_url: String,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3600),
            explorer_url: "https://scan.cess.network".to_string(),
        }
    }
}

impl AlertPolicy {
    fn link(&self, kind: &str, id: impl std::fmt::Display) -> String {
        format!("{}/{}/{}", self.explorer_url.trim_end_matches('/'), kind, id)
    }

    /// Alerts for one miner after a successful chain read.
    ///
    /// A punishment is reported again on every cycle while its block stays in
    /// the window.
    pub fn evaluate(
        &self,
        host: &str,
        account: &str,
        container_age: Duration,
        stat: &ChainStat,
        block: u64,
    ) -> Vec<AlertEvent> {
        let mut alerts = Vec::new();

        if let Some(alert) = self.status_alert(host, account, container_age, stat, block) {
            alerts.push(alert);
        }

        for punishment in &stat.punishments {
            let (description, url) = match punishment.extrinsic_name.as_str() {
                NO_SUBMIT_SVC_PROOF => (
                    "The Storage Node did not submit service file proof, \
                     you can check this block's system events in explorer"
                        .to_string(),
                    self.link("block", punishment.block_number),
                ),
                SVC_PROOF_RES_INCORRECT => (
                    "The Storage Node service file proof checked by tee was incorrect"
                        .to_string(),
                    self.link("extrinsic", &punishment.extrinsic_hash),
                ),
                _ => (
                    format!("{} got punishment at block {}", account, punishment.block_number),
                    self.link("block", punishment.block_number),
                ),
            };
            alerts.push(
                AlertEvent::new(host, description)
                    .with_account(account)
                    .with_block(punishment.block_number)
                    .with_detail_url(url),
            );
        }

        alerts
    }

    /// Alert for a non-positive status once the grace period has passed.
    pub fn status_alert(
        &self,
        host: &str,
        account: &str,
        container_age: Duration,
        stat: &ChainStat,
        block: u64,
    ) -> Option<AlertEvent> {
        if stat.status.is_positive() || container_age <= self.grace_period {
            return None;
        }
        Some(
            AlertEvent::new(
                host,
                format!("The Storage Node status is {} on chain", stat.status),
            )
            .with_account(account)
            .with_block(block)
            .with_detail_url(self.link("account", account)),
        )
    }
}

/// Tunables for a [`HostMonitor`].
#[derive(Debug, Clone)]
pub struct HostMonitorSettings {
    /// Image name fragment of miner containers.
    pub miner_image: String,
    pub jitter: Jitter,
    pub policy: AlertPolicy,
}

impl HostMonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            miner_image: config.miner_image.clone(),
            jitter: Jitter::default(),
            policy: AlertPolicy {
                explorer_url: config.alert.explorer_url.clone(),
                ..Default::default()
            },
        }
    }
}

impl Default for HostMonitorSettings {
    fn default() -> Self {
        Self {
            miner_image: "cesslab/cess-miner".to_string(),
            jitter: Jitter::default(),
            policy: AlertPolicy::default(),
        }
    }
}

/// Counters for one finished cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Running miner containers seen.
    pub containers: usize,
    pub registered: usize,
    pub removed: usize,
    pub stats_updated: usize,
    pub chain_updated: usize,
    pub alerts: usize,
    pub errors: usize,
}

/// Result of asking a monitor to run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was still running, or the monitor is stopped.
    Skipped,
}

/// Clears the collecting flag on drop.
struct CollectingGuard<'a>(&'a AtomicBool);

impl<'a> CollectingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Monitors the miner containers of a single host.
pub struct HostMonitor {
    host: String,
    runtime: Arc<dyn ContainerRuntime>,
    chain_stat: ChainStatReader,
    window: Arc<BlockWindowCache>,
    alerts: Arc<AlertDispatcher>,
    settings: HostMonitorSettings,
    active: AtomicBool,
    collecting: AtomicBool,
    registry: RwLock<HashMap<String, MinerRecord>>,
}

impl HostMonitor {
    pub fn new(
        host: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        chain_stat: ChainStatReader,
        window: Arc<BlockWindowCache>,
        alerts: Arc<AlertDispatcher>,
        settings: HostMonitorSettings,
    ) -> Self {
        Self {
            host: host.into(),
            runtime,
            chain_stat,
            window,
            alerts,
            settings,
            active: AtomicBool::new(true),
            collecting: AtomicBool::new(false),
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop future cycles. A cycle in flight runs to completion.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ClientStatus {
        if self.is_collecting() {
            ClientStatus::Running
        } else {
            ClientStatus::Sleeping
        }
    }

    /// Owned copy of the registry, sorted by account.
    pub fn snapshot(&self) -> HostSnapshot {
        let mut miners: Vec<MinerRecord> = self.registry.read().values().cloned().collect();
        miners.sort_by(|a, b| a.signature_account.cmp(&b.signature_account));
        HostSnapshot {
            host: self.host.clone(),
            miners,
        }
    }

    /// Run cycles until stopped, sleeping `interval` between them.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!("Monitoring started for host {}", self.host);
        while self.is_active() {
            if let CycleOutcome::Completed(report) = self.run_cycle().await {
                debug!("Cycle on {} finished: {:?}", self.host, report);
            }
            if !self.is_active() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
        info!("Monitoring stopped for host {}", self.host);
    }

    /// Run one cycle unless one is already in progress.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = CollectingGuard::acquire(&self.collecting) else {
            warn!("Cycle on {} still running, skipping", self.host);
            return CycleOutcome::Skipped;
        };
        // stop() may have landed between the loop check and the guard.
        if !self.is_active() {
            debug!("Monitor for {} stopped, skipping cycle", self.host);
            return CycleOutcome::Skipped;
        }

        let (tx, rx) = mpsc::channel(ERROR_QUEUE_SIZE);
        let drain = tokio::spawn(drain_errors(self.host.clone(), rx));

        let mut report = self.collect(&tx).await;

        drop(tx);
        report.errors = match drain.await {
            Ok(count) => count,
            Err(e) => {
                error!("Error drain for {} failed: {}", self.host, e);
                0
            }
        };
        CycleOutcome::Completed(report)
    }

    async fn collect(&self, errors: &mpsc::Sender<EngineError>) -> CycleReport {
        let mut report = CycleReport::default();
        self.settings.jitter.wait().await;

        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                report_error(errors, e.into()).await;
                return report;
            }
        };
        let miners: Vec<ContainerInfo> = containers
            .iter()
            .filter(|c| c.image.contains(&self.settings.miner_image))
            .cloned()
            .collect();
        report.containers = miners.len();

        report.removed = self.reconcile(&containers);

        let (registered, alerts) = self.register_new(&miners, errors).await;
        report.registered = registered;
        report.alerts += alerts;

        report.stats_updated = self.refresh_stats(errors).await;

        let (updated, alerts) = self.refresh_chain(errors).await;
        report.chain_updated = updated;
        report.alerts += alerts;

        report
    }

    /// Drop miners whose container is no longer running.
    fn reconcile(&self, running: &[ContainerInfo]) -> usize {
        let running: HashSet<&str> = running.iter().map(|c| c.id.as_str()).collect();
        let mut registry = self.registry.write();
        let before = registry.len();
        registry.retain(|account, record| {
            let keep = running.contains(record.container.id.as_str());
            if !keep {
                info!(
                    "Miner {} on host {} has been stopped or removed",
                    account, self.host
                );
            }
            keep
        });
        before - registry.len()
    }

    async fn register_new(
        &self,
        miners: &[ContainerInfo],
        errors: &mpsc::Sender<EngineError>,
    ) -> (usize, usize) {
        let known: HashSet<String> = self
            .registry
            .read()
            .values()
            .map(|r| r.container.id.clone())
            .collect();
        let pending: Vec<&ContainerInfo> =
            miners.iter().filter(|c| !known.contains(&c.id)).collect();

        let results = join_all(pending.into_iter().map(|c| self.read_miner(c))).await;

        let mut registered = 0;
        let mut alerts = 0;
        for result in results {
            match result {
                Ok(record) => {
                    let mut registry = self.registry.write();
                    if let Some(previous) = registry.get(&record.signature_account) {
                        warn!(
                            "Containers {} and {} on {} share account {}",
                            previous.container.id,
                            record.container.id,
                            self.host,
                            record.signature_account
                        );
                    }
                    info!(
                        "Registered miner {} ({}) on host {}",
                        record.signature_account, record.container.name, self.host
                    );
                    registry.insert(record.signature_account.clone(), record);
                    registered += 1;
                }
                Err(e) => {
                    if let EngineError::MinerConfig { container, source } = &e {
                        if !matches!(source, MinerConfigError::Key(_)) {
                            self.alerts.submit(
                                AlertEvent::new(
                                    &self.host,
                                    format!(
                                        "Failed to parse storage node config file for container {}: {}",
                                        container, source
                                    ),
                                )
                                .with_container(container)
                                .with_block(self.window.cursor()),
                            );
                            alerts += 1;
                        }
                    }
                    report_error(errors, e).await;
                }
            }
        }
        (registered, alerts)
    }

    async fn read_miner(&self, container: &ContainerInfo) -> Result<MinerRecord, EngineError> {
        let raw = self
            .runtime
            .exec(&container.id, &READ_CONFIG_CMD, MINER_WORKDIR)
            .await
            .map_err(|source| EngineError::Container {
                container: container.id.clone(),
                source,
            })?;

        let miner_config = |source| EngineError::MinerConfig {
            container: container.id.clone(),
            source,
        };
        let (settings, mnemonic) = parse_miner_config(&raw).map_err(miner_config)?;
        let account = account_from_mnemonic(&mnemonic).map_err(miner_config)?;

        Ok(MinerRecord {
            signature_account: account,
            container: container.clone(),
            settings,
            stats: Default::default(),
            chain: Default::default(),
        })
    }

    async fn refresh_stats(&self, errors: &mpsc::Sender<EngineError>) -> usize {
        let targets: Vec<(String, String)> = self
            .registry
            .read()
            .values()
            .map(|r| (r.signature_account.clone(), r.container.id.clone()))
            .collect();

        let results = join_all(targets.into_iter().map(|(account, id)| async move {
            let result = self.runtime.container_stats(&id).await;
            (account, id, result)
        }))
        .await;

        let mut updated = 0;
        for (account, id, result) in results {
            match result {
                Ok(stats) => {
                    if let Some(record) = self.registry.write().get_mut(&account) {
                        record.stats = stats;
                        updated += 1;
                    }
                }
                Err(source) => {
                    report_error(errors, EngineError::Container { container: id, source }).await;
                }
            }
        }
        updated
    }

    async fn refresh_chain(&self, errors: &mpsc::Sender<EngineError>) -> (usize, usize) {
        let mut targets: Vec<(String, i64)> = self
            .registry
            .read()
            .values()
            .map(|r| (r.signature_account.clone(), r.container.created))
            .collect();
        targets.sort();

        let mut updated = 0;
        let mut alerts = 0;
        for (account, created) in targets {
            self.settings.jitter.wait().await;
            let age = container_age(created);

            let events = match self.chain_stat.read(&account).await {
                Ok((mut stat, height)) => {
                    stat.punishments = self.window.punishments_for(&account);
                    let events = self
                        .settings
                        .policy
                        .evaluate(&self.host, &account, age, &stat, height);
                    if let Some(record) = self.registry.write().get_mut(&account) {
                        record.chain = stat;
                        updated += 1;
                    }
                    events
                }
                Err(e) => {
                    let events: Vec<AlertEvent> = e
                        .partial()
                        .and_then(|stat| {
                            self.settings.policy.status_alert(
                                &self.host,
                                &account,
                                age,
                                stat,
                                self.window.cursor(),
                            )
                        })
                        .into_iter()
                        .collect();
                    report_error(
                        errors,
                        EngineError::ChainStat {
                            account: account.clone(),
                            source: e,
                        },
                    )
                    .await;
                    events
                }
            };

            alerts += events.len();
            for event in events {
                self.alerts.submit(event);
            }
        }
        (updated, alerts)
    }
}

fn container_age(created: i64) -> Duration {
    let now = chrono::Utc::now().timestamp();
    Duration::from_secs(now.saturating_sub(created).max(0) as u64)
}

async fn report_error(errors: &mpsc::Sender<EngineError>, e: EngineError) {
    if let Err(mpsc::error::SendError(e)) = errors.send(e).await {
        error!("Error queue closed, dropping: {}", e);
    }
}

async fn drain_errors(host: String, mut rx: mpsc::Receiver<EngineError>) -> usize {
    let mut count = 0;
    while let Some(e) = rx.recv().await {
        error!("Error when {} task run: {}", host, e);
        count += 1;
    }
    count
}
