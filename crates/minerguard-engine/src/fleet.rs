//! Fleet lifecycle: one monitor per host, shared block window, hot reload.

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use minerguard_config::{Config, ConfigError, ConfigLoader, ConfigValidator, HostConfig};
use minerguard_monitor::AlertDispatcher;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::block_window::{window_capacity, BlockWindowCache};
use crate::chain::{ChainClient, RpcChainClient};
use crate::chain_stat::ChainStatReader;
use crate::error::EngineError;
use crate::host_monitor::{HostMonitor, HostMonitorSettings};
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::types::{ClientStatus, HostSnapshot};

/// Clients a monitor needs for one host.
pub struct HostClients {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub chain: Arc<dyn ChainClient>,
}

/// Builds the external clients used by the fleet.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Connect to a host's container engine and the chain.
    async fn connect(&self, host: &HostConfig, config: &Config) -> Result<HostClients, EngineError>;

    /// Chain client feeding the block window.
    fn window_chain(&self, config: &Config) -> Result<Arc<dyn ChainClient>, EngineError>;

    fn alert_dispatcher(&self, config: &Config) -> Arc<AlertDispatcher> {
        Arc::new(AlertDispatcher::from_config(&config.alert))
    }

    fn monitor_settings(&self, config: &Config) -> HostMonitorSettings {
        HostMonitorSettings::from_config(config)
    }
}

/// Docker Engine API per host, JSON-RPC for the chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientFactory;

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    async fn connect(&self, host: &HostConfig, config: &Config) -> Result<HostClients, EngineError> {
        let runtime = DockerRuntime::new(host.engine_url());
        // Fail fast on unreachable engines.
        runtime.list_containers().await?;
        let chain = RpcChainClient::new(config.rpc_endpoints.clone())?;
        Ok(HostClients {
            runtime: Arc::new(runtime),
            chain: Arc::new(chain),
        })
    }

    fn window_chain(&self, config: &Config) -> Result<Arc<dyn ChainClient>, EngineError> {
        Ok(Arc::new(RpcChainClient::new(config.rpc_endpoints.clone())?))
    }
}

/// How long a reload waits for in-flight cycles.
#[derive(Debug, Clone, Copy)]
pub struct ReloadPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReloadPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(6),
            max_attempts: 600,
        }
    }
}

struct WindowHandle {
    cache: Arc<BlockWindowCache>,
    poller: JoinHandle<()>,
    /// Endpoints the window's chain client was built from.
    endpoints: Vec<String>,
}

/// Owns every host monitor and the shared block window.
pub struct FleetOrchestrator {
    factory: Arc<dyn ClientFactory>,
    reload_policy: ReloadPolicy,
    monitors: RwLock<BTreeMap<String, Arc<HostMonitor>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    window: RwLock<Option<WindowHandle>>,
    alerts: RwLock<Option<Arc<AlertDispatcher>>>,
}

impl FleetOrchestrator {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            reload_policy: ReloadPolicy::default(),
            monitors: RwLock::new(BTreeMap::new()),
            loops: Mutex::new(Vec::new()),
            window: RwLock::new(None),
            alerts: RwLock::new(None),
        }
    }

    pub fn with_reload_policy(mut self, policy: ReloadPolicy) -> Self {
        self.reload_policy = policy;
        self
    }

    /// Build monitors for every configured host and launch their loops.
    ///
    /// Nothing is launched when any host fails to connect; all failures are
    /// returned together.
    pub async fn start(&self, config: Config) -> Result<(), EngineError> {
        let window = self.ensure_window(&config).await?;
        let alerts = self.factory.alert_dispatcher(&config);
        let settings = self.factory.monitor_settings(&config);

        let mut hosts: BTreeMap<&str, &HostConfig> = BTreeMap::new();
        for host in &config.hosts {
            if hosts.contains_key(host.ip.as_str()) {
                warn!("Host {} is configured more than once", host.ip);
                continue;
            }
            hosts.insert(host.ip.as_str(), host);
        }

        let results = join_all(hosts.values().map(|host| {
            let config = &config;
            async move { (*host, self.factory.connect(host, config).await) }
        }))
        .await;

        let mut failures = Vec::new();
        let mut monitors = BTreeMap::new();
        for (host, result) in results {
            match result {
                Ok(clients) => {
                    let monitor = HostMonitor::new(
                        host.ip.clone(),
                        clients.runtime,
                        ChainStatReader::new(clients.chain),
                        window.clone(),
                        alerts.clone(),
                        settings.clone(),
                    );
                    monitors.insert(host.ip.clone(), Arc::new(monitor));
                }
                Err(e) => {
                    error!("Failed to connect to host {}: {}", host.ip, e);
                    failures.push(format!("{}: {}", host.ip, e));
                }
            }
        }
        if !failures.is_empty() {
            return Err(EngineError::Startup(failures));
        }

        let interval = config.scrape_interval();
        let mut loops = self.loops.lock();
        loops.retain(|handle| !handle.is_finished());
        for monitor in monitors.values() {
            loops.push(tokio::spawn(monitor.clone().run(interval)));
        }
        drop(loops);

        info!(
            "Monitoring {} hosts every {}s",
            monitors.len(),
            interval.as_secs()
        );
        *self.monitors.write() = monitors;
        *self.alerts.write() = Some(alerts);
        Ok(())
    }

    /// Reuse the block window unless its capacity or RPC endpoints changed.
    async fn ensure_window(&self, config: &Config) -> Result<Arc<BlockWindowCache>, EngineError> {
        let capacity = window_capacity(config.scrape_interval());
        if let Some(handle) = self.window.read().as_ref() {
            if handle.cache.capacity() == capacity && handle.endpoints == config.rpc_endpoints {
                return Ok(handle.cache.clone());
            }
        }

        let chain = self.factory.window_chain(config)?;
        let cache = Arc::new(BlockWindowCache::new(chain, capacity));
        cache.initialize().await;
        let poller = tokio::spawn(cache.clone().run_poller());

        let previous = self.window.write().replace(WindowHandle {
            cache: cache.clone(),
            poller,
            endpoints: config.rpc_endpoints.clone(),
        });
        if let Some(previous) = previous {
            info!(
                "Block window rebuilt: {} blocks from {}",
                capacity,
                config.rpc_endpoints.join(", ")
            );
            previous.cache.deactivate();
            previous.poller.abort();
        }
        Ok(cache)
    }

    /// Stop every monitor, wait until none is mid-cycle, then load the
    /// config at `path` and start again.
    ///
    /// On failure the previous monitors stay stopped and nothing runs until
    /// the next successful reload.
    pub async fn reload(&self, path: &Path, deadline: Duration) -> Result<(), EngineError> {
        info!("Reloading configuration from {}", path.display());
        self.stop_all();

        let result = match tokio::time::timeout(deadline, self.wait_idle()).await {
            Ok(Ok(())) => {
                self.abort_loops();
                match Self::load_valid(path) {
                    Ok(config) => self.start(config).await,
                    Err(e) => Err(e.into()),
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::ReloadDeadline(deadline)),
        };

        match &result {
            Ok(()) => info!("Configuration reloaded"),
            Err(e) => error!(
                "Reload failed, no host is being monitored until the next successful reload: {}",
                e
            ),
        }
        result
    }

    fn load_valid(path: &Path) -> Result<Config, ConfigError> {
        let config = ConfigLoader::load(path)?;
        let result = ConfigValidator::validate(&config);
        for warning in &result.warnings {
            warn!("{}: {}", warning.path, warning.message);
        }
        match result.error() {
            Some(e) => Err(e),
            None => Ok(config),
        }
    }

    async fn wait_idle(&self) -> Result<(), EngineError> {
        let policy = self.reload_policy;
        for attempt in 1..=policy.max_attempts {
            let busy = self.collecting_hosts();
            if busy.is_empty() {
                return Ok(());
            }
            debug!(
                "Waiting for {} to finish ({}/{})",
                busy.join(", "),
                attempt,
                policy.max_attempts
            );
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.poll_interval).await;
            }
        }
        Err(EngineError::ReloadExhausted(policy.max_attempts))
    }

    fn collecting_hosts(&self) -> Vec<String> {
        self.monitors
            .read()
            .values()
            .filter(|m| m.is_collecting())
            .map(|m| m.host().to_string())
            .collect()
    }

    fn stop_all(&self) {
        for monitor in self.monitors.read().values() {
            monitor.stop();
        }
    }

    /// Abort loops of stopped monitors that are sleeping between cycles.
    fn abort_loops(&self) {
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
    }

    /// Stop monitoring, giving in-flight cycles up to `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop_all();
        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            warn!("Shutting down with cycles still in flight");
        }
        self.abort_loops();

        if let Some(handle) = self.window.write().take() {
            handle.cache.deactivate();
            handle.poller.abort();
        }
        let alerts = self.alerts.read().clone();
        if let Some(alerts) = alerts {
            alerts.flush().await;
        }
        info!("Fleet stopped");
    }

    /// Monitored hosts, sorted.
    pub fn hosts(&self) -> Vec<String> {
        self.monitors.read().keys().cloned().collect()
    }

    /// Owned copies of every host's registry, sorted by host.
    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        self.monitors.read().values().map(|m| m.snapshot()).collect()
    }

    pub fn client_status(&self) -> BTreeMap<String, ClientStatus> {
        self.monitors
            .read()
            .iter()
            .map(|(host, m)| (host.clone(), m.status()))
            .collect()
    }

    /// Hosts whose monitor will run further cycles.
    pub fn active_hosts(&self) -> Vec<String> {
        self.monitors
            .read()
            .iter()
            .filter(|(_, m)| m.is_active())
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub fn window(&self) -> Option<Arc<BlockWindowCache>> {
        self.window.read().as_ref().map(|h| h.cache.clone())
    }

    /// Dispatcher of the current configuration.
    pub fn alerts(&self) -> Option<Arc<AlertDispatcher>> {
        self.alerts.read().clone()
    }
}
