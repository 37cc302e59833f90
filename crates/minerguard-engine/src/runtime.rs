//! Container runtime access.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MinerConfigError, RuntimeError};
use crate::types::{ContainerInfo, ContainerStats, MinerSettings};

/// Working directory of the miner inside its container.
pub const MINER_WORKDIR: &str = "/opt/miner/";

/// Length of the multiplexed stream frame header on exec output.
pub const STREAM_HEADER_LEN: usize = 8;

/// Operations the engine needs from a host's container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// Run a command and return its raw attached output.
    async fn exec(&self, id: &str, cmd: &[&str], workdir: &str) -> Result<Vec<u8>, RuntimeError>;

    /// One-shot resource usage sample.
    async fn container_stats(&self, id: &str) -> Result<ContainerStats, RuntimeError>;
}

/// Miner configuration as written inside the container.
#[derive(Debug, Deserialize)]
struct MinerConfigFile {
    #[serde(default)]
    app: AppSection,
    chain: ChainSection,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    #[serde(default)]
    workspace: String,
    #[serde(default)]
    port: u16,
    #[serde(default, rename = "maxusespace")]
    max_use_space: u64,
    #[serde(default)]
    cores: u32,
    #[serde(default, rename = "apiendpoint")]
    api_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ChainSection {
    #[serde(default)]
    mnemonic: String,
    #[serde(default, rename = "stakingacc")]
    staking_account: String,
    #[serde(default, rename = "earningsacc")]
    earnings_account: String,
    #[serde(default)]
    rpcs: Vec<String>,
    #[serde(default)]
    tees: Vec<String>,
    #[serde(default)]
    timeout: u64,
}

/// Parse `cat config.yaml` exec output into settings and the mnemonic.
///
/// The first [`STREAM_HEADER_LEN`] bytes are the stream frame header.
pub fn parse_miner_config(raw: &[u8]) -> Result<(MinerSettings, String), MinerConfigError> {
    let payload = raw
        .get(STREAM_HEADER_LEN..)
        .ok_or(MinerConfigError::Truncated)?;
    let text = String::from_utf8_lossy(payload);
    let file: MinerConfigFile = serde_yml::from_str(&text)?;

    if file.chain.mnemonic.trim().is_empty() {
        return Err(MinerConfigError::MissingMnemonic);
    }

    let settings = MinerSettings {
        workspace: file.app.workspace,
        port: file.app.port,
        max_use_space: file.app.max_use_space,
        cores: file.app.cores,
        api_endpoint: file.app.api_endpoint,
        staking_account: file.chain.staking_account,
        earnings_account: file.chain.earnings_account,
        rpcs: file.chain.rpcs,
        tees: file.chain.tees,
        timeout: file.chain.timeout,
    };
    Ok((settings, file.chain.mnemonic))
}

/// Docker Engine API client over plain HTTP.
pub struct DockerRuntime {
    base_url: String,
    client: reqwest::Client,
}

impl DockerRuntime {
    /// `base_url` such as `http://10.0.0.5:2375`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(e.to_string()))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response, RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;
        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RuntimeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RuntimeError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    state: String,
}

#[derive(Deserialize)]
struct ExecCreated {
    #[serde(rename = "Id")]
    id: String,
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let value = self.get_json("/containers/json").await?;
        let summaries: Vec<ContainerSummary> =
            serde_json::from_value(value).map_err(|e| RuntimeError::Decode(e.to_string()))?;

        Ok(summaries
            .into_iter()
            .filter(|c| c.state.is_empty() || c.state == "running")
            .map(|c| ContainerInfo {
                name: c
                    .names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                id: c.id,
                image: c.image,
                created: c.created,
            })
            .collect())
    }

    async fn exec(&self, id: &str, cmd: &[&str], workdir: &str) -> Result<Vec<u8>, RuntimeError> {
        let create = json!({
            "Cmd": cmd,
            "WorkingDir": workdir,
            "AttachStdout": true,
            "AttachStderr": true,
        });
        let created: ExecCreated = self
            .post_json(&format!("/containers/{}/exec", id), &create)
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(e.to_string()))?;

        let start = json!({ "Detach": false, "Tty": false });
        let output = self
            .post_json(&format!("/exec/{}/start", created.id), &start)
            .await?
            .bytes()
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        debug!("exec in {} returned {} bytes", id, output.len());
        Ok(output.to_vec())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, RuntimeError> {
        let value = self
            .get_json(&format!("/containers/{}/stats?stream=false", id))
            .await?;
        Ok(stats_from_json(&value))
    }
}

fn u64_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// Compute CPU and memory usage the way `docker stats` does.
pub fn stats_from_json(value: &Value) -> ContainerStats {
    let cpu_delta = u64_at(value, "/cpu_stats/cpu_usage/total_usage")
        .saturating_sub(u64_at(value, "/precpu_stats/cpu_usage/total_usage"));
    let system_delta = u64_at(value, "/cpu_stats/system_cpu_usage")
        .saturating_sub(u64_at(value, "/precpu_stats/system_cpu_usage"));
    let mut online_cpus = u64_at(value, "/cpu_stats/online_cpus");
    if online_cpus == 0 {
        online_cpus = value
            .pointer("/cpu_stats/cpu_usage/percpu_usage")
            .and_then(Value::as_array)
            .map(|a| a.len() as u64)
            .unwrap_or(1);
    }

    let cpu_percent = if cpu_delta > 0 && system_delta > 0 {
        cpu_delta as f64 / system_delta as f64 * online_cpus as f64 * 100.0
    } else {
        0.0
    };

    // cgroup v1 reports page cache as "cache", v2 as "inactive_file".
    let cache = match u64_at(value, "/memory_stats/stats/cache") {
        0 => u64_at(value, "/memory_stats/stats/inactive_file"),
        cache => cache,
    };
    let memory_usage = u64_at(value, "/memory_stats/usage").saturating_sub(cache);
    let limit = u64_at(value, "/memory_stats/limit");
    let memory_percent = if limit > 0 {
        memory_usage as f64 / limit as f64 * 100.0
    } else {
        0.0
    };

    ContainerStats {
        cpu_percent,
        memory_percent,
        memory_usage,
    }
}
