use std::{
    env, fs,
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "LOCSHARE_CONFIG";
pub const PORT_ENV: &str = "PORT";
pub const HOST_ENV: &str = "LOCSHARE_HOST";

const MIN_CHUNK_BYTES: usize = 1024;
const MAX_CHUNK_BYTES: usize = 4 * 1024 * 1024;
const MAX_CHUNK_PAUSE_MS: u64 = 1000;
const MIN_SWEEP_SECS: u64 = 1;
const MIN_UPLOAD_BYTES: usize = 1024 * 1024;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_chunk_pause_ms() -> u64 {
    4
}

fn default_stale_timeout() -> u64 {
    20
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_transfer_ttl() -> u64 {
    600
}

fn default_max_upload() -> usize {
    512 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_transfer_ttl")]
    pub transfer_ttl_secs: u64,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
    #[serde(default)]
    pub advertise_ip: Option<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            chunk_size: default_chunk_size(),
            chunk_pause_ms: default_chunk_pause_ms(),
            stale_timeout_secs: default_stale_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            transfer_ttl_secs: default_transfer_ttl(),
            max_upload_bytes: default_max_upload(),
            advertise_ip: None,
        }
    }
}

impl ServerConfig {
    /// Reads the optional JSON file named by `LOCSHARE_CONFIG`, applies the
    /// `PORT` / `LOCSHARE_HOST` overrides and normalises the result.
    pub fn load() -> Result<Self> {
        let base = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::read_file(Path::new(&path))?,
            None => Self::default(),
        };
        Ok(base
            .with_overrides(env::var(PORT_ENV).ok(), env::var(HOST_ENV).ok())
            .normalised())
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let parsed: ServerConfig =
            serde_json::from_str(&contents).context("invalid config payload")?;
        Ok(parsed)
    }

    fn with_overrides(mut self, port: Option<String>, host: Option<String>) -> Self {
        if let Some(raw) = port {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => warn!("ignoring invalid {PORT_ENV} value {raw:?}"),
            }
        }
        if let Some(host) = host {
            let host = host.trim();
            if !host.is_empty() {
                self.host = host.to_string();
            }
        }
        self
    }

    pub fn normalised(mut self) -> Self {
        if self.host.trim().is_empty() {
            self.host = default_host();
        }
        self.chunk_size = self.chunk_size.clamp(MIN_CHUNK_BYTES, MAX_CHUNK_BYTES);
        self.chunk_pause_ms = self.chunk_pause_ms.min(MAX_CHUNK_PAUSE_MS);
        self.sweep_interval_secs = self.sweep_interval_secs.max(MIN_SWEEP_SECS);
        if self.stale_timeout_secs < self.sweep_interval_secs {
            self.stale_timeout_secs = self.sweep_interval_secs;
        }
        self.max_upload_bytes = self.max_upload_bytes.max(MIN_UPLOAD_BYTES);
        self
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .with_context(|| format!("invalid listen address {addr}"))
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn transfer_ttl(&self) -> Duration {
        Duration::from_secs(self.transfer_ttl_secs)
    }
}
