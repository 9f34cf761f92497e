use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{CatalogStyle, FirewallRule};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub tunnel: TunnelConfig,
    pub monitor: MonitorConfig,
    pub catalog: CatalogConfig,
    pub firewall: FirewallConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Network adapter the VPN client brings up.
    pub adapter_name: String,
    /// VPN client executable, matched case-insensitively.
    pub process_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStrategy {
    Process,
    Adapter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub strategy: MonitorStrategy,
    pub poll_interval_ms: u64,
    /// Re-check interval when adapter change notifications are unavailable.
    pub event_fallback_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub style: CatalogStyle,
    pub client_rule_name: String,
    pub block_rule_name: String,
    pub tunnel_ports: String,
    pub extra_rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    pub command: String,
    pub timeout_secs: u64,
    pub retry_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub require_elevation: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            adapter_name: "PIA".to_string(),
            process_name: "pia-client.exe".to_string(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            strategy: MonitorStrategy::Process,
            poll_interval_ms: 50,
            event_fallback_ms: 1000,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            style: CatalogStyle::AllowList,
            client_rule_name: "#PIA Client".to_string(),
            block_rule_name: "#All Blocked".to_string(),
            tunnel_ports: "110,443,9201".to_string(),
            extra_rules: vec![],
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            command: "netsh".to_string(),
            timeout_secs: 10,
            retry_interval_secs: 5,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            require_elevation: true,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn event_fallback(&self) -> Duration {
        Duration::from_millis(self.event_fallback_ms.max(1))
    }
}

impl FirewallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

impl GuardConfig {
    /// Loads `path` if given, otherwise the per-user default file, writing
    /// defaults there on first use.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let default = Self::default();
            default.save(&config_path)?;
            Ok(default)
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunnel-guard")
            .join("config.toml")
    }
}
