use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the eureka gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding persisted machine records, one JSON file per workspace.
    pub data_dir: PathBuf,
    /// Apex domain; workspace hosts are `<user>--<repo>.<base_domain>`.
    pub base_domain: String,
    /// Address the HTTP listener binds to.
    pub listen_addr: String,
    pub provider: ProviderConfig,
    pub lifecycle: LifecycleConfig,
    pub proxy: ProxyConfig,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            base_domain: "localhost".into(),
            listen_addr: "0.0.0.0:4000".into(),
            provider: ProviderConfig::default(),
            lifecycle: LifecycleConfig::default(),
            proxy: ProxyConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.base_domain.is_empty(), "base_domain must be set");
        anyhow::ensure!(
            !self.provider.api_url.is_empty(),
            "provider.api_url must be set"
        );
        anyhow::ensure!(
            !self.provider.api_key.is_empty(),
            "provider.api_key must be set"
        );
        anyhow::ensure!(
            !self.provider.app_name.is_empty(),
            "provider.app_name must be set"
        );
        anyhow::ensure!(
            self.lifecycle.inactivity_timeout_secs >= 1,
            "lifecycle.inactivity_timeout_secs must be >= 1"
        );
        anyhow::ensure!(
            self.proxy.body_limit_bytes >= 1024,
            "proxy.body_limit_bytes must be >= 1024"
        );
        anyhow::ensure!(
            self.proxy.chunk_idle_timeout_secs >= 1,
            "proxy.chunk_idle_timeout_secs must be >= 1"
        );
        Ok(())
    }
}

/// Compute provider API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider REST API.
    pub api_url: String,
    /// Bearer token sent on every provider request.
    pub api_key: String,
    /// Provider application that owns the workspace machines. Also names the
    /// internal DNS zone: started machines answer on
    /// `<machine_id>.vm.<app_name>.internal:8080`.
    pub app_name: String,
    /// Machine image booted for each workspace.
    pub image: String,
    /// Provider region for new machines.
    pub region: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.machines.dev/v1".into(),
            api_key: String::new(),
            app_name: String::new(),
            image: "registry.fly.io/eureka-workspace:latest".into(),
            region: "iad".into(),
        }
    }
}

/// Workspace lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds of inactivity before a workspace machine is suspended.
    /// Production deployments run 30 minutes; 60 is common in development.
    pub inactivity_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 30 * 60,
        }
    }
}

impl LifecycleConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

/// Streaming proxy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Maximum request body size buffered before forwarding.
    pub body_limit_bytes: usize,
    /// Seconds without an upstream chunk before a streaming response is cut.
    pub chunk_idle_timeout_secs: u64,
    /// Seconds allowed for the upstream TCP connect.
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            body_limit_bytes: 10 * 1024 * 1024,
            chunk_idle_timeout_secs: 60,
            connect_timeout_secs: 60,
        }
    }
}

impl ProxyConfig {
    pub fn chunk_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Authenticator collaborator settings. The gateway only checks for the
/// presence of the session cookie issued by the upstream OAuth service;
/// token verification is owned by that service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Skip authentication entirely (development only).
    pub disabled: bool,
    /// Name of the cookie carrying the authenticator's opaque token.
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            cookie_name: "eureka_auth".into(),
        }
    }
}
