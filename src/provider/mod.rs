//! Compute provider client.
//!
//! Thin wrapper over the provider's machines REST surface plus direct HTTP
//! dials to a started machine's internal hostname. Every response is mapped
//! to a typed success value or a classified [`ProviderError`] so callers can
//! decide what is worth retrying.

pub mod retry;

#[cfg(test)]
pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderConfig;

/// Deadline for a single operation dialed against a machine.
const MACHINE_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for provider REST calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Classified provider failure.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// DNS, connect, or TLS level failure. A suspended machine's internal
    /// hostname stops resolving, so this doubles as "machine not running".
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider rejected request ({status}): {body}")]
    ClientError { status: u16, body: String },

    #[error("provider failure ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("request deadline exceeded")]
    Timeout,
}

impl ProviderError {
    /// Whether the failure looks like a suspended or still-booting machine,
    /// i.e. worth a start-then-retry recovery.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProviderError::TransientNetwork(_) | ProviderError::Timeout
        )
    }
}

/// A machine as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub config: MachineConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Machine {
    /// Whether this machine was booted for the given user/repo pair.
    pub fn serves(&self, user: &str, repo: &str) -> bool {
        self.config.env.get("USERNAME").map(String::as_str) == Some(user)
            && self.config.env.get("REPO_NAME").map(String::as_str) == Some(repo)
    }
}

/// An HTTP operation to run against a machine's internal hostname.
#[derive(Debug, Clone)]
pub struct MachineOp {
    pub method: reqwest::Method,
    pub path: String,
}

impl MachineOp {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
        }
    }

    /// List the agent sessions running inside a workspace machine.
    pub fn list_sessions() -> Self {
        Self::get("/api/sessions")
    }
}

/// Provider operations the workspace actors depend on. Split out as a trait
/// so lifecycle logic can be exercised against a scripted fake.
#[async_trait]
pub trait MachineApi: Send + Sync + 'static {
    /// Create a machine from the deployment default config deep-merged with
    /// `overrides`. Returns the machine the provider reports.
    async fn create_machine(&self, overrides: Value) -> Result<Machine, ProviderError>;

    async fn start_machine(&self, id: &str) -> Result<(), ProviderError>;

    async fn stop_machine(&self, id: &str) -> Result<(), ProviderError>;

    async fn list_machines(&self) -> Result<Vec<Machine>, ProviderError>;

    async fn get_machine(&self, id: &str) -> Result<Machine, ProviderError>;

    /// Run one HTTP operation against the machine's internal hostname with a
    /// short per-call deadline.
    async fn machine_request(&self, id: &str, op: &MachineOp) -> Result<Value, ProviderError>;
}

/// REST client for the compute provider.
pub struct ProviderClient {
    api: reqwest::Client,
    dial: reqwest::Client,
    api_url: String,
    api_key: String,
    app_name: String,
    image: String,
    region: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        let dial = reqwest::Client::builder()
            .timeout(MACHINE_OP_TIMEOUT)
            .build()?;
        Ok(Self {
            api,
            dial,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            app_name: config.app_name.clone(),
            image: config.image.clone(),
            region: config.region.clone(),
        })
    }

    fn machines_url(&self) -> String {
        format!("{}/apps/{}/machines", self.api_url, self.app_name)
    }

    /// Internal hostname a started machine answers on.
    fn internal_url(&self, id: &str, path: &str) -> String {
        format!("http://{}.vm.{}.internal:8080{}", id, self.app_name, path)
    }

    /// Deployment default machine config. Callers deep-merge their env on top.
    fn default_create_body(&self) -> Value {
        json!({
            "region": self.region,
            "config": {
                "image": self.image,
                "guest": {
                    "cpu_kind": "shared",
                    "cpus": 1,
                    "memory_mb": 512,
                },
                "auto_destroy": true,
                "restart": { "policy": "no" },
                "services": [{
                    "protocol": "tcp",
                    "internal_port": 8080,
                    "ports": [{ "port": 80, "handlers": ["http"] }],
                }],
            },
        })
    }

    async fn check<T: serde::de::DeserializeOwned>(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
        not_found_is_error: bool,
    ) -> Result<T, ProviderError> {
        let response = response.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ProviderError::TransientNetwork(e.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body, not_found_is_error))
    }

    /// Status-only variant of `check` for endpoints whose body is irrelevant.
    async fn check_ok(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<(), ProviderError> {
        let response = response.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body, false))
    }
}

#[async_trait]
impl MachineApi for ProviderClient {
    async fn create_machine(&self, overrides: Value) -> Result<Machine, ProviderError> {
        let body = deep_merge(self.default_create_body(), overrides);
        debug!(url = %self.machines_url(), "creating machine");
        let response = self
            .api
            .post(self.machines_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;
        self.check(response, false).await
    }

    async fn start_machine(&self, id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/{}/start", self.machines_url(), id);
        debug!(machine_id = %id, "starting machine");
        let response = self
            .api
            .post(url)
            .bearer_auth(&self.api_key)
            .send()
            .await;
        self.check_ok(response).await
    }

    async fn stop_machine(&self, id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/{}/stop", self.machines_url(), id);
        debug!(machine_id = %id, "stopping machine");
        let response = self
            .api
            .post(url)
            .bearer_auth(&self.api_key)
            .send()
            .await;
        self.check_ok(response).await
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, ProviderError> {
        let response = self
            .api
            .get(self.machines_url())
            .bearer_auth(&self.api_key)
            .send()
            .await;
        self.check(response, false).await
    }

    async fn get_machine(&self, id: &str) -> Result<Machine, ProviderError> {
        let url = format!("{}/{}", self.machines_url(), id);
        let response = self
            .api
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await;
        self.check(response, true).await
    }

    async fn machine_request(&self, id: &str, op: &MachineOp) -> Result<Value, ProviderError> {
        let url = self.internal_url(id, &op.path);
        debug!(machine_id = %id, url = %url, "dialing machine");
        let response = self
            .dial
            .request(op.method.clone(), url)
            .send()
            .await;
        self.check(response, false).await
    }
}

/// Map a transport-level reqwest failure onto the error taxonomy.
fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::TransientNetwork(err.to_string())
    }
}

/// Map a non-2xx status onto the error taxonomy.
fn classify_status(status: u16, body: String, not_found_is_error: bool) -> ProviderError {
    match status {
        404 if not_found_is_error => ProviderError::NotFound(body),
        400..=499 => ProviderError::ClientError { status, body },
        _ => ProviderError::ServerError { status, body },
    }
}

/// Deep-merge two JSON values: object keys union, recursing on collisions
/// where both sides are objects; arrays and scalars are replaced wholesale by
/// the right side.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}
