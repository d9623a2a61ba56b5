//! Scripted in-memory provider for lifecycle tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Machine, MachineApi, MachineConfig, MachineOp, ProviderError};

/// A fake [`MachineApi`] that records every call and returns scripted
/// results. Machine ids are handed out as `m_1`, `m_2`, ...
#[derive(Default)]
pub struct MockProvider {
    calls: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
    create_error: Mutex<Option<ProviderError>>,
    start_errors: Mutex<VecDeque<ProviderError>>,
    stop_error: Mutex<Option<ProviderError>>,
    list_result: Mutex<Vec<Machine>>,
    /// Planned results for `machine_request`, consumed front-first. When the
    /// plan runs dry, requests succeed with an empty session list.
    request_plan: Mutex<VecDeque<Result<Value, ProviderError>>>,
    created_envs: Mutex<Vec<HashMap<String, String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn set_create_error(&self, err: Option<ProviderError>) {
        *self.create_error.lock().unwrap() = err;
    }

    pub fn push_start_error(&self, err: ProviderError) {
        self.start_errors.lock().unwrap().push_back(err);
    }

    pub fn set_stop_error(&self, err: Option<ProviderError>) {
        *self.stop_error.lock().unwrap() = err;
    }

    pub fn set_list(&self, machines: Vec<Machine>) {
        *self.list_result.lock().unwrap() = machines;
    }

    pub fn plan_request(&self, result: Result<Value, ProviderError>) {
        self.request_plan.lock().unwrap().push_back(result);
    }

    pub fn created_env(&self, index: usize) -> HashMap<String, String> {
        self.created_envs.lock().unwrap()[index].clone()
    }

    pub fn machine_with_env(id: &str, user: &str, repo: &str) -> Machine {
        let mut env = HashMap::new();
        env.insert("USERNAME".to_string(), user.to_string());
        env.insert("REPO_NAME".to_string(), repo.to_string());
        Machine {
            id: id.to_string(),
            name: None,
            state: Some("stopped".to_string()),
            config: MachineConfig { env },
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MachineApi for MockProvider {
    async fn create_machine(&self, overrides: Value) -> Result<Machine, ProviderError> {
        self.record("create".to_string());
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        let env: HashMap<String, String> = overrides["config"]["env"]
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        self.created_envs.lock().unwrap().push(env.clone());

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("m_{}", *next)
        };
        Ok(Machine {
            id,
            name: None,
            state: Some("started".to_string()),
            config: MachineConfig { env },
        })
    }

    async fn start_machine(&self, id: &str) -> Result<(), ProviderError> {
        self.record(format!("start:{id}"));
        match self.start_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop_machine(&self, id: &str) -> Result<(), ProviderError> {
        self.record(format!("stop:{id}"));
        match self.stop_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, ProviderError> {
        self.record("list".to_string());
        Ok(self.list_result.lock().unwrap().clone())
    }

    async fn get_machine(&self, id: &str) -> Result<Machine, ProviderError> {
        self.record(format!("get:{id}"));
        self.list_result
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn machine_request(&self, id: &str, op: &MachineOp) -> Result<Value, ProviderError> {
        self.record(format!("req:{id}:{} {}", op.method, op.path));
        match self.request_plan.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(json!({ "sessions": [] })),
        }
    }
}
