//! Process-wide actor registry.
//!
//! Maps each [`WorkspaceKey`] to its single live actor. Creation is guarded
//! by the registry lock, so concurrent requests for a cold key race to one
//! winner and everyone gets the same handle. The registry starts empty on
//! every process start; actors rehydrate from the state store lazily.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::provider::MachineApi;
use crate::store::MachineStore;

use super::{actor, ActorConfig, WorkspaceHandle, WorkspaceKey};

pub struct WorkspaceRegistry {
    provider: Arc<dyn MachineApi>,
    store: Arc<MachineStore>,
    config: ActorConfig,
    actors: Mutex<HashMap<WorkspaceKey, WorkspaceHandle>>,
}

impl WorkspaceRegistry {
    pub fn new(provider: Arc<dyn MachineApi>, store: Arc<MachineStore>, config: ActorConfig) -> Self {
        Self {
            provider,
            store,
            config,
            actors: Mutex::new(HashMap::new()),
        }
    }

    /// Return the actor for a key, spawning it on first demand.
    pub async fn get_or_create(&self, key: WorkspaceKey) -> WorkspaceHandle {
        let mut actors = self.actors.lock().await;
        if let Some(handle) = actors.get(&key) {
            return handle.clone();
        }
        debug!(workspace = %key, "spawning workspace actor");
        let handle = actor::spawn(
            key.clone(),
            self.provider.clone(),
            self.store.clone(),
            self.config.clone(),
        );
        actors.insert(key, handle.clone());
        handle
    }

    /// Number of live actors.
    #[allow(dead_code)] // useful for monitoring, exercised in tests
    pub async fn len(&self) -> usize {
        self.actors.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use crate::provider::mock::MockProvider;
    use crate::provider::retry::Backoff;

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let path =
                std::env::temp_dir().join(format!("eureka-registry-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            Self { path }
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn key(session: &str, user: &str, repo: &str) -> WorkspaceKey {
        WorkspaceKey {
            session_id: session.to_string(),
            user: user.to_string(),
            repo: repo.to_string(),
        }
    }

    fn registry() -> (WorkspaceRegistry, Arc<MockProvider>, TempDir) {
        let dir = TempDir::new();
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MachineStore::new(&dir.path));
        let config = ActorConfig {
            inactivity_timeout: std::time::Duration::from_secs(3600),
            recovery_backoff: Backoff::default(),
        };
        (
            WorkspaceRegistry::new(provider.clone(), store, config),
            provider,
            dir,
        )
    }

    #[tokio::test]
    async fn same_key_yields_same_actor() {
        let (registry, provider, _dir) = registry();
        let k = key("s1", "alice", "demo");

        let first = registry.get_or_create(k.clone()).await;
        let second = registry.get_or_create(k).await;

        let a = first.ensure_machine().await.unwrap();
        let b = second.ensure_machine().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.count("create"), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_machines() {
        let (registry, provider, _dir) = registry();

        let a = registry
            .get_or_create(key("s1", "alice", "demo"))
            .await
            .ensure_machine()
            .await
            .unwrap();
        let b = registry
            .get_or_create(key("s1", "bob", "demo"))
            .await
            .ensure_machine()
            .await
            .unwrap();
        let c = registry
            .get_or_create(key("s2", "alice", "demo"))
            .await
            .ensure_machine()
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(provider.count("create"), 3);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_races_to_one_actor() {
        let (registry, provider, _dir) = registry();
        let registry = Arc::new(registry);

        let mut joins = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            joins.push(tokio::spawn(async move {
                registry
                    .get_or_create(key("s1", "alice", "demo"))
                    .await
                    .ensure_machine()
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for join in joins {
            ids.push(join.await.unwrap());
        }

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(provider.count("create"), 1);
        assert_eq!(registry.len().await, 1);
    }
}
