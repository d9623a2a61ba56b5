//! Durable per-workspace machine records.
//!
//! One JSON document per workspace key at
//! `<data_dir>/<session_id>/<user>/<repo>.json`. The owning actor is the only
//! reader and writer for a key; the provider remains the ground truth, so
//! write failures are survivable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::workspace::WorkspaceKey;

/// Persisted state for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub machine_id: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A key component would escape the data directory.
    #[error("unsafe key component: {0:?}")]
    UnsafeKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serializing record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of reading a record.
#[derive(Debug)]
pub enum LoadOutcome {
    Found(MachineRecord),
    Missing,
    /// The file exists but does not decode; callers reprovision rather than
    /// trust it.
    Corrupt,
}

pub struct MachineStore {
    data_dir: PathBuf,
}

impl MachineStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn record_path(&self, key: &WorkspaceKey) -> Result<PathBuf, StoreError> {
        for component in [&key.session_id, &key.user, &key.repo] {
            check_component(component)?;
        }
        Ok(self
            .data_dir
            .join(&key.session_id)
            .join(&key.user)
            .join(format!("{}.json", key.repo)))
    }

    pub async fn load(&self, key: &WorkspaceKey) -> Result<LoadOutcome, StoreError> {
        let path = self.record_path(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<MachineRecord>(&data) {
            Ok(record) if !record.machine_id.is_empty() => Ok(LoadOutcome::Found(record)),
            Ok(_) => Ok(LoadOutcome::Missing),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt machine record");
                Ok(LoadOutcome::Corrupt)
            }
        }
    }

    /// Write a record atomically (temp file then rename).
    pub async fn save(&self, key: &WorkspaceKey, record: &MachineRecord) -> Result<(), StoreError> {
        let path = self.record_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn check_component(component: &str) -> Result<(), StoreError> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
        || component.contains(std::path::MAIN_SEPARATOR)
    {
        return Err(StoreError::UnsafeKey(component.to_string()));
    }
    Ok(())
}
