//! Durable run progress.
//!
//! The checkpoint is a JSON snapshot of the per-unit status map plus a
//! monotonically increasing sequence number, replaced atomically
//! (write temp file, fsync, rename) so a crash can never leave a torn
//! checkpoint behind. A missing file just means a fresh run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::backfill::plan::UnitState;
use crate::core::FillError;

/// Snapshot of orchestrator progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Increases on every flush; a resumed run continues from the last value.
    pub seq: u64,
    /// Unit key → last known state.
    pub units: HashMap<String, UnitState>,
}

impl Checkpoint {
    /// Loads a checkpoint if the file exists.
    pub async fn load(path: &Path) -> Result<Option<Self>, FillError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let cp: Self = serde_json::from_slice(&bytes)
                    .map_err(|e| FillError::Checkpoint(format!("corrupt checkpoint: {e}")))?;
                Ok(Some(cp))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FillError::Checkpoint(e.to_string())),
        }
    }

    /// Atomically replaces the checkpoint file.
    pub async fn save(&self, path: &Path) -> Result<(), FillError> {
        let tmp = tmp_path(path);
        let bytes = serde_json::to_vec_pretty(self)?;

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| FillError::Checkpoint(format!("create {}: {e}", tmp.display())))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| FillError::Checkpoint(format!("write {}: {e}", tmp.display())))?;
        file.sync_all()
            .await
            .map_err(|e| FillError::Checkpoint(format!("fsync {}: {e}", tmp.display())))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| FillError::Checkpoint(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
