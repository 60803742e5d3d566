//! JSON-file-backed store: one file per download.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{DownloadStore, StoreError};
use crate::download::PersistentState;

/// Stores each download as `<id>.json` under a directory.
///
/// Writes go through a temp file and a rename, so a crash mid-write leaves
/// the previous record intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, state: &PersistentState) -> PathBuf {
        self.dir.join(format!("{}.json", state.id))
    }
}

#[async_trait]
impl DownloadStore for JsonFileStore {
    async fn list_downloads(&self) -> Result<Vec<PersistentState>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // A store directory that doesn't exist yet is just empty.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension() != Some(std::ffi::OsStr::new("json")) {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<PersistentState>(&contents) {
                Ok(record) => records.push(record),
                Err(err) => {
                    // Don't let one corrupt record hide all the others.
                    warn!(path = %path.display(), error = %err, "skipping unreadable download record");
                }
            }
        }
        Ok(records)
    }

    async fn write_download(&self, state: &PersistentState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(state);
        let json = serde_json::to_string_pretty(state)?;
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        debug!(id = %state.id, "download record written");
        Ok(())
    }

    async fn delete_download(&self, state: &PersistentState) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(state)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
