use std::path::{Path, PathBuf};

use domain::DomainError;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only JSON-lines file. Appends are serialized so lines never interleave.
pub struct JsonlWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append<T: Serialize>(&self, row: &T) -> Result<(), DomainError> {
        let mut line = serde_json::to_string(row)
            .map_err(|e| DomainError::Storage(format!("Failed to encode row: {}", e)))?;
        line.push('\n');

        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Storage(e.to_string()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                DomainError::Storage(format!("Failed to open {}: {}", self.path.display(), e))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Last `limit` rows, newest last. Unparseable lines are skipped.
    pub async fn tail<T: serde::de::DeserializeOwned>(
        &self,
        limit: usize,
    ) -> Result<Vec<T>, DomainError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DomainError::Storage(e.to_string())),
        };

        let rows: Vec<T> = text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.into_iter().skip(skip).collect())
    }
}
