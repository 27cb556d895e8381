use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain::DomainError;
use domain::tag::{TagDefinition, TagStore, TagTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Tags shipped with the gateway, used when the base file is absent or empty.
pub fn default_base_tags() -> TagTable {
    [
        ("Machine_Speed", "DB1,INT0"),
        ("Temperature", "DB1,REAL4"),
        ("Running", "DB1,X8.0"),
        ("Fault_Code", "DB1,INT10"),
    ]
    .into_iter()
    .map(|(name, address)| (name.to_string(), address.to_string()))
    .collect()
}

/// File-backed tag store: one JSON object per layer, rewritten wholesale.
pub struct JsonTagStore {
    base_path: PathBuf,
    overlay_path: PathBuf,
    metadata_path: PathBuf,
}

impl JsonTagStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        overlay_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            overlay_path: overlay_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DomainError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                DomainError::Storage(format!("Malformed JSON in {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DomainError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Writes to a sibling temp file then renames, so readers never see a partial file.
    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DomainError> {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| DomainError::Storage(format!("Failed to encode: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| DomainError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            DomainError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "Persisted");
        Ok(())
    }
}

#[async_trait]
impl TagStore for JsonTagStore {
    async fn load_base(&self) -> Result<TagTable, DomainError> {
        match Self::read_json::<TagTable>(&self.base_path).await {
            Ok(Some(tags)) if !tags.is_empty() => Ok(tags),
            Ok(_) => Ok(default_base_tags()),
            Err(e) => {
                warn!(error = %e, "Base tag file unreadable, using defaults");
                Ok(default_base_tags())
            }
        }
    }

    async fn load_overlay(&self) -> Result<TagTable, DomainError> {
        Ok(Self::read_json(&self.overlay_path).await?.unwrap_or_default())
    }

    async fn save_overlay(&self, overlay: &TagTable) -> Result<(), DomainError> {
        Self::write_json(&self.overlay_path, overlay).await
    }

    async fn load_metadata(&self) -> Result<BTreeMap<String, TagDefinition>, DomainError> {
        Ok(Self::read_json(&self.metadata_path).await?.unwrap_or_default())
    }

    async fn save_metadata(
        &self,
        metadata: &BTreeMap<String, TagDefinition>,
    ) -> Result<(), DomainError> {
        Self::write_json(&self.metadata_path, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::tag::TagName;

    fn store(dir: &Path) -> JsonTagStore {
        JsonTagStore::new(
            dir.join("base.json"),
            dir.join("overlay.json"),
            dir.join("meta.json"),
        )
    }

    #[tokio::test]
    async fn test_missing_base_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let base = store(dir.path()).load_base().await.unwrap();
        assert_eq!(base, default_base_tags());
        assert_eq!(base["Running"], "DB1,X8.0");
    }

    #[tokio::test]
    async fn test_empty_base_object_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.json"), "{}").unwrap();
        let base = store(dir.path()).load_base().await.unwrap();
        assert_eq!(base.len(), 4);
    }

    #[tokio::test]
    async fn test_base_file_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.json"), r#"{"Only":"DB2,INT0"}"#).unwrap();
        let base = store(dir.path()).load_base().await.unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(base["Only"], "DB2,INT0");
    }

    #[tokio::test]
    async fn test_overlay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_overlay().await.unwrap().is_empty());

        let overlay: TagTable = [("Extra".to_string(), "ns=2;s=Extra".to_string())].into();
        store.save_overlay(&overlay).await.unwrap();
        assert_eq!(store.load_overlay().await.unwrap(), overlay);
        assert!(!dir.path().join("overlay.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_malformed_overlay_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("overlay.json"), "{not json").unwrap();
        let err = store(dir.path()).load_overlay().await.unwrap_err();
        assert!(matches!(err, DomainError::Storage(_)));
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut meta = BTreeMap::new();
        meta.insert(
            "Added".to_string(),
            TagDefinition::new(TagName::new("Added").unwrap(), "DB5,REAL10", None, "alice"),
        );
        store.save_metadata(&meta).await.unwrap();
        assert_eq!(store.load_metadata().await.unwrap(), meta);
    }
}
