use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

use csa_store::{ArtifactKind, ArtifactStore, StoreError, StoreResult};

/// File-backed `ArtifactStore`: a flat directory per `ArtifactKind`, one
/// `<id>.json` file per artifact, matching spec.md §6's layout exactly.
/// Each write is a single JSON dump; ids embed a timestamp, so a collision
/// requires the same id in the same second — treated as caller error
/// rather than guarded against here (spec.md §5 "Shared resources").
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for kind in [
            ArtifactKind::Pdf,
            ArtifactKind::Parsed,
            ArtifactKind::Extraction,
            ArtifactKind::NormalizedMultiagent,
            ArtifactKind::CsaTerms,
            ArtifactKind::Calculation,
            ArtifactKind::Explanation,
            ArtifactKind::GeneratedScript,
            ArtifactKind::FormulaPattern,
            ArtifactKind::Job,
        ] {
            std::fs::create_dir_all(root.join(kind.directory_name()))?;
        }
        Ok(FileArtifactStore { root })
    }

    fn json_path(&self, kind: ArtifactKind, id: &str) -> PathBuf {
        self.root.join(kind.directory_name()).join(format!("{id}.json"))
    }

    fn pdf_path(&self, document_id: &str) -> PathBuf {
        self.root
            .join(ArtifactKind::Pdf.directory_name())
            .join(format!("{document_id}.pdf"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save_value(&self, kind: ArtifactKind, id: &str, payload: Value) -> StoreResult<()> {
        let path = self.json_path(kind, id);
        let text = serde_json::to_string_pretty(&payload)?;
        tokio::fs::write(&path, text).await?;
        tracing::debug!(kind = kind.directory_name(), %id, "saved artifact");
        Ok(())
    }

    async fn load_value(&self, kind: ArtifactKind, id: &str) -> StoreResult<Option<Value>> {
        let path = self.json_path(kind, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self, kind: ArtifactKind) -> StoreResult<Vec<String>> {
        let dir = self.root.join(kind.directory_name());
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn exists(&self, kind: ArtifactKind, id: &str) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.json_path(kind, id)).await?)
    }

    async fn save_pdf(&self, document_id: &str, bytes: &[u8]) -> StoreResult<()> {
        tokio::fs::write(self.pdf_path(document_id), bytes).await?;
        Ok(())
    }

    async fn load_pdf(&self, document_id: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.pdf_path(document_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csa_store::ArtifactStoreExt;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        name: String,
        value: csa_store::InfinityFloat,
    }

    #[tokio::test]
    async fn save_then_load_round_trips_including_infinity() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let sample = Sample {
            name: "threshold".to_string(),
            value: csa_store::InfinityFloat(f64::INFINITY),
        };
        store.save(ArtifactKind::Extraction, "extract_doc1_ts", &sample).await.unwrap();
        let loaded: Sample = store
            .load(ArtifactKind::Extraction, "extract_doc1_ts")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn missing_artifact_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let loaded: Option<Sample> = store.load(ArtifactKind::Extraction, "nope").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn list_returns_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        store.save_value(ArtifactKind::Job, "b", serde_json::json!({})).await.unwrap();
        store.save_value(ArtifactKind::Job, "a", serde_json::json!({})).await.unwrap();
        assert_eq!(store.list(ArtifactKind::Job).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn pdf_round_trips_as_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        store.save_pdf("doc1", b"%PDF-1.7\n...").await.unwrap();
        let loaded = store.load_pdf("doc1").await.unwrap().unwrap();
        assert_eq!(loaded, b"%PDF-1.7\n...".to_vec());
    }
}
