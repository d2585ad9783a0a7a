use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use csa_core::domain::job::{Job, JobStatus};

use crate::codec::{from_stored_value, to_stored_value};
use crate::error::StoreResult;
use crate::kind::ArtifactKind;

/// Content-keyed persistence of every stage output (spec.md §4.1).
///
/// The trait speaks `serde_json::Value` rather than a generic `T` so it
/// stays dyn-compatible — callers hold an `Arc<dyn ArtifactStore>` the way
/// the teacher crate holds `Arc<dyn XRepository>` — and use the
/// [`ArtifactStoreExt`] helpers below for the typed save/load most callers
/// actually want. Implementations MUST preserve `InfinityFloat` semantics
/// across a `save`/`load` round trip (spec.md §8 "Infinity round-trip").
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_value(&self, kind: ArtifactKind, id: &str, payload: Value) -> StoreResult<()>;

    async fn load_value(&self, kind: ArtifactKind, id: &str) -> StoreResult<Option<Value>>;

    async fn list(&self, kind: ArtifactKind) -> StoreResult<Vec<String>>;

    async fn exists(&self, kind: ArtifactKind, id: &str) -> StoreResult<bool>;

    /// The one non-JSON artifact kind: raw PDF bytes keyed on `document_id`.
    async fn save_pdf(&self, document_id: &str, bytes: &[u8]) -> StoreResult<()>;

    async fn load_pdf(&self, document_id: &str) -> StoreResult<Option<Vec<u8>>>;
}

/// Typed convenience wrappers over the dyn-safe [`ArtifactStore`] trait.
#[async_trait]
pub trait ArtifactStoreExt {
    async fn save<T: Serialize + Sync>(&self, kind: ArtifactKind, id: &str, payload: &T) -> StoreResult<()>;
    async fn load<T: DeserializeOwned>(&self, kind: ArtifactKind, id: &str) -> StoreResult<Option<T>>;
}

#[async_trait]
impl<S: ArtifactStore + ?Sized> ArtifactStoreExt for S {
    async fn save<T: Serialize + Sync>(&self, kind: ArtifactKind, id: &str, payload: &T) -> StoreResult<()> {
        let value = to_stored_value(payload)?;
        self.save_value(kind, id, value).await
    }

    async fn load<T: DeserializeOwned>(&self, kind: ArtifactKind, id: &str) -> StoreResult<Option<T>> {
        match self.load_value(kind, id).await? {
            Some(value) => Ok(Some(from_stored_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Jobs are the only mutable, append-updated entities in the system
/// (spec.md §3 "Lifecycle"); every other artifact kind is write-once.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> StoreResult<()>;
    async fn get(&self, job_id: &str) -> StoreResult<Option<Job>>;
    async fn save(&self, job: &Job) -> StoreResult<()>;
    async fn list(&self, document_id: Option<&str>, status: Option<JobStatus>) -> StoreResult<Vec<Job>>;
    /// Deletes jobs whose `created_at` is older than `older_than_days`.
    async fn cleanup(&self, older_than_days: i64) -> StoreResult<u32>;
}
