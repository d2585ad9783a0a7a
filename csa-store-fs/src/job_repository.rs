use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;

use csa_core::domain::job::{Job, JobStatus};
use csa_store::{ArtifactKind, JobRepository, StoreError, StoreResult};

/// File-backed `JobRepository`: one `<job_id>.json` under `jobs/`, rewritten
/// in full on every `save` (jobs are small; no append log), mirroring
/// `job_manager.py`'s `_save_job`/`_load_job` pair.
pub struct FileJobRepository {
    root: PathBuf,
}

impl FileJobRepository {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(ArtifactKind::Job.directory_name()))?;
        Ok(FileJobRepository { root })
    }

    fn path(&self, job_id: &str) -> PathBuf {
        self.root
            .join(ArtifactKind::Job.directory_name())
            .join(format!("{job_id}.json"))
    }

    async fn read(&self, job_id: &str) -> StoreResult<Option<Job>> {
        match tokio::fs::read(self.path(job_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, job: &Job) -> StoreResult<()> {
        let text = serde_json::to_string_pretty(job)?;
        tokio::fs::write(self.path(&job.job_id), text).await?;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for FileJobRepository {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        self.write(job).await
    }

    async fn get(&self, job_id: &str) -> StoreResult<Option<Job>> {
        self.read(job_id).await
    }

    async fn save(&self, job: &Job) -> StoreResult<()> {
        self.write(job).await
    }

    async fn list(&self, document_id: Option<&str>, status: Option<JobStatus>) -> StoreResult<Vec<Job>> {
        let dir = self.root.join(ArtifactKind::Job.directory_name());
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let job: Job = serde_json::from_slice(&bytes)?;
            if let Some(doc_id) = document_id {
                if job.document_id != doc_id {
                    continue;
                }
            }
            if let Some(ref want_status) = status {
                if std::mem::discriminant(&job.status) != std::mem::discriminant(want_status) {
                    continue;
                }
            }
            jobs.push(job);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn cleanup(&self, older_than_days: i64) -> StoreResult<u32> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let dir = self.root.join(ArtifactKind::Job.directory_name());
        let mut removed = 0u32;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut stale_paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let job: Job = serde_json::from_slice(&bytes)?;
            if job.status.is_terminal() && job.created_at < cutoff {
                stale_paths.push(path);
            }
        }
        for path in stale_paths {
            tokio::fs::remove_file(path).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csa_core::domain::job::ProcessingOptions;
    use csa_core::domain::ids::chained_id;

    fn sample_job(document_id: &str, now: chrono::DateTime<Utc>) -> Job {
        let job_id = chained_id("job", document_id, now);
        Job::new(job_id, document_id.to_string(), ProcessingOptions::default(), now)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path()).unwrap();
        let job = sample_job("doc1", Utc::now());
        repo.create(&job).await.unwrap();
        let loaded = repo.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.document_id, "doc1");
    }

    #[tokio::test]
    async fn missing_job_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path()).unwrap();
        assert!(repo.get("job_nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_document_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path()).unwrap();
        let now = Utc::now();
        let mut job_a = sample_job("doc1", now);
        let job_b = sample_job("doc2", now);
        repo.create(&job_a).await.unwrap();
        repo.create(&job_b).await.unwrap();

        let for_doc1 = repo.list(Some("doc1"), None).await.unwrap();
        assert_eq!(for_doc1.len(), 1);
        assert_eq!(for_doc1[0].document_id, "doc1");

        job_a.status = JobStatus::Completed;
        repo.save(&job_a).await.unwrap();
        let completed = repo.list(None, Some(JobStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].job_id, job_a.job_id);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileJobRepository::new(dir.path()).unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        let mut stale = sample_job("doc1", old);
        stale.status = JobStatus::Completed;
        let fresh = sample_job("doc2", Utc::now());
        repo.create(&stale).await.unwrap();
        repo.create(&fresh).await.unwrap();

        let removed = repo.cleanup(7).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(&stale.job_id).await.unwrap().is_none());
        assert!(repo.get(&fresh.job_id).await.unwrap().is_some());
    }
}
