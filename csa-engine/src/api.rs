use std::sync::Arc;

use serde::{Deserialize, Serialize};

use csa_core::domain::calculation::{CollateralItem, MarginCall};
use csa_core::domain::csa_terms::CsaTerms;
use csa_core::domain::explanation::Explanation;
use csa_core::domain::ids::chained_id;
use csa_core::domain::job::{Job, JobStatus, ProcessingOptions};
use csa_core::error::{CsaError, CsaResult};
use csa_store::kind::ArtifactKind;
use csa_store::pdf_validation::PdfValidation;
use csa_store::store::{ArtifactStore, ArtifactStoreExt, JobRepository};

use crate::calculator::{Calculator, CalculatorInput};
use crate::explanation::ExplanationGenerator;
use crate::pipeline_orchestrator::PipelineOrchestrator;

/// The eight HTTP-surface operations of spec.md §6, exposed as plain async
/// functions so any transport (the CLI, a future `axum` service) can drive
/// them without this crate depending on a web framework. Every function
/// takes already-constructed collaborators as arguments — there is no
/// ambient state here, mirroring how the rest of the engine threads
/// `Arc<dyn ArtifactStore>`/`Arc<dyn JobRepository>` through constructors
/// rather than through statics.
fn store_err(e: csa_store::error::StoreError) -> CsaError {
    CsaError::ExternalServiceError { service: "artifact-store".to_string(), message: e.to_string() }
}

/// `POST /documents/upload` — validates and stores the raw PDF, minting a
/// fresh `document_id`.
pub async fn upload_document(
    artifact_store: &dyn ArtifactStore,
    pdf_validation: &PdfValidation,
    pdf_bytes: &[u8],
) -> CsaResult<String> {
    pdf_validation.validate(pdf_bytes).map_err(|e| CsaError::InvalidInput(e.to_string()))?;

    let document_id = format!("doc_{}", uuid::Uuid::new_v4().simple());
    artifact_store.save_pdf(&document_id, pdf_bytes).await.map_err(store_err)?;
    Ok(document_id)
}

/// `POST /documents/process/{document_id}` — creates a `Job` and hands it to
/// the `PipelineOrchestrator` in the background, returning `job_id`
/// immediately (spec.md §6: the pipeline runs asynchronously; callers poll
/// `get_job`).
pub async fn process_document(
    job_repository: &Arc<dyn JobRepository>,
    orchestrator: Arc<PipelineOrchestrator>,
    document_id: &str,
    options: ProcessingOptions,
) -> CsaResult<String> {
    let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
    let job = Job::new(&job_id, document_id, options, chrono::Utc::now());
    job_repository.create(&job).await.map_err(store_err)?;

    let spawned_job_id = job_id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(&spawned_job_id).await {
            tracing::error!(job_id = %spawned_job_id, error = %e, "pipeline run failed");
        }
    });

    Ok(job_id)
}

/// `GET /jobs/{job_id}` — returns full job state.
pub async fn get_job(job_repository: &dyn JobRepository, job_id: &str) -> CsaResult<Job> {
    job_repository
        .get(job_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| CsaError::missing_artifact("job", job_id, "POST /documents/process/{document_id} first"))
}

/// `DELETE /jobs/{job_id}` — marks the job cancelled if it is still
/// cancellable (spec.md §4.10: only from `PENDING` or `PROCESSING`); the
/// running `PipelineOrchestrator` observes this at its next
/// `check_not_cancelled` checkpoint and stops advancing the job.
pub async fn cancel_job(job_repository: &dyn JobRepository, job_id: &str) -> CsaResult<Job> {
    let mut job = get_job(job_repository, job_id).await?;
    if !job.status.is_cancellable() {
        return Err(CsaError::precondition(
            format!("job {job_id} is already in a terminal state"),
            "cancellation only applies to PENDING or PROCESSING jobs",
        ));
    }
    job.status = JobStatus::Cancelled;
    job.completed_at = Some(chrono::Utc::now());
    job.updated_at = chrono::Utc::now();
    job_repository.save(&job).await.map_err(store_err)?;
    Ok(job)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyPerspective {
    PartyA,
    PartyB,
}

/// `POST /calculations/calculate` request body (spec.md §6). Party-perspective
/// selection happens here, not inside `Calculator`: this handler picks which
/// side's threshold/MTA/IA feed the pure calculator (spec.md §9 Design Notes).
pub struct CalculateRequest {
    pub document_id: String,
    pub csa_terms_id: String,
    pub net_exposure: rust_decimal::Decimal,
    pub posted_collateral: Vec<CollateralItem>,
    pub party_perspective: PartyPerspective,
}

/// `POST /calculations/calculate` — loads the already-mapped `CsaTerms`,
/// selects the requested party's terms, runs the calculator, and persists
/// the resulting `MarginCall`.
pub async fn calculate(artifact_store: &dyn ArtifactStore, request: CalculateRequest) -> CsaResult<MarginCall> {
    let csa_terms: CsaTerms = artifact_store
        .load(ArtifactKind::CsaTerms, &request.csa_terms_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| {
            CsaError::missing_artifact("csa_terms", &request.csa_terms_id, "process the document through MAP first")
        })?;

    let (party, counterparty) = match request.party_perspective {
        PartyPerspective::PartyA => (&csa_terms.party_a, &csa_terms.party_b),
        PartyPerspective::PartyB => (&csa_terms.party_b, &csa_terms.party_a),
    };

    let input = CalculatorInput {
        net_exposure: request.net_exposure,
        threshold: party.threshold.finite_value(),
        minimum_transfer_amount: party.minimum_transfer_amount,
        rounding: csa_terms.rounding,
        independent_amount: party.independent_amount,
        posted_collateral: request.posted_collateral,
        currency: csa_terms.currency.clone(),
        counterparty_name: Some(counterparty.name.clone()),
        csa_terms_id: Some(request.csa_terms_id.clone()),
    };
    let margin_call = Calculator::new().calculate(input, crate::calculator::today_utc())?;

    let calc_id = chained_id("calculation", &request.document_id, chrono::Utc::now());
    artifact_store.save(ArtifactKind::Calculation, &calc_id, &margin_call).await.map_err(store_err)?;

    Ok(margin_call)
}

/// `POST /calculations/{calc_id}/explain` — loads the persisted
/// `MarginCall`/`CsaTerms` pair and generates the LLM narrative.
pub async fn explain(
    artifact_store: &dyn ArtifactStore,
    explanation_generator: &ExplanationGenerator,
    calc_id: &str,
    csa_terms_id: &str,
) -> CsaResult<Explanation> {
    let margin_call: MarginCall = artifact_store
        .load(ArtifactKind::Calculation, calc_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| CsaError::missing_artifact("calculation", calc_id, "POST /calculations/calculate first"))?;
    let csa_terms: CsaTerms = artifact_store
        .load(ArtifactKind::CsaTerms, csa_terms_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| CsaError::missing_artifact("csa_terms", csa_terms_id, "process the document through MAP first"))?;

    let explanation = explanation_generator.generate_explanation(&csa_terms, &margin_call).await?;

    let explanation_id = chained_id("explanation", calc_id, chrono::Utc::now());
    artifact_store.save(ArtifactKind::Explanation, &explanation_id, &explanation).await.map_err(store_err)?;

    Ok(explanation)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    /// spec.md §1 non-goal: "PDF report rendering internals" are out of
    /// scope. Requesting this format returns `InvalidInput` rather than
    /// silently degrading to JSON.
    Pdf,
    Csv,
}

/// `GET /export/margin-call-notice/{calc_id}?format=json|pdf` — serializes
/// the persisted `MarginCall` as a notice. Only `json` is implemented; `pdf`
/// rendering is an explicit non-goal.
pub async fn export_margin_call_notice(
    artifact_store: &dyn ArtifactStore,
    calc_id: &str,
    format: ExportFormat,
) -> CsaResult<serde_json::Value> {
    if format == ExportFormat::Pdf {
        return Err(CsaError::InvalidInput(
            "pdf rendering is out of scope; request format=json".to_string(),
        ));
    }
    let margin_call: MarginCall = artifact_store
        .load(ArtifactKind::Calculation, calc_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| CsaError::missing_artifact("calculation", calc_id, "POST /calculations/calculate first"))?;

    Ok(serde_json::to_value(margin_call).map_err(|e| CsaError::InternalError(e.to_string()))?)
}

/// `GET /export/audit-trail/{calc_id}?format=json|csv` — serializes the
/// persisted `Explanation`'s audit trail.
pub async fn export_audit_trail(
    artifact_store: &dyn ArtifactStore,
    explanation_id: &str,
    format: ExportFormat,
) -> CsaResult<String> {
    if format == ExportFormat::Pdf {
        return Err(CsaError::InvalidInput(
            "pdf rendering is out of scope; request format=json or format=csv".to_string(),
        ));
    }
    let explanation: Explanation = artifact_store
        .load(ArtifactKind::Explanation, explanation_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| CsaError::missing_artifact("explanation", explanation_id, "POST /calculations/{calc_id}/explain first"))?;

    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(&explanation.audit_trail).map_err(|e| CsaError::InternalError(e.to_string()))
        }
        ExportFormat::Csv => {
            let mut csv = String::from("timestamp,event,details\n");
            for event in &explanation.audit_trail {
                csv.push_str(&format!(
                    "{},{:?},{:?}\n",
                    event.timestamp.to_rfc3339(),
                    event.event,
                    event.details
                ));
            }
            Ok(csv)
        }
        ExportFormat::Pdf => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct InMemoryArtifactStore {
        pdfs: Mutex<HashMap<String, Vec<u8>>>,
        values: Mutex<HashMap<(ArtifactKind, String), serde_json::Value>>,
    }

    impl InMemoryArtifactStore {
        fn new() -> Self {
            InMemoryArtifactStore { pdfs: Mutex::new(HashMap::new()), values: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl ArtifactStore for InMemoryArtifactStore {
        async fn save_value(&self, kind: ArtifactKind, id: &str, payload: serde_json::Value) -> csa_store::error::StoreResult<()> {
            self.values.lock().unwrap().insert((kind, id.to_string()), payload);
            Ok(())
        }

        async fn load_value(&self, kind: ArtifactKind, id: &str) -> csa_store::error::StoreResult<Option<serde_json::Value>> {
            Ok(self.values.lock().unwrap().get(&(kind, id.to_string())).cloned())
        }

        async fn list(&self, kind: ArtifactKind) -> csa_store::error::StoreResult<Vec<String>> {
            Ok(self.values.lock().unwrap().keys().filter(|(k, _)| *k == kind).map(|(_, id)| id.clone()).collect())
        }

        async fn exists(&self, kind: ArtifactKind, id: &str) -> csa_store::error::StoreResult<bool> {
            Ok(self.values.lock().unwrap().contains_key(&(kind, id.to_string())))
        }

        async fn save_pdf(&self, document_id: &str, bytes: &[u8]) -> csa_store::error::StoreResult<()> {
            self.pdfs.lock().unwrap().insert(document_id.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn load_pdf(&self, document_id: &str) -> csa_store::error::StoreResult<Option<Vec<u8>>> {
            Ok(self.pdfs.lock().unwrap().get(document_id).cloned())
        }
    }

    struct InMemoryJobRepository {
        jobs: Mutex<HashMap<String, Job>>,
    }

    impl InMemoryJobRepository {
        fn new() -> Self {
            InMemoryJobRepository { jobs: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn create(&self, job: &Job) -> csa_store::error::StoreResult<()> {
            self.jobs.lock().unwrap().insert(job.job_id.clone(), job.clone());
            Ok(())
        }

        async fn get(&self, job_id: &str) -> csa_store::error::StoreResult<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(job_id).cloned())
        }

        async fn save(&self, job: &Job) -> csa_store::error::StoreResult<()> {
            self.jobs.lock().unwrap().insert(job.job_id.clone(), job.clone());
            Ok(())
        }

        async fn list(&self, _document_id: Option<&str>, _status: Option<JobStatus>) -> csa_store::error::StoreResult<Vec<Job>> {
            Ok(self.jobs.lock().unwrap().values().cloned().collect())
        }

        async fn cleanup(&self, _older_than_days: i64) -> csa_store::error::StoreResult<u32> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn upload_document_rejects_non_pdf_bytes() {
        let store = InMemoryArtifactStore::new();
        let validation = PdfValidation::new(1_000_000);
        let result = upload_document(&store, &validation, b"not a pdf").await;
        assert!(matches!(result, Err(CsaError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn upload_document_stores_pdf_and_mints_document_id() {
        let store = InMemoryArtifactStore::new();
        let validation = PdfValidation::new(1_000_000);
        let document_id = upload_document(&store, &validation, b"%PDF-1.7\n...").await.unwrap();
        assert!(document_id.starts_with("doc_"));
        assert!(store.load_pdf(&document_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_job_rejects_terminal_jobs() {
        let job_repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        let mut job = Job::new("job-1", "doc-1", ProcessingOptions::default(), chrono::Utc::now());
        job.status = JobStatus::Completed;
        job_repository.create(&job).await.unwrap();

        let result = cancel_job(job_repository.as_ref(), "job-1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_job_marks_pending_job_cancelled() {
        let job_repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        let job = Job::new("job-1", "doc-1", ProcessingOptions::default(), chrono::Utc::now());
        job_repository.create(&job).await.unwrap();

        let cancelled = cancel_job(job_repository.as_ref(), "job-1").await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn export_margin_call_notice_rejects_pdf_format() {
        let store = InMemoryArtifactStore::new();
        let result = export_margin_call_notice(&store, "calc-1", ExportFormat::Pdf).await;
        assert!(matches!(result, Err(CsaError::InvalidInput(_))));
    }
}
