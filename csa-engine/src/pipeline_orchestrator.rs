use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use csa_core::domain::agent::AgentKind;
use csa_core::domain::collateral::{CollateralValuation, NormalizedCollateral, NormalizedCollateralTable};
use csa_core::domain::csa_terms::CsaTerms;
use csa_core::domain::extraction::Extraction;
use csa_core::domain::ids::{chained_id, csa_terms_id};
use csa_core::domain::job::{Job, JobStatus, JobStep, NormalizeMethod};
use csa_core::domain::parsed_doc::ParsedDoc;
use csa_core::error::{CsaError, CsaResult, JobErrorEntry};
use csa_store::kind::ArtifactKind;
use csa_store::store::{ArtifactStore, ArtifactStoreExt, JobRepository};

use crate::agents::collateral::{buckets_from_valuation_string, classify_from_text, flat_percentage_from_text, maturity_from_type_text};
use crate::calculator::{Calculator, CalculatorInput};
use crate::document_ai::DocumentAiClient;
use crate::mapper::map_to_csa_terms;
use crate::normalization_orchestrator::{explode_collateral_table, NormalizationOrchestrator};
use crate::retry::retry_once_idempotent;

/// Drives one job through `PARSE → EXTRACT → NORMALIZE → MAP → [CALCULATE]
/// → DONE` (spec.md §4.10), persisting each stage's output via
/// `ArtifactStore` and updating the job's status/progress/step_timings via
/// `JobRepository` at every checkpoint. There is no separate "Job Manager"
/// type — `JobRepository` already owns CRUD and this orchestrator owns the
/// state transitions, mirroring how the original's `JobManager` and
/// `PipelineOrchestrator` were always used together from a single call site.
pub struct PipelineOrchestrator {
    artifact_store: Arc<dyn ArtifactStore>,
    job_repository: Arc<dyn JobRepository>,
    document_ai: Arc<dyn DocumentAiClient>,
    normalization_orchestrator: NormalizationOrchestrator,
}

impl PipelineOrchestrator {
    pub fn new(
        artifact_store: Arc<dyn ArtifactStore>,
        job_repository: Arc<dyn JobRepository>,
        document_ai: Arc<dyn DocumentAiClient>,
        normalization_orchestrator: NormalizationOrchestrator,
    ) -> Self {
        PipelineOrchestrator { artifact_store, job_repository, document_ai, normalization_orchestrator }
    }

    /// Runs the pipeline for a job already created via `JobRepository::create`.
    /// Returns the final `Job` (status `COMPLETED` or `FAILED`) or propagates
    /// the terminal error after having recorded it on the job.
    pub async fn run(&self, job_id: &str) -> CsaResult<Job> {
        let mut job = self
            .job_repository
            .get(job_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| CsaError::missing_artifact("job", job_id, "create the job via JobRepository::create first"))?;

        job.status = JobStatus::Processing;
        job.current_step = Some(JobStep::Parse);
        job.started_at.get_or_insert(Utc::now());
        job.updated_at = Utc::now();
        self.job_repository.save(&job).await.map_err(store_err)?;

        match self.run_stages(&mut job).await {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.current_step = Some(JobStep::Done);
                job.progress = JobStep::Done.progress_checkpoint();
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                self.job_repository.save(&job).await.map_err(store_err)?;
                Ok(job)
            }
            Err(e) => {
                // A concurrent `cancel_job` call wins over a failure that
                // surfaces only because a later stage observed cancellation.
                if let Some(latest) = self.job_repository.get(&job.job_id).await.map_err(store_err)? {
                    if latest.status == JobStatus::Cancelled {
                        return Ok(latest);
                    }
                }
                job.status = JobStatus::Failed;
                job.errors.push(JobErrorEntry {
                    step: job.current_step.map(|s| format!("{s:?}")).unwrap_or_else(|| "unknown".to_string()),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                self.job_repository.save(&job).await.map_err(store_err)?;
                Err(e)
            }
        }
    }

    async fn run_stages(&self, job: &mut Job) -> CsaResult<()> {
        self.check_not_cancelled(job).await?;
        let parsed = self.run_parse(job).await?;

        self.check_not_cancelled(job).await?;
        let extraction = self.run_extract(job, &parsed).await?;

        self.check_not_cancelled(job).await?;
        let collateral_table = self.run_normalize(job, &extraction, &parsed).await?;

        self.check_not_cancelled(job).await?;
        let csa_terms = self.run_map(job, &extraction, &collateral_table).await?;

        if job.options.calculate_margin {
            self.check_not_cancelled(job).await?;
            self.run_calculate(job, &csa_terms).await?;
        }

        Ok(())
    }

    async fn check_not_cancelled(&self, job: &Job) -> CsaResult<()> {
        if let Some(latest) = self.job_repository.get(&job.job_id).await.map_err(store_err)? {
            if latest.status == JobStatus::Cancelled {
                return Err(CsaError::precondition("job was cancelled", "create a new job to reprocess this document"));
            }
        }
        Ok(())
    }

    async fn run_parse(&self, job: &mut Job) -> CsaResult<ParsedDoc> {
        let t0 = Instant::now();
        let pdf_bytes = self
            .artifact_store
            .load_pdf(&job.document_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| CsaError::missing_artifact("pdf", &job.document_id, "upload the document first"))?;

        let document_id = job.document_id.clone();
        let document_ai = Arc::clone(&self.document_ai);
        let parsed = retry_once_idempotent(|| {
            let document_ai = Arc::clone(&document_ai);
            let document_id = document_id.clone();
            let pdf_bytes = pdf_bytes.clone();
            async move { document_ai.parse(&document_id, &pdf_bytes).await }
        })
        .await?;

        self.artifact_store.save(ArtifactKind::Parsed, &parsed.parse_id, &parsed).await.map_err(store_err)?;

        job.results.insert("parse_id".to_string(), parsed.parse_id.clone());
        job.step_timings.insert("parse".to_string(), t0.elapsed().as_secs_f64());
        job.current_step = Some(JobStep::Extract);
        job.progress = JobStep::Parse.progress_checkpoint();
        job.updated_at = Utc::now();
        self.job_repository.save(job).await.map_err(store_err)?;

        Ok(parsed)
    }

    async fn run_extract(&self, job: &mut Job, parsed: &ParsedDoc) -> CsaResult<Extraction> {
        let t0 = Instant::now();
        let document_ai = Arc::clone(&self.document_ai);
        let extraction = retry_once_idempotent(|| {
            let document_ai = Arc::clone(&document_ai);
            async move { document_ai.extract(parsed).await }
        })
        .await?;

        self.artifact_store.save(ArtifactKind::Extraction, &extraction.extraction_id, &extraction).await.map_err(store_err)?;

        job.results.insert("extraction_id".to_string(), extraction.extraction_id.clone());
        job.step_timings.insert("extract".to_string(), t0.elapsed().as_secs_f64());
        job.current_step = Some(JobStep::Normalize);
        job.progress = JobStep::Extract.progress_checkpoint();
        job.updated_at = Utc::now();
        self.job_repository.save(job).await.map_err(store_err)?;

        Ok(extraction)
    }

    async fn run_normalize(
        &self,
        job: &mut Job,
        extraction: &Extraction,
        parsed: &ParsedDoc,
    ) -> CsaResult<NormalizedCollateralTable> {
        let t0 = Instant::now();
        let collateral_table = match job.options.normalize_method {
            NormalizeMethod::MultiAgent => {
                let normalized = self.normalization_orchestrator.normalize(extraction, Some(parsed)).await;
                self.artifact_store
                    .save(ArtifactKind::NormalizedMultiagent, &normalized.normalized_data_id, &normalized)
                    .await
                    .map_err(store_err)?;
                job.results.insert("normalized_multiagent_id".to_string(), normalized.normalized_data_id.clone());
                collateral_table_from_agent_data(&normalized, extraction)
            }
            NormalizeMethod::Simple => {
                let table = simple_collateral_table(extraction);
                let id = chained_id("normalized", &extraction.extraction_id, Utc::now());
                self.artifact_store.save(ArtifactKind::NormalizedMultiagent, &id, &table).await.map_err(store_err)?;
                job.results.insert("normalized_multiagent_id".to_string(), id);
                table
            }
        };

        job.step_timings.insert("normalize".to_string(), t0.elapsed().as_secs_f64());
        job.current_step = Some(JobStep::Map);
        job.progress = JobStep::Normalize.progress_checkpoint();
        job.updated_at = Utc::now();
        self.job_repository.save(job).await.map_err(store_err)?;

        Ok(collateral_table)
    }

    async fn run_map(
        &self,
        job: &mut Job,
        extraction: &Extraction,
        collateral_table: &NormalizedCollateralTable,
    ) -> CsaResult<CsaTerms> {
        let t0 = Instant::now();
        let normalized_collateral_id = job
            .results
            .get("normalized_multiagent_id")
            .cloned()
            .unwrap_or_else(|| chained_id("normalized", &extraction.extraction_id, Utc::now()));

        let (csa_terms, warnings) = map_to_csa_terms(extraction, collateral_table, &normalized_collateral_id)?;
        for warning in warnings {
            tracing::warn!(document_id = %job.document_id, %warning, "CSATerms construction warning");
        }

        let terms_id = csa_terms_id(&csa_terms.document_id);
        self.artifact_store.save(ArtifactKind::CsaTerms, &terms_id, &csa_terms).await.map_err(store_err)?;

        job.results.insert("csa_terms_id".to_string(), terms_id);
        job.step_timings.insert("map".to_string(), t0.elapsed().as_secs_f64());
        job.current_step = Some(JobStep::Map);
        job.progress = JobStep::Map.progress_checkpoint();
        job.updated_at = Utc::now();
        self.job_repository.save(job).await.map_err(store_err)?;

        Ok(csa_terms)
    }

    /// Optional convenience calculation run with Party A's terms and no
    /// posted collateral, matching `options.portfolio_value` as the net
    /// exposure input (spec.md §4.10 step 5 "optional"). A caller wanting a
    /// specific party perspective or real posted-collateral positions
    /// should invoke `api::calculate` directly instead.
    async fn run_calculate(&self, job: &mut Job, csa_terms: &CsaTerms) -> CsaResult<()> {
        let t0 = Instant::now();
        job.current_step = Some(JobStep::Calculate);

        let portfolio_value = job.options.portfolio_value.ok_or_else(|| {
            CsaError::InvalidInput("portfolio_value is required when calculate_margin is set".to_string())
        })?;

        let input = CalculatorInput {
            net_exposure: portfolio_value,
            threshold: csa_terms.party_a.threshold.finite_value(),
            minimum_transfer_amount: csa_terms.party_a.minimum_transfer_amount,
            rounding: csa_terms.rounding,
            independent_amount: csa_terms.party_a.independent_amount,
            posted_collateral: Vec::new(),
            currency: csa_terms.currency.clone(),
            counterparty_name: Some(csa_terms.party_b.name.clone()),
            csa_terms_id: Some(csa_terms_id(&csa_terms.document_id)),
        };
        let margin_call = Calculator::new().calculate(input, Utc::now().date_naive())?;

        let calc_id = chained_id("calculation", &csa_terms.document_id, Utc::now());
        self.artifact_store.save(ArtifactKind::Calculation, &calc_id, &margin_call).await.map_err(store_err)?;

        job.results.insert("calculation_id".to_string(), calc_id);
        job.step_timings.insert("calculate".to_string(), t0.elapsed().as_secs_f64());
        job.updated_at = Utc::now();
        self.job_repository.save(job).await.map_err(store_err)?;

        Ok(())
    }
}

fn store_err(e: csa_store::error::StoreError) -> CsaError {
    CsaError::ExternalServiceError { service: "artifact-store".to_string(), message: e.to_string() }
}

/// Reconstructs a `NormalizedCollateralTable` from the Collateral Agent's
/// raw `AgentResult.data` (the Normalization Orchestrator keeps agents
/// decoupled from this domain type; the orchestrator is the only caller
/// that needs it assembled back into one value for the Mapper).
fn collateral_table_from_agent_data(
    normalized: &csa_core::domain::normalization::NormalizedResult,
    extraction: &Extraction,
) -> NormalizedCollateralTable {
    let collateral_items: Vec<NormalizedCollateral> = normalized
        .agent_results
        .get(&AgentKind::Collateral)
        .and_then(|r| r.data.get("collateral_items"))
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let rating_events: Vec<String> = {
        let set: BTreeSet<&str> = collateral_items.iter().map(|c| c.rating_event.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    };

    NormalizedCollateralTable {
        document_id: normalized.document_id.clone(),
        extraction_id: normalized.extraction_id.clone(),
        rating_events,
        collateral_items,
        normalized_at: Utc::now(),
        normalization_model: "multi-agent".to_string(),
        metadata: serde_json::json!({ "normalized_data_id": normalized.normalized_data_id }),
    }
}

/// Rule-based collateral table for `NormalizeMethod::Simple` — reuses the
/// same field-level parsers the Collateral Agent's Initial Parse step uses,
/// but with no LLM call and no reasoning chain (spec.md §9 Design Notes,
/// `original_source` `pipeline_orchestrator.py`'s `"simple"` option).
fn simple_collateral_table(extraction: &Extraction) -> NormalizedCollateralTable {
    let fields = explode_collateral_table(extraction);
    let mut rating_events = Vec::new();
    let collateral_items = fields
        .into_iter()
        .map(|field| {
            if !rating_events.contains(&field.rating_event) {
                rating_events.push(field.rating_event.clone());
            }
            let buckets = buckets_from_valuation_string(&field.valuation_string);
            let valuation = if buckets.is_empty() {
                CollateralValuation::flat(flat_percentage_from_text(&field.valuation_string))
            } else {
                CollateralValuation::Stratified { maturity_buckets: buckets }
            };
            NormalizedCollateral {
                standardized_type: classify_from_text(&field.collateral_type_text),
                base_description: field.collateral_type_text.clone(),
                maturity_from_collateral_type: maturity_from_type_text(&field.collateral_type_text),
                rating_event: field.rating_event,
                valuation,
                confidence: 0.5,
                notes: Some("simple rule-based normalization, no reasoning chain".to_string()),
            }
        })
        .collect();

    NormalizedCollateralTable {
        document_id: extraction.document_id.clone(),
        extraction_id: extraction.extraction_id.clone(),
        rating_events,
        collateral_items,
        normalized_at: Utc::now(),
        normalization_model: "rule-based".to_string(),
        metadata: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use csa_core::domain::extraction::{AgreementInfo, ColumnInfo, CollateralTableRow, CoreMarginTerms, ValuationTiming};
    use csa_core::domain::parsed_doc::Chunk;
    use indexmap::IndexMap;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct StubDocumentAi {
        parse_calls: Arc<Mutex<u32>>,
        fail_parse_once: bool,
    }

    #[async_trait]
    impl DocumentAiClient for StubDocumentAi {
        async fn parse(&self, document_id: &str, _pdf_bytes: &[u8]) -> CsaResult<ParsedDoc> {
            let mut calls = self.parse_calls.lock().unwrap();
            *calls += 1;
            if self.fail_parse_once && *calls == 1 {
                return Err(CsaError::ExternalServiceError { service: "document-ai".to_string(), message: "timeout".to_string() });
            }
            Ok(ParsedDoc {
                document_id: document_id.to_string(),
                parse_id: format!("parse_{document_id}"),
                chunks: vec![Chunk {
                    id: "c1".to_string(),
                    page_index: 0,
                    bounding_box: csa_core::domain::parsed_doc::BoundingBox { x0: 0.0, y0: 0.0, x1: 0.0, y1: 0.0 },
                    text: "Base Valuation Percentage: 99%".to_string(),
                }],
                markdown: "# CSA".to_string(),
                page_count: 1,
            })
        }

        async fn extract(&self, parsed: &ParsedDoc) -> CsaResult<Extraction> {
            Ok(Extraction {
                extraction_id: format!("extract_{}", parsed.parse_id),
                document_id: parsed.document_id.clone(),
                parse_id: parsed.parse_id.clone(),
                agreement_info: AgreementInfo { party_a_name: "Alpha Bank".to_string(), party_b_name: "Beta Fund".to_string(), agreement_date: None, signature_date: None },
                core_margin_terms: CoreMarginTerms {
                    party_a_threshold: "1,000,000".to_string(),
                    party_b_threshold: "0".to_string(),
                    party_a_mta: "250,000".to_string(),
                    party_b_mta: "250,000".to_string(),
                    party_a_independent_amount: "0".to_string(),
                    party_b_independent_amount: "0".to_string(),
                    rounding: Some("10,000".to_string()),
                    base_currency: "US Dollar".to_string(),
                },
                valuation_timing: ValuationTiming { notification_time: None, valuation_time: None, valuation_agent: None },
                eligible_collateral_table: vec![CollateralTableRow { collateral_type_text: "US Treasury".to_string(), valuation_by_column: vec!["99%".to_string()] }],
                column_info: ColumnInfo { valuation_column_count: 1, valuation_column_names: Vec::new() },
                clauses_to_collect: IndexMap::new(),
                provenance: BTreeMap::new(),
            })
        }
    }

    struct InMemoryArtifactStore {
        pdfs: Mutex<std::collections::HashMap<String, Vec<u8>>>,
        values: Mutex<std::collections::HashMap<(ArtifactKind, String), serde_json::Value>>,
    }

    impl InMemoryArtifactStore {
        fn new() -> Self {
            InMemoryArtifactStore { pdfs: Mutex::new(std::collections::HashMap::new()), values: Mutex::new(std::collections::HashMap::new()) }
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
        jobs: Mutex<std::collections::HashMap<String, Job>>,
    }

    impl InMemoryJobRepository {
        fn new() -> Self {
            InMemoryJobRepository { jobs: Mutex::new(std::collections::HashMap::new()) }
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

    fn orchestrator(document_ai: Arc<dyn DocumentAiClient>) -> (PipelineOrchestrator, Arc<InMemoryArtifactStore>, Arc<InMemoryJobRepository>) {
        let artifact_store = Arc::new(InMemoryArtifactStore::new());
        let job_repository = Arc::new(InMemoryJobRepository::new());
        let semaphore = Arc::new(tokio::sync::Semaphore::new(10));
        let normalization_orchestrator = NormalizationOrchestrator::new(
            crate::agents::CollateralAgent::new(Arc::new(NoopLlmClient), semaphore.clone(), 20, 5),
            crate::agents::TemporalAgent::new(Arc::new(NoopLlmClient), semaphore.clone()),
            crate::agents::CurrencyAgent::new(Arc::new(NoopLlmClient), semaphore.clone()),
        );
        let pipeline = PipelineOrchestrator::new(
            artifact_store.clone() as Arc<dyn ArtifactStore>,
            job_repository.clone() as Arc<dyn JobRepository>,
            document_ai,
            normalization_orchestrator,
        );
        (pipeline, artifact_store, job_repository)
    }

    struct NoopLlmClient;

    #[async_trait]
    impl crate::agents::LlmClient for NoopLlmClient {
        async fn complete(&self, _request: crate::agents::LlmRequest) -> CsaResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn simple_method_runs_end_to_end_without_llm() {
        let document_ai = Arc::new(StubDocumentAi { parse_calls: Arc::new(Mutex::new(0)), fail_parse_once: false });
        let (pipeline, artifact_store, job_repository) = orchestrator(document_ai);

        artifact_store.save_pdf("doc-1", b"%PDF-1.4 fixture").await.unwrap();
        let mut options = csa_core::domain::job::ProcessingOptions::default();
        options.normalize_method = NormalizeMethod::Simple;
        let job = Job::new("job-1", "doc-1", options, Utc::now());
        job_repository.create(&job).await.unwrap();

        let finished = pipeline.run("job-1").await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 100);
        assert!(finished.results.contains_key("csa_terms_id"));
    }

    #[tokio::test]
    async fn parse_failure_is_retried_once_then_marks_job_failed() {
        let document_ai = Arc::new(StubDocumentAi { parse_calls: Arc::new(Mutex::new(0)), fail_parse_once: true });
        let parse_calls = document_ai.parse_calls.clone();
        let (pipeline, artifact_store, job_repository) = orchestrator(document_ai);

        artifact_store.save_pdf("doc-1", b"%PDF-1.4 fixture").await.unwrap();
        let mut options = csa_core::domain::job::ProcessingOptions::default();
        options.normalize_method = NormalizeMethod::Simple;
        let job = Job::new("job-1", "doc-1", options, Utc::now());
        job_repository.create(&job).await.unwrap();

        let finished = pipeline.run("job-1").await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(*parse_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn calculate_failure_is_attributed_to_the_calculate_step() {
        let document_ai = Arc::new(StubDocumentAi { parse_calls: Arc::new(Mutex::new(0)), fail_parse_once: false });
        let (pipeline, artifact_store, job_repository) = orchestrator(document_ai);

        artifact_store.save_pdf("doc-1", b"%PDF-1.4 fixture").await.unwrap();
        let mut options = csa_core::domain::job::ProcessingOptions::default();
        options.normalize_method = NormalizeMethod::Simple;
        options.calculate_margin = true;
        options.portfolio_value = None;
        let job = Job::new("job-1", "doc-1", options, Utc::now());
        job_repository.create(&job).await.unwrap();

        assert!(pipeline.run("job-1").await.is_err());
        let finished = job_repository.get("job-1").await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.errors.last().unwrap().step, "Calculate");
    }

    #[tokio::test]
    async fn cancelled_job_short_circuits_before_next_stage() {
        let document_ai = Arc::new(StubDocumentAi { parse_calls: Arc::new(Mutex::new(0)), fail_parse_once: false });
        let (pipeline, artifact_store, job_repository) = orchestrator(document_ai);

        artifact_store.save_pdf("doc-1", b"%PDF-1.4 fixture").await.unwrap();
        let mut job = Job::new("job-1", "doc-1", csa_core::domain::job::ProcessingOptions::default(), Utc::now());
        job.status = JobStatus::Cancelled;
        job_repository.create(&job).await.unwrap();

        let finished = pipeline.run("job-1").await.unwrap();
        assert_eq!(finished.status, JobStatus::Cancelled);
    }
}
