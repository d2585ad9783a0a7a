//! Thin command-line front end driving the CSA margin pipeline end to end
//! against local fixtures (spec.md §6: "HTTP surface... peripheral —
//! reimplementers may ship any transport"). Every subcommand is a direct
//! call into `csa_engine::api`/`PipelineOrchestrator`, mirroring the shape
//! the teacher crate would give a CLI front end over its own domain logic.

mod fixtures;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use csa_core::domain::calculation::CollateralItem;
use csa_core::domain::job::{JobStatus, NormalizeMethod, ProcessingOptions};
use csa_engine::agents::{CollateralAgent, CurrencyAgent, LlmClient, ReqwestLlmClient, TemporalAgent};
use csa_engine::api::{self, CalculateRequest, ExportFormat, PartyPerspective};
use csa_engine::config::AppConfig;
use csa_engine::document_ai::DocumentAiClient;
use csa_engine::explanation::ExplanationGenerator;
use csa_engine::normalization_orchestrator::NormalizationOrchestrator;
use csa_engine::pipeline_orchestrator::PipelineOrchestrator;
use csa_store::pdf_validation::PdfValidation;
use csa_store::store::{ArtifactStore, JobRepository};
use csa_store_fs::{FileArtifactStore, FileJobRepository};

use fixtures::{read_pdf_bytes, FixtureDocumentAiClient, OfflineLlmClient};

#[derive(Parser)]
#[command(
    name = "csa",
    version,
    about = "Drives the CSA margin extraction and calculation pipeline against local fixtures",
    long_about = "Uploads a CSA PDF, runs it through parse/extract/normalize/map (and optionally \
                  calculate), inspects jobs, and runs the deterministic margin calculator and \
                  explanation generator directly. The document-AI and LLM calls are stubbed by \
                  local fixtures unless --llm live is requested."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory of the flat-directory artifact layout (spec.md §6).
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a raw PDF and mint a document_id (`POST /documents/upload`).
    Upload {
        /// Path to the PDF file to upload.
        pdf: PathBuf,
    },
    /// Run PARSE → EXTRACT → NORMALIZE → MAP (→ CALCULATE) for a document
    /// (`POST /documents/process/{document_id}`), blocking until it finishes.
    Process {
        document_id: String,
        /// Path to a JSON fixture standing in for the document-AI service's
        /// `Extraction` output.
        #[arg(long)]
        extraction: PathBuf,
        #[arg(long, value_enum, default_value = "simple")]
        normalize_method: CliNormalizeMethod,
        #[arg(long, value_enum, default_value = "offline")]
        llm: LlmMode,
        #[arg(long)]
        calculate_margin: bool,
        #[arg(long)]
        portfolio_value: Option<Decimal>,
    },
    #[command(subcommand)]
    Job(JobCommands),
    /// Run the deterministic calculator against an already-mapped CsaTerms
    /// (`POST /calculations/calculate`).
    Calculate {
        document_id: String,
        csa_terms_id: String,
        #[arg(long)]
        net_exposure: Decimal,
        #[arg(long, value_enum, default_value = "party-a")]
        party: CliPartyPerspective,
        /// Path to a JSON fixture holding `Vec<CollateralItem>`; omit for no
        /// posted collateral.
        #[arg(long)]
        posted_collateral: Option<PathBuf>,
    },
    /// Generate the LLM narrative for a persisted calculation
    /// (`POST /calculations/{calc_id}/explain`).
    Explain {
        calc_id: String,
        csa_terms_id: String,
        #[arg(long, value_enum, default_value = "offline")]
        llm: LlmMode,
    },
    #[command(subcommand)]
    Export(ExportCommands),
}

#[derive(Subcommand)]
enum JobCommands {
    /// `GET /jobs/{job_id}`.
    Get { job_id: String },
    /// `DELETE /jobs/{job_id}`.
    Cancel { job_id: String },
    /// List jobs, optionally filtered.
    List {
        #[arg(long)]
        document_id: Option<String>,
        #[arg(long, value_enum)]
        status: Option<CliJobStatus>,
    },
}

#[derive(Subcommand)]
enum ExportCommands {
    /// `GET /export/margin-call-notice/{calc_id}`.
    Notice {
        calc_id: String,
        #[arg(long, value_enum, default_value = "json")]
        format: CliExportFormat,
    },
    /// `GET /export/audit-trail/{calc_id}` (keyed on the explanation id here,
    /// since the audit trail lives on `Explanation`, not `MarginCall`).
    AuditTrail {
        explanation_id: String,
        #[arg(long, value_enum, default_value = "json")]
        format: CliExportFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliNormalizeMethod {
    Simple,
    MultiAgent,
}

impl From<CliNormalizeMethod> for NormalizeMethod {
    fn from(value: CliNormalizeMethod) -> Self {
        match value {
            CliNormalizeMethod::Simple => NormalizeMethod::Simple,
            CliNormalizeMethod::MultiAgent => NormalizeMethod::MultiAgent,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPartyPerspective {
    PartyA,
    PartyB,
}

impl From<CliPartyPerspective> for PartyPerspective {
    fn from(value: CliPartyPerspective) -> Self {
        match value {
            CliPartyPerspective::PartyA => PartyPerspective::PartyA,
            CliPartyPerspective::PartyB => PartyPerspective::PartyB,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliExportFormat {
    Json,
    Pdf,
    Csv,
}

impl From<CliExportFormat> for ExportFormat {
    fn from(value: CliExportFormat) -> Self {
        match value {
            CliExportFormat::Json => ExportFormat::Json,
            CliExportFormat::Pdf => ExportFormat::Pdf,
            CliExportFormat::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl From<CliJobStatus> for JobStatus {
    fn from(value: CliJobStatus) -> Self {
        match value {
            CliJobStatus::Pending => JobStatus::Pending,
            CliJobStatus::Processing => JobStatus::Processing,
            CliJobStatus::Completed => JobStatus::Completed,
            CliJobStatus::Failed => JobStatus::Failed,
            CliJobStatus::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// Whether reasoning-agent and explanation-generator LLM calls are answered
/// offline (no network, empty replies — every agent degrades to its
/// rule-based steps) or by a live `ReqwestLlmClient` against
/// `AppConfig::llm_base_url`.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LlmMode {
    Offline,
    Live,
}

fn llm_client(mode: LlmMode, config: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    Ok(match mode {
        LlmMode::Offline => Arc::new(OfflineLlmClient::new()),
        LlmMode::Live => Arc::new(ReqwestLlmClient::new(config.llm_base_url.clone(), config.llm_timeout_seconds)?),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = AppConfig::load().unwrap_or_default();
    let artifact_store: Arc<dyn ArtifactStore> = Arc::new(FileArtifactStore::new(&cli.data_dir)?);
    let job_repository: Arc<dyn JobRepository> = Arc::new(FileJobRepository::new(&cli.data_dir)?);

    match cli.command {
        Commands::Upload { pdf } => {
            let pdf_bytes = read_pdf_bytes(&pdf)?;
            let validation = PdfValidation::new(config.max_upload_size);
            let document_id = api::upload_document(artifact_store.as_ref(), &validation, &pdf_bytes).await?;
            println!("{document_id}");
        }
        Commands::Process { document_id, extraction, normalize_method, llm, calculate_margin, portfolio_value } => {
            let document_ai: Arc<dyn DocumentAiClient> = Arc::new(FixtureDocumentAiClient::new(extraction));
            let llm_client = llm_client(llm, &config)?;
            let semaphore = Arc::new(Semaphore::new(config.max_concurrent_llm_calls));
            let normalization_orchestrator = NormalizationOrchestrator::new(
                CollateralAgent::new(llm_client.clone(), semaphore.clone(), config.auto_batch_threshold, config.parallel_batch_size),
                TemporalAgent::new(llm_client.clone(), semaphore.clone()),
                CurrencyAgent::new(llm_client.clone(), semaphore.clone()),
            );
            let orchestrator =
                Arc::new(PipelineOrchestrator::new(artifact_store.clone(), job_repository.clone(), document_ai, normalization_orchestrator));

            let options = ProcessingOptions {
                normalize_method: normalize_method.into(),
                save_intermediate_steps: true,
                calculate_margin,
                portfolio_value,
            };
            let job_id = api::process_document(&job_repository, orchestrator, &document_id, options).await?;

            // The CLI is a synchronous front end: wait for the job this
            // process itself spawned rather than polling like an HTTP
            // client would (spec.md §6 "POST /documents/process... returns
            // job_id"; polling via `csa job get` remains available for any
            // job, including ones started elsewhere).
            loop {
                let job = api::get_job(job_repository.as_ref(), &job_id).await?;
                if job.status.is_terminal() {
                    print_json(&job)?;
                    if job.status == JobStatus::Failed {
                        anyhow::bail!("job {job_id} failed");
                    }
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        }
        Commands::Job(JobCommands::Get { job_id }) => {
            let job = api::get_job(job_repository.as_ref(), &job_id).await?;
            print_json(&job)?;
        }
        Commands::Job(JobCommands::Cancel { job_id }) => {
            let job = api::cancel_job(job_repository.as_ref(), &job_id).await?;
            print_json(&job)?;
        }
        Commands::Job(JobCommands::List { document_id, status }) => {
            let jobs = job_repository.list(document_id.as_deref(), status.map(Into::into)).await?;
            print_json(&jobs)?;
        }
        Commands::Calculate { document_id, csa_terms_id, net_exposure, party, posted_collateral } => {
            let posted: Vec<CollateralItem> = match posted_collateral {
                Some(path) => {
                    let bytes = std::fs::read(&path)?;
                    serde_json::from_slice(&bytes)?
                }
                None => Vec::new(),
            };
            let request = CalculateRequest {
                document_id,
                csa_terms_id,
                net_exposure,
                posted_collateral: posted,
                party_perspective: party.into(),
            };
            let margin_call = api::calculate(artifact_store.as_ref(), request).await?;
            print_json(&margin_call)?;
        }
        Commands::Explain { calc_id, csa_terms_id, llm } => {
            let llm_client = llm_client(llm, &config)?;
            let generator = ExplanationGenerator::new(llm_client, "claude-sonnet-cli");
            let explanation = api::explain(artifact_store.as_ref(), &generator, &calc_id, &csa_terms_id).await?;
            print_json(&explanation)?;
        }
        Commands::Export(ExportCommands::Notice { calc_id, format }) => {
            let notice = api::export_margin_call_notice(artifact_store.as_ref(), &calc_id, format.into()).await?;
            println!("{}", serde_json::to_string_pretty(&notice)?);
        }
        Commands::Export(ExportCommands::AuditTrail { explanation_id, format }) => {
            let trail = api::export_audit_trail(artifact_store.as_ref(), &explanation_id, format.into()).await?;
            println!("{trail}");
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
