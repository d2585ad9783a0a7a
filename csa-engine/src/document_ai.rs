use async_trait::async_trait;

use csa_core::domain::extraction::Extraction;
use csa_core::domain::parsed_doc::ParsedDoc;
use csa_core::error::CsaResult;

/// The document-AI parse/extract service the Pipeline Orchestrator drives
/// (spec.md §1: "document-AI parse/extraction engine... remain external
/// collaborators reached only through trait boundaries"). Mirrors the
/// `LlmClient` trait's shape: dyn-compatible, one call per pipeline stage,
/// errors surfaced as `CsaError::ExternalServiceError` so the orchestrator's
/// `retry_once_idempotent` combinator applies uniformly to both calls.
#[async_trait]
pub trait DocumentAiClient: Send + Sync {
    /// Parses a raw PDF into chunked, page-indexed text (spec.md §3 "ParsedDoc").
    async fn parse(&self, document_id: &str, pdf_bytes: &[u8]) -> CsaResult<ParsedDoc>;

    /// Extracts the structured field groups from an already-parsed document
    /// (spec.md §3 "Extraction").
    async fn extract(&self, parsed: &ParsedDoc) -> CsaResult<Extraction>;
}
