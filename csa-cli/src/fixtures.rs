//! Local stand-ins for the two external collaborators (spec.md §1 "OUT OF
//! SCOPE... the external document-AI service... reached only through trait
//! boundaries"). Neither talks to a network: `FixtureDocumentAiClient` reads
//! an already-extracted `Extraction` from a JSON fixture file instead of
//! running real OCR/layout parsing, and `OfflineLlmClient` answers every
//! reasoning-agent call with an empty object so the agents fall through to
//! their rule-based steps (spec.md §4.3-§4.5 already tolerate an empty or
//! failed LLM reply at every step that calls one).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use csa_core::domain::extraction::Extraction;
use csa_core::domain::ids::chained_id;
use csa_core::domain::parsed_doc::{BoundingBox, Chunk, ParsedDoc};
use csa_core::error::{CsaError, CsaResult};
use csa_engine::agents::{LlmClient, LlmRequest};
use csa_engine::document_ai::DocumentAiClient;

/// Reads a pre-extracted `Extraction` from disk and wraps the raw PDF bytes
/// in a minimal single-chunk `ParsedDoc`. Stands in for the document-AI
/// service this crate treats as an external collaborator.
pub struct FixtureDocumentAiClient {
    extraction_path: PathBuf,
}

impl FixtureDocumentAiClient {
    pub fn new(extraction_path: impl Into<PathBuf>) -> Self {
        FixtureDocumentAiClient { extraction_path: extraction_path.into() }
    }
}

#[async_trait]
impl DocumentAiClient for FixtureDocumentAiClient {
    async fn parse(&self, document_id: &str, pdf_bytes: &[u8]) -> CsaResult<ParsedDoc> {
        let markdown = String::from_utf8_lossy(pdf_bytes).into_owned();
        Ok(ParsedDoc {
            document_id: document_id.to_string(),
            parse_id: chained_id("parse", document_id, Utc::now()),
            chunks: vec![Chunk {
                id: "c0".to_string(),
                page_index: 0,
                bounding_box: BoundingBox { x0: 0.0, y0: 0.0, x1: 0.0, y1: 0.0 },
                text: markdown.clone(),
            }],
            markdown,
            page_count: 1,
        })
    }

    async fn extract(&self, parsed: &ParsedDoc) -> CsaResult<Extraction> {
        let bytes = std::fs::read(&self.extraction_path).map_err(|e| CsaError::ExternalServiceError {
            service: "document-ai-fixture".to_string(),
            message: format!("reading {}: {e}", self.extraction_path.display()),
        })?;
        let mut extraction: Extraction = serde_json::from_slice(&bytes).map_err(|e| CsaError::ExternalServiceError {
            service: "document-ai-fixture".to_string(),
            message: format!("parsing {}: {e}", self.extraction_path.display()),
        })?;
        extraction.document_id = parsed.document_id.clone();
        extraction.parse_id = parsed.parse_id.clone();
        extraction.extraction_id = chained_id("extract", &parsed.parse_id, Utc::now());
        Ok(extraction)
    }
}

/// Answers every call with `{}` and never touches the network. Every
/// reasoning agent's LLM-backed step already degrades to a rule-based
/// default on an empty or errored reply, so this is enough to exercise the
/// full multi-agent pipeline offline; it is not a substitute for a real
/// model when ambiguity resolution actually matters.
#[derive(Default)]
pub struct OfflineLlmClient {
    calls: AtomicU32,
}

impl OfflineLlmClient {
    pub fn new() -> Self {
        OfflineLlmClient::default()
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for OfflineLlmClient {
    async fn complete(&self, _request: LlmRequest) -> CsaResult<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(json!({}))
    }
}

pub fn read_pdf_bytes(path: &Path) -> CsaResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| CsaError::InvalidInput(format!("reading {}: {e}", path.display())))
}
