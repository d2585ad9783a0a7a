use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use csa_core::error::{CsaError, CsaResult};

/// A single call to the fast or deep model, deterministic settings only
/// (spec.md §4.2 "build a prompt, call an LLM with deterministic settings").
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        LlmRequest {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: 4000,
        }
    }

    fn cache_key(&self) -> String {
        format!("{}\u{0}{}\u{0}{}", self.model, self.temperature, self.prompt)
    }
}

/// Abstracts the fast/deep model split (spec.md §4.2). Every agent holds an
/// `Arc<dyn LlmClient>` so a test double can stand in for the network call.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> CsaResult<Value>;
}

/// Strips a single leading/trailing markdown code fence (```json ... ```)
/// before JSON parsing, tolerating trailing prose after the closing fence
/// (spec.md §4.2 "parse a JSON reply (tolerating markdown fences)").
pub fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_open = after_open
        .strip_prefix("json")
        .unwrap_or(after_open)
        .trim_start_matches('\n');
    match after_open.find("```") {
        Some(end) => after_open[..end].trim(),
        None => after_open.trim(),
    }
}

pub fn parse_llm_reply(text: &str) -> Value {
    let candidate = strip_markdown_fence(text);
    serde_json::from_str(candidate).unwrap_or_else(|_| {
        serde_json::json!({ "raw_text": text, "parsed": false })
    })
}

/// `reqwest` + `moka` client mirroring the teacher's `ProductCatalogClient`:
/// a 5-minute TTL cache keyed on `(model, temperature, prompt)`, since a
/// temperature-0 call is pure and safe to dedupe across retries/batches.
#[derive(Clone)]
pub struct ReqwestLlmClient {
    http_client: Client,
    base_url: String,
    cache: Arc<Cache<String, Value>>,
}

impl ReqwestLlmClient {
    pub fn new(base_url: String, timeout_seconds: u64) -> CsaResult<Self> {
        let timeout = Duration::from_secs(timeout_seconds);
        let cache = Arc::new(
            Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(300))
                .build(),
        );
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CsaError::ExternalServiceError {
                service: "llm".to_string(),
                message: e.to_string(),
            })?;
        Ok(ReqwestLlmClient { http_client, base_url, cache })
    }
}

#[async_trait]
impl LlmClient for ReqwestLlmClient {
    async fn complete(&self, request: LlmRequest) -> CsaResult<Value> {
        let key = request.cache_key();
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| CsaError::ExternalServiceError {
                service: "llm".to_string(),
                message: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| CsaError::ExternalServiceError {
            service: "llm".to_string(),
            message: format!("failed to parse LLM response: {e}"),
        })?;

        let text = body
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("");
        let parsed = parse_llm_reply(text);

        self.cache.insert(key, parsed.clone()).await;
        Ok(parsed)
    }
}
