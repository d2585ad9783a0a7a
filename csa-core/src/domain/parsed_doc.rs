use serde::{Deserialize, Serialize};

/// Output of the external document-AI OCR/layout parse stage. Opaque to the
/// core except for the fields below (spec.md §3 "ParsedDoc (external input)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDoc {
    pub document_id: String,
    pub parse_id: String,
    pub chunks: Vec<Chunk>,
    pub markdown: String,
    pub page_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub page_index: u32,
    pub bounding_box: BoundingBox,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl ParsedDoc {
    /// Scans `markdown` for a token within `window` characters either side
    /// of `needle`'s start index. Used by the Temporal Agent's step 2
    /// (document-context timezone scan, spec.md §4.4).
    pub fn find_token_near(&self, needle: &str, tokens: &[&str], window: usize) -> Option<String> {
        let haystack = &self.markdown;
        let needle_start = haystack.find(needle)?;
        let start = needle_start.saturating_sub(window);
        let end = (needle_start + needle.len() + window).min(haystack.len());
        let slice = haystack.get(start..end).unwrap_or("");
        tokens
            .iter()
            .find(|t| slice.contains(*t))
            .map(|t| t.to_string())
    }
}
