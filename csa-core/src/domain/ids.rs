use chrono::{DateTime, Utc};

/// Builds a chained artifact id of the form `<prefix>_<parent_id>_<utc_timestamp>`.
///
/// Ids are the sole cross-stage reference: `extract_<parse_id>_<ts>` embeds
/// its parent parse id, `csa_terms_<document_id>` is keyed on the document
/// directly. This helper only handles the timestamped chained form; callers
/// that key on a stable parent id (no timestamp) build the string directly.
pub fn chained_id(prefix: &str, parent_id: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}_{parent_id}_{}", at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// `csa_terms_<document_id>` — keyed on the document, not timestamped,
/// since a document has at most one canonical CSATerms per normalization run.
pub fn csa_terms_id(document_id: &str) -> String {
    format!("csa_terms_{document_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chained_id_embeds_parent() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let id = chained_id("extract", "parse_doc123_20260102T030405.000Z", ts);
        assert!(id.starts_with("extract_parse_doc123_"));
    }

    #[test]
    fn csa_terms_id_is_keyed_on_document() {
        assert_eq!(csa_terms_id("doc123"), "csa_terms_doc123");
    }
}
