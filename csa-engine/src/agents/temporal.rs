use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use csa_core::domain::agent::{aggregate_confidence, requires_human_review, AgentResult, ModelUsed, ReasoningStep};
use csa_core::domain::parsed_doc::ParsedDoc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;

use super::base::{LlmClient, LlmRequest};

const TIMEZONE_TOKENS: &[&str] = &[
    "EST", "EDT", "ET", "New York time", "GMT", "BST", "London time", "JST", "Tokyo time", "HKT",
];

/// Fixed hint -> IANA name table (spec.md §4.4 step 3). `chrono-tz` is
/// deliberately not pulled in just to type the result; the IANA names are
/// stored as validated strings against this table.
const TIMEZONE_TABLE: &[(&str, &str)] = &[
    ("new york time", "America/New_York"),
    ("new york", "America/New_York"),
    ("ny time", "America/New_York"),
    ("est", "America/New_York"),
    ("et", "America/New_York"),
    ("eastern", "America/New_York"),
    ("edt", "America/New_York"),
    ("london time", "Europe/London"),
    ("london", "Europe/London"),
    ("gmt", "Europe/London"),
    ("bst", "Europe/London"),
    ("greenwich", "Europe/London"),
    ("tokyo time", "Asia/Tokyo"),
    ("tokyo", "Asia/Tokyo"),
    ("jst", "Asia/Tokyo"),
    ("hong kong time", "Asia/Hong_Kong"),
    ("hong kong", "Asia/Hong_Kong"),
    ("hkt", "Asia/Hong_Kong"),
];

/// `{notification_time, valuation_time, agreement_date, signature_date}`
/// routed by the Normalization Orchestrator (spec.md §4.7 step 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalFieldInput {
    pub notification_time: Option<String>,
    pub valuation_time: Option<String>,
    pub agreement_date: Option<String>,
    pub signature_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedTime {
    pub time_24h: Option<String>,
    pub timezone_iana: Option<String>,
    pub is_qualitative: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDateField {
    pub date: Option<NaiveDate>,
    pub confidence: f64,
}

/// 4-step reasoning over time/date fields (spec.md §4.4).
#[derive(Clone)]
pub struct TemporalAgent {
    llm: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
}

impl TemporalAgent {
    pub fn new(llm: Arc<dyn LlmClient>, semaphore: Arc<Semaphore>) -> Self {
        TemporalAgent { llm, semaphore }
    }

    pub async fn normalize(&self, input: TemporalFieldInput, document: Option<&ParsedDoc>) -> AgentResult {
        let start = Instant::now();
        let mut reasoning_chain = Vec::new();
        let mut context_accessed = false;
        let mut fields = serde_json::Map::new();

        for (name, raw) in [
            ("notification_time", &input.notification_time),
            ("valuation_time", &input.valuation_time),
        ] {
            if let Some(raw) = raw {
                let (normalized, steps, accessed) =
                    self.normalize_time_field(name, raw, document).await;
                context_accessed = context_accessed || accessed;
                reasoning_chain.extend(steps);
                fields.insert(name.to_string(), serde_json::to_value(normalized).unwrap());
            }
        }

        for (name, raw) in [
            ("agreement_date", &input.agreement_date),
            ("signature_date", &input.signature_date),
        ] {
            if let Some(raw) = raw {
                let (normalized, step) = normalize_date_field(name, raw);
                reasoning_chain.push(step);
                fields.insert(name.to_string(), serde_json::to_value(normalized).unwrap());
            }
        }

        let confidence = aggregate_confidence(&reasoning_chain);
        let needs_review = requires_human_review(confidence);

        AgentResult {
            agent_name: "TemporalAgent".to_string(),
            data: serde_json::Value::Object(fields),
            confidence,
            reasoning_chain,
            corrections: Vec::new(),
            self_corrections_count: 0,
            requires_human_review: needs_review,
            human_review_reason: needs_review.then(|| "low-confidence timezone resolution".to_string()),
            processing_time_seconds: start.elapsed().as_secs_f64(),
            error: None,
        }
    }

    async fn normalize_time_field(
        &self,
        field_name: &str,
        raw_value: &str,
        document: Option<&ParsedDoc>,
    ) -> (NormalizedTime, Vec<ReasoningStep>, bool) {
        let mut steps = Vec::new();

        // Step 1: Parse Format. The regex path covers explicit/qualitative
        // phrasing directly; free-form prose falls back to the fast model.
        let (mut time_24h, mut explicit_hint, mut is_qualitative) = parse_time_format(raw_value);
        let mut step_one_model = ModelUsed::RuleBased;
        if time_24h.is_none() {
            let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
            let prompt = format!(
                "Extract the time of day, any timezone hint, and whether the phrasing is \
                 qualitative from: \"{raw_value}\". Reply as JSON with keys time_24h, \
                 timezone_hint, is_qualitative."
            );
            if let Ok(response) = self.llm.complete(LlmRequest::new("haiku", prompt)).await {
                time_24h = response.get("time_24h").and_then(|v| v.as_str()).map(|s| s.to_string());
                explicit_hint = response
                    .get("timezone_hint")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .or(explicit_hint);
                is_qualitative = response.get("is_qualitative").and_then(|v| v.as_bool()).unwrap_or(false);
                step_one_model = ModelUsed::Haiku;
            }
        }
        steps.push(ReasoningStep {
            step_number: 1,
            step_name: "parse_format".to_string(),
            input: json!({ "field": field_name, "raw_value": raw_value }),
            output: json!({ "time_24h": time_24h, "timezone_hint": explicit_hint, "is_qualitative": is_qualitative }),
            model_used: step_one_model,
            reasoning_text: "parsed explicit or qualitative time phrase".to_string(),
            confidence: Some(0.95),
            duration_seconds: None,
        });

        // Step 2: Access Document Context (conditional on no explicit hint).
        let mut hint = explicit_hint;
        let mut context_accessed = false;
        if hint.is_none() {
            if let Some(doc) = document {
                let needle: String = raw_value.chars().take(5).collect();
                if let Some(found) = doc.find_token_near(&needle, TIMEZONE_TOKENS, 100) {
                    context_accessed = true;
                    steps.push(ReasoningStep {
                        step_number: 2,
                        step_name: "access_document_context".to_string(),
                        input: json!({ "field": field_name, "needle": needle }),
                        output: json!({ "found_token": found }),
                        model_used: ModelUsed::RuleBased,
                        reasoning_text: "scanned document markdown within +/-100 chars for a timezone token".to_string(),
                        confidence: Some(0.9),
                        duration_seconds: None,
                    });
                    hint = Some(found);
                }
            }
        }

        // Step 3: Infer Timezone.
        let (iana, tz_confidence) = match &hint {
            Some(h) if context_accessed => (lookup_timezone(h), 0.90),
            Some(h) => (lookup_timezone(h), 0.95),
            None => (None, 0.50),
        };
        steps.push(ReasoningStep {
            step_number: 3,
            step_name: "infer_timezone".to_string(),
            input: json!({ "hint": hint }),
            output: json!({ "timezone_iana": iana }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "mapped the timezone hint to an IANA name via the fixed table".to_string(),
            confidence: Some(tz_confidence),
            duration_seconds: None,
        });

        // Step 4: Validate & Flag.
        let range_ok = time_24h
            .as_ref()
            .and_then(|t| parse_hh_mm(t))
            .map(|(h, m)| h <= 23 && m <= 59)
            .unwrap_or(false);
        let requires_review = iana.is_none();
        steps.push(ReasoningStep {
            step_number: 4,
            step_name: "validate_and_flag".to_string(),
            input: json!({ "time_24h": time_24h }),
            output: json!({ "range_ok": range_ok, "requires_human_review": requires_review }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "range-checked HH/MM and flagged unresolved timezones".to_string(),
            confidence: Some(if range_ok { 0.95 } else { 0.5 }),
            duration_seconds: None,
        });

        (
            NormalizedTime { time_24h, timezone_iana: iana, is_qualitative, confidence: tz_confidence },
            steps,
            context_accessed,
        )
    }
}

/// Qualitative phrase table from spec.md §4.4 step 1.
fn parse_time_format(raw_value: &str) -> (Option<String>, Option<String>, bool) {
    let lower = raw_value.to_lowercase();
    let qualitative: &[(&str, &str)] = &[
        ("close of business", "17:00"),
        ("end of day", "23:59"),
        ("start of day", "00:00"),
        ("market close", "16:00"),
    ];
    if let Some((_, time)) = qualitative.iter().find(|(phrase, _)| lower.contains(phrase)) {
        let hint = explicit_timezone_hint(raw_value);
        return (Some(time.to_string()), hint, true);
    }

    let time_re = Regex::new(r"(\d{1,2}):(\d{2})\s*(am|pm)?").expect("valid regex");
    if let Some(caps) = time_re.captures(&lower) {
        let mut hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps[2].parse().unwrap_or(0);
        if let Some(meridiem) = caps.get(3) {
            if meridiem.as_str() == "pm" && hour < 12 {
                hour += 12;
            } else if meridiem.as_str() == "am" && hour == 12 {
                hour = 0;
            }
        }
        let hint = explicit_timezone_hint(raw_value);
        return (Some(format!("{hour:02}:{minute:02}")), hint, false);
    }

    (None, explicit_timezone_hint(raw_value), false)
}

fn explicit_timezone_hint(raw_value: &str) -> Option<String> {
    let lower = raw_value.to_lowercase();
    TIMEZONE_TABLE
        .iter()
        .find(|(hint, _)| lower.contains(hint))
        .map(|(hint, _)| hint.to_string())
}

fn lookup_timezone(hint: &str) -> Option<String> {
    let lower = hint.to_lowercase();
    TIMEZONE_TABLE
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, iana)| iana.to_string())
}

fn parse_hh_mm(time_24h: &str) -> Option<(u32, u32)> {
    let (h, m) = time_24h.split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}

/// Lenient date parsing with a fixed confidence outcome (spec.md §4.4
/// "Date fields ... kept as-is").
fn normalize_date_field(field_name: &str, raw_value: &str) -> (NormalizedDateField, ReasoningStep) {
    let formats = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%d %B %Y"];
    let parsed = formats.iter().find_map(|fmt| NaiveDate::parse_from_str(raw_value, fmt).ok());
    let confidence = if parsed.is_some() { 0.95 } else { 0.50 };
    let step = ReasoningStep {
        step_number: 1,
        step_name: "parse_date".to_string(),
        input: json!({ "field": field_name, "raw_value": raw_value }),
        output: json!({ "date": parsed }),
        model_used: ModelUsed::RuleBased,
        reasoning_text: "lenient multi-format date parse".to_string(),
        confidence: Some(confidence),
        duration_seconds: None,
    };
    (NormalizedDateField { date: parsed, confidence }, step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualitative_close_of_business_maps_to_17_00() {
        let (time, _, is_qual) = parse_time_format("Close of Business");
        assert_eq!(time, Some("17:00".to_string()));
        assert!(is_qual);
    }

    #[test]
    fn explicit_24h_time_parses_directly() {
        let (time, _, is_qual) = parse_time_format("14:30 EST");
        assert_eq!(time, Some("14:30".to_string()));
        assert!(!is_qual);
    }

    #[test]
    fn twelve_hour_pm_converts_to_24h() {
        let (time, _, _) = parse_time_format("2:30 PM London time");
        assert_eq!(time, Some("14:30".to_string()));
    }

    #[test]
    fn explicit_hint_maps_est_to_new_york() {
        assert_eq!(lookup_timezone("EST"), Some("America/New_York".to_string()));
    }

    #[test]
    fn date_field_parses_iso_format() {
        let (normalized, _) = normalize_date_field("agreement_date", "2024-03-15");
        assert_eq!(normalized.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(normalized.confidence, 0.95);
    }

    #[test]
    fn unparseable_date_falls_back_to_low_confidence() {
        let (normalized, _) = normalize_date_field("agreement_date", "not a date");
        assert!(normalized.date.is_none());
        assert_eq!(normalized.confidence, 0.50);
    }
}
