use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which model tier produced a reasoning step. `RuleBased` covers every
/// step that never calls out to an LLM (spec.md §3 "ReasoningStep").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelUsed {
    Haiku,
    Sonnet,
    RuleBased,
}

/// One entry in an agent's append-only reasoning trace. Each step references
/// its prior inputs by value, never by pointer, so the trace is naturally a
/// flat ordered sequence rather than a graph (spec.md §9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_number: u32,
    pub step_name: String,
    pub input: Value,
    pub output: Value,
    pub model_used: ModelUsed,
    pub reasoning_text: String,
    pub confidence: Option<f64>,
    pub duration_seconds: Option<f64>,
}

/// A correction recorded by a rule-based validation step (e.g. the
/// nearest-match taxonomy fix-up in the Collateral Agent's step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Which of the four reasoning agents produced a given result. The
/// Validation Agent is deliberately not part of this set — it consumes the
/// other agents' outputs and has a different signature entirely (spec.md
/// §9 Design Notes "Polymorphism over agents").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Collateral,
    Temporal,
    Currency,
}

/// The uniform output shape every reasoning agent produces (spec.md §3
/// "AgentResult").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub data: Value,
    pub confidence: f64,
    pub reasoning_chain: Vec<ReasoningStep>,
    pub corrections: Vec<Correction>,
    pub self_corrections_count: u32,
    pub requires_human_review: bool,
    pub human_review_reason: Option<String>,
    pub processing_time_seconds: f64,
    pub error: Option<String>,
}

impl AgentResult {
    /// An agent never lets an internal failure escape `normalize()`; it
    /// reports it here instead (spec.md §4.2, §7 propagation policy).
    pub fn error(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        AgentResult {
            agent_name: agent_name.into(),
            data: Value::Null,
            confidence: 0.0,
            reasoning_chain: Vec::new(),
            corrections: Vec::new(),
            self_corrections_count: 0,
            requires_human_review: true,
            human_review_reason: Some(format!("agent error: {message}")),
            processing_time_seconds: 0.0,
            error: Some(message),
        }
    }
}

/// Per-agent confidence defaults to the mean of per-step confidences where
/// set, else 0.9; `requires_human_review` iff confidence < 0.85 (spec.md
/// §4.2 "Confidence aggregation").
pub fn aggregate_confidence(steps: &[ReasoningStep]) -> f64 {
    let scored: Vec<f64> = steps.iter().filter_map(|s| s.confidence).collect();
    if scored.is_empty() {
        0.9
    } else {
        scored.iter().sum::<f64>() / scored.len() as f64
    }
}

pub fn requires_human_review(confidence: f64) -> bool {
    confidence < 0.85
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(confidence: Option<f64>) -> ReasoningStep {
        ReasoningStep {
            step_number: 1,
            step_name: "s".into(),
            input: Value::Null,
            output: Value::Null,
            model_used: ModelUsed::RuleBased,
            reasoning_text: String::new(),
            confidence,
            duration_seconds: None,
        }
    }

    #[test]
    fn defaults_to_point_nine_when_no_step_scored() {
        let steps = vec![step(None), step(None)];
        assert_eq!(aggregate_confidence(&steps), 0.9);
    }

    #[test]
    fn averages_scored_steps_only() {
        let steps = vec![step(Some(0.8)), step(None), step(Some(1.0))];
        assert!((aggregate_confidence(&steps) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn review_threshold_is_exclusive_at_0_85() {
        assert!(!requires_human_review(0.85));
        assert!(requires_human_review(0.8499));
    }
}
