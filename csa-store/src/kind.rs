use serde::{Deserialize, Serialize};

/// The flat-directory layout of spec.md §6 "Artifact persistence layout".
/// `Pdf` is the one kind whose payload is raw bytes rather than JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Pdf,
    Parsed,
    Extraction,
    NormalizedMultiagent,
    CsaTerms,
    Calculation,
    Explanation,
    GeneratedScript,
    FormulaPattern,
    Job,
}

impl ArtifactKind {
    pub fn directory_name(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdfs",
            ArtifactKind::Parsed => "parsed",
            ArtifactKind::Extraction => "extractions",
            ArtifactKind::NormalizedMultiagent => "normalized_multiagent",
            ArtifactKind::CsaTerms => "csa_terms",
            ArtifactKind::Calculation => "calculations",
            ArtifactKind::Explanation => "explanations",
            ArtifactKind::GeneratedScript => "generated_scripts",
            ArtifactKind::FormulaPattern => "formula_patterns",
            ArtifactKind::Job => "jobs",
        }
    }
}
