//! Verification stage: model-assisted credibility assessment.
//!
//! Builds a single prompt from the research question and bounded excerpts of
//! every reading that has content, then asks the generation capability for a
//! freeform assessment covering Credibility, Consensus, Conflicts, and
//! Risks. The raw response is kept as opaque `analysis` text; no structural
//! parsing happens here.

use std::sync::Arc;

use crate::generation::GenerationClient;
use crate::models::{Reading, VerificationReport};
use crate::scrape::truncate_chars;

/// Per-source excerpt cap inside the verification prompt.
const EXCERPT_CHARS: usize = 800;

pub struct VerificationStage {
    generation: Arc<dyn GenerationClient>,
}

impl VerificationStage {
    pub fn new(generation: Arc<dyn GenerationClient>) -> Self {
        Self { generation }
    }

    pub async fn verify(&self, query: &str, readings: &[Reading]) -> VerificationReport {
        let prompt = build_prompt(query, readings);
        let analysis = self.generation.generate(&prompt).await;
        VerificationReport { analysis }
    }
}

fn build_prompt(query: &str, readings: &[Reading]) -> String {
    let excerpts = readings
        .iter()
        .filter(|r| !r.content.trim().is_empty())
        .map(|r| {
            format!(
                "Source: {}\nURL: {}\nExcerpt: {}",
                r.title,
                r.url.as_deref().unwrap_or(""),
                truncate_chars(&r.content, EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a fact-checking assistant. Given the research question and excerpts from \
         sources, assess credibility, consensus, and risks. Provide concise bullets.\n\n\
         Research Question: {}\n\nSources:\n{}\n\n\
         Return sections: Credibility, Consensus, Conflicts, Risks.",
        query, excerpts
    )
}
