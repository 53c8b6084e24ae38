//! Reflection stage: decide whether one more retrieval round is warranted.
//!
//! The model is asked for a small JSON object; because model output is
//! unreliable, the stage recognizes a few response shapes (bare JSON, a
//! fenced JSON block, or free text) and maps each to a decision. When no
//! shape matches, a keyword heuristic over the verification analysis decides
//! instead. The stage never fails and the refined query always falls back to
//! the original question.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::generation::GenerationClient;
use crate::models::{host_of, Reading, ReflectionDecision, VerificationReport};

/// Appended to the original query when the heuristic path asks for more
/// authoritative coverage.
const AUTHORITATIVE_SUFFIX: &str = " site:.gov OR site:.edu";

pub struct ReflectionStage {
    generation: Arc<dyn GenerationClient>,
}

/// The JSON object the model is instructed to return.
#[derive(Debug, Deserialize)]
struct RawDecision {
    need_more: Option<bool>,
    refined_query: Option<String>,
}

/// Recognized shapes of a reflection response.
enum ResponseShape {
    BareJson(RawDecision),
    FencedJson(RawDecision),
    Unrecognized,
}

impl ReflectionStage {
    pub fn new(generation: Arc<dyn GenerationClient>) -> Self {
        Self { generation }
    }

    pub async fn reflect(
        &self,
        query: &str,
        report: &VerificationReport,
        readings: &[Reading],
    ) -> ReflectionDecision {
        let prompt = build_prompt(query, &report.analysis, readings);
        let response = self.generation.generate(&prompt).await;

        match classify_response(&response) {
            ResponseShape::BareJson(raw) => decision_from_raw(raw, query),
            ResponseShape::FencedJson(raw) => decision_from_raw(raw, query),
            ResponseShape::Unrecognized => {
                debug!("reflection response not parseable as JSON; using keyword heuristic");
                heuristic_decision(query, &report.analysis)
            }
        }
    }
}

fn build_prompt(query: &str, analysis: &str, readings: &[Reading]) -> String {
    let hosts: BTreeSet<String> = readings
        .iter()
        .filter_map(|r| r.url.as_deref())
        .map(host_of)
        .filter(|h| !h.is_empty())
        .collect();
    let host_list = hosts.into_iter().collect::<Vec<_>>().join(", ");

    format!(
        "You are a research strategist. Given the question, a verification analysis, and the \
         hosts consulted so far, decide whether another retrieval round would materially \
         improve the answer.\n\n\
         Question: {}\n\nVerification analysis:\n{}\n\nHosts consulted: {}\n\n\
         Respond with a JSON object only: \
         {{\"need_more\": true|false, \"refined_query\": \"...\"}}",
        query, analysis, host_list
    )
}

/// Classify a raw response into one of the recognized shapes.
fn classify_response(response: &str) -> ResponseShape {
    let trimmed = response.trim();
    if let Ok(raw) = serde_json::from_str::<RawDecision>(trimmed) {
        return ResponseShape::BareJson(raw);
    }

    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
    if let Some(captures) = fence.captures(trimmed) {
        if let Some(block) = captures.get(1) {
            if let Ok(raw) = serde_json::from_str::<RawDecision>(block.as_str()) {
                return ResponseShape::FencedJson(raw);
            }
        }
    }

    ResponseShape::Unrecognized
}

fn decision_from_raw(raw: RawDecision, query: &str) -> ReflectionDecision {
    let refined = raw
        .refined_query
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| query.to_string());
    ReflectionDecision {
        need_more: raw.need_more.unwrap_or(false),
        refined_query: refined,
    }
}

/// Keyword fallback: the analysis itself usually names its own weaknesses.
fn heuristic_decision(query: &str, analysis: &str) -> ReflectionDecision {
    static CONCERNS: OnceLock<Regex> = OnceLock::new();
    let concerns = CONCERNS
        .get_or_init(|| Regex::new(r"(?i)bias|insufficient|lack of|unreliable").unwrap());

    if concerns.is_match(analysis) {
        ReflectionDecision {
            need_more: true,
            refined_query: format!("{}{}", query, AUTHORITATIVE_SUFFIX),
        }
    } else {
        ReflectionDecision {
            need_more: false,
            refined_query: query.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedClient {
        response: String,
    }

    #[async_trait]
    impl GenerationClient for CannedClient {
        async fn generate(&self, _prompt: &str) -> String {
            self.response.clone()
        }
    }

    fn report(analysis: &str) -> VerificationReport {
        VerificationReport {
            analysis: analysis.to_string(),
        }
    }

    async fn reflect_with(response: &str, analysis: &str) -> ReflectionDecision {
        let stage = ReflectionStage::new(Arc::new(CannedClient {
            response: response.to_string(),
        }));
        stage.reflect("original query", &report(analysis), &[]).await
    }

    #[tokio::test]
    async fn parses_bare_json_decision() {
        let decision =
            reflect_with(r#"{"need_more": true, "refined_query": "narrower query"}"#, "fine")
                .await;
        assert!(decision.need_more);
        assert_eq!(decision.refined_query, "narrower query");
    }

    #[tokio::test]
    async fn parses_fenced_json_decision() {
        let decision = reflect_with(
            "Here is my decision:\n```json\n{\"need_more\": false, \"refined_query\": \"x\"}\n```",
            "fine",
        )
        .await;
        assert!(!decision.need_more);
        assert_eq!(decision.refined_query, "x");
    }

    #[tokio::test]
    async fn empty_refined_query_falls_back_to_original() {
        let decision =
            reflect_with(r#"{"need_more": true, "refined_query": "  "}"#, "fine").await;
        assert!(decision.need_more);
        assert_eq!(decision.refined_query, "original query");
    }

    #[tokio::test]
    async fn unparseable_response_uses_keyword_heuristic() {
        let decision = reflect_with(
            "I think the coverage shows clear bias toward vendor blogs.",
            "sources show bias and lack of primary data",
        )
        .await;
        assert!(decision.need_more);
        assert_eq!(
            decision.refined_query,
            "original query site:.gov OR site:.edu"
        );
    }

    #[tokio::test]
    async fn clean_analysis_means_no_extra_round() {
        let decision = reflect_with("prose without structure", "consistent, credible coverage").await;
        assert!(!decision.need_more);
        assert_eq!(decision.refined_query, "original query");
    }

    #[test]
    fn prompt_lists_deduplicated_reading_hosts() {
        let reading = |url: &str| Reading {
            title: "r".to_string(),
            url: Some(url.to_string()),
            content: "body".to_string(),
            images: Vec::new(),
            tables: Vec::new(),
        };
        let readings = vec![
            reading("https://www.nih.gov/a"),
            reading("https://nih.gov/b"),
            reading("https://who.int/c"),
        ];
        let prompt = build_prompt("q", "analysis", &readings);
        assert!(prompt.contains("nih.gov, who.int"));
    }
}
