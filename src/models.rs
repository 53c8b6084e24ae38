//! Core data models used throughout Dossier.
//!
//! These types represent the plans, source references, readings, and stage
//! outputs that flow through the research pipeline, plus the index-side
//! document records.

use serde::{Deserialize, Serialize};

/// A research plan derived from the user's query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub query: String,
    /// 3 to 6 short textual steps.
    pub steps: Vec<String>,
}

/// A ranked reference to a candidate source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A document handed to the retrieval index for ingestion.
///
/// `id` is stable and source-derived (file path, URL, ...) so that
/// re-ingesting the same source upserts rather than duplicates.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
}

/// An image reference extracted from a fetched page. Reserved for future
/// stages; current readings carry an empty list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: String,
    pub alt: String,
}

/// A table extracted from a fetched page. Reserved like [`ImageRef`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A document body surfaced by the reading stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub images: Vec<ImageRef>,
    pub tables: Vec<TableRef>,
}

/// Output of the verification stage: an opaque narrative covering
/// credibility, consensus, conflicts, and risks. No structure is imposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub analysis: String,
}

/// Output of the reflection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionDecision {
    pub need_more: bool,
    /// Defaults to the original query when no refinement was produced.
    pub refined_query: String,
}

/// The final structured brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchBrief {
    #[serde(rename = "Introduction")]
    pub introduction: String,
    #[serde(rename = "Key Findings")]
    pub key_findings: String,
    #[serde(rename = "Risks")]
    pub risks: String,
    #[serde(rename = "Conclusion")]
    pub conclusion: String,
    #[serde(rename = "Sources")]
    pub sources: String,
}

/// Progress event emitted after each pipeline stage.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", content = "data")]
pub enum StageUpdate {
    #[serde(rename = "planning")]
    Planning(Plan),
    #[serde(rename = "searching")]
    Searching(Vec<SourceRef>),
    #[serde(rename = "reading")]
    Reading(Vec<Reading>),
    #[serde(rename = "verifying")]
    Verifying(VerificationReport),
    #[serde(rename = "reflecting")]
    Reflecting(ReflectionDecision),
    #[serde(rename = "brief")]
    Briefing(ResearchBrief),
}

impl StageUpdate {
    /// Stage name as exposed to the serving layer.
    pub fn stage_name(&self) -> &'static str {
        match self {
            StageUpdate::Planning(_) => "planning",
            StageUpdate::Searching(_) => "searching",
            StageUpdate::Reading(_) => "reading",
            StageUpdate::Verifying(_) => "verifying",
            StageUpdate::Reflecting(_) => "reflecting",
            StageUpdate::Briefing(_) => "brief",
        }
    }
}

/// Lowercased registrable host of a URL, with any `www.` prefix dropped.
///
/// Used for host-level deduplication during the adaptive round. Returns an
/// empty string for unparseable input so callers can treat "no host" as its
/// own bucket.
pub fn host_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .map(|h| h.to_lowercase().trim_start_matches("www.").to_string())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_www_and_lowercases() {
        assert_eq!(host_of("https://WWW.Example.com/page"), "example.com");
        assert_eq!(host_of("http://nih.gov/a/b?c=d"), "nih.gov");
    }

    #[test]
    fn host_of_unparseable_is_empty() {
        assert_eq!(host_of("not a url"), "");
        assert_eq!(host_of(""), "");
    }

    #[test]
    fn stage_update_serializes_with_stage_tag() {
        let update = StageUpdate::Verifying(VerificationReport {
            analysis: "ok".to_string(),
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["stage"], "verifying");
        assert_eq!(json["data"]["analysis"], "ok");
    }
}
