//! Brief compilation: the final generation pass plus section carving.
//!
//! The model is asked for four named sections. Model output is freeform, so
//! instead of trusting the layout the compiler locates each section heading
//! in the response and slices the text between consecutive headings. A
//! response with no recognizable headings still yields a brief: the
//! introduction falls back to the response's opening characters. The sources
//! section never comes from the model at all; it is assembled verbatim from
//! the readings.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::generation::GenerationClient;
use crate::models::{Plan, Reading, ResearchBrief, VerificationReport};
use crate::scrape::truncate_chars;

const SECTION_NAMES: [&str; 4] = ["Introduction", "Key Findings", "Risks", "Conclusion"];

/// Opening-text fallback length when no `Introduction` heading is found.
const INTRO_FALLBACK_CHARS: usize = 400;

/// Per-reading excerpt cap inside the brief prompt.
const EXCERPT_CHARS: usize = 800;

pub struct BriefCompiler {
    generation: Arc<dyn GenerationClient>,
}

impl BriefCompiler {
    pub fn new(generation: Arc<dyn GenerationClient>) -> Self {
        Self { generation }
    }

    pub async fn compile(
        &self,
        plan: &Plan,
        readings: &[Reading],
        report: &VerificationReport,
    ) -> ResearchBrief {
        let sources = format_sources(readings);
        let prompt = build_prompt(plan, readings, report);
        let response = self.generation.generate(&prompt).await;
        carve_brief(&response, sources)
    }
}

/// One line per reading that carries both a title and a url.
fn format_sources(readings: &[Reading]) -> String {
    readings
        .iter()
        .filter_map(|r| {
            let url = r.url.as_deref()?;
            if r.title.trim().is_empty() {
                return None;
            }
            Some(format!("- {} ({})", r.title, url))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(plan: &Plan, readings: &[Reading], report: &VerificationReport) -> String {
    let excerpts = readings
        .iter()
        .filter(|r| !r.content.trim().is_empty())
        .map(|r| {
            format!(
                "Source: {}\nExcerpt: {}",
                r.title,
                truncate_chars(&r.content, EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a research writer. Compose a structured brief answering the question, using \
         only the source excerpts and the verification analysis below.\n\n\
         Question: {}\n\nPlan steps:\n{}\n\nSource excerpts:\n{}\n\n\
         Verification analysis:\n{}\n\n\
         Write exactly these sections, each starting with its name on its own line: \
         Introduction, Key Findings, Risks, Conclusion.",
        plan.query,
        plan.steps
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n"),
        excerpts,
        report.analysis
    )
}

/// Carve the generated response into the brief's named sections.
fn carve_brief(response: &str, sources: String) -> ResearchBrief {
    let sections = extract_sections(response);
    let [introduction, key_findings, risks, conclusion] = sections;

    let introduction = if introduction.is_empty() {
        debug!("no Introduction heading in response; using opening text");
        truncate_chars(response.trim(), INTRO_FALLBACK_CHARS)
    } else {
        introduction
    };

    ResearchBrief {
        introduction,
        key_findings,
        risks,
        conclusion,
        sources,
    }
}

/// Locate each known heading in `text` and return the content between it and
/// the next heading, in `SECTION_NAMES` order. Missing headings yield empty
/// strings.
fn extract_sections(text: &str) -> [String; 4] {
    // (byte offset of heading start, byte offset of content start, slot)
    let mut found: Vec<(usize, usize, usize)> = Vec::new();
    for (slot, heading) in heading_regexes().iter().enumerate() {
        if let Some(m) = heading.find(text) {
            found.push((m.start(), m.end(), slot));
        }
    }
    found.sort_by_key(|&(start, _, _)| start);

    let mut sections: [String; 4] = Default::default();
    for (i, &(_, content_start, slot)) in found.iter().enumerate() {
        let end = found
            .get(i + 1)
            .map(|&(next_start, _, _)| next_start)
            .unwrap_or(text.len());
        sections[slot] = clean_section(&text[content_start..end]);
    }
    sections
}

/// One compiled matcher per section name: the heading must sit at a line
/// start, optionally prefixed with markdown decoration (`#`, `*`, list
/// markers), optionally followed by a colon.
fn heading_regexes() -> &'static [Regex; 4] {
    static HEADINGS: OnceLock<[Regex; 4]> = OnceLock::new();
    HEADINGS.get_or_init(|| {
        SECTION_NAMES.map(|name| {
            Regex::new(&format!(r"(?im)^[ \t#*\-\d.]*{}", regex::escape(name)))
                .expect("section heading pattern is valid")
        })
    })
}

fn clean_section(raw: &str) -> String {
    raw.trim_start_matches([':', '*', '#'])
        .trim()
        .trim_end_matches(['*', '#'])
        .trim()
        .to_string()
}
