//! Pipeline orchestrator: the staged research run.
//!
//! A run moves through planning, searching, reading, verifying, reflecting,
//! and briefing, emitting a [`StageUpdate`] on an mpsc channel after each
//! stage. When reflection asks for more coverage the orchestrator performs
//! exactly one adaptive round: it re-searches with the refined query, keeps
//! only sources from hosts it has not consulted yet, and reads those before
//! compiling the brief. Reflection is never re-invoked.
//!
//! Concurrent runs are independent; they share only the retrieval index.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::brief::BriefCompiler;
use crate::config::Config;
use crate::generation::{create_client, GenerationClient};
use crate::index::RetrievalIndex;
use crate::models::{host_of, Plan, Reading, ResearchBrief, SourceRef, StageUpdate};
use crate::read::ReadingAdapter;
use crate::reflect::ReflectionStage;
use crate::scrape::{DuckDuckGoScraper, HttpFetcher, PageFetcher, SearchScraper};
use crate::search::SearchAdapter;
use crate::verify::VerificationStage;

const MAX_PLAN_STEPS: usize = 6;
const MIN_PLAN_STEPS: usize = 3;

/// Steps padded in when the model plans too thin.
const GENERIC_STEPS: [&str; 3] = [
    "Identify the key concepts and sub-questions",
    "Collect and read the most relevant sources",
    "Summarize the evidence and note open risks",
];

pub struct Pipeline {
    generation: Arc<dyn GenerationClient>,
    search: SearchAdapter,
    reading: ReadingAdapter,
    verification: VerificationStage,
    reflection: ReflectionStage,
    brief: BriefCompiler,
}

impl Pipeline {
    /// Wire up a pipeline from configuration, sharing `index` with the
    /// ingestion side.
    pub fn from_config(config: &Config, index: Arc<RetrievalIndex>) -> Self {
        let generation = create_client(&config.generation);
        let scraper: Arc<dyn SearchScraper> = Arc::new(DuckDuckGoScraper::new(
            config.retrieval.fetch_timeout_secs,
            config.retrieval.search_top_k,
        ));
        let fetcher: Arc<dyn PageFetcher> =
            Arc::new(HttpFetcher::new(config.retrieval.fetch_timeout_secs));

        let search = SearchAdapter::new(
            index.clone(),
            scraper,
            fetcher.clone(),
            config.retrieval.clone(),
            config.ingest.clone(),
        );
        let reading = ReadingAdapter::new(
            index,
            fetcher,
            config.retrieval.clone(),
            config.ingest.clone(),
        );
        Self::new(generation, search, reading)
    }

    pub fn new(
        generation: Arc<dyn GenerationClient>,
        search: SearchAdapter,
        reading: ReadingAdapter,
    ) -> Self {
        Self {
            search,
            reading,
            verification: VerificationStage::new(generation.clone()),
            reflection: ReflectionStage::new(generation.clone()),
            brief: BriefCompiler::new(generation.clone()),
            generation,
        }
    }

    /// Run the full pipeline, emitting a [`StageUpdate`] after each stage.
    ///
    /// A dropped receiver does not abort the run; the caller simply stops
    /// observing progress. Any stage error ends the run with that error while
    /// already-delivered updates stay with the consumer.
    pub async fn run_streaming(
        &self,
        query: &str,
        tx: mpsc::Sender<StageUpdate>,
    ) -> Result<ResearchBrief> {
        info!(%query, "research run started");

        let plan = self.plan(query).await;
        emit(&tx, StageUpdate::Planning(plan.clone())).await;

        let mut sources = self.search.find_sources(query).await?;
        emit(&tx, StageUpdate::Searching(sources.clone())).await;

        let mut readings = self.reading.read_sources(&sources).await?;
        emit(&tx, StageUpdate::Reading(readings.clone())).await;

        let report = self.verification.verify(query, &readings).await;
        emit(&tx, StageUpdate::Verifying(report.clone())).await;

        let decision = self.reflection.reflect(query, &report, &readings).await;
        emit(&tx, StageUpdate::Reflecting(decision.clone())).await;

        if decision.need_more {
            let fresh = self
                .adaptive_round(&decision.refined_query, &sources)
                .await?;
            if let Some((new_sources, new_readings)) = fresh {
                sources.extend(new_sources);
                emit(&tx, StageUpdate::Searching(sources.clone())).await;
                readings.extend(new_readings);
                emit(&tx, StageUpdate::Reading(readings.clone())).await;
            }
        }

        let brief = self.brief.compile(&plan, &readings, &report).await;
        emit(&tx, StageUpdate::Briefing(brief.clone())).await;

        info!(%query, sources = sources.len(), "research run completed");
        Ok(brief)
    }

    /// Run to completion, returning every stage update alongside the brief.
    pub async fn run_collect(&self, query: &str) -> Result<(Vec<StageUpdate>, ResearchBrief)> {
        let (tx, mut rx) = mpsc::channel(16);
        let run = self.run_streaming(query, tx);

        // Drain concurrently so a small channel never stalls the run.
        let (outcome, updates) = tokio::join!(run, async move {
            let mut updates = Vec::new();
            while let Some(update) = rx.recv().await {
                updates.push(update);
            }
            updates
        });

        Ok((updates, outcome?))
    }

    /// Ask the generation capability for a plan and normalize it to 3..=6
    /// steps.
    async fn plan(&self, query: &str) -> Plan {
        let prompt = format!(
            "You are a research planner. Break the question into 3 to 6 short, concrete \
             research steps, one per line.\n\nQuestion: {}",
            query
        );
        let response = self.generation.generate(&prompt).await;
        Plan {
            query: query.to_string(),
            steps: normalize_steps(&response),
        }
    }

    /// The single adaptive round: search the refined query and keep only
    /// sources from hosts not consulted in the first round. Returns `None`
    /// when every refined hit duplicates an already-seen host.
    async fn adaptive_round(
        &self,
        refined_query: &str,
        seen: &[SourceRef],
    ) -> Result<Option<(Vec<SourceRef>, Vec<Reading>)>> {
        let seen_hosts: HashSet<String> = seen
            .iter()
            .filter_map(|s| s.url.as_deref())
            .map(host_of)
            .collect();

        let refined = self.search.find_sources(refined_query).await?;
        let new_sources: Vec<SourceRef> = refined
            .into_iter()
            .filter(|s| match s.url.as_deref() {
                Some(url) => !seen_hosts.contains(&host_of(url)),
                None => false,
            })
            .collect();

        if new_sources.is_empty() {
            debug!("adaptive round found no unseen hosts; skipping");
            return Ok(None);
        }

        info!(count = new_sources.len(), "adaptive round reading new hosts");
        let new_readings = self.reading.read_sources(&new_sources).await?;
        Ok(Some((new_sources, new_readings)))
    }
}

async fn emit(tx: &mpsc::Sender<StageUpdate>, update: StageUpdate) {
    // A closed channel only means nobody is watching anymore.
    let _ = tx.send(update).await;
}

/// Split a planning response into clean steps: strip bullet markers and
/// numbering, drop blanks, cap at 6, pad with generic steps up to 3.
fn normalize_steps(response: &str) -> Vec<String> {
    let mut steps: Vec<String> = response
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '•', '*'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_PLAN_STEPS)
        .collect();

    let mut generics = GENERIC_STEPS.iter();
    while steps.len() < MIN_PLAN_STEPS {
        match generics.next() {
            Some(step) => steps.push((*step).to_string()),
            None => break,
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_bullets_and_numbering() {
        let steps = normalize_steps("- first step\n2. second step\n• third step\n* fourth");
        assert_eq!(
            steps,
            vec!["first step", "second step", "third step", "fourth"]
        );
    }

    #[test]
    fn normalize_caps_at_six() {
        let response = (1..=10)
            .map(|i| format!("step {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(normalize_steps(&response).len(), 6);
    }

    #[test]
    fn normalize_pads_thin_plans_to_three() {
        let steps = normalize_steps("only one step");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], "only one step");
        assert_eq!(steps[1], GENERIC_STEPS[0]);
    }

    #[test]
    fn normalize_empty_response_yields_all_generic_steps() {
        let steps = normalize_steps("\n   \n");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2], GENERIC_STEPS[2]);
    }
}
