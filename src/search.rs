//! Search stage: index-first source discovery with a scrape-and-ingest
//! fallback.
//!
//! The primary path is a similarity query against the retrieval index. Only
//! when that returns nothing does the adapter scrape the search engine,
//! fetch a bounded number of candidate pages, ingest their extracted text,
//! and re-run the index query. Coming up empty after all of that is a valid
//! outcome for the orchestrator, not an error.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::{IngestConfig, RetrievalConfig};
use crate::index::RetrievalIndex;
use crate::models::SourceRef;
use crate::scrape::{fetch_extracted, PageFetcher, ScrapedHit, SearchScraper};

pub struct SearchAdapter {
    index: Arc<RetrievalIndex>,
    scraper: Arc<dyn SearchScraper>,
    fetcher: Arc<dyn PageFetcher>,
    retrieval: RetrievalConfig,
    ingest: IngestConfig,
}

impl SearchAdapter {
    pub fn new(
        index: Arc<RetrievalIndex>,
        scraper: Arc<dyn SearchScraper>,
        fetcher: Arc<dyn PageFetcher>,
        retrieval: RetrievalConfig,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            index,
            scraper,
            fetcher,
            retrieval,
            ingest,
        }
    }

    /// Find candidate sources for a plan's query string.
    pub async fn find_sources(&self, query: &str) -> Result<Vec<SourceRef>> {
        let hits = self.index.query(query, self.retrieval.search_top_k).await;
        if !hits.is_empty() {
            debug!(count = hits.len(), "search served from index");
            return Ok(hits.into_iter().map(entry_to_source).collect());
        }

        // Empty index for this query: scrape, ingest what we can, re-query.
        match self.scrape_and_ingest(query).await {
            Ok(ingested) => {
                info!(ingested, "search fallback ingested scraped pages");
            }
            Err(e) => {
                // Scrape unavailability is a designed-for condition; the
                // stage still succeeds with whatever the index now holds.
                info!(error = %e, "search fallback unavailable");
            }
        }

        let hits = self.index.query(query, self.retrieval.search_top_k).await;
        Ok(hits.into_iter().map(entry_to_source).collect())
    }

    async fn scrape_and_ingest(&self, query: &str) -> Result<usize> {
        let scraped = self.scraper.scrape(query).await?;
        if scraped.is_empty() {
            return Ok(0);
        }

        let candidates: Vec<SourceRef> = scraped.into_iter().map(hit_to_source).collect();
        let docs = fetch_extracted(
            self.fetcher.as_ref(),
            &candidates,
            self.retrieval.max_search_fetch,
            self.retrieval.fetch_concurrency,
            self.ingest.max_content_chars,
        )
        .await;

        let count = docs.len();
        self.index.ingest_batch(docs).await;
        Ok(count)
    }
}

fn entry_to_source(entry: crate::index::ScoredEntry) -> SourceRef {
    SourceRef {
        title: if entry.title.is_empty() {
            entry.url.clone().unwrap_or_else(|| "Document".to_string())
        } else {
            entry.title
        },
        url: entry.url,
        score: Some(entry.score as f64),
    }
}

fn hit_to_source(hit: ScrapedHit) -> SourceRef {
    SourceRef {
        title: hit.title,
        url: Some(hit.url),
        score: None,
    }
}
