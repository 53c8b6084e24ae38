//! Reading stage: semantic lookup of full document bodies.
//!
//! Reading is deliberately realized as a *second* similarity query — the
//! composite of every source's title and url — rather than a literal fetch
//! of the given URLs. The index usually already holds the bodies (the search
//! fallback ingested them), and re-ranking against the composite maximizes
//! recall across everything ingested so far. This is an intentional design
//! choice, not an optimization shortcut.
//!
//! Only when the index yields nothing (and sources exist) does the adapter
//! fetch a bounded subset of the given URLs directly, ingest them, and query
//! again.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::{IngestConfig, RetrievalConfig};
use crate::index::{RetrievalIndex, ScoredEntry};
use crate::models::{Reading, SourceRef};
use crate::scrape::{fetch_extracted, truncate_chars, PageFetcher};

pub struct ReadingAdapter {
    index: Arc<RetrievalIndex>,
    fetcher: Arc<dyn PageFetcher>,
    retrieval: RetrievalConfig,
    ingest: IngestConfig,
}

impl ReadingAdapter {
    pub fn new(
        index: Arc<RetrievalIndex>,
        fetcher: Arc<dyn PageFetcher>,
        retrieval: RetrievalConfig,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            index,
            fetcher,
            retrieval,
            ingest,
        }
    }

    /// Produce readings for the given sources.
    pub async fn read_sources(&self, sources: &[SourceRef]) -> Result<Vec<Reading>> {
        let composite = composite_query(sources);

        let mut hits = self
            .index
            .query(&composite, self.retrieval.read_top_k)
            .await;

        if hits.is_empty() && !sources.is_empty() {
            debug!(
                urls = sources.len(),
                "index empty for composite query; fetching sources directly"
            );
            let docs = fetch_extracted(
                self.fetcher.as_ref(),
                sources,
                self.retrieval.max_read_fetch,
                self.retrieval.fetch_concurrency,
                self.ingest.max_content_chars,
            )
            .await;
            if !docs.is_empty() {
                self.index.ingest_batch(docs).await;
                hits = self
                    .index
                    .query(&composite, self.retrieval.read_top_k)
                    .await;
            }
        }

        Ok(hits
            .into_iter()
            .map(|entry| entry_to_reading(entry, self.retrieval.max_reading_chars))
            .collect())
    }
}

/// Concatenate each source's title and url into one recall-oriented query.
fn composite_query(sources: &[SourceRef]) -> String {
    sources
        .iter()
        .map(|s| format!("{} {}", s.title, s.url.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn entry_to_reading(entry: ScoredEntry, max_chars: usize) -> Reading {
    Reading {
        title: entry.title,
        url: entry.url,
        content: truncate_chars(&entry.content, max_chars),
        // Reserved for future media-aware stages.
        images: Vec::new(),
        tables: Vec::new(),
    }
}
