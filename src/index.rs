//! The retrieval index: a concurrent, embedding-backed document store.
//!
//! The index holds the **mirror** — the in-memory authoritative snapshot of
//! every ingested document and its embedding — behind a single
//! `std::sync::Mutex`. Both `ingest` and `query` serialize through that lock,
//! so each operation is atomic: a reader sees either the old entry or the
//! fully updated one, never a half-written state. Operation cost is dominated
//! by the embedding call (performed outside the lock), not by the lock-held
//! scan, so one coarse lock is deliberate.
//!
//! Queries are a brute-force cosine-similarity scan over all entries, O(n) in
//! the entry count. Entry counts are bounded by a run's own ingestion volume,
//! so correctness and determinism win over indexing sophistication here.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::DocumentInput;

/// One stored document inside the mirror.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub embedding: Vec<f32>,
    /// Insertion sequence, assigned on first ingest and kept across upserts.
    /// Used as the stable tie-break for equal similarity scores.
    seq: u64,
}

/// A query hit: an entry plus its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub score: f32,
}

#[derive(Default)]
struct Mirror {
    entries: HashMap<String, IndexEntry>,
    next_seq: u64,
}

/// Concurrent embedding-backed document store.
///
/// Created once at service start and shared by reference into the search,
/// reading, and ingestion components; it is the only cross-run shared
/// mutable state.
pub struct RetrievalIndex {
    mirror: Mutex<Mirror>,
    embedder: Embedder,
}

impl RetrievalIndex {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            mirror: Mutex::new(Mirror::default()),
            embedder,
        }
    }

    /// Insert or update a document by id (last-write-wins).
    ///
    /// Re-ingesting an existing id refreshes content and embedding in place;
    /// it never creates a duplicate entry. Safe to call concurrently with
    /// [`query`](Self::query).
    pub async fn ingest(&self, doc: DocumentInput) {
        let embedding = self.embedder.embed_one(&doc.content).await;
        self.upsert(doc, embedding);
    }

    /// Ingest several documents with one batched embedding call.
    ///
    /// Documents with blank content are skipped.
    pub async fn ingest_batch(&self, docs: Vec<DocumentInput>) {
        let docs: Vec<DocumentInput> = docs
            .into_iter()
            .filter(|d| !d.content.trim().is_empty())
            .collect();
        if docs.is_empty() {
            return;
        }

        let contents: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed(&contents).await;

        for (doc, embedding) in docs.into_iter().zip(embeddings.into_iter()) {
            self.upsert(doc, embedding);
        }
    }

    fn upsert(&self, doc: DocumentInput, embedding: Vec<f32>) {
        let mut mirror = self.mirror.lock().expect("index mirror poisoned");
        match mirror.entries.get_mut(&doc.id) {
            Some(entry) => {
                entry.title = doc.title;
                entry.url = doc.url;
                entry.content = doc.content;
                entry.embedding = embedding;
            }
            None => {
                let seq = mirror.next_seq;
                mirror.next_seq += 1;
                debug!(id = %doc.id, seq, "index: new entry");
                mirror.entries.insert(
                    doc.id.clone(),
                    IndexEntry {
                        id: doc.id,
                        title: doc.title,
                        url: doc.url,
                        content: doc.content,
                        embedding,
                        seq,
                    },
                );
            }
        }
    }

    /// Score every stored entry against `text` and return the top `k`.
    ///
    /// Results are sorted by descending cosine similarity; ties resolve by
    /// insertion order (first-ingested wins), keeping repeated queries
    /// deterministic. An empty index returns an empty Vec, not an error.
    pub async fn query(&self, text: &str, k: usize) -> Vec<ScoredEntry> {
        if k == 0 {
            return Vec::new();
        }

        let query_vec = self.embedder.embed_one(text).await;

        let mut scored: Vec<(f32, u64, ScoredEntry)> = {
            let mirror = self.mirror.lock().expect("index mirror poisoned");
            mirror
                .entries
                .values()
                .map(|entry| {
                    let score = cosine_similarity(&query_vec, &entry.embedding);
                    (
                        score,
                        entry.seq,
                        ScoredEntry {
                            id: entry.id.clone(),
                            title: entry.title.clone(),
                            url: entry.url.clone(),
                            content: entry.content.clone(),
                            score,
                        },
                    )
                })
                .collect()
        };

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        scored.into_iter().map(|(_, _, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.mirror.lock().expect("index mirror poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    fn test_index() -> RetrievalIndex {
        RetrievalIndex::new(Embedder::new(&EmbeddingConfig::default()))
    }

    fn doc(id: &str, content: &str) -> DocumentInput {
        DocumentInput {
            id: id.to_string(),
            title: format!("title-{}", id),
            url: Some(format!("https://example.com/{}", id)),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_index_returns_empty_not_error() {
        let index = test_index();
        assert!(index.query("anything", 5).await.is_empty());
    }

    #[tokio::test]
    async fn ingest_is_idempotent_by_id() {
        let index = test_index();
        index.ingest(doc("x", "first version")).await;
        index.ingest(doc("x", "second version")).await;

        assert_eq!(index.len(), 1);
        let hits = index.query("second version", 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "second version");
    }

    #[tokio::test]
    async fn identical_content_ties_break_by_insertion_order() {
        let index = test_index();
        index.ingest(doc("a", "identical body")).await;
        index.ingest(doc("b", "identical body")).await;
        index.ingest(doc("c", "identical body")).await;

        let hits = index.query("identical body", 10).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((hits[0].score - hits[1].score).abs() < 1e-6);
        assert!((hits[1].score - hits[2].score).abs() < 1e-6);
    }

    #[tokio::test]
    async fn repeated_queries_are_deterministic() {
        let index = test_index();
        index.ingest(doc("one", "rust async runtimes")).await;
        index.ingest(doc("two", "sleep and caffeine")).await;
        index.ingest(doc("three", "espresso metabolism")).await;

        let first: Vec<String> = index
            .query("caffeine", 3)
            .await
            .into_iter()
            .map(|h| h.id)
            .collect();
        for _ in 0..5 {
            let again: Vec<String> = index
                .query("caffeine", 3)
                .await
                .into_iter()
                .map(|h| h.id)
                .collect();
            assert_eq!(first, again);
        }
    }

    #[tokio::test]
    async fn upsert_keeps_original_sequence() {
        let index = test_index();
        index.ingest(doc("a", "same text")).await;
        index.ingest(doc("b", "same text")).await;
        // Refresh "a" after "b" was added; "a" still wins the tie.
        index.ingest(doc("a", "same text")).await;

        let hits = index.query("same text", 2).await;
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
    }

    #[tokio::test]
    async fn batch_ingest_skips_blank_content() {
        let index = test_index();
        index
            .ingest_batch(vec![doc("a", "real content"), doc("b", "   ")])
            .await;
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn truncates_to_k() {
        let index = test_index();
        for i in 0..10 {
            index.ingest(doc(&format!("d{}", i), &format!("text {}", i))).await;
        }
        assert_eq!(index.query("text", 3).await.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_ingest_and_query() {
        let index = std::sync::Arc::new(test_index());

        let writer = {
            let index = index.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    index.ingest(doc(&format!("w{}", i), "concurrent body")).await;
                }
            })
        };
        let reader = {
            let index = index.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _ = index.query("concurrent body", 5).await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(index.len(), 50);
    }
}
