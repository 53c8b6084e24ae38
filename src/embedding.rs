//! Embedding capability with a deterministic degradation path.
//!
//! The [`Embedder`] dispatches on the configured provider:
//! - **`gemini`** — calls the Gemini `batchEmbedContents` endpoint.
//! - **`ollama`** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **`disabled`** — skips the network entirely.
//!
//! Embedding never fails: when the provider is disabled, misconfigured, or
//! unreachable, every text degrades to a [`pseudo_embedding`] — a
//! non-semantic vector derived from a SHA-256 hash of the text. The same text
//! always maps to the same pseudo-vector, so retrieval stays functional (and
//! deterministic for tests) with reduced quality rather than failing.
//!
//! Also provides [`cosine_similarity`], the scoring function used by the
//! retrieval index.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;

/// Batched text-embedding client. Cheap to clone via the inner reqwest pool.
#[derive(Clone)]
pub struct Embedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl Embedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            config: config.clone(),
            client,
        }
    }

    /// Embed a batch of texts, one vector per input, in input order.
    ///
    /// Dispatches to the configured provider in `batch_size` slices; any
    /// provider failure degrades the whole call to pseudo-embeddings.
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let attempt = match self.config.provider.as_str() {
            "gemini" => self.embed_remote_batches(texts, Backend::Gemini).await,
            "ollama" => self.embed_remote_batches(texts, Backend::Ollama).await,
            _ => None,
        };

        match attempt {
            Some(vectors) => vectors,
            None => texts
                .iter()
                .map(|t| pseudo_embedding(t, self.config.dims))
                .collect(),
        }
    }

    /// Embed a single query text.
    pub async fn embed_one(&self, text: &str) -> Vec<f32> {
        let batch = [text.to_string()];
        self.embed(&batch)
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| pseudo_embedding(text, self.config.dims))
    }

    async fn embed_remote_batches(&self, texts: &[String], backend: Backend) -> Option<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let result = match backend {
                Backend::Gemini => self.embed_gemini(batch).await,
                Backend::Ollama => self.embed_ollama(batch).await,
            };
            match result {
                Ok(mut vectors) if vectors.len() == batch.len() => out.append(&mut vectors),
                Ok(vectors) => {
                    warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedding provider returned a short batch; degrading to pseudo-embeddings"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, provider = %self.config.provider, "embedding call failed; degrading to pseudo-embeddings");
                    return None;
                }
            }
        }
        Some(out)
    }

    async fn embed_gemini(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let api_key = std::env::var(&self.config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.config.api_key_env))?;

        let base = self
            .config
            .url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com/v1beta");
        let model = &self.config.model;

        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{}", model),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();

        let response = self
            .client
            .post(format!(
                "{}/models/{}:batchEmbedContents?key={}",
                base, model, api_key
            ))
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini embedding API error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        parse_gemini_embeddings(&json)
    }

    async fn embed_ollama(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let url = self.config.url.as_deref().unwrap_or("http://localhost:11434");

        let response = self
            .client
            .post(format!("{}/api/embed", url))
            .json(&serde_json::json!({
                "model": self.config.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_embeddings(&json)
    }
}

enum Backend {
    Gemini,
    Ollama,
}

fn parse_gemini_embeddings(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for item in embeddings {
        let values = item
            .get("values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing values"))?;
        result.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(result)
}

fn parse_ollama_embeddings(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

/// Deterministic, non-semantic embedding derived from a hash of the text.
///
/// The SHA-256 digest is expanded by chained re-hashing until `dims` bytes
/// are available; each byte maps into `[0, 1]`. Identical text always yields
/// an identical vector.
pub fn pseudo_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut block = Sha256::digest(text.as_bytes());
    let mut counter = 0u32;

    while out.len() < dims {
        for &byte in block.iter() {
            if out.len() == dims {
                break;
            }
            out.push(byte as f32 / 255.0);
        }
        counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(block);
        hasher.update(counter.to_le_bytes());
        block = hasher.finalize();
    }

    out
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    #[test]
    fn pseudo_embedding_is_stable() {
        let a = pseudo_embedding("caffeine and sleep", 256);
        let b = pseudo_embedding("caffeine and sleep", 256);
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
    }

    #[test]
    fn pseudo_embedding_differs_by_text() {
        let a = pseudo_embedding("alpha", 64);
        let b = pseudo_embedding("beta", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn pseudo_embedding_values_in_unit_interval() {
        for v in pseudo_embedding("range check", 512) {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[tokio::test]
    async fn disabled_provider_degrades_to_pseudo() {
        let embedder = Embedder::new(&EmbeddingConfig::default());
        let texts = vec!["one".to_string(), "two".to_string()];
        let vectors = embedder.embed(&texts).await;
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], pseudo_embedding("one", 256));
        assert_eq!(vectors[1], pseudo_embedding("two", 256));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let embedder = Embedder::new(&EmbeddingConfig::default());
        assert!(embedder.embed(&[]).await.is_empty());
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn parse_ollama_shape() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let parsed = parse_ollama_embeddings(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!((parsed[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn parse_gemini_shape() {
        let json = serde_json::json!({ "embeddings": [{ "values": [0.5, 0.25] }] });
        let parsed = parse_gemini_embeddings(&json).unwrap();
        assert_eq!(parsed, vec![vec![0.5, 0.25]]);
    }

    #[test]
    fn parse_gemini_missing_embeddings_errors() {
        let json = serde_json::json!({ "data": [] });
        assert!(parse_gemini_embeddings(&json).is_err());
    }
}
