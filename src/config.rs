use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"gemini"` or `"heuristic"`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "gemini".to_string()
}
fn default_generation_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"gemini"`, `"ollama"`, or `"disabled"`.
    ///
    /// Any provider (including `"disabled"`) degrades to a deterministic
    /// hash-based pseudo-embedding when the real capability is unreachable,
    /// so retrieval keeps working with reduced quality.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Dimensionality of pseudo-embeddings; real providers dictate their own.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            url: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Directory watched for documents to index.
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Ingested content is truncated to this many characters, bounding
    /// memory use and embedding cost.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            poll_secs: default_poll_secs(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("./data/ingest")
}
fn default_poll_secs() -> u64 {
    2
}
fn default_max_content_chars() -> usize {
    20_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates returned by the search stage's index query.
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    /// Documents surfaced by the reading stage.
    #[serde(default = "default_read_top_k")]
    pub read_top_k: usize,
    /// Pages fetched by the search fallback.
    #[serde(default = "default_max_search_fetch")]
    pub max_search_fetch: usize,
    /// URLs fetched by the reading fallback.
    #[serde(default = "default_max_read_fetch")]
    pub max_read_fetch: usize,
    /// Concurrent in-flight fetches during fallback fan-out.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Reading bodies are capped at this many characters.
    #[serde(default = "default_max_reading_chars")]
    pub max_reading_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_top_k: default_search_top_k(),
            read_top_k: default_read_top_k(),
            max_search_fetch: default_max_search_fetch(),
            max_read_fetch: default_max_read_fetch(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_reading_chars: default_max_reading_chars(),
        }
    }
}

fn default_search_top_k() -> usize {
    12
}
fn default_read_top_k() -> usize {
    5
}
fn default_max_search_fetch() -> usize {
    10
}
fn default_max_read_fetch() -> usize {
    8
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_max_reading_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7430".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.generation.provider.as_str() {
        "gemini" | "heuristic" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be gemini or heuristic.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "gemini" | "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be gemini, ollama, or disabled.",
            other
        ),
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.retrieval.search_top_k == 0 || config.retrieval.read_top_k == 0 {
        anyhow::bail!("retrieval.search_top_k and retrieval.read_top_k must be >= 1");
    }
    if config.retrieval.fetch_concurrency == 0 {
        anyhow::bail!("retrieval.fetch_concurrency must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.retrieval.search_top_k, 12);
        assert_eq!(config.retrieval.max_read_fetch, 8);
        assert_eq!(config.ingest.max_content_chars, 20_000);
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[embedding]\nprovider = \"word2vec\"\n").unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn parses_full_config() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"
[generation]
provider = "heuristic"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[retrieval]
search_top_k = 6

[server]
bind = "0.0.0.0:8080"
"#,
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.generation.provider, "heuristic");
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.retrieval.search_top_k, 6);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }
}
