//! Asynchronous ingestion path feeding the retrieval index.
//!
//! Watches a directory by polling and normalizes each file into a
//! [`DocumentInput`]: title and url come from a `<stem>.meta.json` sidecar
//! when present, else from the file itself; content is truncated to the
//! configured bound. Three content shapes are recognized:
//!
//! - plain text (`.txt`, `.md`, anything else readable as UTF-8)
//! - delimited tabular text (`.csv`, row-truncated)
//! - line-delimited JSON (`.jsonl`, first record exposing `text` or `content`)
//!
//! Malformed or unreadable records are skipped, never fatal. The document id
//! is the file path, so re-processing a changed file upserts in place —
//! ingestion is idempotent beyond refreshing content and embedding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::index::RetrievalIndex;
use crate::models::DocumentInput;
use crate::scrape::truncate_chars;

/// Rows kept when flattening a delimited tabular file.
const MAX_TABULAR_ROWS: usize = 200;

/// Sidecar metadata record (`<stem>.meta.json`) overriding title/url.
#[derive(Debug, Deserialize, Default)]
struct SidecarMeta {
    title: Option<String>,
    url: Option<String>,
}

/// Fields accepted from a `.jsonl` record.
#[derive(Debug, Deserialize)]
struct JsonlRecord {
    text: Option<String>,
    content: Option<String>,
    title: Option<String>,
    url: Option<String>,
}

/// Directory watcher that feeds the retrieval index.
pub struct IngestionPipeline {
    index: Arc<RetrievalIndex>,
    config: IngestConfig,
    seen: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl IngestionPipeline {
    pub fn new(index: Arc<RetrievalIndex>, config: IngestConfig) -> Self {
        Self {
            index,
            config,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the polling watcher. Runs until the task is dropped.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let poll = std::time::Duration::from_secs(self.config.poll_secs.max(1));
        tokio::spawn(async move {
            info!(dir = %self.config.watch_dir.display(), "ingestion watcher started");
            let mut interval = tokio::time::interval(poll);
            loop {
                interval.tick().await;
                if let Err(e) = self.scan_once().await {
                    warn!(error = %e, "ingestion scan failed");
                }
            }
        })
    }

    /// Scan the watch directory once, ingesting new and modified files.
    ///
    /// Returns the number of documents ingested. A missing watch directory
    /// is a designed-for condition (nothing to ingest yet), not an error.
    pub async fn scan_once(&self) -> Result<usize> {
        let dir = &self.config.watch_dir;
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut batch = Vec::new();
        {
            let mut seen = self.seen.lock().await;
            for entry in std::fs::read_dir(dir)? {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(error = %e, "unreadable directory entry skipped");
                        continue;
                    }
                };
                let path = entry.path();
                if !path.is_file() || is_sidecar(&path) {
                    continue;
                }

                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if seen.get(&path) == Some(&modified) {
                    continue;
                }

                match normalize_file(&path, self.config.max_content_chars) {
                    Some(doc) => {
                        seen.insert(path, modified);
                        batch.push(doc);
                    }
                    None => {
                        // Remember the attempt so a permanently bad file is
                        // not re-parsed every poll tick.
                        seen.insert(path, modified);
                    }
                }
            }
        }

        let count = batch.len();
        if count > 0 {
            debug!(count, "ingesting scanned documents");
            self.index.ingest_batch(batch).await;
        }
        Ok(count)
    }
}

fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".meta.json"))
        .unwrap_or(false)
}

/// Normalize one file into an index-ready document, or `None` if the file is
/// unreadable, empty, or of an unusable shape.
pub fn normalize_file(path: &Path, max_content_chars: usize) -> Option<DocumentInput> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable file skipped");
            return None;
        }
    };
    let text = String::from_utf8_lossy(&bytes);

    let meta = read_sidecar(path);
    let default_title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let (content, record_title, record_url) = match extension.as_str() {
        "csv" | "tsv" => (flatten_tabular(&text), None, None),
        "jsonl" => match first_jsonl_record(&text) {
            Some((content, title, url)) => (content, title, url),
            None => {
                warn!(path = %path.display(), "jsonl file had no usable record; skipped");
                return None;
            }
        },
        _ => (text.to_string(), None, None),
    };

    if content.trim().is_empty() {
        return None;
    }

    Some(DocumentInput {
        id: path.display().to_string(),
        title: meta
            .title
            .or(record_title)
            .unwrap_or(default_title),
        url: meta.url.or(record_url),
        content: truncate_chars(&content, max_content_chars),
    })
}

fn read_sidecar(path: &Path) -> SidecarMeta {
    let stem = match path.file_stem().and_then(|s| s.to_str()) {
        Some(s) => s,
        None => return SidecarMeta::default(),
    };
    let sidecar = path.with_file_name(format!("{}.meta.json", stem));
    match std::fs::read_to_string(&sidecar) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %sidecar.display(), error = %e, "malformed sidecar ignored");
            SidecarMeta::default()
        }),
        Err(_) => SidecarMeta::default(),
    }
}

/// Flatten a delimited tabular file: keep the first rows verbatim.
fn flatten_tabular(text: &str) -> String {
    text.lines()
        .take(MAX_TABULAR_ROWS)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Take the first line-delimited JSON record exposing a `text` or `content`
/// field; the record may also carry its own title/url.
fn first_jsonl_record(text: &str) -> Option<(String, Option<String>, Option<String>)> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: JsonlRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if let Some(body) = record.text.or(record.content) {
            if !body.trim().is_empty() {
                return Some((body, record.title, record.url));
            }
        }
    }
    None
}
