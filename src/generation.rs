//! Text-generation capability behind a trait seam.
//!
//! [`GenerationClient::generate`] is infallible by contract: the pipeline
//! stages always receive text. The Gemini-backed client falls back to the
//! same deterministic heuristic rendering as [`HeuristicClient`] whenever the
//! API key is missing, the request fails, or the response cannot be parsed —
//! a missing credential is a designed-for condition, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::GenerationConfig;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Abstract generation capability used by the verification, reflection, and
/// brief stages.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Produce text for `prompt`. Never fails; degraded output is still text.
    async fn generate(&self, prompt: &str) -> String;
}

/// Deterministic prompt-echo renderer used when no model is reachable.
///
/// Echoes the prompt's non-blank lines as bullets under a fixed header, so
/// downstream section parsing has something to chew on.
pub fn heuristic_render(prompt: &str) -> String {
    let bullets: Vec<String> = prompt
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("- {}", line.trim()))
        .collect();
    format!("Draft based on heuristic analysis:\n\n{}", bullets.join("\n"))
}

/// Generation client that always uses the heuristic rendering. Used when the
/// provider is `"heuristic"` and as the stub of choice in tests.
pub struct HeuristicClient;

#[async_trait]
impl GenerationClient for HeuristicClient {
    async fn generate(&self, prompt: &str) -> String {
        heuristic_render(prompt)
    }
}

/// Gemini `generateContent` client.
///
/// Auth is a `?key=` query parameter; the response text lives at
/// `candidates[0].content.parts[].text`.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }

    async fn try_generate(&self, prompt: &str) -> anyhow::Result<String> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.api_key_env))?;

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, self.model, api_key
            ))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        extract_candidate_text(&json)
            .ok_or_else(|| anyhow::anyhow!("Gemini response carried no candidate text"))
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> String {
        match self.try_generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "generation unavailable; using heuristic rendering");
                heuristic_render(prompt)
            }
        }
    }
}

fn extract_candidate_text(json: &serde_json::Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Build the configured generation client.
pub fn create_client(config: &GenerationConfig) -> Arc<dyn GenerationClient> {
    match config.provider.as_str() {
        "heuristic" => Arc::new(HeuristicClient),
        _ => Arc::new(GeminiClient::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_render_echoes_lines_as_bullets() {
        let text = heuristic_render("Question: why?\n\nSources:\nnone");
        assert!(text.starts_with("Draft based on heuristic analysis:"));
        assert!(text.contains("- Question: why?"));
        assert!(text.contains("- none"));
    }

    #[test]
    fn heuristic_render_is_deterministic() {
        assert_eq!(heuristic_render("same input"), heuristic_render("same input"));
    }

    #[test]
    fn extracts_candidate_text() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "hello " }, { "text": "world" }] }
            }]
        });
        assert_eq!(extract_candidate_text(&json).unwrap(), "hello world");
    }

    #[test]
    fn missing_candidates_yields_none() {
        let json = serde_json::json!({ "promptFeedback": {} });
        assert!(extract_candidate_text(&json).is_none());
    }

    #[tokio::test]
    async fn gemini_without_key_degrades_to_heuristic() {
        let config = GenerationConfig {
            api_key_env: "DOSSIER_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            ..GenerationConfig::default()
        };
        let client = GeminiClient::new(&config);
        let out = client.generate("ping").await;
        assert!(out.contains("heuristic analysis"));
    }
}
