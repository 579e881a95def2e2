//! Embedding client for the Ollama embeddings endpoint.
//!
//! Callers go through the [`Embedder`] trait. A failed embedding is not an
//! error: [`Embedder::embed`] returns `None` and the caller skips the chunk
//! (index builds) or proceeds without retrieved context (chat).
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, … (capped at 2^5)
//!
//! Query embeddings for interactive chat ([`Embedder::embed_query`]) get a
//! single attempt under `query_timeout_secs`; a chat answers without context
//! rather than wait out the build-time retry budget.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Anything that can turn text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logs and stats.
    fn model_name(&self) -> &str;

    /// Embed one text. `None` means "no embedding available".
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Embed a chat query, where latency matters more than persistence.
    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        self.embed(text).await
    }
}

/// [`Embedder`] backed by Ollama's `POST /api/embeddings`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
    timeout: Duration,
    query_timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        })
    }

    async fn embed_with_retry(
        &self,
        text: &str,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .timeout(timeout)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "embedding backend error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("embedding backend error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "embedding backend unreachable at {}: {}",
                        self.url,
                        e
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self
            .embed_with_retry(text, self.max_retries, self.timeout)
            .await
        {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "embedding failed");
                None
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        match self.embed_with_retry(text, 0, self.query_timeout).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "query embedding failed");
                None
            }
        }
    }
}

/// Accept both `{"embedding": [...]}` (`/api/embeddings`) and
/// `{"embeddings": [[...]]}` (`/api/embed`).
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .or_else(|| {
            json.get("embeddings")
                .and_then(|e| e.as_array())
                .and_then(|a| a.first())
                .and_then(|e| e.as_array())
        })
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: no embedding array"))?;

    if values.is_empty() {
        bail!("invalid embedding response: empty vector");
    }

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
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
