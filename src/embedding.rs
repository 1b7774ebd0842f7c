//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are
//!   not configured.
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible embeddings API
//!   with batching, retry, and backoff.
//!
//! # Retry strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff per [`RetryConfig`]: exponential, capped

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{EmbeddingConfig, RetryConfig};

/// Async embedding backend. The pipeline holds this behind an `Arc`
/// so tests can substitute a recording mock.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.generate_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

// ============ Disabled provider ============

/// A no-op provider that always returns errors; used when
/// `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn generate_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI-compatible provider ============

/// Provider for the OpenAI embeddings API (or any API speaking the same
/// `POST {api_base}/embeddings` shape).
pub struct OpenAiProvider {
    model: String,
    dims: usize,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl OpenAiProvider {
    /// Build from configuration. The API key comes from the config or,
    /// when unset there, the `OPENAI_API_KEY` environment variable.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            client,
            retry: config.retry.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay(attempt - 1);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = parse_embeddings_response(&json)?;
                        if vectors.len() != texts.len() {
                            bail!(
                                "Embedding API returned {} vectors for {} inputs",
                                vectors.len(),
                                texts.len()
                            );
                        }
                        return Ok(vectors);
                    }

                    // Rate limited or server error: retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                        continue;
                    }

                    // Other client errors are not retryable.
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

/// Extract `data[].embedding` arrays from the API response, sorted by
/// `index` so the output order matches the input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embeddings response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the provider named by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = DisabledProvider;
        assert_eq!(provider.model_name(), "disabled");
        assert!(provider.generate_batch(&["x".to_string()]).await.is_err());
        assert!(provider.generate_embedding("x").await.is_err());
    }

    #[test]
    fn test_parse_response_sorted_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [3.0, 4.0] },
                { "index": 0, "embedding": [1.0, 2.0] },
            ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_parse_response_missing_data_is_error() {
        let json = serde_json::json!({ "object": "list" });
        assert!(parse_embeddings_response(&json).is_err());
    }

    #[test]
    fn test_parse_response_missing_embedding_is_error() {
        let json = serde_json::json!({ "data": [ { "index": 0 } ] });
        assert!(parse_embeddings_response(&json).is_err());
    }

    #[test]
    fn test_create_provider_disabled_and_unknown() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "disabled");

        let bad = EmbeddingConfig {
            provider: "cohere".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&bad).is_err());
    }

    #[test]
    fn test_openai_provider_requires_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key: Some("sk-test".into()),
            ..EmbeddingConfig::default()
        };
        assert!(OpenAiProvider::new(&config).is_err());

        let complete = EmbeddingConfig {
            model: Some("text-embedding-3-small".into()),
            dims: Some(1536),
            ..config
        };
        let provider = OpenAiProvider::new(&complete).unwrap();
        assert_eq!(provider.dims(), 1536);
    }
}
