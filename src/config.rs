//! TOML configuration for the pipeline.
//!
//! Every section has full serde defaults so an empty file (or a missing
//! section) yields a working configuration. `load_config` validates
//! ranges up front so bad values fail before any work happens.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::account_chunker::AccountChunkOptions;
use crate::asset_chunker::AssetChunkOptions;
use crate::builder::BuilderConfig;
use crate::document_chunker::DocumentChunkOptions;
use crate::splitter::SplitOptions;
use crate::vsearch::CacheConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub document: DocumentChunkOptions,
    pub account: AccountChunkOptions,
    pub asset: AssetChunkOptions,
    pub embedding: EmbeddingConfig,
    pub vector_db: VectorDbConfig,
    pub builder: BuilderConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub api_base: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            batch_size: 64,
            timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub vector_size: usize,
    /// Points per upsert sub-batch.
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "vecpipe".to_string(),
            vector_size: 1536,
            batch_size: 32,
            timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential-backoff retry policy shared by the embedding and
/// vector-database clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), capped at 30s.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self.base_delay_ms as f64 * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(ms.min(30_000.0) as u64)
    }
}

fn validate_split(section: &str, opts: &SplitOptions) -> Result<()> {
    if opts.chunk_size == 0 {
        bail!("{section}.chunk_size must be > 0");
    }
    if opts.max_tokens == 0 {
        bail!("{section}.max_tokens must be > 0");
    }
    if opts.chunk_overlap >= opts.chunk_size {
        bail!("{section}.chunk_overlap must be smaller than chunk_size");
    }
    if opts.separators.is_empty() {
        bail!("{section}.separators must not be empty");
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: PipelineConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    validate_split("document.split", &config.document.split)?;
    validate_split("account.split", &config.account.split)?;
    validate_split("asset.document.split", &config.asset.document.split)?;

    if config.account.max_contacts_per_chunk == 0 {
        bail!("account.max_contacts_per_chunk must be > 0");
    }
    if !(0.0..=1.0).contains(&config.asset.min_relevance_score) {
        bail!("asset.min_relevance_score must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!("Unknown embedding provider: '{}'. Must be disabled or openai.", other),
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.map_or(true, |d| d == 0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.retry.max_attempts == 0 {
        bail!("embedding.retry.max_attempts must be >= 1");
    }

    if config.vector_db.vector_size == 0 {
        bail!("vector_db.vector_size must be > 0");
    }
    if config.vector_db.batch_size == 0 {
        bail!("vector_db.batch_size must be > 0");
    }
    if config.vector_db.collection.trim().is_empty() {
        bail!("vector_db.collection must not be empty");
    }
    if config.vector_db.retry.max_attempts == 0 {
        bail!("vector_db.retry.max_attempts must be >= 1");
    }

    if config.builder.batch_size == 0 {
        bail!("builder.batch_size must be > 0");
    }
    if config.builder.concurrency == 0 {
        bail!("builder.concurrency must be > 0");
    }
    if config.builder.max_jobs == 0 {
        bail!("builder.max_jobs must be > 0");
    }

    if config.cache.enabled && config.cache.ttl_secs == 0 {
        bail!("cache.ttl_secs must be > 0 when the cache is enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.vector_db.vector_size, 1536);
        assert_eq!(config.builder.concurrency, 3);
        assert_eq!(config.account.max_contacts_per_chunk, 5);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_partial_config_overrides() {
        let f = write_config(
            r#"
[vector_db]
collection = "docs"
vector_size = 768

[builder]
concurrency = 8
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.vector_db.collection, "docs");
        assert_eq!(config.vector_db.vector_size, 768);
        assert_eq!(config.builder.concurrency, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.builder.batch_size, 10);
    }

    #[test]
    fn test_rejects_zero_vector_size() {
        let f = write_config("[vector_db]\nvector_size = 0\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("vector_size"));
    }

    #[test]
    fn test_rejects_overlap_at_least_chunk_size() {
        let f = write_config(
            r#"
[document.split]
chunk_size = 100
chunk_overlap = 100
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let f = write_config("[embedding]\nprovider = \"openai\"\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let f = write_config(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        let config = load_config(f.path()).unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let f = write_config("[embedding]\nprovider = \"cohere\"\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay(1), Duration::from_millis(500));
        assert_eq!(retry.delay(2), Duration::from_millis(1000));
        assert_eq!(retry.delay(3), Duration::from_millis(2000));
        assert!(retry.delay(20) <= Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_relevance_score_out_of_range() {
        let f = write_config("[asset]\nmin_relevance_score = 1.5\n");
        assert!(load_config(f.path()).is_err());
    }
}
