//! Low-level vector-database client.
//!
//! [`VectorDb`] is the seam the rest of the pipeline talks through;
//! tests substitute an in-memory recording implementation. The shipped
//! implementation, [`HttpVectorDb`], speaks a Qdrant-flavored JSON
//! protocol over HTTP and wraps every call in retry-with-backoff:
//! 429/5xx and network errors are retried per [`RetryConfig`], other
//! client errors fail immediately, and a 404 is surfaced as `None`
//! rather than an error.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::config::{RetryConfig, VectorDbConfig};
use crate::models::{ScoredPoint, VectorMetadata, VectorPoint};

/// Parameters common to search and recommend calls.
#[derive(Debug, Clone)]
pub struct PointQuery {
    pub limit: usize,
    pub score_threshold: Option<f32>,
    /// Backend filter AST (see `vsearch::compile_filter`).
    pub filter: Option<Value>,
    pub with_vector: bool,
}

impl Default for PointQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: None,
            filter: None,
            with_vector: false,
        }
    }
}

/// Async vector-database operations used by the store and search
/// layers.
#[async_trait]
pub trait VectorDb: Send + Sync {
    async fn create_collection(&self, name: &str, vector_size: usize) -> Result<()>;
    async fn collection_exists(&self, name: &str) -> Result<bool>;
    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()>;
    /// Fetch one point by id, vector included. `None` when the id is
    /// unknown.
    async fn retrieve_point(&self, collection: &str, id: &str) -> Result<Option<VectorPoint>>;
    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()>;

    async fn search_points(
        &self,
        collection: &str,
        vector: &[f32],
        query: &PointQuery,
    ) -> Result<Vec<ScoredPoint>>;

    /// Nearest neighbors of an already-stored point, excluding the
    /// point itself.
    async fn recommend_points(
        &self,
        collection: &str,
        positive_id: &str,
        query: &PointQuery,
    ) -> Result<Vec<ScoredPoint>>;
}

/// HTTP implementation speaking the Qdrant JSON API shape.
pub struct HttpVectorDb {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl HttpVectorDb {
    pub fn new(config: &VectorDbConfig) -> Result<Self> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            bail!("vector_db.url must be an http(s) URL");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build vector-db HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: config.retry.clone(),
        })
    }

    /// One retried request. `Ok(None)` means the resource does not
    /// exist (HTTP 404); every other non-retryable failure is an error.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %url,
                    "retrying vector-db call"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.request(method.clone(), &url);
            if let Some(key) = &self.api_key {
                req = req.header("api-key", key);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .context("failed to parse vector-db response")?;
                        return Ok(Some(json));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if should_retry(status) {
                        last_err =
                            Some(anyhow!("vector-db error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("vector-db error {}: {}", status, body_text);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() || e.is_request() {
                        last_err = Some(e.into());
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("vector-db call failed after retries")))
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Unwrap the `{"result": ..., "status": "ok"}` envelope.
fn result_of(json: Value) -> Result<Value> {
    json.get("result")
        .cloned()
        .ok_or_else(|| anyhow!("vector-db response missing result"))
}

fn parse_point_id(item: &Value) -> Result<String> {
    match item.get("id") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => bail!("vector-db point missing id"),
    }
}

fn parse_vector(item: &Value) -> Option<Vec<f32>> {
    item.get("vector")?
        .as_array()
        .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn parse_scored(item: &Value) -> Result<ScoredPoint> {
    let payload: VectorMetadata = serde_json::from_value(
        item.get("payload")
            .cloned()
            .ok_or_else(|| anyhow!("vector-db point missing payload"))?,
    )
    .context("failed to decode point payload")?;
    Ok(ScoredPoint {
        id: parse_point_id(item)?,
        score: item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
        payload,
        vector: parse_vector(item),
    })
}

fn query_body(query: &PointQuery) -> Value {
    let mut body = json!({
        "limit": query.limit,
        "with_payload": true,
        "with_vector": query.with_vector,
    });
    if let Some(threshold) = query.score_threshold {
        body["score_threshold"] = json!(threshold);
    }
    if let Some(filter) = &query.filter {
        body["filter"] = filter.clone();
    }
    body
}

#[async_trait]
impl VectorDb for HttpVectorDb {
    async fn create_collection(&self, name: &str, vector_size: usize) -> Result<()> {
        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });
        self.request(Method::PUT, &format!("/collections/{name}"), Some(&body))
            .await?
            .ok_or_else(|| anyhow!("collection endpoint not found"))?;
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .request(Method::GET, &format!("/collections/{name}"), None)
            .await?
            .is_some())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        // Deleting an absent collection is a no-op.
        self.request(Method::DELETE, &format!("/collections/{name}"), None)
            .await?;
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
                .collect::<Vec<_>>()
        });
        self.request(
            Method::PUT,
            &format!("/collections/{collection}/points?wait=true"),
            Some(&body),
        )
        .await?
        .ok_or_else(|| anyhow!("collection {} not found", collection))?;
        Ok(())
    }

    async fn retrieve_point(&self, collection: &str, id: &str) -> Result<Option<VectorPoint>> {
        let body = json!({
            "ids": [id],
            "with_payload": true,
            "with_vector": true,
        });
        let Some(json) = self
            .request(
                Method::POST,
                &format!("/collections/{collection}/points"),
                Some(&body),
            )
            .await?
        else {
            return Ok(None);
        };
        let result = result_of(json)?;
        let Some(item) = result.as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };
        let payload: VectorMetadata = serde_json::from_value(
            item.get("payload")
                .cloned()
                .ok_or_else(|| anyhow!("vector-db point missing payload"))?,
        )?;
        Ok(Some(VectorPoint {
            id: parse_point_id(item)?,
            vector: parse_vector(item).unwrap_or_default(),
            payload,
        }))
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids });
        self.request(
            Method::POST,
            &format!("/collections/{collection}/points/delete?wait=true"),
            Some(&body),
        )
        .await?
        .ok_or_else(|| anyhow!("collection {} not found", collection))?;
        Ok(())
    }

    async fn search_points(
        &self,
        collection: &str,
        vector: &[f32],
        query: &PointQuery,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = query_body(query);
        body["vector"] = json!(vector);
        let json = self
            .request(
                Method::POST,
                &format!("/collections/{collection}/points/search"),
                Some(&body),
            )
            .await?
            .ok_or_else(|| anyhow!("collection {} not found", collection))?;
        let result = result_of(json)?;
        result
            .as_array()
            .ok_or_else(|| anyhow!("vector-db search result is not an array"))?
            .iter()
            .map(parse_scored)
            .collect()
    }

    async fn recommend_points(
        &self,
        collection: &str,
        positive_id: &str,
        query: &PointQuery,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = query_body(query);
        body["positive"] = json!([positive_id]);
        let json = self
            .request(
                Method::POST,
                &format!("/collections/{collection}/points/recommend"),
                Some(&body),
            )
            .await?
            .ok_or_else(|| anyhow!("collection {} not found", collection))?;
        let result = result_of(json)?;
        result
            .as_array()
            .ok_or_else(|| anyhow!("vector-db recommend result is not an array"))?
            .iter()
            .map(parse_scored)
            .collect()
    }
}
