//! Pipeline orchestration.
//!
//! [`ChunkBuilder`] owns the chunkers, the embedding provider, and the
//! vector store, and drives each item through four stages: chunking,
//! embedding, storing, completed. Batch submissions run items
//! concurrently in sub-batches, track progress in a bounded job
//! registry, and publish [`ProgressEvent`]s on a broadcast channel.
//!
//! Per-unit failures are recorded on the result; zero chunks or a
//! failed embedding batch aborts the item. In batch mode a failed item
//! becomes a failed-item entry without touching its siblings.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account_chunker::AccountChunker;
use crate::asset_chunker::AssetChunker;
use crate::config::PipelineConfig;
use crate::document_chunker::DocumentChunker;
use crate::embedding::EmbeddingProvider;
use crate::models::{
    point_id, AccountChunkType, AccountRecord, AssetMetadata, Chunk, ChunkError, ChunkKind,
    ParsedDocument, Scope, VectorMetadata, VectorPoint,
};
use crate::progress::{eta_ms, percentage, ProcessingStage, ProgressEvent};
use crate::store::VectorStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Chunk texts per embedding call.
    pub batch_size: usize,
    /// Items processed concurrently within a batch job.
    pub concurrency: usize,
    /// Skip points whose `content_hash` was already stored in this run.
    pub dedup: bool,
    /// Registry capacity; submissions beyond it fail fast.
    pub max_jobs: usize,
    /// Broadcast channel capacity for progress events.
    pub event_buffer: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            dedup: true,
            max_jobs: 1000,
            event_buffer: 256,
        }
    }
}

/// One unit of batch work.
#[derive(Debug, Clone)]
pub enum BatchItem {
    Document {
        account_number: String,
        document: ParsedDocument,
    },
    Account(AccountRecord),
    Asset {
        account_number: String,
        document: ParsedDocument,
        metadata: AssetMetadata,
    },
}

impl BatchItem {
    /// Stable human-readable identifier used in results and events.
    pub fn label(&self) -> String {
        match self {
            BatchItem::Document { document, .. } => {
                format!("document:{}", document.document_id())
            }
            BatchItem::Account(account) => format!("account:{}", account.account_number),
            BatchItem::Asset { metadata, .. } => format!("asset:{}", metadata.asset_id),
        }
    }
}

/// Aggregated outcome of one item's pipeline run.
#[derive(Debug, Clone, Default)]
pub struct ChunkProcessingResult {
    pub item_id: String,
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    pub duplicate_chunks: usize,
    pub total_tokens: usize,
    pub elapsed_ms: u64,
    pub vector_ids: Vec<String>,
    pub errors: Vec<ChunkError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Status transitions never regress, and terminal states are final.
fn transition(current: JobStatus, next: JobStatus) -> JobStatus {
    if current.is_terminal() {
        current
    } else {
        next
    }
}

#[derive(Debug, Clone)]
pub struct JobProgress {
    pub stage: ProcessingStage,
    pub processed: usize,
    pub total: usize,
    pub percentage: f32,
    pub eta_ms: Option<u64>,
    pub errors: usize,
    pub warnings: usize,
}

/// Outcome of one batch item; failures keep their message.
#[derive(Debug, Clone)]
pub struct BatchItemResult {
    pub item_id: String,
    pub result: Result<ChunkProcessingResult, String>,
}

#[derive(Debug, Clone)]
pub struct ChunkProcessingJob {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub results: Vec<BatchItemResult>,
}

pub struct ChunkBuilder {
    document_chunker: DocumentChunker,
    account_chunker: AccountChunker,
    asset_chunker: AssetChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<VectorStore>,
    config: PipelineConfig,
    jobs: RwLock<HashMap<String, ChunkProcessingJob>>,
    cancel_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ChunkBuilder {
    /// Wire the pipeline together. Fails when the embedder's output
    /// dimension does not match the store's collection size.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<VectorStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if embedder.dims() != store.vector_size() {
            bail!(
                "embedding dimension {} does not match collection size {}",
                embedder.dims(),
                store.vector_size()
            );
        }
        let (events, _) = broadcast::channel(config.builder.event_buffer.max(1));
        Ok(Self {
            document_chunker: DocumentChunker::new(),
            account_chunker: AccountChunker::new(),
            asset_chunker: AssetChunker::new(),
            embedder,
            store,
            config,
            jobs: RwLock::new(HashMap::new()),
            cancel_flags: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Subscribe to progress events. Lagging receivers drop events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn emit(
        &self,
        job_id: Option<&str>,
        item_id: &str,
        stage: ProcessingStage,
        processed: usize,
        total: usize,
        message: Option<String>,
    ) {
        // The job record mirrors the latest per-item stage; the final
        // `Completed` stage is only set when the whole job finishes.
        if let Some(jid) = job_id {
            if stage != ProcessingStage::Completed {
                self.update_job(jid, |job| job.progress.stage = stage);
            }
        }
        // No receivers is fine.
        let _ = self.events.send(ProgressEvent {
            job_id: job_id.map(|s| s.to_string()),
            item_id: item_id.to_string(),
            stage,
            processed,
            total,
            percentage: percentage(processed, total),
            message,
        });
    }

    // ============ Single-item pipeline ============

    pub async fn process_document(
        &self,
        account_number: &str,
        document: &ParsedDocument,
    ) -> Result<ChunkProcessingResult> {
        let item = BatchItem::Document {
            account_number: account_number.to_string(),
            document: document.clone(),
        };
        self.process_item(None, &item).await
    }

    pub async fn process_account(&self, account: &AccountRecord) -> Result<ChunkProcessingResult> {
        let item = BatchItem::Account(account.clone());
        self.process_item(None, &item).await
    }

    pub async fn process_asset(
        &self,
        account_number: &str,
        document: &ParsedDocument,
        metadata: &AssetMetadata,
    ) -> Result<ChunkProcessingResult> {
        let item = BatchItem::Asset {
            account_number: account_number.to_string(),
            document: document.clone(),
            metadata: metadata.clone(),
        };
        self.process_item(None, &item).await
    }

    async fn process_item(
        &self,
        job_id: Option<&str>,
        item: &BatchItem,
    ) -> Result<ChunkProcessingResult> {
        let item_id = item.label();
        let start = Instant::now();
        let mut result = ChunkProcessingResult {
            item_id: item_id.clone(),
            ..ChunkProcessingResult::default()
        };

        // Stage 1: chunking.
        let (account_number, chunks) = self.chunk_item(item, &mut result)?;
        if chunks.is_empty() {
            bail!("no chunks generated for {}", item_id);
        }
        result.total_chunks = chunks.len();
        result.total_tokens = chunks.iter().map(|c| c.base.token_count).sum();
        self.emit(
            job_id,
            &item_id,
            ProcessingStage::Chunking,
            chunks.len(),
            chunks.len(),
            Some(format!("{} chunks", chunks.len())),
        );

        // Stage 2: embedding. A failed batch aborts the whole item.
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.builder.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.base.text.clone()).collect();
            let batch_vectors = self
                .embedder
                .generate_batch(&texts)
                .await
                .with_context(|| format!("embedding failed for {}", item_id))?;
            vectors.extend(batch_vectors);
            self.emit(
                job_id,
                &item_id,
                ProcessingStage::Embedding,
                vectors.len(),
                chunks.len(),
                None,
            );
        }

        // Stage 3: storing.
        let mut points: Vec<VectorPoint> = Vec::with_capacity(chunks.len());
        let mut seen: HashSet<String> = HashSet::new();
        let now = Utc::now();
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if self.config.builder.dedup && !seen.insert(chunk.base.content_hash.clone()) {
                result.duplicate_chunks += 1;
                continue;
            }
            points.push(build_point(chunk, vector, &account_number, now));
        }

        match self.store.batch_upsert(points.clone()).await {
            Ok(stored) => {
                result.successful_chunks = stored;
                result.vector_ids = points.iter().map(|p| p.id.clone()).collect();
            }
            Err(batch_err) => {
                // Retry one by one to isolate which points fail.
                warn!(item = %item_id, error = %batch_err, "batch upsert failed, retrying per point");
                for point in points {
                    let id = point.id.clone();
                    match self.store.upsert(point).await {
                        Ok(()) => {
                            result.successful_chunks += 1;
                            result.vector_ids.push(id);
                        }
                        Err(e) => {
                            result.failed_chunks += 1;
                            result.errors.push(ChunkError::new(
                                "storing",
                                Some(id),
                                e.to_string(),
                            ));
                        }
                    }
                }
            }
        }
        self.emit(
            job_id,
            &item_id,
            ProcessingStage::Storing,
            result.successful_chunks,
            result.total_chunks,
            None,
        );

        // Stage 4: completed.
        result.elapsed_ms = start.elapsed().as_millis() as u64;
        self.emit(
            job_id,
            &item_id,
            ProcessingStage::Completed,
            result.total_chunks,
            result.total_chunks,
            None,
        );
        info!(
            item = %item_id,
            stored = result.successful_chunks,
            duplicates = result.duplicate_chunks,
            failed = result.failed_chunks,
            elapsed_ms = result.elapsed_ms,
            "item processed"
        );
        Ok(result)
    }

    /// Run the item's chunker; returns the owning account number and
    /// the produced chunks. Recoverable chunker errors land on the
    /// result.
    fn chunk_item(
        &self,
        item: &BatchItem,
        result: &mut ChunkProcessingResult,
    ) -> Result<(String, Vec<Chunk>)> {
        match item {
            BatchItem::Document {
                account_number,
                document,
            } => {
                let out = self
                    .document_chunker
                    .chunk_document(document, &self.config.document);
                result.errors.extend(out.errors);
                result.warnings.extend(out.warnings);
                Ok((account_number.clone(), out.chunks))
            }
            BatchItem::Account(account) => {
                let out = self
                    .account_chunker
                    .chunk_account(account, &self.config.account);
                result.errors.extend(out.errors);
                result.warnings.extend(out.warnings);
                Ok((account.account_number.clone(), out.chunks))
            }
            BatchItem::Asset {
                account_number,
                document,
                metadata,
            } => {
                let out = self
                    .asset_chunker
                    .chunk_asset(document, metadata, &self.config.asset);
                result.errors.extend(out.errors);
                result.warnings.extend(out.warnings);
                Ok((account_number.clone(), out.chunks))
            }
        }
    }

    // ============ Batch pipeline + job registry ============

    /// Submit a batch job. Returns the job's initial snapshot
    /// immediately; work runs on a spawned task. Fails fast when the
    /// registry is at capacity.
    pub fn process_batch(self: Arc<Self>, items: Vec<BatchItem>) -> Result<ChunkProcessingJob> {
        if items.is_empty() {
            bail!("batch contains no items");
        }
        {
            let jobs = self.jobs.read();
            if jobs.len() >= self.config.builder.max_jobs {
                bail!(
                    "job registry at capacity ({}); sweep old jobs first",
                    self.config.builder.max_jobs
                );
            }
        }

        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let total = items.len();
        let job = ChunkProcessingJob {
            job_id: job_id.clone(),
            status: JobStatus::Pending,
            progress: JobProgress {
                stage: ProcessingStage::Chunking,
                processed: 0,
                total,
                percentage: 0.0,
                eta_ms: None,
                errors: 0,
                warnings: 0,
            },
            created_at: now,
            updated_at: now,
            results: Vec::new(),
        };
        self.jobs.write().insert(job_id.clone(), job.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags.write().insert(job_id.clone(), cancel.clone());

        tokio::spawn(async move {
            self.run_batch(job_id, items, cancel).await;
        });

        Ok(job)
    }

    async fn run_batch(&self, job_id: String, items: Vec<BatchItem>, cancel: Arc<AtomicBool>) {
        let total = items.len();
        let start = Instant::now();
        self.update_job(&job_id, |job| {
            job.status = transition(job.status, JobStatus::Running);
        });

        let concurrency = self.config.builder.concurrency.max(1);
        let mut iter = items.into_iter();
        let mut processed = 0usize;
        let mut succeeded = 0usize;

        loop {
            // Cooperative cancellation, checked between sub-batches.
            if cancel.load(Ordering::SeqCst) {
                self.update_job(&job_id, |job| {
                    job.status = transition(job.status, JobStatus::Cancelled);
                });
                info!(job = %job_id, processed, total, "job cancelled");
                return;
            }

            let sub_batch: Vec<BatchItem> = iter.by_ref().take(concurrency).collect();
            if sub_batch.is_empty() {
                break;
            }

            let mut in_flight = FuturesUnordered::new();
            for item in sub_batch {
                let jid = job_id.clone();
                in_flight.push(async move {
                    let item_id = item.label();
                    let outcome = self.process_item(Some(jid.as_str()), &item).await;
                    (item_id, outcome)
                });
            }

            while let Some((item_id, outcome)) = in_flight.next().await {
                processed += 1;
                let elapsed = start.elapsed().as_millis() as u64;
                if outcome.is_ok() {
                    succeeded += 1;
                }
                self.update_job(&job_id, |job| {
                    match &outcome {
                        Ok(result) => {
                            job.progress.errors += result.errors.len();
                            job.progress.warnings += result.warnings.len();
                        }
                        Err(_) => job.progress.errors += 1,
                    }
                    job.results.push(BatchItemResult {
                        item_id,
                        result: outcome.map_err(|e| format!("{:#}", e)),
                    });
                    job.progress.processed = processed;
                    job.progress.percentage = percentage(processed, total);
                    job.progress.eta_ms = eta_ms(elapsed, processed, total);
                });
            }
        }

        self.update_job(&job_id, |job| {
            job.progress.stage = ProcessingStage::Completed;
            let outcome = if succeeded == 0 {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            job.status = transition(job.status, outcome);
        });
        info!(job = %job_id, succeeded, total, "job finished");
    }

    fn update_job(&self, job_id: &str, f: impl FnOnce(&mut ChunkProcessingJob)) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            f(job);
            job.updated_at = Utc::now();
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<ChunkProcessingJob> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Request cooperative cancellation. Returns `false` when the job
    /// is unknown or already terminal.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let jobs = self.jobs.read();
        let Some(job) = jobs.get(job_id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }
        if let Some(flag) = self.cancel_flags.read().get(job_id) {
            flag.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Remove terminal jobs untouched for longer than `older_than`.
    /// Callers schedule this; there is no embedded cleanup timer.
    pub fn sweep_jobs(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        let swept: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| job.status.is_terminal() && job.updated_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &swept {
            jobs.remove(id);
        }
        let mut flags = self.cancel_flags.write();
        for id in &swept {
            flags.remove(id);
        }
        before - jobs.len()
    }
}

/// Scope a chunk's vector is stored under.
pub fn scope_for(kind: &ChunkKind) -> Scope {
    match kind {
        ChunkKind::Document(_) | ChunkKind::Asset(_) => Scope::Document,
        ChunkKind::Account(info) => match info.chunk_type {
            AccountChunkType::Contacts => Scope::Contact,
            AccountChunkType::Technologies => Scope::Technology,
            AccountChunkType::Notes => Scope::Insight,
            AccountChunkType::Summary
            | AccountChunkType::Opportunities
            | AccountChunkType::General => Scope::Account,
        },
    }
}

fn source_type_for(kind: &ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Document(_) => "document",
        ChunkKind::Account(_) => "account",
        ChunkKind::Asset(_) => "asset",
    }
}

fn build_point(
    chunk: &Chunk,
    vector: Vec<f32>,
    account_number: &str,
    now: DateTime<Utc>,
) -> VectorPoint {
    let scope = scope_for(&chunk.kind);
    let extra = match serde_json::to_value(&chunk.kind) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    VectorPoint {
        id: point_id(account_number, scope, &chunk.base.content_hash),
        vector,
        payload: VectorMetadata {
            scope,
            account_number: account_number.to_string(),
            source_type: source_type_for(&chunk.kind).to_string(),
            content_hash: chunk.base.content_hash.clone(),
            token_count: chunk.base.token_count,
            created_at: now,
            updated_at: now,
            extra,
        },
    }
}
