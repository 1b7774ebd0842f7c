//! # vecpipe
//!
//! A document-to-vector pipeline: token-bounded chunking, embedding
//! orchestration, and vector storage and search.
//!
//! Parsed documents, CRM account records, and sales-collateral assets
//! are chunked into self-describing spans, embedded through a pluggable
//! provider, and upserted into a vector database under deterministic
//! point ids so re-processing identical content is idempotent.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Chunkers       │──▶│ ChunkBuilder │──▶│ VectorStore │
//! │ doc/acct/asset │   │ embed+store  │   │ (HTTP db)   │
//! └────────────────┘   └──────┬───────┘   └──────┬──────┘
//!                             │                  │
//!                             ▼                  ▼
//!                      broadcast events    VectorSearch
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`splitter`] | Token-bounded text splitting |
//! | [`document_chunker`] | Block-aware document chunking |
//! | [`account_chunker`] | Account record chunking |
//! | [`asset_chunker`] | Sales-collateral chunking and scoring |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_db`] | Retrying vector-database client |
//! | [`store`] | Collection-scoped vector storage |
//! | [`vsearch`] | Filtered search with a result cache |
//! | [`progress`] | Progress event types |
//! | [`builder`] | Pipeline orchestration and batch jobs |

pub mod account_chunker;
pub mod asset_chunker;
pub mod builder;
pub mod config;
pub mod document_chunker;
pub mod embedding;
pub mod models;
pub mod progress;
pub mod splitter;
pub mod store;
pub mod vector_db;
pub mod vsearch;

pub use builder::{BatchItem, ChunkBuilder, ChunkProcessingJob, ChunkProcessingResult, JobStatus};
pub use config::{load_config, PipelineConfig};
pub use models::{Chunk, ChunkKind, Scope, TextChunk, VectorPoint};
pub use store::VectorStore;
pub use vsearch::{SearchFilter, SearchOptions, VectorSearch};
