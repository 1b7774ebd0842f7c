//! Core data models used throughout the pipeline.
//!
//! These types represent the parsed inputs (documents, account records,
//! asset metadata), the chunks produced by the chunkers, and the vector
//! points stored in and retrieved from the vector database.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============ Hashing ============

/// SHA-256 hex digest of a chunk's text. Used as the dedup key and as
/// part of the deterministic vector point id.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic vector point id derived from `(account_number, scope,
/// content_hash)`. Re-processing identical content yields the same id,
/// which makes upserts idempotent.
pub fn point_id(account_number: &str, scope: Scope, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_number.as_bytes());
    hasher.update(scope.as_str().as_bytes());
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Chunks ============

/// A bounded span of text plus sizing metadata, produced by the splitter.
///
/// Immutable once created: chunks are regenerated, never mutated, so
/// `content_hash` always matches `text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub token_count: usize,
    /// Byte offset of the chunk's own region in the source text
    /// (overlap prefixes are not part of the region).
    pub start_index: usize,
    pub end_index: usize,
    pub sentence_count: usize,
    pub content_hash: String,
}

impl TextChunk {
    pub fn new(
        text: String,
        token_count: usize,
        start_index: usize,
        end_index: usize,
        sentence_count: usize,
    ) -> Self {
        let content_hash = content_hash(&text);
        Self {
            text,
            token_count,
            start_index,
            end_index,
            sentence_count,
            content_hash,
        }
    }
}

/// Block type of the source material a document chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Table,
    List,
    Heading,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::List => "list",
            BlockType::Heading => "heading",
        }
    }
}

/// Which section of an account record a chunk was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountChunkType {
    Summary,
    Contacts,
    Technologies,
    Opportunities,
    Notes,
    General,
}

impl AccountChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountChunkType::Summary => "summary",
            AccountChunkType::Contacts => "contacts",
            AccountChunkType::Technologies => "technologies",
            AccountChunkType::Opportunities => "opportunities",
            AccountChunkType::Notes => "notes",
            AccountChunkType::General => "general",
        }
    }
}

/// Retrieval priority assigned to an account chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// One-step boost for high-value (GEM) accounts: `low` becomes
    /// `medium`; `medium` and `high` are unchanged. Guarantees a GEM
    /// account never carries a `low` priority chunk.
    pub fn elevated_for_gem(self, gem: bool) -> Priority {
        if gem && self == Priority::Low {
            Priority::Medium
        } else {
            self
        }
    }
}

/// Content category assigned to sales-collateral chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Overview,
    Benefits,
    Features,
    Technical,
    Pricing,
    Contact,
    Other,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Overview => "overview",
            ContentCategory::Benefits => "benefits",
            ContentCategory::Features => "features",
            ContentCategory::Technical => "technical",
            ContentCategory::Pricing => "pricing",
            ContentCategory::Contact => "contact",
            ContentCategory::Other => "other",
        }
    }
}

/// Semantic category a stored vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Account,
    Contact,
    Technology,
    Document,
    Insight,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Account => "account",
            Scope::Contact => "contact",
            Scope::Technology => "technology",
            Scope::Document => "document",
            Scope::Insight => "insight",
        }
    }
}

/// Metadata carried by a chunk produced from a parsed document block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub block_id: String,
    pub document_id: String,
    pub document_name: String,
    pub document_type: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub block_type: BlockType,
    pub page_number: Option<u32>,
    pub title: Option<String>,
    /// Parser confidence for the source block, when reported.
    pub confidence: Option<f32>,
}

/// Metadata carried by a chunk produced from an account record section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_number: String,
    pub account_name: String,
    pub chunk_id: String,
    pub chunk_type: AccountChunkType,
    pub priority: Priority,
    pub context_keys: BTreeSet<String>,
}

/// Metadata carried by a sales-collateral chunk: the underlying document
/// chunk info plus categorization and relevance signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub document: DocumentInfo,
    pub asset_id: String,
    pub asset_type: AssetType,
    pub content_category: ContentCategory,
    pub relevance_score: f32,
    pub key_points: Vec<String>,
}

/// Kind-specific metadata, tagged so callers pattern-match instead of
/// duck-typing on optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkKind {
    Document(DocumentInfo),
    Account(AccountInfo),
    Asset(AssetInfo),
}

/// A produced chunk: the shared [`TextChunk`] base plus kind-specific
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub base: TextChunk,
    pub kind: ChunkKind,
}

// ============ Vector points ============

/// Payload stored alongside a vector. Kind-specific fields are folded in
/// as optional top-level keys via the flattened `extra` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub scope: Scope,
    pub account_number: String,
    pub source_type: String,
    pub content_hash: String,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A vector plus payload, keyed by a deterministic id (see [`point_id`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorMetadata,
}

/// A search hit: point id, similarity score, payload, and optionally the
/// stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: VectorMetadata,
    pub vector: Option<Vec<f32>>,
}

// ============ Errors recorded as data ============

/// A recoverable, per-unit failure recorded during chunking or storing.
///
/// These are data, not `Err`: one bad block/section/point must not abort
/// its siblings, so failures are collected and surfaced on the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkError {
    /// Pipeline stage the failure occurred in (e.g. `"chunking"`).
    pub stage: String,
    /// Identifier of the failed unit (block id, section name, point id).
    pub unit: Option<String>,
    pub message: String,
}

impl ChunkError {
    pub fn new(stage: impl Into<String>, unit: Option<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            unit,
            message: message.into(),
        }
    }
}

// ============ Parsed document input ============

/// Generic block-tree document produced by the (external) file parsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub blocks: Vec<Block>,
    pub metadata: ParsedDocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocumentMetadata {
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    pub file_type: String,
    #[serde(default)]
    pub total_blocks: usize,
    #[serde(default)]
    pub processing_time_ms: u64,
    /// Stable document id from the parser; derived from the file name
    /// when absent.
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ParsedDocument {
    /// The document id used on produced chunks: the parser-provided id,
    /// or a hash of the file name when the parser did not assign one.
    pub fn document_id(&self) -> String {
        match &self.metadata.document_id {
            Some(id) => id.clone(),
            None => content_hash(&self.metadata.file_name)[..16].to_string(),
        }
    }
}

/// A single parsed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: BlockContent,
    #[serde(default)]
    pub metadata: BlockMetadata,
    #[serde(default)]
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    Text { text: String },
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
    List { items: Vec<String>, ordered: bool },
    Heading { text: String, level: u8 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockMetadata {
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub slide_number: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

// ============ Account record input ============

/// CRM-style account record consumed by the account chunker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_number: String,
    pub account_name: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// High-value ("GEM") flag; affects chunk priorities.
    #[serde(default)]
    pub gem: bool,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub technologies: Vec<Technology>,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Opportunity {
    pub name: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub close_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ============ Asset metadata input ============

/// Kind of sales collateral; weights category classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Brochure,
    DataSheet,
    CaseStudy,
    Presentation,
    Whitepaper,
    Other,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Brochure => "brochure",
            AssetType::DataSheet => "data_sheet",
            AssetType::CaseStudy => "case_study",
            AssetType::Presentation => "presentation",
            AssetType::Whitepaper => "whitepaper",
            AssetType::Other => "other",
        }
    }
}

impl Default for AssetType {
    fn default() -> Self {
        AssetType::Other
    }
}

/// Business metadata for a sales-collateral asset, used for relevance
/// scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: String,
    #[serde(default)]
    pub asset_type: AssetType,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub target_audiences: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
}
