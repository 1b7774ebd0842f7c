//! Sales-collateral chunking.
//!
//! Delegates structural chunking to [`DocumentChunker`], then enhances
//! each chunk with a content category (keyword scoring weighted by
//! asset type), a relevance score driven by the asset's business
//! metadata, and extracted key points. Chunks under the configured
//! relevance floor are dropped, which can legitimately leave zero
//! chunks.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::document_chunker::{DocumentChunkOptions, DocumentChunker};
use crate::models::{
    AssetInfo, AssetMetadata, AssetType, BlockType, Chunk, ChunkError, ChunkKind, ContentCategory,
    DocumentInfo, ParsedDocument,
};
use crate::splitter::sentences;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetChunkOptions {
    pub document: DocumentChunkOptions,
    /// Chunks scoring below this are filtered from the result.
    pub min_relevance_score: f32,
}

impl Default for AssetChunkOptions {
    fn default() -> Self {
        Self {
            document: DocumentChunkOptions::default(),
            min_relevance_score: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct AssetChunkResult {
    pub chunks: Vec<Chunk>,
    pub content_categories: BTreeMap<String, usize>,
    pub key_points: Vec<String>,
    pub errors: Vec<ChunkError>,
    pub warnings: Vec<String>,
}

const CATEGORY_KEYWORDS: &[(ContentCategory, &[&str])] = &[
    (
        ContentCategory::Overview,
        &["overview", "introduction", "about", "summary", "mission", "who we are"],
    ),
    (
        ContentCategory::Benefits,
        &["benefit", "advantage", "value", "improve", "save", "roi", "outcome"],
    ),
    (
        ContentCategory::Features,
        &["feature", "capability", "functionality", "includes", "supports", "enables"],
    ),
    (
        ContentCategory::Technical,
        &[
            "specification",
            "architecture",
            "api",
            "protocol",
            "performance",
            "integration",
            "requirements",
            "technical",
        ],
    ),
    (
        ContentCategory::Pricing,
        &["price", "pricing", "cost", "subscription", "license", "tier", "quote"],
    ),
    (
        ContentCategory::Contact,
        &["contact", "phone", "email", "address", "sales", "reach us"],
    ),
];

static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+(.+)$").expect("bullet regex"));

const MAX_KEY_POINTS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct AssetChunker {
    document_chunker: DocumentChunker,
}

impl AssetChunker {
    pub fn new() -> Self {
        Self {
            document_chunker: DocumentChunker::new(),
        }
    }

    pub fn chunk_asset(
        &self,
        doc: &ParsedDocument,
        metadata: &AssetMetadata,
        opts: &AssetChunkOptions,
    ) -> AssetChunkResult {
        let structural = self.document_chunker.chunk_document(doc, &opts.document);

        let mut result = AssetChunkResult {
            errors: structural.errors,
            warnings: structural.warnings,
            ..AssetChunkResult::default()
        };

        for chunk in structural.chunks {
            let info = match chunk.kind {
                ChunkKind::Document(info) => info,
                other => {
                    result.errors.push(ChunkError::new(
                        "enhancement",
                        Some(chunk.base.content_hash.clone()),
                        format!("unexpected chunk kind: {:?}", other),
                    ));
                    continue;
                }
            };
            match enhance(&chunk.base.text, &info, metadata) {
                Ok(asset_info) => {
                    if asset_info.relevance_score < opts.min_relevance_score {
                        continue;
                    }
                    *result
                        .content_categories
                        .entry(asset_info.content_category.as_str().to_string())
                        .or_default() += 1;
                    for point in &asset_info.key_points {
                        if !result.key_points.contains(point) {
                            result.key_points.push(point.clone());
                        }
                    }
                    result.chunks.push(Chunk {
                        base: chunk.base,
                        kind: ChunkKind::Asset(asset_info),
                    });
                }
                Err(e) => {
                    result.errors.push(ChunkError::new(
                        "enhancement",
                        Some(info.block_id.clone()),
                        e.to_string(),
                    ));
                }
            }
        }

        debug!(
            asset = %metadata.asset_id,
            chunks = result.chunks.len(),
            "chunked asset"
        );
        result
    }
}

fn enhance(text: &str, info: &DocumentInfo, metadata: &AssetMetadata) -> Result<AssetInfo> {
    let category = classify(text, metadata.asset_type);
    let relevance = relevance_score(text, info, metadata, category);
    let key_points = extract_key_points(text, category);
    Ok(AssetInfo {
        document: info.clone(),
        asset_id: metadata.asset_id.clone(),
        asset_type: metadata.asset_type,
        content_category: category,
        relevance_score: relevance,
        key_points,
    })
}

/// Keyword-occurrence scoring across the category sets, with
/// asset-type-specific multipliers. A tie between the top categories
/// defaults to `other`, as does a text matching nothing.
fn classify(text: &str, asset_type: AssetType) -> ContentCategory {
    let lower = text.to_lowercase();
    let mut scores: Vec<(ContentCategory, f32)> = CATEGORY_KEYWORDS
        .iter()
        .map(|(category, keywords)| {
            let hits: usize = keywords.iter().map(|k| lower.matches(k).count()).sum();
            let score = hits as f32 * type_multiplier(asset_type, *category);
            (*category, score)
        })
        .collect();
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    match scores.as_slice() {
        [(best, score), (_, second), ..] if *score > 0.0 && score > second => *best,
        _ => ContentCategory::Other,
    }
}

fn type_multiplier(asset_type: AssetType, category: ContentCategory) -> f32 {
    match (asset_type, category) {
        (AssetType::DataSheet, ContentCategory::Technical) => 1.5,
        (AssetType::CaseStudy, ContentCategory::Benefits) => 1.5,
        (AssetType::Whitepaper, ContentCategory::Technical) => 1.25,
        (AssetType::Brochure, ContentCategory::Overview) => 1.25,
        (AssetType::Presentation, ContentCategory::Benefits) => 1.25,
        _ => 1.0,
    }
}

/// Additive relevance score in `[0, 1]`: 0.5 base, capped boosts per
/// metadata term group, category and heading bonuses, parser
/// confidence.
fn relevance_score(
    text: &str,
    info: &DocumentInfo,
    metadata: &AssetMetadata,
    category: ContentCategory,
) -> f32 {
    let lower = text.to_lowercase();
    let term_boost = |terms: &[String], per: f32, cap: f32| -> f32 {
        let matched = terms
            .iter()
            .filter(|t| !t.trim().is_empty() && lower.contains(&t.to_lowercase()))
            .count();
        (matched as f32 * per).min(cap)
    };

    let mut score = 0.5;
    score += term_boost(&metadata.industries, 0.05, 0.15);
    score += term_boost(&metadata.target_audiences, 0.05, 0.10);
    score += term_boost(&metadata.technologies, 0.05, 0.15);
    score += term_boost(&metadata.products, 0.05, 0.15);
    if matches!(category, ContentCategory::Overview | ContentCategory::Benefits) {
        score += 0.10;
    }
    if info.block_type == BlockType::Heading {
        score += 0.05;
    }
    if let Some(confidence) = info.confidence {
        score += 0.10 * confidence.clamp(0.0, 1.0);
    }
    score.clamp(0.0, 1.0)
}

/// Bullet/numbered lines plus sentences containing the category's
/// keywords, deduplicated and capped.
fn extract_key_points(text: &str, category: ContentCategory) -> Vec<String> {
    let mut points: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if candidate.len() < 8 || points.len() >= MAX_KEY_POINTS {
            return;
        }
        if !points.iter().any(|p| p == candidate) {
            points.push(candidate.to_string());
        }
    };

    for cap in BULLET_RE.captures_iter(text) {
        push(&cap[1]);
    }

    if let Some((_, keywords)) = CATEGORY_KEYWORDS.iter().find(|(c, _)| *c == category) {
        for sentence in sentences(text) {
            let lower = sentence.to_lowercase();
            if keywords.iter().any(|k| lower.contains(k)) {
                push(sentence);
            }
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Block, BlockContent, BlockMetadata, ParsedDocumentMetadata};

    fn doc(text: &str) -> ParsedDocument {
        ParsedDocument {
            blocks: vec![Block {
                id: "b1".into(),
                title: None,
                content: BlockContent::Text { text: text.into() },
                metadata: BlockMetadata::default(),
                raw_text: None,
            }],
            metadata: ParsedDocumentMetadata {
                file_name: "sheet.pdf".into(),
                file_size: 0,
                file_type: "pdf".into(),
                total_blocks: 1,
                processing_time_ms: 0,
                document_id: Some("asset-doc".into()),
                errors: vec![],
                warnings: vec![],
            },
        }
    }

    fn meta(asset_type: AssetType) -> AssetMetadata {
        AssetMetadata {
            asset_id: "asset-1".into(),
            asset_type,
            industries: vec!["manufacturing".into()],
            target_audiences: vec!["engineers".into()],
            technologies: vec!["kubernetes".into()],
            products: vec!["WidgetOS".into()],
        }
    }

    #[test]
    fn test_technical_keywords_classify_data_sheet() {
        let category = classify(
            "Full specification and architecture details, including API protocol requirements.",
            AssetType::DataSheet,
        );
        assert_eq!(category, ContentCategory::Technical);
    }

    #[test]
    fn test_no_keywords_defaults_to_other() {
        let category = classify("Nothing remarkable here at all.", AssetType::Brochure);
        assert_eq!(category, ContentCategory::Other);
    }

    #[test]
    fn test_tie_defaults_to_other() {
        // One benefits keyword and one pricing keyword at equal weight.
        let category = classify("A clear benefit at a fair price.", AssetType::Other);
        assert_eq!(category, ContentCategory::Other);
    }

    #[test]
    fn test_relevance_boosted_by_metadata_terms() {
        let info = DocumentInfo {
            block_id: "b1".into(),
            document_id: "d".into(),
            document_name: "sheet.pdf".into(),
            document_type: "pdf".into(),
            chunk_index: 0,
            total_chunks: 1,
            block_type: BlockType::Text,
            page_number: None,
            title: None,
            confidence: None,
        };
        let metadata = meta(AssetType::Other);
        let plain = relevance_score("nothing related", &info, &metadata, ContentCategory::Other);
        let boosted = relevance_score(
            "WidgetOS on kubernetes for manufacturing engineers",
            &info,
            &metadata,
            ContentCategory::Other,
        );
        assert!((plain - 0.5).abs() < f32::EPSILON);
        assert!(boosted > plain);
        assert!(boosted <= 1.0);
    }

    #[test]
    fn test_key_points_from_bullets_capped_and_deduped() {
        let text = "- First point here\n- Second point here\n- First point here\n\
                    - Third point here\n- Fourth point here\n- Fifth point here\n- Sixth point here";
        let points = extract_key_points(text, ContentCategory::Other);
        assert_eq!(points.len(), MAX_KEY_POINTS);
        assert_eq!(points[0], "First point here");
        assert_eq!(points.iter().filter(|p| *p == "First point here").count(), 1);
    }

    #[test]
    fn test_indicator_sentences_become_key_points() {
        let points = extract_key_points(
            "The main benefit is lower cost of ownership. The sky is blue.",
            ContentCategory::Benefits,
        );
        assert_eq!(points.len(), 1);
        assert!(points[0].contains("benefit"));
    }

    #[test]
    fn test_min_relevance_filter_can_empty_the_result() {
        let chunker = AssetChunker::new();
        let document = doc("Completely unrelated filler text with no signal.");
        let opts = AssetChunkOptions {
            min_relevance_score: 0.9,
            ..AssetChunkOptions::default()
        };
        let result = chunker.chunk_asset(&document, &meta(AssetType::Brochure), &opts);
        assert!(result.chunks.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_higher_floor_never_yields_more_chunks() {
        let chunker = AssetChunker::new();
        let document = doc("WidgetOS overview for manufacturing. Clear benefits and value.");
        let metadata = meta(AssetType::Brochure);
        let lax = chunker.chunk_asset(&document, &metadata, &AssetChunkOptions::default());
        let strict = chunker.chunk_asset(
            &document,
            &metadata,
            &AssetChunkOptions {
                min_relevance_score: 0.9,
                ..AssetChunkOptions::default()
            },
        );
        assert!(strict.chunks.len() <= lax.chunks.len());
    }

    #[test]
    fn test_enhanced_chunks_carry_asset_kind() {
        let chunker = AssetChunker::new();
        let document = doc("Overview of WidgetOS. The summary covers the mission and value.");
        let result =
            chunker.chunk_asset(&document, &meta(AssetType::Brochure), &AssetChunkOptions::default());
        assert_eq!(result.chunks.len(), 1);
        match &result.chunks[0].kind {
            ChunkKind::Asset(info) => {
                assert_eq!(info.asset_id, "asset-1");
                assert_eq!(info.asset_type, AssetType::Brochure);
                assert_eq!(info.document.document_id, "asset-doc");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
        assert!(!result.content_categories.is_empty());
    }
}
