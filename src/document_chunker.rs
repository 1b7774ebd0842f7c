//! Block-aware document chunking.
//!
//! Walks a [`ParsedDocument`]'s block tree, renders each block to text
//! appropriate to its type (tables as pipe-joined rows, lists as
//! numbered or bulleted lines), and routes the text through the
//! splitter. Small structured blocks are kept whole. One bad block is
//! recorded and skipped; it never aborts the document.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{
    Block, BlockContent, BlockType, Chunk, ChunkError, ChunkKind, DocumentInfo, ParsedDocument,
    TextChunk,
};
use crate::splitter::{count_tokens, SplitOptions, TextSplitter};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentChunkOptions {
    pub split: SplitOptions,
    /// Non-text blocks at or below this many characters are kept as a
    /// single chunk instead of being split.
    pub max_block_size: usize,
    /// Merge consecutive same-type chunks whose combined length stays
    /// under `split.chunk_size`.
    pub merge_chunks: bool,
}

impl Default for DocumentChunkOptions {
    fn default() -> Self {
        Self {
            split: SplitOptions::default(),
            max_block_size: 1200,
            merge_chunks: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentChunkResult {
    pub chunks: Vec<Chunk>,
    pub errors: Vec<ChunkError>,
    pub warnings: Vec<String>,
}

/// Coarse document complexity rating, derived from size and block mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct DocumentStats {
    pub total_blocks: usize,
    pub block_type_counts: BTreeMap<String, usize>,
    pub total_characters: usize,
    pub estimated_chunks: usize,
    pub complexity: Complexity,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentChunker {
    splitter: TextSplitter,
}

impl DocumentChunker {
    pub fn new() -> Self {
        Self {
            splitter: TextSplitter::new(),
        }
    }

    pub fn chunk_document(
        &self,
        doc: &ParsedDocument,
        opts: &DocumentChunkOptions,
    ) -> DocumentChunkResult {
        let mut result = DocumentChunkResult::default();
        let document_id = doc.document_id();

        for block in &doc.blocks {
            match self.chunk_block(block, doc, &document_id, opts) {
                Ok(chunks) => {
                    if chunks.is_empty() {
                        result
                            .warnings
                            .push(format!("block {} produced no text", block.id));
                    }
                    result.chunks.extend(chunks);
                }
                Err(e) => {
                    result.errors.push(ChunkError::new(
                        "chunking",
                        Some(block.id.clone()),
                        e.to_string(),
                    ));
                }
            }
        }

        if opts.merge_chunks {
            result.chunks = merge_same_type(result.chunks, opts.split.chunk_size);
        }

        let total = result.chunks.len();
        for (i, chunk) in result.chunks.iter_mut().enumerate() {
            if let ChunkKind::Document(info) = &mut chunk.kind {
                info.chunk_index = i;
                info.total_chunks = total;
            }
        }

        debug!(
            document = %doc.metadata.file_name,
            chunks = total,
            errors = result.errors.len(),
            "chunked document"
        );
        result
    }

    fn chunk_block(
        &self,
        block: &Block,
        doc: &ParsedDocument,
        document_id: &str,
        opts: &DocumentChunkOptions,
    ) -> Result<Vec<Chunk>> {
        let text = render_block(block)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let block_type = block_type_of(&block.content);

        let info = |chunk_index: usize| DocumentInfo {
            block_id: block.id.clone(),
            document_id: document_id.to_string(),
            document_name: doc.metadata.file_name.clone(),
            document_type: doc.metadata.file_type.clone(),
            chunk_index,
            total_chunks: 0,
            block_type,
            page_number: block.metadata.page_number,
            title: block.title.clone(),
            confidence: block.metadata.confidence,
        };

        // Small structured blocks stay intact; splitting a short table
        // or list destroys more meaning than it saves.
        if block_type != BlockType::Text && text.len() <= opts.max_block_size {
            let base = TextChunk::new(text.clone(), count_tokens(&text), 0, text.len(), 1);
            return Ok(vec![Chunk {
                base,
                kind: ChunkKind::Document(info(0)),
            }]);
        }

        let split_opts = if block_type == BlockType::Text {
            opts.split.clone()
        } else {
            // Structured content has no sentence flow; split on the
            // separator ladder with a lighter overlap.
            SplitOptions {
                preserve_sentences: false,
                chunk_overlap: opts.split.chunk_overlap / 4,
                ..opts.split.clone()
            }
        };

        Ok(self
            .splitter
            .split(&text, &split_opts)
            .into_iter()
            .enumerate()
            .map(|(i, base)| Chunk {
                base,
                kind: ChunkKind::Document(info(i)),
            })
            .collect())
    }

    pub fn document_stats(&self, doc: &ParsedDocument, opts: &DocumentChunkOptions) -> DocumentStats {
        let mut block_type_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_characters = 0usize;
        let mut structured = 0usize;

        for block in &doc.blocks {
            let bt = block_type_of(&block.content);
            *block_type_counts.entry(bt.as_str().to_string()).or_default() += 1;
            if bt != BlockType::Text {
                structured += 1;
            }
            if let Ok(text) = render_block(block) {
                total_characters += text.len();
            }
        }

        let complexity = if total_characters > 20_000 || structured > 10 {
            Complexity::High
        } else if total_characters > 5_000 || structured > 0 {
            Complexity::Medium
        } else {
            Complexity::Low
        };

        DocumentStats {
            total_blocks: doc.blocks.len(),
            block_type_counts,
            total_characters,
            estimated_chunks: total_characters.div_ceil(opts.split.chunk_size.max(1)).max(
                if total_characters == 0 { 0 } else { 1 },
            ),
            complexity,
        }
    }
}

fn block_type_of(content: &BlockContent) -> BlockType {
    match content {
        BlockContent::Text { .. } => BlockType::Text,
        BlockContent::Table { .. } => BlockType::Table,
        BlockContent::List { .. } => BlockType::List,
        BlockContent::Heading { .. } => BlockType::Heading,
    }
}

/// Render a block to the text that gets embedded.
fn render_block(block: &Block) -> Result<String> {
    let body = match &block.content {
        BlockContent::Text { text } => text.clone(),
        BlockContent::Heading { text, .. } => text.clone(),
        BlockContent::Table { headers, rows } => {
            if headers.is_empty() && rows.is_empty() {
                bail!("table block has no headers or rows");
            }
            let width = headers.len();
            let mut lines = Vec::with_capacity(rows.len() + 1);
            if !headers.is_empty() {
                lines.push(headers.join(" | "));
            }
            for row in rows {
                if width > 0 && row.len() != width {
                    bail!(
                        "table row has {} cells, expected {}",
                        row.len(),
                        width
                    );
                }
                lines.push(row.join(" | "));
            }
            lines.join("\n")
        }
        BlockContent::List { items, ordered } => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                if *ordered {
                    format!("{}. {}", i + 1, item)
                } else {
                    format!("- {}", item)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };

    Ok(match &block.title {
        Some(title) if !title.trim().is_empty() => format!("{}\n{}", title, body),
        _ => body,
    })
}

/// Combine consecutive chunks of the same block type when the joined
/// text stays under `chunk_size`.
fn merge_same_type(chunks: Vec<Chunk>, chunk_size: usize) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mergeable = match (merged.last(), &chunk.kind) {
            (Some(prev), ChunkKind::Document(info)) => match &prev.kind {
                ChunkKind::Document(prev_info) => {
                    prev_info.block_type == info.block_type
                        && prev.base.text.len() + 2 + chunk.base.text.len() <= chunk_size
                }
                _ => false,
            },
            _ => false,
        };
        if mergeable {
            let prev = merged.last_mut().unwrap();
            let joined = format!("{}\n\n{}", prev.base.text, chunk.base.text);
            prev.base = TextChunk::new(
                joined.clone(),
                count_tokens(&joined),
                prev.base.start_index,
                chunk.base.end_index,
                prev.base.sentence_count + chunk.base.sentence_count,
            );
        } else {
            merged.push(chunk);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockMetadata, ParsedDocumentMetadata};

    fn doc(blocks: Vec<Block>) -> ParsedDocument {
        ParsedDocument {
            metadata: ParsedDocumentMetadata {
                file_name: "report.pdf".into(),
                file_size: 1024,
                file_type: "pdf".into(),
                total_blocks: blocks.len(),
                processing_time_ms: 5,
                document_id: Some("doc-1".into()),
                errors: vec![],
                warnings: vec![],
            },
            blocks,
        }
    }

    fn text_block(id: &str, text: &str) -> Block {
        Block {
            id: id.into(),
            title: None,
            content: BlockContent::Text { text: text.into() },
            metadata: BlockMetadata::default(),
            raw_text: None,
        }
    }

    #[test]
    fn test_empty_document_yields_no_chunks_no_errors() {
        let chunker = DocumentChunker::new();
        let result = chunker.chunk_document(&doc(vec![]), &DocumentChunkOptions::default());
        assert!(result.chunks.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_table_renders_as_pipe_rows_and_stays_whole() {
        let chunker = DocumentChunker::new();
        let block = Block {
            id: "b1".into(),
            title: Some("Pricing".into()),
            content: BlockContent::Table {
                headers: vec!["Tier".into(), "Price".into()],
                rows: vec![
                    vec!["Basic".into(), "$10".into()],
                    vec!["Pro".into(), "$50".into()],
                ],
            },
            metadata: BlockMetadata::default(),
            raw_text: None,
        };
        let result = chunker.chunk_document(&doc(vec![block]), &DocumentChunkOptions::default());
        assert_eq!(result.chunks.len(), 1);
        let text = &result.chunks[0].base.text;
        assert!(text.contains("Pricing"));
        assert!(text.contains("Tier | Price"));
        assert!(text.contains("Pro | $50"));
        match &result.chunks[0].kind {
            ChunkKind::Document(info) => assert_eq!(info.block_type, BlockType::Table),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_ragged_table_row_recorded_not_fatal() {
        let chunker = DocumentChunker::new();
        let bad = Block {
            id: "b1".into(),
            title: None,
            content: BlockContent::Table {
                headers: vec!["A".into(), "B".into()],
                rows: vec![vec!["only one cell".into()]],
            },
            metadata: BlockMetadata::default(),
            raw_text: None,
        };
        let good = text_block("b2", "This block still gets chunked.");
        let result =
            chunker.chunk_document(&doc(vec![bad, good]), &DocumentChunkOptions::default());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].unit.as_deref(), Some("b1"));
        assert_eq!(result.chunks.len(), 1);
    }

    #[test]
    fn test_ordered_and_unordered_list_rendering() {
        let chunker = DocumentChunker::new();
        let ordered = Block {
            id: "b1".into(),
            title: None,
            content: BlockContent::List {
                items: vec!["first".into(), "second".into()],
                ordered: true,
            },
            metadata: BlockMetadata::default(),
            raw_text: None,
        };
        let unordered = Block {
            id: "b2".into(),
            title: None,
            content: BlockContent::List {
                items: vec!["apples".into()],
                ordered: false,
            },
            metadata: BlockMetadata::default(),
            raw_text: None,
        };
        let result =
            chunker.chunk_document(&doc(vec![ordered, unordered]), &DocumentChunkOptions::default());
        assert_eq!(result.chunks.len(), 2);
        assert!(result.chunks[0].base.text.contains("1. first"));
        assert!(result.chunks[0].base.text.contains("2. second"));
        assert!(result.chunks[1].base.text.contains("- apples"));
    }

    #[test]
    fn test_chunk_index_and_total_assigned_after_all_blocks() {
        let chunker = DocumentChunker::new();
        let blocks = vec![
            text_block("b1", "First block sentence."),
            text_block("b2", "Second block sentence."),
            text_block("b3", "Third block sentence."),
        ];
        let result = chunker.chunk_document(&doc(blocks), &DocumentChunkOptions::default());
        assert_eq!(result.chunks.len(), 3);
        for (i, chunk) in result.chunks.iter().enumerate() {
            match &chunk.kind {
                ChunkKind::Document(info) => {
                    assert_eq!(info.chunk_index, i);
                    assert_eq!(info.total_chunks, 3);
                    assert_eq!(info.document_id, "doc-1");
                }
                other => panic!("unexpected kind: {:?}", other),
            }
        }
    }

    #[test]
    fn test_merge_pass_combines_consecutive_text_chunks() {
        let chunker = DocumentChunker::new();
        let blocks = vec![
            text_block("b1", "Short one."),
            text_block("b2", "Short two."),
            Block {
                id: "b3".into(),
                title: None,
                content: BlockContent::Heading {
                    text: "A heading".into(),
                    level: 2,
                },
                metadata: BlockMetadata::default(),
                raw_text: None,
            },
        ];
        let opts = DocumentChunkOptions {
            merge_chunks: true,
            ..DocumentChunkOptions::default()
        };
        let result = chunker.chunk_document(&doc(blocks), &opts);
        // The two text chunks merge; the heading keeps its own chunk.
        assert_eq!(result.chunks.len(), 2);
        assert!(result.chunks[0].base.text.contains("Short one."));
        assert!(result.chunks[0].base.text.contains("Short two."));
    }

    #[test]
    fn test_document_stats_complexity() {
        let chunker = DocumentChunker::new();
        let opts = DocumentChunkOptions::default();

        let simple = doc(vec![text_block("b1", "Tiny.")]);
        let stats = chunker.document_stats(&simple, &opts);
        assert_eq!(stats.complexity, Complexity::Low);
        assert_eq!(stats.block_type_counts["text"], 1);

        let long_text = "word ".repeat(5_000);
        let big = doc(vec![text_block("b1", &long_text)]);
        let stats = chunker.document_stats(&big, &opts);
        assert_eq!(stats.complexity, Complexity::High);
        assert!(stats.estimated_chunks > 1);
    }

    #[test]
    fn test_empty_block_recorded_as_warning() {
        let chunker = DocumentChunker::new();
        let result = chunker.chunk_document(
            &doc(vec![text_block("b1", "   ")]),
            &DocumentChunkOptions::default(),
        );
        assert!(result.chunks.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("b1"));
    }
}
