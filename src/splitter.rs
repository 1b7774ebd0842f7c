//! Token-bounded text splitter.
//!
//! Splits raw text into [`TextChunk`]s that respect a character soft cap
//! (`chunk_size`) and a token hard cap (`max_tokens`). Two paths:
//!
//! - **Sentence-preserving** (default): sentences are accumulated
//!   greedily; a chunk closes when the next sentence would exceed the
//!   budget, and the next chunk is seeded with a word-aligned overlap
//!   suffix of the closed one.
//! - **Recursive**: separators are tried in priority order (paragraph
//!   break, line break, sentence punctuation, clause punctuation,
//!   space); the text is split near its midpoint on the best separator
//!   and both halves are processed until every leaf fits `chunk_size`.
//!   Overlap is reapplied as a second pass.
//!
//! Token counts use the `cl100k_base` sub-word tokenizer; if the
//! tokenizer cannot be constructed, a chars/4 estimate is used instead
//! of failing the split. A single sentence that alone exceeds the
//! budget is recursively split rather than dropped, so output chunks
//! are best-effort (not guaranteed) under `max_tokens` for pathological
//! single sentences.

use once_cell::sync::Lazy;
use serde::Deserialize;
use tiktoken_rs::CoreBPE;

use crate::models::TextChunk;

static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());

/// Fallback chars-per-token ratio when the tokenizer is unavailable.
const CHARS_PER_TOKEN: usize = 4;

/// Count tokens with the sub-word tokenizer, falling back to a
/// character-based estimate.
pub fn count_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(CHARS_PER_TOKEN),
    }
}

/// Options controlling a split. All fields have serde defaults so the
/// struct can be embedded in the TOML config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    /// Character soft cap per chunk.
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk to the start of the
    /// next.
    pub chunk_overlap: usize,
    /// Token hard cap per chunk (best-effort for single oversized
    /// sentences).
    pub max_tokens: usize,
    /// Chunks whose trimmed text is shorter than this are filtered out.
    pub min_chunk_size: usize,
    pub preserve_sentences: bool,
    /// Separators in priority order, most-preferred first. The empty
    /// string is the bisect-at-midpoint fallback.
    pub separators: Vec<String>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_tokens: 512,
            min_chunk_size: 0,
            preserve_sentences: true,
            separators: default_separators(),
        }
    }
}

fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "? ", "! ", "; ", ", ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Summary statistics for a text, computed without producing chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitStats {
    pub characters: usize,
    pub estimated_tokens: usize,
    pub estimated_chunks: usize,
    pub sentence_count: usize,
}

/// Splits raw text into token-bounded chunks. Stateless; options are
/// passed per call.
#[derive(Debug, Clone, Default)]
pub struct TextSplitter;

impl TextSplitter {
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into chunks. Empty or whitespace-only input yields
    /// an empty sequence, not an error.
    pub fn split(&self, text: &str, opts: &SplitOptions) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut chunks = if opts.preserve_sentences {
            self.split_sentence_preserving(text, opts)
        } else {
            self.split_recursive(text, 0, opts)
        };
        if opts.min_chunk_size > 0 {
            chunks.retain(|c| c.text.trim().len() >= opts.min_chunk_size);
        }
        chunks
    }

    /// Estimate tokens, chunks, and sentence count without splitting.
    pub fn get_stats(&self, text: &str, opts: &SplitOptions) -> SplitStats {
        if text.trim().is_empty() {
            return SplitStats {
                characters: 0,
                estimated_tokens: 0,
                estimated_chunks: 0,
                sentence_count: 0,
            };
        }
        let estimated_tokens = count_tokens(text);
        let by_tokens = estimated_tokens.div_ceil(opts.max_tokens.max(1));
        let by_chars = text.len().div_ceil(opts.chunk_size.max(1));
        SplitStats {
            characters: text.len(),
            estimated_tokens,
            estimated_chunks: by_tokens.max(by_chars).max(1),
            sentence_count: sentence_spans(text).len(),
        }
    }

    /// Check a produced chunk against the options it was produced with:
    /// token budget, minimum size, and hash integrity. Oversized-sentence
    /// chunks legitimately fail this check; callers decide what to do.
    pub fn validate_chunk(&self, chunk: &TextChunk, opts: &SplitOptions) -> bool {
        chunk.token_count <= opts.max_tokens
            && chunk.text.trim().len() >= opts.min_chunk_size
            && chunk.content_hash == crate::models::content_hash(&chunk.text)
    }

    // ---- sentence-preserving path ----

    fn split_sentence_preserving(&self, text: &str, opts: &SplitOptions) -> Vec<TextChunk> {
        let spans = sentence_spans(text);
        let mut chunks: Vec<TextChunk> = Vec::new();

        // Running buffer state. `carry` is the overlap seed taken from
        // the previously closed chunk.
        let mut buf = String::new();
        let mut buf_sentences = 0usize;
        let mut buf_start: Option<usize> = None;
        let mut buf_end = 0usize;
        let mut carry = String::new();

        let flush = |buf: &mut String,
                     buf_sentences: &mut usize,
                     buf_start: &mut Option<usize>,
                     buf_end: usize,
                     chunks: &mut Vec<TextChunk>,
                     carry: &mut String,
                     opts: &SplitOptions| {
            if buf.trim().is_empty() {
                buf.clear();
                *buf_sentences = 0;
                *buf_start = None;
                return;
            }
            let closed = std::mem::take(buf);
            *carry = overlap_suffix(&closed, opts.chunk_overlap);
            let tokens = count_tokens(&closed);
            chunks.push(TextChunk::new(
                closed,
                tokens,
                buf_start.take().unwrap_or(0),
                buf_end,
                *buf_sentences,
            ));
            *buf_sentences = 0;
        };

        for &(s, e) in &spans {
            let sentence = &text[s..e];
            let oversized =
                sentence.len() > opts.chunk_size || count_tokens(sentence) > opts.max_tokens;

            if oversized {
                // Close whatever is buffered, then split the sentence on
                // its own; its pieces become chunks directly.
                flush(
                    &mut buf,
                    &mut buf_sentences,
                    &mut buf_start,
                    buf_end,
                    &mut chunks,
                    &mut carry,
                    opts,
                );
                let pieces = self.split_recursive(sentence, s, opts);
                if let Some(last) = pieces.last() {
                    carry = overlap_suffix(&last.text, opts.chunk_overlap);
                }
                chunks.extend(pieces);
                continue;
            }

            if !buf.is_empty() {
                let candidate = format!("{} {}", buf, sentence);
                if candidate.len() > opts.chunk_size || count_tokens(&candidate) > opts.max_tokens {
                    flush(
                        &mut buf,
                        &mut buf_sentences,
                        &mut buf_start,
                        buf_end,
                        &mut chunks,
                        &mut carry,
                        opts,
                    );
                } else {
                    buf = candidate;
                    buf_sentences += 1;
                    buf_end = e;
                    continue;
                }
            }

            // Start a fresh buffer, seeded with the overlap carry.
            buf = if carry.is_empty() {
                sentence.to_string()
            } else {
                format!("{} {}", carry, sentence)
            };
            buf_sentences = 1;
            buf_start = Some(s);
            buf_end = e;
        }

        flush(
            &mut buf,
            &mut buf_sentences,
            &mut buf_start,
            buf_end,
            &mut chunks,
            &mut carry,
            opts,
        );
        chunks
    }

    // ---- recursive path ----

    /// Recursive separator split starting at byte `base` of the original
    /// text (used for start/end index bookkeeping).
    fn split_recursive(&self, text: &str, base: usize, opts: &SplitOptions) -> Vec<TextChunk> {
        let leaves = recursive_leaves(text, opts);
        let mut chunks = Vec::with_capacity(leaves.len());
        for (i, &(off, ref leaf)) in leaves.iter().enumerate() {
            // Overlap reapplied as a second pass: each chunk after the
            // first is prefixed with its predecessor's suffix. The
            // prefix ends exactly where this leaf begins, so the final
            // text stays contiguous.
            let full = if i > 0 && opts.chunk_overlap > 0 {
                let prefix = overlap_suffix(&leaves[i - 1].1, opts.chunk_overlap);
                format!("{}{}", prefix, leaf)
            } else {
                leaf.clone()
            };
            let tokens = count_tokens(&full);
            let sentences = sentence_spans(&full).len();
            chunks.push(TextChunk::new(
                full,
                tokens,
                base + off,
                base + off + leaf.len(),
                sentences,
            ));
        }
        chunks
    }
}

/// Produce ordered `(offset, text)` leaves, each at most `chunk_size`
/// bytes, by repeatedly splitting near the midpoint on the highest-
/// priority separator present (the separator stays with the left half,
/// so the leaves tile the input losslessly). Segments with no usable
/// separator are bisected at a character boundary.
fn recursive_leaves(text: &str, opts: &SplitOptions) -> Vec<(usize, String)> {
    let chunk_size = opts.chunk_size.max(1);
    let mut out: Vec<(usize, String)> = Vec::new();
    let mut stack: Vec<(usize, String)> = vec![(0, text.to_string())];

    while let Some((off, seg)) = stack.pop() {
        if seg.len() <= chunk_size {
            out.push((off, seg));
            continue;
        }

        let mut cut = None;
        for sep in &opts.separators {
            if sep.is_empty() {
                continue;
            }
            if let Some(pos) = nearest_mid_occurrence(&seg, sep) {
                cut = Some(pos + sep.len());
                break;
            }
        }
        let cut = cut.unwrap_or_else(|| char_midpoint(&seg));

        if cut == 0 || cut >= seg.len() {
            // Indivisible (e.g. a single very long char run); keep as a
            // leaf even though it exceeds the budget.
            out.push((off, seg));
            continue;
        }

        let right = seg[cut..].to_string();
        let left = seg[..cut].to_string();
        stack.push((off + cut, right));
        stack.push((off, left));
    }

    out
}

/// Position of the occurrence of `sep` whose split point lands closest
/// to the middle of `seg`, excluding splits that would leave an empty
/// half.
fn nearest_mid_occurrence(seg: &str, sep: &str) -> Option<usize> {
    let mid = seg.len() / 2;
    seg.match_indices(sep)
        .map(|(i, _)| i)
        .filter(|&i| i + sep.len() < seg.len() && i + sep.len() > 0)
        .min_by_key(|&i| (i + sep.len()).abs_diff(mid))
}

/// Nearest char boundary to the byte midpoint, or 0 when the segment
/// cannot be split.
fn char_midpoint(seg: &str) -> usize {
    let target = (seg.len() / 2).max(1);
    let mut mid = target;
    while mid < seg.len() && !seg.is_char_boundary(mid) {
        mid += 1;
    }
    if mid >= seg.len() {
        mid = target;
        while mid > 0 && !seg.is_char_boundary(mid) {
            mid -= 1;
        }
    }
    mid
}

/// Word-boundary-aligned suffix of `text` of roughly `overlap` bytes,
/// used to seed the next chunk.
pub fn overlap_suffix(text: &str, overlap: usize) -> String {
    if overlap == 0 || text.is_empty() {
        return String::new();
    }
    if text.len() <= overlap {
        return text.to_string();
    }
    let mut start = text.len() - overlap;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    // Align to the next word boundary so the overlap never begins
    // mid-word.
    if let Some(sp) = text[start..].find(' ') {
        start += sp + 1;
    }
    text[start..].to_string()
}

/// Byte spans of sentences in `text`. A sentence ends at a run of
/// `.`/`!`/`?` followed by whitespace or end of input; trailing text
/// without terminal punctuation forms a final sentence.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if matches!(c, '.' | '!' | '?') {
            let mut end = i + c.len_utf8();
            while let Some(&(j, c2)) = chars.peek() {
                if matches!(c2, '.' | '!' | '?') {
                    chars.next();
                    end = j + c2.len_utf8();
                } else {
                    break;
                }
            }
            // Not a boundary when the punctuation is interior, e.g.
            // "3.14" or "e.g.x".
            if let Some(&(_, c2)) = chars.peek() {
                if !c2.is_whitespace() {
                    continue;
                }
            }
            spans.push((start.take().unwrap_or(i), end));
        }
    }

    if let Some(s) = start {
        let tail = text[s..].trim_end();
        if !tail.is_empty() {
            spans.push((s, s + tail.len()));
        }
    }
    spans
}

/// Convenience: the sentences of `text` as string slices.
pub fn sentences(text: &str) -> Vec<&str> {
    sentence_spans(text)
        .into_iter()
        .map(|(s, e)| &text[s..e])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> SplitOptions {
        SplitOptions::default()
    }

    #[test]
    fn test_empty_and_whitespace_yield_no_chunks() {
        let splitter = TextSplitter::new();
        assert!(splitter.split("", &opts()).is_empty());
        assert!(splitter.split("   \n\t ", &opts()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let splitter = TextSplitter::new();
        let chunks = splitter.split("A. B. C.", &opts());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A. B. C.");
        assert_eq!(chunks[0].sentence_count, 3);
    }

    #[test]
    fn test_sentence_spans_basic() {
        let s = sentences("First one. Second one! Third?");
        assert_eq!(s, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn test_sentence_spans_interior_period_not_boundary() {
        let s = sentences("Pi is 3.14 roughly. Next sentence.");
        assert_eq!(s.len(), 2);
        assert_eq!(s[0], "Pi is 3.14 roughly.");
    }

    #[test]
    fn test_sentence_spans_trailing_without_punctuation() {
        let s = sentences("Done. And a trailing fragment");
        assert_eq!(s, vec!["Done.", "And a trailing fragment"]);
    }

    #[test]
    fn test_sentence_preserving_respects_token_budget() {
        let splitter = TextSplitter::new();
        let text = (0..40)
            .map(|i| format!("Sentence number {} talks about widgets and gadgets.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let o = SplitOptions {
            chunk_size: 400,
            chunk_overlap: 40,
            max_tokens: 64,
            ..opts()
        };
        let chunks = splitter.split(&text, &o);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(
                c.token_count <= o.max_tokens,
                "chunk exceeded budget: {} tokens",
                c.token_count
            );
        }
    }

    #[test]
    fn test_oversized_single_sentence_is_split_not_dropped() {
        let splitter = TextSplitter::new();
        // One sentence far beyond the character cap, with no terminal
        // punctuation until the very end.
        let text = format!("{} end.", "word ".repeat(400));
        let o = SplitOptions {
            chunk_size: 200,
            chunk_overlap: 0,
            max_tokens: 50,
            ..opts()
        };
        let chunks = splitter.split(&text, &o);
        assert!(chunks.len() > 1);
        let total: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert!(total >= text.trim_end().len());
    }

    #[test]
    fn test_recursive_reconstruction_lossless() {
        let splitter = TextSplitter::new();
        let text = "Alpha beta gamma.\n\nDelta epsilon zeta eta theta.\nIota kappa lambda mu nu xi omicron pi rho sigma tau.";
        let o = SplitOptions {
            chunk_size: 30,
            chunk_overlap: 0,
            preserve_sentences: false,
            ..opts()
        };
        let chunks = splitter.split(text, &o);
        assert!(chunks.len() > 1);
        let rebuilt: String = chunks
            .iter()
            .map(|c| &text[c.start_index..c.end_index])
            .collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_recursive_overlap_prefixes_predecessor_suffix() {
        let splitter = TextSplitter::new();
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let o = SplitOptions {
            chunk_size: 20,
            chunk_overlap: 8,
            preserve_sentences: false,
            ..opts()
        };
        let chunks = splitter.split(text, &o);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // Each chunk after the first is the predecessor leaf's
            // overlap suffix followed by its own leaf, exactly.
            let prev_leaf = &text[pair[0].start_index..pair[0].end_index];
            let own_leaf = &text[pair[1].start_index..pair[1].end_index];
            let expected = format!("{}{}", overlap_suffix(prev_leaf, o.chunk_overlap), own_leaf);
            assert_eq!(pair[1].text, expected);
        }
    }

    #[test]
    fn test_min_chunk_size_filters_small_chunks() {
        let splitter = TextSplitter::new();
        let text = "Tiny. This sentence is comfortably longer than the minimum size.";
        let o = SplitOptions {
            chunk_size: 40,
            chunk_overlap: 0,
            max_tokens: 12,
            min_chunk_size: 10,
            ..opts()
        };
        let chunks = splitter.split(text, &o);
        for c in &chunks {
            assert!(c.text.trim().len() >= 10);
        }
    }

    #[test]
    fn test_overlap_suffix_word_aligned() {
        let s = overlap_suffix("the quick brown fox jumps", 10);
        assert!(!s.starts_with(' '));
        assert!(s.len() <= 10);
        assert!("the quick brown fox jumps".ends_with(&s));
    }

    #[test]
    fn test_overlap_suffix_zero_is_empty() {
        assert_eq!(overlap_suffix("anything", 0), "");
    }

    #[test]
    fn test_get_stats() {
        let splitter = TextSplitter::new();
        let stats = splitter.get_stats("One sentence. Two sentences.", &opts());
        assert_eq!(stats.sentence_count, 2);
        assert!(stats.estimated_tokens > 0);
        assert_eq!(stats.estimated_chunks, 1);

        let empty = splitter.get_stats("  ", &opts());
        assert_eq!(empty.estimated_chunks, 0);
    }

    #[test]
    fn test_validate_chunk() {
        let splitter = TextSplitter::new();
        let o = opts();
        let chunks = splitter.split("A reasonable sentence for validation.", &o);
        assert_eq!(chunks.len(), 1);
        assert!(splitter.validate_chunk(&chunks[0], &o));

        let mut tampered = chunks[0].clone();
        tampered.text.push('x');
        assert!(!splitter.validate_chunk(&tampered, &o));
    }

    #[test]
    fn test_split_deterministic() {
        let splitter = TextSplitter::new();
        let text = "Alpha. Beta. Gamma. Delta. Epsilon. Zeta. Eta. Theta.";
        let o = SplitOptions {
            chunk_size: 25,
            max_tokens: 10,
            chunk_overlap: 5,
            ..opts()
        };
        let a = splitter.split(text, &o);
        let b = splitter.split(text, &o);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.content_hash, y.content_hash);
        }
    }
}
