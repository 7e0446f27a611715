//! Markdown-aware document chunking.
//!
//! Splits a source document into ordered chunks that respect section
//! headings and never cut through a fenced code block unless the block alone
//! exceeds the size limit.
//!
//! # Example
//!
//! ```rust,ignore
//! use lectern_db::chunking::{Chunker, ChunkerConfig, MarkdownChunker};
//!
//! let chunker = MarkdownChunker::new(ChunkerConfig::default());
//! for chunk in chunker.chunk(document_id, "# Intro\n\nSome text.") {
//!     println!("{} [{:?}] {}-{}", chunk.id, chunk.heading, chunk.start_offset, chunk.end_offset);
//! }
//! ```

use uuid::Uuid;

use lectern_core::{defaults, Chunk};

/// Configuration for chunking.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target maximum size of a chunk in bytes.
    pub max_chunk_size: usize,
    /// Chunks smaller than this are merged into the previous chunk of the
    /// same section.
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: defaults::CHUNK_SIZE,
            min_chunk_size: defaults::CHUNK_MIN_SIZE,
        }
    }
}

/// Splits a document into positional chunks.
pub trait Chunker: Send + Sync {
    /// Chunk `text`, assigning ids derived from `document_id`.
    fn chunk(&self, document_id: Uuid, text: &str) -> Vec<Chunk>;

    fn config(&self) -> &ChunkerConfig;
}

/// Byte range of a document plus the section it belongs to.
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    section: usize,
    heading: Option<String>,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Find UTF-8 safe boundary at or before the given position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// ATX heading text (`## Title` → `Title`), or `None` for other lines.
fn parse_heading(line: &str) -> Option<String> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Chunker that follows markdown structure: headings open sections,
/// blank lines separate blocks, code fences stay whole.
#[derive(Debug, Clone, Default)]
pub struct MarkdownChunker {
    config: ChunkerConfig,
}

impl MarkdownChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split the document into blocks (paragraphs, code fences, headings
    /// with their first paragraph).
    fn find_blocks(text: &str) -> Vec<Span> {
        let mut blocks = Vec::new();
        let mut current: Option<Span> = None;
        let mut section = 0;
        let mut heading: Option<String> = None;
        let mut in_code = false;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let start = offset;
            let end = offset + line.len();
            offset = end;
            let trimmed = line.trim();

            if trimmed.starts_with("```") {
                in_code = !in_code;
            } else if !in_code {
                if trimmed.is_empty() {
                    blocks.extend(current.take());
                    continue;
                }
                if let Some(title) = parse_heading(trimmed) {
                    blocks.extend(current.take());
                    section += 1;
                    heading = Some(title);
                }
            }

            match current.as_mut() {
                Some(span) => span.end = end,
                None => {
                    current = Some(Span {
                        start,
                        end,
                        section,
                        heading: heading.clone(),
                    })
                }
            }
        }
        blocks.extend(current);
        blocks
    }

    /// Cut an oversized block into pieces of at most `max_chunk_size`,
    /// preferring whitespace boundaries.
    fn split_oversized(&self, text: &str, block: &Span) -> Vec<Span> {
        let max = self.config.max_chunk_size.max(1);
        let mut pieces = Vec::new();
        let mut start = block.start;

        while block.end - start > max {
            let limit = find_char_boundary_before(text, start + max);
            let cut = text[start..limit]
                .rfind(char::is_whitespace)
                .map(|i| start + i + 1)
                .filter(|&c| c > start)
                .unwrap_or(limit);
            // A single character wider than `max` still has to make progress.
            let cut = if cut <= start {
                text[start..]
                    .char_indices()
                    .nth(1)
                    .map(|(i, _)| start + i)
                    .unwrap_or(block.end)
            } else {
                cut
            };
            pieces.push(Span {
                start,
                end: cut,
                ..block.clone()
            });
            start = cut;
        }
        if start < block.end {
            pieces.push(Span {
                start,
                end: block.end,
                ..block.clone()
            });
        }
        pieces
    }

    fn push_span(&self, text: &str, spans: &mut Vec<Span>, span: Span) {
        let size = text[span.start..span.end].trim().len();
        if size == 0 {
            return;
        }
        if size < self.config.min_chunk_size {
            if let Some(last) = spans.last_mut() {
                if last.section == span.section {
                    last.end = span.end;
                    return;
                }
            }
        }
        spans.push(span);
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, document_id: Uuid, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        let mut spans: Vec<Span> = Vec::new();
        let mut current: Option<Span> = None;

        for block in Self::find_blocks(text) {
            if block.len() > self.config.max_chunk_size {
                if let Some(span) = current.take() {
                    self.push_span(text, &mut spans, span);
                }
                for piece in self.split_oversized(text, &block) {
                    spans.push(piece);
                }
                continue;
            }
            match current.as_mut() {
                Some(span)
                    if span.section == block.section
                        && block.end - span.start <= self.config.max_chunk_size =>
                {
                    span.end = block.end;
                }
                _ => {
                    if let Some(span) = current.replace(block) {
                        self.push_span(text, &mut spans, span);
                    }
                }
            }
        }
        if let Some(span) = current {
            self.push_span(text, &mut spans, span);
        }

        spans
            .into_iter()
            .filter(|s| !text[s.start..s.end].trim().is_empty())
            .enumerate()
            .map(|(index, s)| Chunk {
                id: Chunk::make_id(document_id, index),
                index,
                heading: s.heading,
                text: text[s.start..s.end].trim().to_string(),
                start_offset: s.start,
                end_offset: s.end,
            })
            .collect()
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}
