//! Position-preserving sliding-window chunker.
//!
//! Splits each [`Section`] of a [`ParsedDocument`] into overlapping,
//! size-bounded [`Chunk`]s. Every chunk keeps an absolute [`CharSpan`] into
//! the document text plus the page range and titles it inherits, so a
//! retrieved chunk can always be traced back to where it came from.
//!
//! # Algorithm
//!
//! 1. Convert user-facing token sizes to characters (4 chars ≈ 1 token).
//! 2. A section no longer than `size` becomes a single chunk, unmodified.
//! 3. Longer sections are covered by windows of width `size` advancing by
//!    `size - overlap`, starting at 0, until a window reaches the end of the
//!    section. Only the last window can be shorter than `size`.
//! 4. Window offsets are shifted by the section's base offset in the document.
//!
//! # Example
//!
//! ```rust
//! use libris_core::chunk::ChunkSplitter;
//!
//! // chunk_size = 10 tokens, overlap = 2 tokens → 40 / 8 chars
//! let splitter = ChunkSplitter::from_tokens(10, 2).unwrap();
//! assert_eq!(splitter.windows(100), vec![(0, 40), (32, 72), (64, 100)]);
//! ```

use thiserror::Error;
use uuid::Uuid;

use crate::models::{CharSpan, Chunk, ChunkMetadata, PageRange, ParsedDocument, Section};

/// Approximate characters-per-token ratio.
///
/// Chunk sizes are configured in tokens and converted with this heuristic.
pub const CHARS_PER_TOKEN: usize = 4;

/// Invalid chunking parameters. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkConfigError {
    #[error("chunk size must be greater than 0")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Where a section sits in its document, inherited by every chunk cut from it.
#[derive(Debug, Clone, Copy)]
pub struct SectionContext<'a> {
    /// Library-relative filename of the source document.
    pub filename: &'a str,
    pub source_title: &'a str,
    pub section_title: &'a str,
    pub pages: PageRange,
    /// Character offset of the section's first char in the document.
    pub base: usize,
}

/// Sliding-window splitter with a validated `size` / `overlap` pair (in chars).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    size: usize,
    overlap: usize,
}

impl ChunkSplitter {
    /// Build a splitter from character sizes.
    ///
    /// Rejects `size == 0` and `overlap >= size`, which would yield
    /// zero-length or negative strides.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkConfigError> {
        if size == 0 {
            return Err(ChunkConfigError::ZeroSize);
        }
        if overlap >= size {
            return Err(ChunkConfigError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    /// Build a splitter from token sizes, scaled by [`CHARS_PER_TOKEN`].
    pub fn from_tokens(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkConfigError> {
        Self::new(
            chunk_size.saturating_mul(CHARS_PER_TOKEN),
            chunk_overlap.saturating_mul(CHARS_PER_TOKEN),
        )
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }

    /// Local `[start, end)` windows covering a section of `len` chars.
    pub fn windows(&self, len: usize) -> Vec<(usize, usize)> {
        if len <= self.size {
            return vec![(0, len)];
        }

        let stride = self.stride();
        let mut windows = Vec::with_capacity((len - self.overlap).div_ceil(stride));
        let mut start = 0;
        loop {
            let end = (start + self.size).min(len);
            windows.push((start, end));
            if end == len {
                break;
            }
            start += stride;
        }
        windows
    }

    /// Split one section's text into chunks.
    ///
    /// Chunks come out in source order; each gets a fresh UUID and an
    /// absolute `char_span` of `(ctx.base + start, ctx.base + end)`.
    pub fn split_section(&self, content: &str, ctx: &SectionContext<'_>) -> Vec<Chunk> {
        let mut offsets: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
        let len = offsets.len();
        offsets.push(content.len());

        self.windows(len)
            .into_iter()
            .map(|(start, end)| {
                make_chunk(
                    &content[offsets[start]..offsets[end]],
                    ctx,
                    CharSpan::new(ctx.base + start, ctx.base + end),
                )
            })
            .collect()
    }

    /// Chunk every non-blank section of a document, in text order.
    ///
    /// Windows holding only whitespace are dropped; the remaining chunks
    /// keep their positions.
    pub fn chunk_document(&self, doc: &ParsedDocument, filename: &str) -> Vec<Chunk> {
        let mut sections: Vec<&Section> = doc.sections.iter().collect();
        sections.sort_by_key(|s| s.span.start);

        // Char → byte offsets for the whole text, computed once.
        let mut offsets: Vec<usize> = doc.text.char_indices().map(|(i, _)| i).collect();
        offsets.push(doc.text.len());
        let byte_at = |pos: usize| offsets[pos.min(offsets.len() - 1)];

        let mut chunks = Vec::new();
        for section in sections {
            let start = byte_at(section.span.start);
            let end = byte_at(section.span.end).max(start);
            let text = &doc.text[start..end];
            if text.trim().is_empty() {
                continue;
            }
            let ctx = SectionContext {
                filename,
                source_title: &doc.metadata.title,
                section_title: &section.title,
                pages: section.pages,
                base: section.span.start,
            };
            chunks.extend(
                self.split_section(text, &ctx)
                    .into_iter()
                    .filter(|chunk| !chunk.content.trim().is_empty()),
            );
        }
        chunks
    }
}

fn make_chunk(content: &str, ctx: &SectionContext<'_>, span: CharSpan) -> Chunk {
    Chunk {
        content: content.to_string(),
        metadata: ChunkMetadata {
            chunk_id: Uuid::new_v4().to_string(),
            filename: ctx.filename.to_string(),
            source_title: ctx.source_title.to_string(),
            section_title: ctx.section_title.to_string(),
            page_range: ctx.pages,
            char_span: span,
        },
    }
}
