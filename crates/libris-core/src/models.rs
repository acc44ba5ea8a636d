//! Core data models used throughout Libris.
//!
//! These types describe a parsed document, the chunks cut from it, and the
//! search results that come back from the vector store.
//!
//! All character coordinates count Unicode scalar values (`char`), never
//! bytes, so a [`CharSpan`] stays meaningful for non-ASCII text.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Half-open `[start, end)` character interval into a document's full text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusive `[start, end]` page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Error parsing a `"start-end"` range string read back from store metadata.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid range '{0}': expected \"start-end\"")]
pub struct RangeParseError(pub String);

fn parse_pair<T: FromStr>(s: &str) -> Result<(T, T), RangeParseError> {
    let (a, b) = s
        .split_once('-')
        .ok_or_else(|| RangeParseError(s.to_string()))?;
    let a = a.trim().parse().map_err(|_| RangeParseError(s.to_string()))?;
    let b = b.trim().parse().map_err(|_| RangeParseError(s.to_string()))?;
    Ok((a, b))
}

impl fmt::Display for CharSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for CharSpan {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = parse_pair(s)?;
        Ok(Self { start, end })
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PageRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = parse_pair(s)?;
        Ok(Self { start, end })
    }
}

/// Global metadata extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub author: Option<String>,
    pub page_count: u32,
}

/// A chapter-like unit of a parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// 1-based position of the section in the document.
    pub number: u32,
    pub title: String,
    pub pages: PageRange,
    pub span: CharSpan,
}

/// Structural invariant violated by a parser's output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("page map is empty for a non-empty document")]
    EmptyPageMap,
    #[error("page {page} starts at {found}, expected {expected}")]
    PageGap {
        page: u32,
        expected: usize,
        found: usize,
    },
    #[error("page map ends at {found}, document length is {expected}")]
    PageCoverage { expected: usize, found: usize },
    #[error("document has text but no sections")]
    NoSections,
    #[error("section {number} has an inverted range")]
    InvertedSection { number: u32 },
    #[error("section {number} starts at {found}, expected {expected}")]
    SectionGap {
        number: u32,
        expected: usize,
        found: usize,
    },
    #[error("sections end at {found}, document length is {expected}")]
    SectionCoverage { expected: usize, found: usize },
}

/// Output of a document parser: full text plus structure and page mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
    pub sections: Vec<Section>,
    /// Page number → character interval of that page in `text`.
    pub page_map: BTreeMap<u32, CharSpan>,
}

impl ParsedDocument {
    /// Length of `text` in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The text covered by `span`, clamped to the document.
    pub fn slice(&self, span: CharSpan) -> &str {
        char_slice(&self.text, span)
    }

    /// Check the page map and section invariants.
    ///
    /// - Page spans are contiguous and cover `[0, len)`.
    /// - Every section has `pages.start <= pages.end` and `span.start <= span.end`.
    /// - Section spans, sorted by start, are contiguous and cover `[0, len)`.
    pub fn validate(&self) -> Result<(), DocumentError> {
        let len = self.char_len();

        if self.page_map.is_empty() {
            if len > 0 {
                return Err(DocumentError::EmptyPageMap);
            }
        } else {
            let mut cursor = 0;
            for (page, span) in &self.page_map {
                if span.start != cursor || span.end < span.start {
                    return Err(DocumentError::PageGap {
                        page: *page,
                        expected: cursor,
                        found: span.start,
                    });
                }
                cursor = span.end;
            }
            if cursor != len {
                return Err(DocumentError::PageCoverage {
                    expected: len,
                    found: cursor,
                });
            }
        }

        if self.sections.is_empty() {
            return if len > 0 {
                Err(DocumentError::NoSections)
            } else {
                Ok(())
            };
        }

        let mut sorted: Vec<&Section> = self.sections.iter().collect();
        sorted.sort_by_key(|s| s.span.start);

        let mut cursor = 0;
        for section in sorted {
            if section.pages.start > section.pages.end || section.span.start > section.span.end {
                return Err(DocumentError::InvertedSection {
                    number: section.number,
                });
            }
            if section.span.start != cursor {
                return Err(DocumentError::SectionGap {
                    number: section.number,
                    expected: cursor,
                    found: section.span.start,
                });
            }
            cursor = section.span.end;
        }
        if cursor != len {
            return Err(DocumentError::SectionCoverage {
                expected: len,
                found: cursor,
            });
        }

        Ok(())
    }
}

/// Page of `page_map` whose span contains `pos`.
pub fn page_at(page_map: &BTreeMap<u32, CharSpan>, pos: usize) -> Option<u32> {
    page_map
        .iter()
        .find(|(_, span)| span.start <= pos && pos < span.end)
        .map(|(page, _)| *page)
}

/// Slice `text` by a character span. Out-of-range ends are clamped.
pub fn char_slice(text: &str, span: CharSpan) -> &str {
    let start = byte_offset(text, span.start);
    let end = byte_offset(text, span.end.max(span.start));
    &text[start..end]
}

/// Byte offset of the `n`th character, or `text.len()` past the end.
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Provenance and position of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// UUID v4 assigned when the chunk is cut.
    pub chunk_id: String,
    /// Library-relative filename the chunk came from (the manifest key).
    pub filename: String,
    pub source_title: String,
    pub section_title: String,
    pub page_range: PageRange,
    pub char_span: CharSpan,
}

/// Error decoding flat store metadata back into [`ChunkMetadata`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata field '{0}' is missing or not a string")]
    Missing(&'static str),
    #[error(transparent)]
    Range(#[from] RangeParseError),
}

impl ChunkMetadata {
    /// Encode as a flat string map for stores without nested metadata.
    ///
    /// `page_range` and `char_span` become `"start-end"` strings.
    pub fn to_flat(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("chunk_id".into(), Value::String(self.chunk_id.clone()));
        map.insert("filename".into(), Value::String(self.filename.clone()));
        map.insert(
            "source_title".into(),
            Value::String(self.source_title.clone()),
        );
        map.insert(
            "section_title".into(),
            Value::String(self.section_title.clone()),
        );
        map.insert(
            "page_range".into(),
            Value::String(self.page_range.to_string()),
        );
        map.insert(
            "char_span".into(),
            Value::String(self.char_span.to_string()),
        );
        map
    }

    /// Decode the map produced by [`to_flat`](Self::to_flat).
    pub fn from_flat(map: &Map<String, Value>) -> Result<Self, MetadataError> {
        fn field<'a>(
            map: &'a Map<String, Value>,
            key: &'static str,
        ) -> Result<&'a str, MetadataError> {
            map.get(key)
                .and_then(Value::as_str)
                .ok_or(MetadataError::Missing(key))
        }

        Ok(Self {
            chunk_id: field(map, "chunk_id")?.to_string(),
            filename: field(map, "filename")?.to_string(),
            source_title: field(map, "source_title")?.to_string(),
            section_title: field(map, "section_title")?.to_string(),
            page_range: field(map, "page_range")?.parse()?,
            char_span: field(map, "char_span")?.parse()?,
        })
    }
}

/// A bounded span of document text plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn id(&self) -> &str {
        &self.metadata.chunk_id
    }
}

/// A chunk returned by a nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// L2 distance to the query vector; lower is closer.
    pub score: f32,
}
