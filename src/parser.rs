//! Document parsers.
//!
//! Every parser turns a file into a [`ParsedDocument`]: the full text, a
//! page map covering it without gaps, and a list of sections that tile it.
//! [`LibraryParser`] picks the format from the file extension:
//!
//! | Extension | Text source | Pages |
//! |-----------|-------------|-------|
//! | `.md`, `.markdown` | UTF-8 (lossy) | form feeds, else every `page_chars` chars |
//! | `.pdf` | `pdf-extract`, page by page | one per PDF page |
//! | anything else | UTF-8 (lossy) | form feeds, else every `page_chars` chars |
//!
//! Sections start at ATX headings (Markdown only) and at `Chapter N` lines.
//! Text before the first heading is its own section.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use libris_core::models::{
    page_at, CharSpan, DocumentMetadata, PageRange, ParsedDocument, Section,
};

use crate::error::IndexError;

const FORM_FEED: char = '\x0c';
const PREAMBLE: &str = "Preamble";

/// Turns a file into a validated [`ParsedDocument`].
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// `name` is the library-relative filename used in errors.
    async fn parse(&self, name: &str, path: &Path) -> Result<ParsedDocument, IndexError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Markdown,
    PlainText,
    Pdf,
}

impl ParserKind {
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => Self::Markdown,
            "pdf" => Self::Pdf,
            _ => Self::PlainText,
        }
    }
}

/// Extension-dispatching parser for everything a library holds.
#[derive(Debug, Clone)]
pub struct LibraryParser {
    page_chars: usize,
}

impl LibraryParser {
    pub fn new(page_chars: usize) -> Self {
        Self {
            page_chars: page_chars.max(1),
        }
    }
}

#[async_trait]
impl DocumentParser for LibraryParser {
    async fn parse(&self, name: &str, path: &Path) -> Result<ParsedDocument, IndexError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| IndexError::FileRead {
                file: name.to_string(),
                source,
            })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());

        let kind = ParserKind::for_path(path);
        let doc = match kind {
            ParserKind::Pdf => {
                let pages = tokio::task::spawn_blocking(move || {
                    pdf_extract::extract_text_from_mem_by_pages(&bytes)
                })
                .await
                .map_err(|e| IndexError::parse(name, e))?
                .map_err(|e| IndexError::parse(name, e))?;
                build_document(&stem, pages, false)
            }
            ParserKind::Markdown | ParserKind::PlainText => {
                let raw = String::from_utf8_lossy(&bytes);
                let pages = split_pages(&raw, self.page_chars);
                build_document(&stem, pages, kind == ParserKind::Markdown)
            }
        };

        doc.validate().map_err(|e| IndexError::parse(name, e))?;
        Ok(doc)
    }
}

/// Split raw text into pages at form feeds, or every `page_chars` chars
/// when there are none. Form feeds are dropped from the page text.
pub fn split_pages(raw: &str, page_chars: usize) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    if raw.contains(FORM_FEED) {
        let mut pages: Vec<String> = raw.split(FORM_FEED).map(str::to_string).collect();
        // A trailing form feed closes the last page rather than opening one.
        if pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
            pages.pop();
        }
        return pages;
    }

    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(page_chars.max(1))
        .map(|page| page.iter().collect())
        .collect()
}

/// Assemble pages into a document and cut it into sections.
pub fn build_document(stem: &str, pages: Vec<String>, markdown: bool) -> ParsedDocument {
    let mut text = String::new();
    let mut page_map = BTreeMap::new();
    let mut cursor = 0;

    if pages.iter().any(|p| !p.is_empty()) {
        for (i, page) in pages.iter().enumerate() {
            let len = page.chars().count();
            page_map.insert(i as u32 + 1, CharSpan::new(cursor, cursor + len));
            cursor += len;
            text.push_str(page);
        }
    }
    let len = cursor;

    let headings = find_headings(&pages, markdown);
    let title = headings
        .iter()
        .find(|h| h.level == Some(1))
        .map(|h| h.title.clone())
        .unwrap_or_else(|| stem.to_string());

    let mut bounds: Vec<(usize, String)> = Vec::new();
    if len > 0 {
        let first = headings.first().map(|h| h.offset).unwrap_or(len);
        if first > 0 {
            let name = if headings.is_empty() {
                title.clone()
            } else {
                PREAMBLE.to_string()
            };
            bounds.push((0, name));
        }
        bounds.extend(headings.into_iter().map(|h| (h.offset, h.title)));
    }

    let sections = bounds
        .iter()
        .enumerate()
        .map(|(i, (start, name))| {
            let end = bounds.get(i + 1).map(|b| b.0).unwrap_or(len);
            let first_page = page_at(&page_map, *start).unwrap_or(1);
            let last_page =
                page_at(&page_map, end.saturating_sub(1).max(*start)).unwrap_or(first_page);
            Section {
                number: i as u32 + 1,
                title: name.clone(),
                pages: PageRange::new(first_page, last_page.max(first_page)),
                span: CharSpan::new(*start, end),
            }
        })
        .collect();

    ParsedDocument {
        text,
        metadata: DocumentMetadata {
            title,
            author: None,
            page_count: page_map.len() as u32,
        },
        sections,
        page_map,
    }
}

struct Heading {
    /// Char offset of the heading line.
    offset: usize,
    /// ATX level; `None` for `Chapter N` lines.
    level: Option<usize>,
    title: String,
}

/// Headings in page order. A page break also starts a new line.
fn find_headings(pages: &[String], markdown: bool) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut offset = 0;
    let mut in_fence = false;

    for line in pages.iter().flat_map(|page| page.split_inclusive('\n')) {
        let trimmed = line.trim();
        if markdown && (trimmed.starts_with("```") || trimmed.starts_with("~~~")) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some(heading) = markdown.then(|| atx_heading(line)).flatten() {
                headings.push(Heading { offset, ..heading });
            } else if is_chapter_line(trimmed) {
                headings.push(Heading {
                    offset,
                    level: None,
                    title: trimmed.to_string(),
                });
            }
        }
        offset += line.chars().count();
    }

    headings
}

fn atx_heading(line: &str) -> Option<Heading> {
    let line = line.trim_end();
    let level = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    Some(Heading {
        offset: 0,
        level: Some(level),
        title: if title.is_empty() {
            "Untitled".to_string()
        } else {
            title.to_string()
        },
    })
}

/// `Chapter 3`, `CHAPTER 12: The Storm`, ...
fn is_chapter_line(trimmed: &str) -> bool {
    let Some(prefix) = trimmed.get(..8) else {
        return false;
    };
    prefix.eq_ignore_ascii_case("chapter ")
        && trimmed[8..]
            .trim_start()
            .starts_with(|c: char| c.is_ascii_digit())
        && trimmed.chars().count() <= 120
}
