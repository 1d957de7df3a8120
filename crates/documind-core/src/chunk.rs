//! Page-aware recursive text chunker.
//!
//! Splits a document's [`Page`]s into overlapping [`Chunk`]s of at most
//! `chunk_size` characters. Every chunk is an exact slice of the document
//! text, so provenance (page number and character span) is known without
//! re-searching the text later.
//!
//! # Algorithm
//!
//! 1. Join the pages with a single `\n` and remember where each page starts.
//! 2. From the current start, look at the window `[start, start + chunk_size]`.
//!    Descend through the boundary kinds (paragraph, line, sentence end,
//!    whitespace) and cut after the last boundary of the first kind found in
//!    the window. Fall back to a hard cut at the window end.
//! 3. The next chunk starts `chunk_overlap` characters before the cut, moved
//!    forward to the first word start inside that tail when there is one.
//! 4. Each chunk is attributed to the page holding the majority of its
//!    characters (earlier page on a tie).
//! 5. Whitespace-only chunks are dropped; indices stay contiguous from 0.
//!
//! Lengths are measured in Unicode scalar values, not bytes.
//!
//! # Example
//!
//! ```rust
//! use documind_core::chunk::split_pages;
//! use documind_core::models::Page;
//!
//! let pages = vec![Page::new(1, "The sky is blue. Water is wet.")];
//! let chunks = split_pages("doc-1", &pages, 20, 5).unwrap();
//! assert!(chunks.len() >= 2);
//! assert!(chunks.iter().all(|c| c.page_number == 1));
//! ```

use std::ops::Range;

use crate::error::{Error, Result};
use crate::models::{chunk_id, Chunk, Page};

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Boundary kinds in descending priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Whitespace,
}

const BOUNDARIES: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Whitespace,
];

impl Boundary {
    /// True if a cut at `end` falls right after this kind of boundary.
    fn ends_at(self, chars: &[char], end: usize) -> bool {
        let last = chars[end - 1];
        match self {
            Boundary::Paragraph => end >= 2 && last == '\n' && chars[end - 2] == '\n',
            Boundary::Line => last == '\n',
            Boundary::Sentence => {
                end >= 2 && last == ' ' && matches!(chars[end - 2], '.' | '!' | '?')
            }
            Boundary::Whitespace => last.is_whitespace(),
        }
    }
}

/// Split pages into unembedded chunks.
///
/// # Errors
///
/// Returns [`Error::Chunking`] if `chunk_size` is zero or a computed span
/// falls outside every page (an internal invariant violation).
pub fn split_pages(
    document_id: &str,
    pages: &[Page],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(Error::Chunking("chunk_size must be > 0".to_string()));
    }

    let mut text: Vec<char> = Vec::new();
    let mut page_ranges: Vec<(u32, Range<usize>)> = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            text.push('\n');
        }
        let start = text.len();
        text.extend(page.text.chars());
        page_ranges.push((page.number, start..text.len()));
    }

    let mut chunks = Vec::new();
    for span in split_spans(&text, chunk_size, chunk_overlap) {
        let slice = &text[span.clone()];
        if slice.iter().all(|c| c.is_whitespace()) {
            continue;
        }

        let (page_number, page_range) = attribute(&page_ranges, &span).ok_or_else(|| {
            Error::Chunking(format!(
                "span {}..{} of document {} lies outside every page",
                span.start, span.end, document_id
            ))
        })?;

        let index = chunks.len() as u32;
        chunks.push(Chunk {
            id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            page_number,
            chunk_index: index,
            text: slice.iter().collect(),
            char_start: span.start.max(page_range.start) - page_range.start,
            char_end: span.end.min(page_range.end) - page_range.start,
            vector: None,
        });
    }

    Ok(chunks)
}

/// Compute chunk spans over `chars`.
///
/// Spans start at 0, end at `chars.len()`, never exceed `size`, and each
/// span starts at or before the previous one's end.
fn split_spans(chars: &[char], size: usize, overlap: usize) -> Vec<Range<usize>> {
    let len = chars.len();
    let overlap = overlap.min(size.saturating_sub(1));
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        if len - start <= size {
            spans.push(start..len);
            break;
        }
        let end = find_break(chars, start + overlap, start + size);
        spans.push(start..end);
        start = next_start(chars, end, overlap);
    }

    spans
}

/// Pick a cut in `(min_end, limit]`, preferring higher-priority boundaries.
fn find_break(chars: &[char], min_end: usize, limit: usize) -> usize {
    for boundary in BOUNDARIES {
        if let Some(end) = ((min_end + 1)..=limit)
            .rev()
            .find(|&end| boundary.ends_at(chars, end))
        {
            return end;
        }
    }
    limit
}

fn next_start(chars: &[char], end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let tail = end - overlap;
    (tail..end)
        .find(|&p| is_word_start(chars, p))
        .unwrap_or(tail)
}

fn is_word_start(chars: &[char], p: usize) -> bool {
    !chars[p].is_whitespace() && (p == 0 || chars[p - 1].is_whitespace())
}

/// Majority page for a span; ties go to the earlier page.
fn attribute(
    page_ranges: &[(u32, Range<usize>)],
    span: &Range<usize>,
) -> Option<(u32, Range<usize>)> {
    let mut best: Option<(usize, &(u32, Range<usize>))> = None;
    for page in page_ranges {
        let shared = span
            .end
            .min(page.1.end)
            .saturating_sub(span.start.max(page.1.start));
        if shared > 0 && best.map_or(true, |(n, _)| shared > n) {
            best = Some((shared, page));
        }
    }
    best.map(|(_, (number, range))| (*number, range.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_page(text: &str) -> Vec<Page> {
        vec![Page::new(1, text)]
    }

    /// Rebuild a single page's text from its chunks, dropping overlaps.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for c in chunks {
            assert!(c.char_start <= covered, "gap before chunk {}", c.chunk_index);
            out.extend(c.text.chars().skip(covered - c.char_start));
            covered = c.char_end;
        }
        out
    }

    #[test]
    fn sky_sentence_splits_into_overlapping_chunks() {
        let chunks = split_pages("doc", &one_page("The sky is blue. Water is wet."), 20, 5).unwrap();
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].text, "The sky is blue. ");
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end, "chunks must overlap");
        }
        assert!(chunks.iter().all(|c| c.page_number == 1));
        assert!(chunks.iter().any(|c| c.text.contains("sky is blue")));
    }

    #[test]
    fn chunks_never_exceed_size() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40);
        let chunks = split_pages("doc", &one_page(&text), 120, 30).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 120);
        }
    }

    #[test]
    fn coverage_reconstructs_page_text() {
        let texts = [
            "First paragraph here.\n\nSecond paragraph is a bit longer than the first one.\n\nThird.",
            "no_boundaries_at_all_in_this_long_token_that_needs_hard_cuts_everywhere_please",
            "Line one\nLine two\nLine three\nLine four\nLine five\nLine six",
            "Ünïcödé wörds spread över several wïndows of téxt, with ä few sëntences. Ånd mörë.",
        ];
        for text in texts {
            for (size, overlap) in [(10, 3), (25, 5), (40, 0), (16, 15)] {
                let chunks = split_pages("doc", &one_page(text), size, overlap).unwrap();
                assert_eq!(reconstruct(&chunks), text, "size={} overlap={}", size, overlap);
            }
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = "Alpha beta gamma.\n\nDelta epsilon zeta eta theta.";
        let chunks = split_pages("doc", &one_page(text), 30, 0).unwrap();
        assert_eq!(chunks[0].text, "Alpha beta gamma.\n\n");
        assert_eq!(chunks[1].text, "Delta epsilon zeta eta theta.");
    }

    #[test]
    fn overlap_starts_at_word_boundary_when_possible() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split_pages("doc", &one_page(text), 20, 8).unwrap();
        for c in chunks.iter().skip(1) {
            let first = c.text.chars().next().unwrap();
            assert!(!first.is_whitespace());
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn indices_contiguous_and_ids_deterministic() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let a = split_pages("doc", &one_page(&text), 60, 10).unwrap();
        let b = split_pages("doc", &one_page(&text), 60, 10).unwrap();
        assert_eq!(a, b);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
            assert_eq!(c.id, chunk_id("doc", i as u32));
        }
    }

    #[test]
    fn degenerate_inputs() {
        assert!(split_pages("doc", &one_page(""), 20, 5).unwrap().is_empty());
        assert!(split_pages("doc", &one_page("   \n\n  "), 20, 5).unwrap().is_empty());
        assert!(split_pages("doc", &[], 20, 5).unwrap().is_empty());

        let short = split_pages("doc", &one_page("hi"), 20, 5).unwrap();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].text, "hi");
        assert_eq!((short[0].char_start, short[0].char_end), (0, 2));
    }

    #[test]
    fn zero_size_is_a_chunking_error() {
        let err = split_pages("doc", &one_page("text"), 0, 0).unwrap_err();
        assert_eq!(err.kind(), "chunking");
    }

    #[test]
    fn spanning_chunk_goes_to_majority_page() {
        let pages = vec![Page::new(1, "aaaa bbbb cccc"), Page::new(2, "dd")];
        let chunks = split_pages("doc", &pages, 100, 0).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 14));

        let pages = vec![Page::new(1, "x"), Page::new(2, "long text here")];
        let chunks = split_pages("doc", &pages, 100, 0).unwrap();
        assert_eq!(chunks[0].page_number, 2);
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 14));
    }

    #[test]
    fn empty_pages_keep_numbering() {
        let pages = vec![
            Page::new(1, "Intro text on the first page."),
            Page::new(2, ""),
            Page::new(3, "Conclusion text on the third page."),
        ];
        let chunks = split_pages("doc", &pages, 40, 0).unwrap();
        let numbers: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(chunks[1].char_start, 0);
    }

    #[test]
    fn spans_cover_whole_text() {
        let chars: Vec<char> = "a b c d e f g h i j k l m n o p".chars().collect();
        let spans = split_spans(&chars, 7, 2);
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, chars.len());
        for pair in spans.windows(2) {
            assert!(pair[1].start <= pair[0].end);
            assert!(pair[1].start > pair[0].start);
        }
    }
}
