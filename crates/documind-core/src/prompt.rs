//! Prompt assembly, citation-marker parsing, and citation building.
//!
//! Context chunks are numbered `[1]..[n]` in retrieval order. The model is
//! told to cite those markers; markers found in its answer are mapped back
//! to the chunk metadata, never to text search.

use std::collections::HashSet;

use crate::models::{Citation, RetrievedContext};
use crate::protocol::ContextItem;

/// Characters of chunk text kept in a citation excerpt.
pub const EXCERPT_CHARS: usize = 300;

/// Answer returned without generation when retrieval finds nothing.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant information in the documents to answer your question.";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using only the provided document excerpts.

Guidelines:
- Answer only from the context below. If the context does not contain the answer, say so plainly.
- Cite the excerpts you rely on with their bracketed numbers, for example [1] or [2, 3].
- Keep answers concise and factual.
- Do not invent document names or page numbers.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise summaries.";

/// Number the retrieved chunks for the wire request.
pub fn context_items(context: &RetrievedContext) -> Vec<ContextItem> {
    context
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| ContextItem {
            marker: i + 1,
            document_name: item.metadata.document_name.clone(),
            page_number: item.metadata.page_number,
            text: item.metadata.text.clone(),
        })
        .collect()
}

/// Render the user turn: tagged context blocks followed by the question.
pub fn build_user_prompt(query: &str, context: &[ContextItem]) -> String {
    let mut prompt = String::from("Context from documents:\n\n");
    for item in context {
        prompt.push_str(&format!(
            "[{}] (Document: {}, Page: {})\n{}\n\n",
            item.marker, item.document_name, item.page_number, item.text
        ));
    }
    prompt.push_str(&format!("Question: {}\n\nAnswer:", query));
    prompt
}

/// Render the user turn for a summary request: the text of every item, in
/// order, with blank items dropped.
pub fn build_summary_prompt(context: &[ContextItem]) -> String {
    let text: Vec<&str> = context
        .iter()
        .map(|item| item.text.trim())
        .filter(|t| !t.is_empty())
        .collect();
    format!(
        "Please provide a concise summary of the following text:\n\n{}",
        text.join("\n\n")
    )
}

/// Extract cited marker numbers in order of first appearance.
///
/// Recognises `[1]`, `[1, 2]`, `[1,2]` and `Source 1`. Bracketed groups that
/// contain anything other than digits, commas and spaces are ignored.
pub fn parse_markers(answer: &str) -> Vec<usize> {
    let chars: Vec<char> = answer.chars().collect();
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |n: usize| {
        if seen.insert(n) {
            found.push(n);
        }
    };

    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            if let Some(close) = chars[i + 1..].iter().position(|&c| c == ']') {
                let inner: String = chars[i + 1..i + 1 + close].iter().collect();
                if let Some(numbers) = parse_group(&inner) {
                    numbers.into_iter().for_each(&mut push);
                    i += close + 2;
                    continue;
                }
            }
        } else if let Some(n) = source_marker_at(&chars, i) {
            push(n.0);
            i = n.1;
            continue;
        }
        i += 1;
    }
    found
}

fn parse_group(inner: &str) -> Option<Vec<usize>> {
    if inner.trim().is_empty() {
        return None;
    }
    inner
        .split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                None
            } else {
                part.parse().ok()
            }
        })
        .collect()
}

/// Match `Source <digits>` at `i`; returns the number and the index after it.
fn source_marker_at(chars: &[char], i: usize) -> Option<(usize, usize)> {
    const WORD: &str = "source ";
    let word_len = WORD.chars().count();
    if i + word_len > chars.len() {
        return None;
    }
    if i > 0 && chars[i - 1].is_alphanumeric() {
        return None;
    }
    let candidate: String = chars[i..i + word_len].iter().collect();
    if !candidate.eq_ignore_ascii_case(WORD) {
        return None;
    }
    let digits_end = chars[i + word_len..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map(|p| i + word_len + p)
        .unwrap_or(chars.len());
    if digits_end == i + word_len {
        return None;
    }
    let number: String = chars[i + word_len..digits_end].iter().collect();
    number.parse().ok().map(|n| (n, digits_end))
}

/// Map markers to citations.
///
/// Unknown markers are skipped; citations are deduplicated by
/// `(document_name, page_number)` keeping the first marker's excerpt.
pub fn build_citations(markers: &[usize], context: &RetrievedContext) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for &marker in markers {
        let Some(item) = marker.checked_sub(1).and_then(|i| context.items.get(i)) else {
            continue;
        };
        let meta = &item.metadata;
        if !seen.insert((meta.document_name.clone(), meta.page_number)) {
            continue;
        }
        citations.push(Citation {
            document_name: meta.document_name.clone(),
            page_number: meta.page_number,
            excerpt: excerpt(&meta.text),
        });
    }
    citations
}

/// First [`EXCERPT_CHARS`] characters of `text`.
pub fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryMetadata, FileKind, ScoredEntry};

    fn ctx(items: &[(&str, u32, &str)]) -> RetrievedContext {
        RetrievedContext {
            items: items
                .iter()
                .enumerate()
                .map(|(i, (doc, page, text))| ScoredEntry {
                    id: format!("c{}", i),
                    score: 1.0 - i as f32 * 0.1,
                    metadata: EntryMetadata {
                        document_id: format!("{}-id", doc),
                        document_name: doc.to_string(),
                        page_number: *page,
                        chunk_index: i as u32,
                        text: text.to_string(),
                        file_kind: FileKind::Pdf,
                        char_start: 0,
                        char_end: text.chars().count(),
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn summary_prompt_joins_page_text() {
        let items = context_items(&ctx(&[
            ("a.pdf", 1, "First page."),
            ("a.pdf", 2, "   "),
            ("a.pdf", 3, "Third page."),
        ]));
        assert_eq!(
            build_summary_prompt(&items),
            "Please provide a concise summary of the following text:\n\nFirst page.\n\nThird page."
        );
    }

    #[test]
    fn markers_in_first_occurrence_order() {
        assert_eq!(parse_markers("Blue [2], also [1] and [2]."), vec![2, 1]);
        assert_eq!(parse_markers("See [3, 1] and [1,4]"), vec![3, 1, 4]);
        assert_eq!(parse_markers("Per Source 2 and source 1."), vec![2, 1]);
    }

    #[test]
    fn non_marker_brackets_are_ignored() {
        assert!(parse_markers("An array [a, b] or [] or [1.5]").is_empty());
        assert!(parse_markers("Resource 3 is not a marker").is_empty());
        assert!(parse_markers("unterminated [1").is_empty());
    }

    #[test]
    fn citations_dedupe_by_page_and_skip_unknown() {
        let context = ctx(&[
            ("a.pdf", 1, "first"),
            ("a.pdf", 1, "second"),
            ("b.pdf", 4, "third"),
        ]);
        let citations = build_citations(&[3, 9, 1, 2, 0], &context);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].document_name, "b.pdf");
        assert_eq!(citations[0].page_number, 4);
        assert_eq!(citations[1].document_name, "a.pdf");
        assert_eq!(citations[1].excerpt, "first");
    }

    #[test]
    fn excerpt_is_bounded_by_chars() {
        let long = "é".repeat(EXCERPT_CHARS + 50);
        assert_eq!(excerpt(&long).chars().count(), EXCERPT_CHARS);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn prompt_tags_each_chunk() {
        let context = ctx(&[("a.pdf", 2, "Alpha."), ("b.txt", 1, "Beta.")]);
        let items = context_items(&context);
        assert_eq!(items[1].marker, 2);

        let prompt = build_user_prompt("What?", &items);
        assert!(prompt.contains("[1] (Document: a.pdf, Page: 2)\nAlpha."));
        assert!(prompt.contains("[2] (Document: b.txt, Page: 1)\nBeta."));
        assert!(prompt.ends_with("Question: What?\n\nAnswer:"));
    }
}
