//! Text chunking for long-form synthesis.
//!
//! Splits text into contiguous pieces of at most `max_len` characters,
//! preferring natural boundaries in this order:
//!
//! 1. Paragraph break (`\n\n`)
//! 2. Sentence end (`.`, `!`, `?` followed by whitespace)
//! 3. Line break
//! 4. Any whitespace
//! 5. Hard cut at `max_len` (only when a single word exceeds the budget)
//!
//! Whitespace following a split point stays with the preceding chunk, so the
//! concatenation of all chunks always reproduces the input exactly. Whitespace
//! that cannot share a chunk with the word after it, including a long leading
//! run, becomes a blank chunk of its own, which callers skip instead of
//! sending to a provider.

use std::ops::Range;

use serde::Serialize;

use crate::core::error::{ConversionError, ConversionResult};

/// A contiguous slice of the source text, synthesized as one provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position in the final audio
    pub index: usize,
    pub text: String,
    /// Byte offsets into the source text
    pub range: Range<usize>,
}

impl TextChunk {
    /// Chunks made only of whitespace carry nothing to speak.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into chunks of at most `max_len` characters.
///
/// Empty or whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, max_len: usize) -> ConversionResult<Vec<TextChunk>> {
    if max_len == 0 {
        return Err(ConversionError::InputError(
            "chunk size limit must be greater than 0".to_string(),
        ));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let rest = &text[start..];
        let limit = match rest.char_indices().nth(max_len) {
            Some((offset, _)) => offset,
            None => {
                ranges.push(start..text.len());
                break;
            }
        };

        let cut = find_split(rest, limit);
        ranges.push(start..start + cut);
        start += cut;
    }

    Ok(ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| TextChunk {
            index,
            text: text[range.clone()].to_string(),
            range,
        })
        .collect())
}

/// Pick the byte offset to cut `rest` at, never beyond `limit`.
///
/// `limit` is the byte offset of the first character that does not fit.
fn find_split(rest: &str, limit: usize) -> usize {
    let window = &rest[..limit];

    // Blank window: any cut keeps words intact
    let Some(content_start) = window.find(|c: char| !c.is_whitespace()) else {
        return limit;
    };

    let mut paragraph = None;
    let mut sentence = None;
    let mut line = None;
    let mut space = None;

    let mut chars = window.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = i + c.len_utf8();
        let next = match chars.peek() {
            Some(&(_, n)) => Some(n),
            None => rest[end..].chars().next(),
        };

        if end <= content_start {
            continue;
        }

        match c {
            '\n' => {
                if i > 0 && window.as_bytes()[i - 1] == b'\n' && i - 1 >= content_start {
                    paragraph = Some(end);
                }
                line = Some(end);
                space = Some(end);
            }
            '.' | '!' | '?' if next.is_some_and(char::is_whitespace) => {
                sentence = Some(end);
            }
            c if c.is_whitespace() => space = Some(end),
            _ if next.is_some_and(char::is_whitespace) && end == limit => {
                // The word ends exactly at the budget
                space = Some(end);
            }
            _ => {}
        }
    }

    match paragraph.or(sentence).or(line).or(space) {
        Some(cut) => extend_over_whitespace(rest, cut, limit),
        // Leading whitespace pushes the next word past the budget: give the
        // word a fresh window instead of cutting into it
        None if content_start > 0 => content_start,
        None => limit,
    }
}

/// Keep trailing whitespace with the chunk that precedes it.
fn extend_over_whitespace(rest: &str, mut cut: usize, limit: usize) -> usize {
    for c in rest[cut..limit].chars() {
        if !c.is_whitespace() {
            break;
        }
        cut += c.len_utf8();
    }
    cut
}
