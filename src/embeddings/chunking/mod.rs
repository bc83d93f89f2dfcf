#[cfg(test)]
mod tests;

use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("paragraph pattern is valid"));
static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+").expect("sentence pattern is valid"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("word pattern is valid"));

/// A piece of a larger document, ready for embedding
///
/// `text` is always the exact slice `original[start_pos..end_pos]`, so a chunk can be
/// mapped back to where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
    pub start_pos: usize,
    pub end_pos: usize,
    pub is_first: bool,
    pub is_last: bool,
}

/// Configuration for text chunking
///
/// Sizes are UTF-8 byte lengths, which equal character counts for ASCII text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size, including any overlap carried from the previous chunk
    pub max_chunk_size: usize,
    /// A chunk is never closed below this size; it may run past the maximum instead
    pub min_chunk_size: usize,
    /// Trailing characters of a chunk repeated at the start of the next one
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 500,
            min_chunk_size: 100,
            overlap_size: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    const fn len(self) -> usize {
        self.end - self.start
    }
}

/// Split `text` into overlapping chunks, preferring paragraph, then sentence, then word
/// boundaries.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let max = config.max_chunk_size.max(1);
    let units = split_units(text, config);
    if units.is_empty() {
        return Vec::new();
    }

    let mut spans: Vec<Span> = Vec::new();
    let mut i = 0;
    let mut chunk_start = units[0].start;
    loop {
        // The first unit always goes in, even when the overlap prefix pushes it past max
        let mut end = units[i].end;
        let mut j = i + 1;
        while j < units.len()
            && (units[j].end - chunk_start <= max || end - chunk_start < config.min_chunk_size)
        {
            end = units[j].end;
            j += 1;
        }
        spans.push(Span {
            start: chunk_start,
            end,
        });

        if j >= units.len() {
            break;
        }
        chunk_start = overlap_start(text, Span { start: chunk_start, end }, units[j], config);
        i = j;
    }

    merge_small_tail(&mut spans, config);

    let total = spans.len();
    let chunks: Vec<TextChunk> = spans
        .into_iter()
        .enumerate()
        .map(|(index, span)| TextChunk {
            text: text[span.start..span.end].to_string(),
            index,
            start_pos: span.start,
            end_pos: span.end,
            is_first: index == 0,
            is_last: index + 1 == total,
        })
        .collect();

    debug!(
        "Chunked {} bytes into {} chunks (max {}, overlap {})",
        text.len(),
        chunks.len(),
        config.max_chunk_size,
        config.overlap_size
    );

    chunks
}

/// Stitch chunks back together, dropping the overlapping prefixes.
///
/// Gaps between chunks (the paragraph breaks that were trimmed away) are restored as a
/// blank line, so the result matches the source up to whitespace.
#[inline]
pub fn reconstruct_from_chunks(chunks: &[TextChunk]) -> String {
    let mut ordered: Vec<&TextChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let mut result = String::new();
    let mut prev_end: Option<usize> = None;
    for chunk in ordered {
        match prev_end {
            None => result.push_str(&chunk.text),
            Some(end) if chunk.start_pos < end => {
                let skip = end - chunk.start_pos;
                if skip < chunk.text.len() && chunk.text.is_char_boundary(skip) {
                    result.push_str(&chunk.text[skip..]);
                }
            }
            Some(_) => {
                result.push_str("\n\n");
                result.push_str(&chunk.text);
            }
        }
        prev_end = Some(prev_end.map_or(chunk.end_pos, |end| end.max(chunk.end_pos)));
    }
    result
}

/// Break the text into the smallest units the packer works with: whole paragraphs when
/// they fit, otherwise sentences, otherwise runs of words.
fn split_units(text: &str, config: &ChunkingConfig) -> Vec<Span> {
    let max = config.max_chunk_size.max(1);
    let window = max.saturating_sub(config.overlap_size).max(1);

    let mut units = Vec::new();
    for paragraph in split_on(&PARAGRAPH_BREAK, text, Span { start: 0, end: text.len() }) {
        if paragraph.len() <= max {
            units.push(paragraph);
            continue;
        }
        for sentence in split_on(&SENTENCE_BREAK, text, paragraph) {
            if sentence.len() <= max {
                units.push(sentence);
            } else {
                units.extend(word_windows(text, sentence, window));
            }
        }
    }
    units
}

/// Split `within` on every match of `separator`, trimming whitespace from each piece
fn split_on(separator: &Regex, text: &str, within: Span) -> Vec<Span> {
    let slice = &text[within.start..within.end];
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in separator.find_iter(slice).map_while(Result::ok) {
        pieces.extend(trimmed(text, within.start + last, within.start + m.start()));
        last = m.end();
    }
    pieces.extend(trimmed(text, within.start + last, within.end));
    pieces
}

fn trimmed(text: &str, start: usize, end: usize) -> Option<Span> {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    (lead + trail < slice.len()).then_some(Span {
        start: start + lead,
        end: end - trail,
    })
}

/// Greedily pack whole words into windows; a single word longer than the window is
/// cut at character boundaries.
fn word_windows(text: &str, within: Span, window: usize) -> Vec<Span> {
    let slice = &text[within.start..within.end];
    let mut windows = Vec::new();
    let mut current: Option<Span> = None;

    for m in WORD.find_iter(slice).map_while(Result::ok) {
        let word = Span {
            start: within.start + m.start(),
            end: within.start + m.end(),
        };

        if word.len() > window {
            windows.extend(current.take());
            windows.extend(hard_split(text, word, window));
            continue;
        }

        current = match current {
            Some(span) if word.end - span.start > window => {
                windows.push(span);
                Some(word)
            }
            Some(span) => Some(Span {
                start: span.start,
                end: word.end,
            }),
            None => Some(word),
        };
    }
    windows.extend(current);
    windows
}

fn hard_split(text: &str, word: Span, window: usize) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut start = word.start;
    while start < word.end {
        let mut end = (start + window).min(word.end);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end <= start {
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        pieces.push(Span { start, end });
        start = end;
    }
    pieces
}

/// Where the chunk after `prev` should begin so that it repeats up to `overlap_size`
/// trailing bytes of `prev`, starting on a word boundary and never making the next
/// chunk's first unit exceed the maximum size.
fn overlap_start(text: &str, prev: Span, next: Span, config: &ChunkingConfig) -> usize {
    if config.overlap_size == 0 {
        return next.start;
    }

    let mut earliest = prev
        .end
        .saturating_sub(config.overlap_size)
        .max(next.end.saturating_sub(config.max_chunk_size))
        .max(prev.start + 1);
    while earliest < prev.end && !text.is_char_boundary(earliest) {
        earliest += 1;
    }
    if earliest >= prev.end {
        return next.start;
    }

    let at_word_start = text[..earliest].ends_with(char::is_whitespace)
        && !text[earliest..].starts_with(char::is_whitespace);
    if at_word_start {
        return earliest;
    }

    let region = &text[earliest..prev.end];
    let word_start = region
        .char_indices()
        .skip_while(|(_, c)| !c.is_whitespace())
        .find(|(_, c)| !c.is_whitespace())
        .map(|(offset, _)| earliest + offset);

    match word_start {
        Some(start) if start < prev.end => start,
        _ => next.start,
    }
}

fn merge_small_tail(spans: &mut Vec<Span>, config: &ChunkingConfig) {
    if spans.len() < 2 {
        return;
    }
    let last = spans[spans.len() - 1];
    let prev = spans[spans.len() - 2];
    let fresh = last.end - last.start.max(prev.end);
    if fresh < config.min_chunk_size {
        spans.pop();
        if let Some(prev) = spans.last_mut() {
            prev.end = last.end;
        }
    }
}
