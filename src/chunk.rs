//! Recursive, overlap-aware text splitter.
//!
//! Splits text into chunks of at most `chunk_size` characters by trying a
//! hierarchy of separators (`"\n\n"`, `"\n"`, `" "`, `""`). The first
//! separator present in the text is used; pieces that are still too long
//! are split again with the remaining separators. Small pieces are merged
//! greedily, and each new chunk re-uses up to `chunk_overlap` characters
//! from the tail of the previous one.
//!
//! Separators are kept at the start of the piece that follows them, and
//! every merged chunk is whitespace-trimmed. Each chunk records the
//! character offset at which it was found in the source text.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;

pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// One chunk of source text with its character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start_index: usize,
}

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split text into chunk strings, in source order.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split text and locate every chunk in the source.
    pub fn split_with_offsets(&self, text: &str) -> Vec<TextChunk> {
        let chunks = self.split_text(text);
        let char_starts: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        let char_to_byte = |c: usize| char_starts.get(c).copied().unwrap_or(text.len());
        let byte_to_char = |b: usize| char_starts.partition_point(|&s| s < b);

        let mut out = Vec::with_capacity(chunks.len());
        let mut index = 0usize;
        let mut prev_len = 0usize;

        for chunk in chunks {
            let offset = (index + prev_len).saturating_sub(self.chunk_overlap);
            let from = char_to_byte(offset);
            let found = text[from..]
                .find(chunk.as_str())
                .map(|b| from + b)
                .or_else(|| text.find(chunk.as_str()));

            index = found.map(byte_to_char).unwrap_or(offset);
            prev_len = chunk.chars().count();
            out.push(TextChunk {
                text: chunk,
                start_index: index,
            });
        }

        out
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.as_str();
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut good: Vec<&str> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if piece.chars().count() < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                final_chunks.extend(self.merge_splits(&good));
                good.clear();
            }
            if remaining.is_empty() {
                final_chunks.push(piece.to_string());
            } else {
                final_chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !good.is_empty() {
            final_chunks.extend(self.merge_splits(&good));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in splits {
            let len = piece.chars().count();
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_trimmed(&current) {
                    docs.push(doc);
                }
                // Drop from the front until only the overlap window is left
                // and the next piece fits.
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            current.push_back((piece, len));
            total += len;
        }

        if let Some(doc) = join_trimmed(&current) {
            docs.push(doc);
        }
        docs
    }
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

fn join_trimmed(parts: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = parts.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on `separator`, attaching each separator to the piece after it.
/// An empty separator splits into single characters. Empty pieces are dropped.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[last..idx]);
        last = idx;
    }
    pieces.push(&text[last..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}
