//! Splits documents into overlapping chunks.
//!
//! Every chunk is an exact substring of its document. Consecutive chunks
//! share at most `chunk_overlap` characters, so dropping the shared prefix of
//! each chunk (via `start_offset`) and concatenating reproduces the source.

use serde::{Deserialize, Serialize};

use super::document::Document;
use super::error::RagError;
use crate::core::config::ChunkingSettings;

const PARAGRAPH_BREAK: &str = "\n\n";
const SENTENCE_ENDINGS: [&str; 6] = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

/// A contiguous piece of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// File name of the owning document.
    pub source: String,
    pub title: String,
    pub text: String,
    /// Byte offset of `text` within the document.
    pub start_offset: usize,
    /// Position of the chunk within its document, starting at 0.
    pub chunk_index: usize,
}

impl Chunk {
    pub fn id(&self) -> String {
        format!("{}#{}", self.source, self.chunk_index)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// `chunk_size` and `chunk_overlap` are measured in characters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self, RagError> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    /// Lazily walks `document`. Calling this again restarts from the beginning.
    pub fn chunks<'a>(&self, document: &'a Document) -> Result<Chunks<'a>, RagError> {
        if document.text.trim().is_empty() {
            return Err(RagError::ingestion(&document.source, "document is empty"));
        }
        Ok(Chunks {
            document,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            position: 0,
            chunk_index: 0,
            finished: false,
        })
    }

    pub fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>, RagError> {
        Ok(self.chunks(document)?.collect())
    }
}

/// Iterator over the chunks of one document.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    document: &'a Document,
    chunk_size: usize,
    chunk_overlap: usize,
    position: usize,
    chunk_index: usize,
    finished: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }

        let text = self.document.text.as_str();
        let start = self.position;
        let window_end = advance_chars(text, start, self.chunk_size);

        let end = if window_end >= text.len() {
            self.finished = true;
            text.len()
        } else {
            // Every chunk must be longer than the overlap so the walk advances.
            let min_chars = (self.chunk_overlap + 1).max(self.chunk_size / 2);
            let min_end = advance_chars(text, start, min_chars);
            find_break(text, min_end, window_end).unwrap_or(window_end)
        };

        let chunk = Chunk {
            source: self.document.source.clone(),
            title: self.document.title.clone(),
            text: text[start..end].to_string(),
            start_offset: start,
            chunk_index: self.chunk_index,
        };

        if !self.finished {
            let overlap_start = retreat_chars(text, end, self.chunk_overlap);
            self.position = snap_to_word_start(text, overlap_start, end);
        }
        self.chunk_index += 1;

        Some(chunk)
    }
}

/// Byte index `count` characters after `from`, capped at the end of `text`.
fn advance_chars(text: &str, from: usize, count: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(count)
        .map(|(offset, _)| from + offset)
        .unwrap_or(text.len())
}

/// Byte index `count` characters before `from`, floored at 0.
fn retreat_chars(text: &str, from: usize, count: usize) -> usize {
    if count == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(count - 1)
        .map(|(offset, _)| offset)
        .unwrap_or(0)
}

/// Moves `from` forward to just past the next whitespace before `limit`,
/// so overlapping chunks do not open mid-word.
fn snap_to_word_start(text: &str, from: usize, limit: usize) -> usize {
    if from == 0 || from >= limit {
        return from;
    }
    let starts_word = text[..from]
        .chars()
        .next_back()
        .map(char::is_whitespace)
        .unwrap_or(true);
    if starts_word {
        return from;
    }
    text[from..limit]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(offset, c)| from + offset + c.len_utf8())
        .unwrap_or(from)
}

/// Preferred cut point within `text[min_end..max_end]`: after a paragraph
/// break, then a sentence end, then a line break, then any whitespace.
fn find_break(text: &str, min_end: usize, max_end: usize) -> Option<usize> {
    if min_end >= max_end {
        return None;
    }
    let region = &text[min_end..max_end];

    if let Some(pos) = region.rfind(PARAGRAPH_BREAK) {
        return Some(min_end + pos + PARAGRAPH_BREAK.len());
    }

    let sentence = SENTENCE_ENDINGS
        .iter()
        .filter_map(|ending| region.rfind(ending).map(|pos| pos + ending.len()))
        .max();
    if let Some(cut) = sentence {
        return Some(min_end + cut);
    }

    if let Some(pos) = region.rfind('\n') {
        return Some(min_end + pos + 1);
    }

    region
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(pos, c)| min_end + pos + c.len_utf8())
}
