//! Context assembly.
//!
//! Renders retrieved chunks into the prompt context block and the
//! user-facing source list.

use serde::{Deserialize, Serialize};

use super::error::RagError;
use super::retriever::RetrievalResult;
use crate::core::config::ContextSettings;

const CHUNK_SEPARATOR: &str = "\n\n---\n\n";
const ELLIPSIS: &str = "...";

/// Configuration for context building.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextBuilderConfig {
    /// Per-chunk character budget inside the context block.
    pub max_chunk_chars: usize,
    /// Length of the snippet attached to each source.
    pub snippet_chars: usize,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
            snippet_chars: 200,
        }
    }
}

impl From<&ContextSettings> for ContextBuilderConfig {
    fn from(settings: &ContextSettings) -> Self {
        Self {
            max_chunk_chars: settings.max_chunk_chars,
            snippet_chars: settings.snippet_chars,
        }
    }
}

/// One cited document in a chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    /// Renders every hit, in result order, as
    /// `[Document: <title> (<source>)]` followed by its (truncated) text.
    pub fn build(&self, result: &RetrievalResult) -> Result<String, RagError> {
        if result.is_empty() {
            return Err(RagError::InvalidInput(
                "cannot build context from an empty retrieval result".to_string(),
            ));
        }

        let blocks: Vec<String> = result
            .hits
            .iter()
            .map(|hit| {
                format!(
                    "[Document: {} ({})]\n{}",
                    hit.chunk.title,
                    hit.chunk.source,
                    truncate_chars(&hit.chunk.text, self.config.max_chunk_chars)
                )
            })
            .collect();

        Ok(blocks.join(CHUNK_SEPARATOR))
    }

    /// Source list for the response, one entry per hit.
    pub fn sources(&self, result: &RetrievalResult) -> Vec<SourceRef> {
        result
            .hits
            .iter()
            .map(|hit| SourceRef {
                source: hit.chunk.source.clone(),
                title: hit.chunk.title.clone(),
                snippet: snippet(&hit.chunk.text, self.config.snippet_chars),
                score: hit.score,
            })
            .collect()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let cut = truncate_chars(trimmed, max_chars);
    if cut.len() < trimmed.len() {
        format!("{}{}", cut.trim_end(), ELLIPSIS)
    } else {
        cut.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunker::Chunk;
    use crate::rag::store::ScoredEntry;

    fn hit(source: &str, title: &str, text: &str, score: f32) -> ScoredEntry {
        ScoredEntry {
            chunk: Chunk {
                source: source.to_string(),
                title: title.to_string(),
                text: text.to_string(),
                start_offset: 0,
                chunk_index: 0,
            },
            score,
        }
    }

    fn result(hits: Vec<ScoredEntry>) -> RetrievalResult {
        let best_score = hits.first().map(|h| h.score).unwrap_or(0.0);
        RetrievalResult {
            query: "q".to_string(),
            hits,
            best_score,
        }
    }

    #[test]
    fn build_formats_blocks_in_result_order() {
        let builder = ContextBuilder::default();
        let context = builder
            .build(&result(vec![
                hit("pto.md", "Paid Time Off", "Fifteen days.", 0.9),
                hit("remote.md", "Remote Work", "Two days a week.", 0.5),
            ]))
            .unwrap();

        assert_eq!(
            context,
            "[Document: Paid Time Off (pto.md)]\nFifteen days.\n\n---\n\n\
             [Document: Remote Work (remote.md)]\nTwo days a week."
        );
    }

    #[test]
    fn build_truncates_long_chunks() {
        let builder = ContextBuilder::new(ContextBuilderConfig {
            max_chunk_chars: 5,
            snippet_chars: 3,
        });
        let context = builder
            .build(&result(vec![hit("a.md", "A", "héllo world", 0.9)]))
            .unwrap();
        assert_eq!(context, "[Document: A (a.md)]\nhéllo");
    }

    #[test]
    fn empty_result_is_invalid_input() {
        let builder = ContextBuilder::default();
        assert!(matches!(
            builder.build(&result(Vec::new())),
            Err(RagError::InvalidInput(_))
        ));
    }

    #[test]
    fn sources_carry_snippets_and_scores() {
        let builder = ContextBuilder::new(ContextBuilderConfig {
            max_chunk_chars: 100,
            snippet_chars: 10,
        });
        let sources = builder.sources(&result(vec![
            hit("pto.md", "Paid Time Off", "Employees receive fifteen days.", 0.8),
            hit("short.md", "Short", "Tiny.", 0.4),
        ]));

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].snippet, "Employees...");
        assert_eq!(sources[0].score, 0.8);
        assert_eq!(sources[1].snippet, "Tiny.");
        assert_eq!(sources[1].title, "Short");
    }
}
