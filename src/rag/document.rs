//! Policy documents and the on-disk corpus loader.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::RagError;

const CORPUS_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// A source document, identified by its file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub title: String,
    pub text: String,
}

impl Document {
    /// Builds a document, deriving the title from the first `# ` heading.
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        let source = source.into();
        let text = text.into();
        let stem = Path::new(&source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&source)
            .to_string();
        let title = extract_title(&text, &stem);
        Self {
            source,
            title,
            text,
        }
    }
}

/// Result of reading the corpus directory: usable documents plus the
/// per-file failures that were skipped.
#[derive(Debug, Default)]
pub struct CorpusLoad {
    pub documents: Vec<Document>,
    pub skipped: Vec<RagError>,
}

/// Reads every `.md` / `.txt` file directly under `dir`, in file-name order.
///
/// Unreadable or blank files are reported in [`CorpusLoad::skipped`] and do not
/// stop the rest of the corpus from loading. A missing directory is an error.
pub fn load_corpus(dir: &Path) -> Result<CorpusLoad, RagError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        RagError::ingestion(dir.display().to_string(), format!("cannot read corpus: {e}"))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_corpus_extension(path))
        .collect();
    files.sort();

    let mut load = CorpusLoad::default();
    for path in files {
        match load_document(&path) {
            Ok(doc) => {
                tracing::debug!("Loaded {} ({})", doc.source, doc.title);
                load.documents.push(doc);
            }
            Err(err) => {
                tracing::warn!("Skipping document: {}", err);
                load.skipped.push(err);
            }
        }
    }

    Ok(load)
}

/// Reads one document. Blank content is an ingestion error.
pub fn load_document(path: &Path) -> Result<Document, RagError> {
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let text = fs::read_to_string(path)
        .map_err(|e| RagError::ingestion(&source, format!("unreadable: {e}")))?;
    if text.trim().is_empty() {
        return Err(RagError::ingestion(&source, "document is empty"));
    }

    Ok(Document::new(source, text))
}

fn has_corpus_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            CORPUS_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

fn extract_title(text: &str, fallback: &str) -> String {
    for line in text.lines() {
        if let Some(heading) = line.strip_prefix("# ") {
            let heading = heading.trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }
    title_case(fallback)
}

fn title_case(stem: &str) -> String {
    stem.split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
