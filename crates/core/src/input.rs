//! Loading narration text from inline strings, text files and EPUB books.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use scraper::Html;
use thiserror::Error;
use tracing::{debug, info, warn};

const HTML_EXTENSIONS: &[&str] = &[".html", ".xhtml", ".htm"];
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Error, Debug)]
pub enum InputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not read EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("No narratable text found in {origin}")]
    Empty { origin: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Inline(String),
    TextFile(PathBuf),
    Epub(PathBuf),
}

impl InputSource {
    /// Pick the reader from the file extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_epub = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));
        if is_epub {
            InputSource::Epub(path)
        } else {
            InputSource::TextFile(path)
        }
    }

    fn origin(&self) -> String {
        match self {
            InputSource::Inline(_) => "inline text".to_string(),
            InputSource::TextFile(path) | InputSource::Epub(path) => path.display().to_string(),
        }
    }

    pub async fn load(&self) -> Result<String, InputError> {
        let text = match self {
            InputSource::Inline(text) => text.clone(),
            InputSource::TextFile(path) => tokio::fs::read_to_string(path).await?,
            InputSource::Epub(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || extract_epub(&path))
                    .await
                    .map_err(std::io::Error::other)??
            }
        };

        if text.trim().is_empty() {
            return Err(InputError::Empty {
                origin: self.origin(),
            });
        }
        Ok(text)
    }
}

fn is_html_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    HTML_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Plain text of every HTML document in the book, one line per document,
/// in archive order. Unreadable entries are skipped.
pub fn extract_epub(path: &Path) -> Result<String, InputError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut lines = Vec::new();

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index = i, error = %e, "Skipping unreadable EPUB entry");
                continue;
            }
        };
        let name = entry.name().to_string();
        if !is_html_entry(&name) {
            continue;
        }

        let mut markup = String::new();
        if let Err(e) = entry.read_to_string(&mut markup) {
            warn!(entry = %name, error = %e, "Skipping unreadable EPUB document");
            continue;
        }

        let text = html_to_text(&markup);
        debug!(entry = %name, chars = text.len(), "Extracted document");
        if !text.is_empty() {
            lines.push(text);
        }
    }

    info!(documents = lines.len(), "EPUB extracted");
    if lines.is_empty() {
        return Err(InputError::Empty {
            origin: path.display().to_string(),
        });
    }
    Ok(lines.join("\n"))
}

/// Visible text of an HTML document, text nodes joined by single spaces.
pub fn html_to_text(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let mut pieces = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| SKIPPED_ELEMENTS.contains(&element.name()))
        });
        if hidden {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }

    pieces.join(" ")
}
