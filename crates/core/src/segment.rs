//! Splitting source text into bounded narration units.

use std::time::Duration;

use thiserror::Error;

use crate::types::{NarrationUnit, TextChunk};

/// Largest request the speech service accepts comfortably.
pub const DEFAULT_MAX_CHARS: usize = 4800;
pub const DEFAULT_PAUSE_MARKER: &str = "[PAUSE]";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    #[error("max_chars must be greater than zero")]
    InvalidLimit,

    #[error(
        "No sentence end or whitespace within {max_chars} characters at byte {offset}; lower --max-chars or clean the text"
    )]
    NoSplitPoint { offset: usize, max_chars: usize },
}

/// How finely chunks are narrated: one unit per chunk or one per sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    Chunk,
    #[default]
    Sentence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PauseMarker {
    pub token: String,
    pub duration: Duration,
}

impl Default for PauseMarker {
    fn default() -> Self {
        Self {
            token: DEFAULT_PAUSE_MARKER.to_string(),
            duration: Duration::from_secs(1),
        }
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Each cut goes after the last `.` inside the window, or at the last
/// whitespace when there is no period. Chunks are trimmed and never empty.
pub fn segment_text(text: &str, max_chars: usize) -> Result<Vec<TextChunk>, SegmentationError> {
    if max_chars == 0 {
        return Err(SegmentationError::InvalidLimit);
    }

    let trimmed = text.trim();
    let lead = text.len() - text.trim_start().len();
    let mut rest = trimmed;
    let mut chunks = Vec::new();

    while !rest.is_empty() {
        let Some((window_end, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(TextChunk::new(rest, chunks.len()));
            break;
        };

        let window = &rest[..window_end];
        let split_at = match window.rfind('.') {
            Some(dot) => dot + 1,
            None => window.rfind(char::is_whitespace).ok_or_else(|| {
                SegmentationError::NoSplitPoint {
                    offset: lead + trimmed.len() - rest.len(),
                    max_chars,
                }
            })?,
        };

        let head = window[..split_at].trim_end();
        if !head.is_empty() {
            chunks.push(TextChunk::new(head, chunks.len()));
        }
        rest = rest[split_at..].trim_start();
    }

    Ok(chunks)
}

/// Break chunks into sentences, keeping the terminating period.
///
/// Runs of bare periods (ellipses) stay attached to the preceding sentence.
pub fn split_sentences(chunks: &[TextChunk]) -> Vec<TextChunk> {
    let mut sentences: Vec<TextChunk> = Vec::new();

    for chunk in chunks {
        let mut starts_new = true;
        for piece in chunk.content.split_inclusive('.') {
            let piece = piece.trim();
            let has_words = piece.chars().any(|c| c != '.' && !c.is_whitespace());

            if has_words {
                let index = sentences.len();
                sentences.push(TextChunk::new(piece, index));
            } else if !starts_new && let Some(last) = sentences.last_mut() {
                last.content.push_str(piece);
            }
            starts_new = false;
        }
    }

    sentences
}

/// Turn raw text into the ordered list of units the pipeline narrates.
///
/// The pause marker splits the text into blocks; a silent gap is inserted
/// between blocks that both contain speech. Consecutive markers add up; a
/// zero-length pause still splits the text but inserts nothing.
pub fn plan_narration(
    text: &str,
    max_chars: usize,
    granularity: Granularity,
    pause: Option<&PauseMarker>,
) -> Result<Vec<NarrationUnit>, SegmentationError> {
    let blocks: Vec<&str> = match pause {
        Some(marker) if !marker.token.is_empty() => text.split(marker.token.as_str()).collect(),
        _ => vec![text],
    };

    let mut units = Vec::new();
    let mut pending_markers = 0u32;

    for (position, block) in blocks.iter().enumerate() {
        if position > 0 {
            pending_markers += 1;
        }

        let chunks = segment_text(block, max_chars)?;
        let chunks = match granularity {
            Granularity::Chunk => chunks,
            Granularity::Sentence => split_sentences(&chunks),
        };
        if chunks.is_empty() {
            continue;
        }

        if let Some(marker) = pause
            && pending_markers > 0
            && !marker.duration.is_zero()
            && !units.is_empty()
        {
            units.push(NarrationUnit::Pause {
                index: units.len(),
                duration: marker.duration * pending_markers,
            });
        }
        pending_markers = 0;

        for chunk in chunks {
            let index = units.len();
            units.push(NarrationUnit::Speech(TextChunk::new(chunk.content, index)));
        }
    }

    Ok(units)
}
