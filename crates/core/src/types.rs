use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// A bounded span of source text, narrated as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub index: usize,
}

impl TextChunk {
    pub fn new(content: impl Into<String>, index: usize) -> Self {
        Self {
            content: content.into(),
            index,
        }
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// One step of the narration plan: either spoken text or a silent gap.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrationUnit {
    Speech(TextChunk),
    Pause { index: usize, duration: Duration },
}

impl NarrationUnit {
    pub fn index(&self) -> usize {
        match self {
            NarrationUnit::Speech(chunk) => chunk.index,
            NarrationUnit::Pause { index, .. } => *index,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            NarrationUnit::Speech(chunk) => &chunk.content,
            NarrationUnit::Pause { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

/// Narration audio for a single unit. `duration_seconds` is always measured
/// from the decoded audio, never estimated from text length.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub chunk_index: usize,
    pub audio_bytes: Vec<u8>,
    pub duration_seconds: f64,
    pub format: AudioFormat,
}

/// Wrapped caption lines and where they sit in the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionFrame {
    pub lines: Vec<String>,
    pub font_size: u32,
    pub line_height: u32,
    pub top_y: u32,
    /// Draw a translucent box behind each line (used over stock footage).
    pub boxed: bool,
}

impl CaptionFrame {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn block_height(&self) -> u32 {
        self.line_height * self.lines.len() as u32
    }
}

/// The backdrop chosen for a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundChoice {
    Solid { color: String },
    Clip { path: PathBuf, start: f64, looped: bool },
}

#[derive(Debug, Clone)]
pub struct RenderedSegment {
    pub index: usize,
    pub start_offset: f64,
    pub duration: f64,
    pub caption: CaptionFrame,
    pub background: BackgroundChoice,
    pub audio: AudioSegment,
    pub video_path: PathBuf,
}

impl RenderedSegment {
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputVideo {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub segment_count: usize,
}

/// JSON sidecar describing the segments of a rendered video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: uuid::Uuid,
    pub output: PathBuf,
    pub voice: String,
    pub duration_seconds: f64,
    pub segments: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub text: String,
    pub background: BackgroundChoice,
}
