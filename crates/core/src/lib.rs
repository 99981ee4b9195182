//! Textreel Core Library
//!
//! Turns plain text and EPUB books into narrated videos: the text is split
//! into chunks, each chunk is voiced with Google Cloud Text-to-Speech, drawn
//! as a caption over a solid color or stock footage, and the segments are
//! joined into one file with ffmpeg.

pub mod assemble;
pub mod background;
pub mod cache;
pub mod caption;
pub mod compose;
pub mod credentials;
pub mod error;
pub mod format;
pub mod input;
pub mod media;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod segment;
pub mod summarize;
pub mod synth;
pub mod types;
pub mod voice;

pub use assemble::{Assembler, timeline_offsets};
pub use background::{BackgroundPool, CaptionStrategy};
pub use cache::{get_manifest_path, get_root_cache_dir, get_work_root, load_manifest, save_manifest};
pub use caption::{ApproxMetrics, CaptionLayout, CaptionPlacement, TextMeasure};
pub use compose::compose;
pub use credentials::Credentials;
pub use error::{ConfigError, PipelineError, Result};
pub use format::{format_manifest_readable, format_timestamp};
pub use input::{InputError, InputSource};
pub use media::{ConcatEntry, EncodingSettings, FfmpegBackend, MediaBackend, MediaError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineObserver, PipelineReport, PipelineState};
pub use provider::{Provider, ProviderConfig};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use segment::{Granularity, PauseMarker, SegmentationError, plan_narration, segment_text};
pub use summarize::{ProviderChat, SummaryError, Summarizer};
pub use synth::{
    GoogleTtsClient, SpeechClient, SynthesisError, SynthesisSettings, Synthesizer, TokenCache,
    TokenSource,
};
pub use types::{AudioSegment, Manifest, OutputVideo, RenderedSegment, TextChunk};
pub use voice::{DEFAULT_VOICE, Voice, VoiceCatalog, VoiceGender};
