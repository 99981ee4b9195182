use std::{io::Write, path::PathBuf, sync::Arc};

use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::{
    background::CaptionStrategy,
    caption::{CaptionLayout, TextMeasure, layout_caption},
    error::{PipelineError, Result},
    media::{MediaBackend, SegmentRender, frame_count},
    types::{AudioSegment, BackgroundChoice, RenderedSegment},
};

/// Start offset of each segment given the segment durations.
pub fn timeline_offsets(durations: &[f64]) -> Vec<f64> {
    durations
        .iter()
        .scan(0.0, |offset, duration| {
            let start = *offset;
            *offset += duration;
            Some(start)
        })
        .collect()
}

/// Turns narrated units into rendered segment files, strictly in order.
///
/// Segment boundaries snap to the frame nearest the running audio clock, so
/// rounding never accumulates across segments.
pub struct Assembler {
    media: Arc<dyn MediaBackend>,
    strategy: CaptionStrategy,
    layout: CaptionLayout,
    measure: Box<dyn TextMeasure + Send + Sync>,
    font_size: u32,
    work_dir: PathBuf,
    rng: StdRng,
    fps: u32,
    audio_clock: f64,
    frames: u64,
    segments: Vec<RenderedSegment>,
}

impl Assembler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        media: Arc<dyn MediaBackend>,
        strategy: CaptionStrategy,
        layout: CaptionLayout,
        measure: Box<dyn TextMeasure + Send + Sync>,
        font_size: u32,
        work_dir: impl Into<PathBuf>,
        rng: StdRng,
    ) -> Self {
        let fps = media.fps().max(1);
        Self {
            media,
            strategy,
            layout,
            measure,
            font_size,
            work_dir: work_dir.into(),
            rng,
            fps,
            audio_clock: 0.0,
            frames: 0,
            segments: Vec::new(),
        }
    }

    pub fn segments(&self) -> &[RenderedSegment] {
        &self.segments
    }

    pub fn total_duration(&self) -> f64 {
        self.frames as f64 / self.fps as f64
    }

    pub fn into_segments(self) -> Vec<RenderedSegment> {
        self.segments
    }

    fn choose_background(&mut self, duration: f64) -> Result<BackgroundChoice> {
        match &self.strategy {
            CaptionStrategy::Solid { color } => Ok(BackgroundChoice::Solid {
                color: color.clone(),
            }),
            CaptionStrategy::StockFootage(pool) => {
                pool.pick(duration, &mut self.rng)
                    .ok_or(PipelineError::NoValidBackground {
                        candidates: pool.candidates().len(),
                    })
            }
        }
    }

    /// Render the next segment. `audio.chunk_index` must equal the number of
    /// segments already assembled.
    pub async fn push(&mut self, text: &str, audio: AudioSegment) -> Result<&RenderedSegment> {
        let index = self.segments.len();
        if audio.chunk_index != index {
            return Err(PipelineError::Timeline {
                reason: format!("expected segment {index}, got {}", audio.chunk_index),
            });
        }

        let fps = self.fps as f64;
        let audio_clock = self.audio_clock + audio.duration_seconds;
        // at least one frame, even for a blip of audio
        let end_frames = frame_count(audio_clock, self.fps).max(self.frames + 1);
        let start_offset = self.frames as f64 / fps;
        let duration = (end_frames - self.frames) as f64 / fps;

        let background = self.choose_background(duration)?;
        let caption = layout_caption(
            text,
            &self.layout,
            self.measure.as_ref(),
            self.font_size,
            self.strategy.boxed_captions(),
        );

        let mut audio_file = tempfile::Builder::new()
            .prefix(&format!("audio_{index:05}_"))
            .suffix(&format!(".{}", audio.format.extension()))
            .tempfile_in(&self.work_dir)?;
        audio_file.write_all(&audio.audio_bytes)?;
        audio_file.flush()?;

        let render = SegmentRender {
            index,
            duration,
            audio_path: audio_file.path().to_path_buf(),
            background,
            caption,
            output: self.work_dir.join(format!("segment_{index:05}.mp4")),
        };
        debug!(
            index,
            duration,
            audio = audio.duration_seconds,
            lines = render.caption.lines.len(),
            "Rendering segment"
        );
        self.media
            .render_segment(&render)
            .await
            .map_err(|source| PipelineError::Render { index, source })?;

        if let Err(e) = audio_file.close() {
            warn!(index, error = %e, "Failed to remove segment audio");
        }

        let segment = RenderedSegment {
            index,
            start_offset,
            duration,
            caption: render.caption,
            background: render.background,
            audio,
            video_path: render.output,
        };
        self.audio_clock = audio_clock;
        self.frames = end_frames;
        self.segments.push(segment);

        Ok(&self.segments[index])
    }
}
