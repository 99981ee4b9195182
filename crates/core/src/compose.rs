use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    error::{PipelineError, Result},
    media::{ConcatEntry, MediaBackend, MediaError},
    types::{OutputVideo, RenderedSegment},
};

/// Tolerance for floating point drift between adjacent offsets.
const OFFSET_EPSILON: f64 = 1e-6;

/// Segments must be indexed `0..n`, positive, and back to back.
pub fn verify_timeline(segments: &[RenderedSegment]) -> Result<()> {
    if segments.is_empty() {
        return Err(PipelineError::Timeline {
            reason: "no segments to compose".to_string(),
        });
    }

    let mut expected_start = 0.0;
    for (position, segment) in segments.iter().enumerate() {
        if segment.index != position {
            return Err(PipelineError::Timeline {
                reason: format!("segment at position {position} has index {}", segment.index),
            });
        }
        if !segment.duration.is_finite() || segment.duration <= 0.0 {
            return Err(PipelineError::Timeline {
                reason: format!("segment {position} has duration {}", segment.duration),
            });
        }
        if (segment.start_offset - expected_start).abs() > OFFSET_EPSILON {
            return Err(PipelineError::Timeline {
                reason: format!(
                    "segment {position} starts at {:.3}s, expected {:.3}s",
                    segment.start_offset, expected_start
                ),
            });
        }
        expected_start = segment.end_offset();
    }
    Ok(())
}

/// `out/video.mp4` → `out/video.partial.mp4`
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(name)
}

/// Concatenate rendered segments into `output`.
///
/// The container is written to a partial file, measured, and renamed into
/// place only when its length is within one frame of the timeline.
pub async fn compose(
    media: &dyn MediaBackend,
    segments: &[RenderedSegment],
    output: &Path,
) -> Result<OutputVideo> {
    verify_timeline(segments)?;

    let partial = partial_path(output);
    let entries: Vec<ConcatEntry> = segments
        .iter()
        .map(|s| ConcatEntry {
            path: s.video_path.clone(),
            duration: s.duration,
        })
        .collect();
    let duration_seconds: f64 = segments.iter().map(|s| s.duration).sum();

    if let Err(source) = join_and_measure(media, &entries, &partial, duration_seconds).await {
        remove_partial(&partial).await;
        return Err(PipelineError::Encoding {
            path: output.to_path_buf(),
            source,
        });
    }

    if let Err(e) = tokio::fs::rename(&partial, output).await {
        remove_partial(&partial).await;
        return Err(e.into());
    }

    info!(output = %output.display(), duration_seconds, "Video written");

    Ok(OutputVideo {
        path: output.to_path_buf(),
        duration_seconds,
        segment_count: segments.len(),
    })
}

async fn join_and_measure(
    media: &dyn MediaBackend,
    entries: &[ConcatEntry],
    partial: &Path,
    expected: f64,
) -> std::result::Result<(), MediaError> {
    media.concat(entries, partial).await?;

    let actual = media.probe_duration(partial).await?;
    let tolerance = 1.0 / media.fps().max(1) as f64;
    if (actual - expected).abs() > tolerance + OFFSET_EPSILON {
        return Err(MediaError::DurationMismatch { expected, actual });
    }
    Ok(())
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %partial.display(), error = %e, "Failed to remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioFormat, AudioSegment, BackgroundChoice, CaptionFrame};

    fn segment(index: usize, start_offset: f64, duration: f64) -> RenderedSegment {
        RenderedSegment {
            index,
            start_offset,
            duration,
            caption: CaptionFrame {
                lines: vec![],
                font_size: 30,
                line_height: 38,
                top_y: 0,
                boxed: false,
            },
            background: BackgroundChoice::Solid {
                color: "black".into(),
            },
            audio: AudioSegment {
                chunk_index: index,
                audio_bytes: vec![],
                duration_seconds: duration,
                format: AudioFormat::Mp3,
            },
            video_path: PathBuf::from(format!("segment_{index:05}.mp4")),
        }
    }

    #[test]
    fn partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/out/video.mp4")),
            PathBuf::from("/out/video.partial.mp4")
        );
        assert_eq!(partial_path(Path::new("clip")), PathBuf::from("clip.partial"));
    }

    #[test]
    fn accepts_contiguous_timeline() {
        let segments = vec![segment(0, 0.0, 2.0), segment(1, 2.0, 3.5), segment(2, 5.5, 1.0)];
        assert!(verify_timeline(&segments).is_ok());
    }

    #[test]
    fn rejects_gaps_and_misordering() {
        let gap = vec![segment(0, 0.0, 2.0), segment(1, 2.5, 1.0)];
        assert!(matches!(verify_timeline(&gap), Err(PipelineError::Timeline { .. })));

        let swapped = vec![segment(1, 0.0, 2.0), segment(0, 2.0, 1.0)];
        assert!(verify_timeline(&swapped).is_err());

        let zero = vec![segment(0, 0.0, 0.0)];
        assert!(verify_timeline(&zero).is_err());

        assert!(verify_timeline(&[]).is_err());
    }
}
