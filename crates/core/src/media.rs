//! ffmpeg / ffprobe plumbing behind the `MediaBackend` seam.

use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::types::{AudioFormat, AudioSegment, BackgroundChoice, CaptionFrame};

/// Sample rate of generated silence, matching the TTS MP3 output.
pub const SILENCE_SAMPLE_RATE: u32 = 24_000;

pub const DEFAULT_FPS: u32 = 24;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to run {tool}: {source}. Is it installed and on PATH?")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {stderr}")]
    Failed { tool: &'static str, stderr: String },

    #[error("Could not read a duration from ffprobe output '{output}'")]
    InvalidDuration { output: String },

    #[error("Joined video runs {actual:.3}s, expected {expected:.3}s")]
    DurationMismatch { expected: f64, actual: f64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Output encoding shared by every segment so they can be stream-copied together.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub audio_bitrate: String,
    pub caption_color: String,
    pub box_color: String,
    pub font_file: Option<PathBuf>,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            width: 1280,
            height: 720,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "ultrafast".to_string(),
            audio_bitrate: "192k".to_string(),
            caption_color: "white".to_string(),
            box_color: "black@0.8".to_string(),
            font_file: None,
        }
    }
}

/// Whole frames covering `seconds`, rounded to the nearest frame.
pub fn frame_count(seconds: f64, fps: u32) -> u64 {
    (seconds * fps as f64).round().max(0.0) as u64
}

/// Everything needed to render one captioned segment. `duration` is a whole
/// number of frames.
#[derive(Debug, Clone)]
pub struct SegmentRender {
    pub index: usize,
    pub duration: f64,
    pub audio_path: PathBuf,
    pub background: BackgroundChoice,
    pub caption: CaptionFrame,
    pub output: PathBuf,
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Duration of a media file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError>;

    /// Duration of a usable background clip, or `None` if it cannot be decoded.
    async fn validate_clip(&self, path: &Path) -> Result<Option<f64>, MediaError>;

    async fn render_segment(&self, render: &SegmentRender) -> Result<(), MediaError>;

    /// Join already-encoded segments without re-encoding. Each entry starts
    /// exactly where the previous entry's `duration` ends.
    async fn concat(&self, entries: &[ConcatEntry], output: &Path) -> Result<(), MediaError>;

    /// Frame rate every segment is rendered at.
    fn fps(&self) -> u32 {
        DEFAULT_FPS
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatEntry {
    pub path: PathBuf,
    pub duration: f64,
}

pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    settings: EncodingSettings,
}

impl FfmpegBackend {
    pub fn new(settings: EncodingSettings) -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            settings,
        }
    }

    /// Fail early when either binary is missing.
    pub async fn check_installed(&self) -> Result<(), MediaError> {
        run_tool("ffmpeg", &self.ffmpeg, &["-version".to_string()]).await?;
        run_tool("ffprobe", &self.ffprobe, &["-version".to_string()]).await?;
        Ok(())
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new(EncodingSettings::default())
    }
}

async fn run_tool(tool: &'static str, program: &Path, args: &[String]) -> Result<Output, MediaError> {
    debug!(tool, ?args, "Running");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| MediaError::Spawn { tool, source })?;

    if !output.status.success() {
        return Err(MediaError::Failed {
            tool,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            path.display().to_string(),
        ];
        let output = run_tool("ffprobe", &self.ffprobe, &args).await?;
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn validate_clip(&self, path: &Path) -> Result<Option<f64>, MediaError> {
        let duration = match self.probe_duration(path).await {
            Ok(duration) => duration,
            Err(e @ MediaError::Spawn { .. }) => return Err(e),
            Err(e) => {
                debug!(clip = %path.display(), error = %e, "Clip failed probing");
                return Ok(None);
            }
        };

        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            path.display().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ];
        match run_tool("ffmpeg", &self.ffmpeg, &args).await {
            Ok(_) => Ok(Some(duration)),
            Err(e @ MediaError::Spawn { .. }) => Err(e),
            Err(e) => {
                debug!(clip = %path.display(), error = %e, "Clip failed decoding");
                Ok(None)
            }
        }
    }

    async fn render_segment(&self, render: &SegmentRender) -> Result<(), MediaError> {
        let scratch = parent_dir(&render.output);

        // one text file per caption line so drawtext never sees filter syntax
        let mut line_files = Vec::with_capacity(render.caption.lines.len());
        for line in &render.caption.lines {
            let mut file = tempfile::Builder::new()
                .prefix(&format!("caption_{:05}_", render.index))
                .suffix(".txt")
                .tempfile_in(scratch)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            line_files.push(file);
        }
        let line_paths: Vec<PathBuf> = line_files.iter().map(|f| f.path().to_path_buf()).collect();

        let args = segment_args(&self.settings, render, &line_paths);
        run_tool("ffmpeg", &self.ffmpeg, &args).await?;

        drop(line_files);
        Ok(())
    }

    async fn concat(&self, entries: &[ConcatEntry], output: &Path) -> Result<(), MediaError> {
        let scratch = parent_dir(output);
        let mut list = NamedTempFile::with_prefix_in("concat_", scratch)?;
        list.write_all(concat_list(entries).as_bytes())?;
        list.flush()?;

        let args = vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.path().display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.display().to_string(),
        ];
        run_tool("ffmpeg", &self.ffmpeg, &args).await?;
        Ok(())
    }

    fn fps(&self) -> u32 {
        self.settings.fps
    }
}

/// Directory containing `path`, `.` for bare file names.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Parse the single number ffprobe prints for `format=duration`.
pub fn parse_duration(stdout: &str) -> Result<f64, MediaError> {
    let trimmed = stdout.trim();
    match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => Ok(seconds),
        _ => Err(MediaError::InvalidDuration {
            output: trimmed.to_string(),
        }),
    }
}

/// Quote a path for use as a filter option value.
pub fn quote_filter_path(path: &Path) -> String {
    let raw = path.display().to_string();
    format!("'{}'", raw.replace('\\', "/").replace('\'', "'\\''"))
}

/// Concat demuxer script. `duration` pins where the next file starts instead
/// of the container length, which AAC frame padding rounds up.
pub fn concat_list(entries: &[ConcatEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "file {}\nduration {:.6}\n",
                quote_filter_path(&e.path),
                e.duration
            )
        })
        .collect()
}

/// ffmpeg arguments for one segment. `line_files[i]` holds caption line `i`.
pub fn segment_args(
    settings: &EncodingSettings,
    render: &SegmentRender,
    line_files: &[PathBuf],
) -> Vec<String> {
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    let mut args: Vec<String> = vec!["-y".into(), "-v".into(), "error".into()];

    match &render.background {
        BackgroundChoice::Solid { color } => {
            args.push("-f".into());
            args.push("lavfi".into());
            args.push("-i".into());
            args.push(format!("color=c={color}:s={w}x{h}:r={fps}"));
        }
        BackgroundChoice::Clip {
            path,
            start,
            looped,
        } => {
            if *looped {
                args.push("-stream_loop".into());
                args.push("-1".into());
            } else if *start > 0.0 {
                args.push("-ss".into());
                args.push(format!("{start:.3}"));
            }
            args.push("-i".into());
            args.push(path.display().to_string());
        }
    }
    args.push("-i".into());
    args.push(render.audio_path.display().to_string());

    let mut video_chain = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps}"
    );
    let caption = &render.caption;
    for (i, file) in line_files.iter().enumerate() {
        let y = caption.top_y + caption.line_height * i as u32;
        video_chain.push_str(&format!(
            ",drawtext=textfile={}:expansion=none:fontsize={}:fontcolor={}:x=(w-text_w)/2:y={}",
            quote_filter_path(file),
            caption.font_size,
            settings.caption_color,
            y
        ));
        if let Some(font) = &settings.font_file {
            video_chain.push_str(&format!(":fontfile={}", quote_filter_path(font)));
        }
        if caption.boxed {
            video_chain.push_str(&format!(":box=1:boxcolor={}:boxborderw=8", settings.box_color));
        }
    }
    video_chain.push_str("[v]");

    let encode: Vec<String> = vec![
        "-filter_complex".into(),
        format!("{video_chain};[1:a]apad[a]"),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "[a]".into(),
        "-frames:v".into(),
        frame_count(render.duration, fps).to_string(),
        "-t".into(),
        format!("{:.6}", render.duration),
        "-r".into(),
        fps.to_string(),
        "-c:v".into(),
        settings.video_codec.clone(),
        "-preset".into(),
        settings.preset.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        settings.audio_codec.clone(),
        "-b:a".into(),
        settings.audio_bitrate.clone(),
        "-ar".into(),
        "44100".into(),
        "-ac".into(),
        "2".into(),
        render.output.display().to_string(),
    ];
    args.extend(encode);
    args
}

/// Silent mono 16-bit WAV, built in memory.
pub fn silent_audio(index: usize, duration: Duration) -> Result<AudioSegment, MediaError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SILENCE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = (duration.as_secs_f64() * SILENCE_SAMPLE_RATE as f64).round() as u32;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for _ in 0..samples {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
    }

    Ok(AudioSegment {
        chunk_index: index,
        audio_bytes: cursor.into_inner(),
        duration_seconds: samples as f64 / SILENCE_SAMPLE_RATE as f64,
        format: AudioFormat::Wav,
    })
}
