//! Backdrops behind the captions: a solid color or random stock footage.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{info, warn};

use crate::{
    error::{PipelineError, Result},
    media::MediaBackend,
    types::BackgroundChoice,
};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm"];

#[derive(Debug, Clone)]
pub enum CaptionStrategy {
    Solid { color: String },
    StockFootage(BackgroundPool),
}

impl CaptionStrategy {
    pub fn solid(color: impl Into<String>) -> Self {
        CaptionStrategy::Solid {
            color: color.into(),
        }
    }

    /// Captions get a translucent box when drawn over footage.
    pub fn boxed_captions(&self) -> bool {
        matches!(self, CaptionStrategy::StockFootage(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidClip {
    pub path: PathBuf,
    pub duration: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundPool {
    candidates: Vec<PathBuf>,
    valid: Vec<ValidClip>,
}

impl BackgroundPool {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            valid: Vec::new(),
        }
    }

    /// Every video file directly inside `dir`, sorted by name.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.is_file() && is_video_file(&path) {
                candidates.push(path);
            }
        }
        candidates.sort();
        Ok(Self::new(candidates))
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    pub fn valid(&self) -> &[ValidClip] {
        &self.valid
    }

    /// Keep only clips that decode. Fails when none survive.
    pub async fn validate(&mut self, media: &dyn MediaBackend) -> Result<()> {
        self.valid.clear();
        for path in &self.candidates {
            match media.validate_clip(path).await? {
                Some(duration) => self.valid.push(ValidClip {
                    path: path.clone(),
                    duration,
                }),
                None => warn!(clip = %path.display(), "Skipping unreadable background clip"),
            }
        }

        if self.valid.is_empty() {
            return Err(PipelineError::NoValidBackground {
                candidates: self.candidates.len(),
            });
        }
        info!(
            valid = self.valid.len(),
            candidates = self.candidates.len(),
            "Background clips validated"
        );
        Ok(())
    }

    /// Random clip and start time covering `duration` seconds.
    pub fn pick<R: Rng>(&self, duration: f64, rng: &mut R) -> Option<BackgroundChoice> {
        if self.valid.is_empty() {
            return None;
        }
        let clip = &self.valid[rng.gen_range(0..self.valid.len())];
        Some(plan_clip(clip, duration, rng))
    }
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Loop clips shorter than `duration`; otherwise start anywhere in
/// `[0, clip - duration]`.
pub fn plan_clip<R: Rng>(clip: &ValidClip, duration: f64, rng: &mut R) -> BackgroundChoice {
    if clip.duration < duration {
        return BackgroundChoice::Clip {
            path: clip.path.clone(),
            start: 0.0,
            looped: true,
        };
    }

    let slack = clip.duration - duration;
    let start = if slack > 0.0 {
        rng.gen_range(0.0..=slack)
    } else {
        0.0
    };
    BackgroundChoice::Clip {
        path: clip.path.clone(),
        start,
        looped: false,
    }
}
