#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use textreel_core::{
    MediaBackend, MediaError, PipelineConfig, PipelineObserver, PipelineState, RetryPolicy,
    SpeechClient, SynthesisError, SynthesisSettings,
    media::{ConcatEntry, SegmentRender},
    retry::Backoff,
    synth::SynthesisRequest,
};

/// Speech stub: the "audio" is the narration length in seconds, a quarter
/// second per character, written as ASCII.
#[derive(Default)]
pub struct StubSpeech {
    pub calls: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
    rate_limits: AtomicUsize,
    always_limited: Option<String>,
}

impl StubSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` calls are rate limited.
    pub fn rate_limited_first(n: usize) -> Self {
        Self {
            rate_limits: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    /// Every request containing `needle` is rate limited.
    pub fn always_limited_on(needle: &str) -> Self {
        Self {
            always_limited: Some(needle.to_string()),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn stub_duration(text: &str) -> f64 {
    text.chars().count() as f64 / 4.0
}

#[async_trait]
impl SpeechClient for StubSpeech {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(request.text.clone());

        if let Some(needle) = &self.always_limited
            && request.text.contains(needle.as_str())
        {
            return Err(SynthesisError::RateLimited {
                message: "quota exhausted".into(),
            });
        }
        let remaining = self.rate_limits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rate_limits.store(remaining - 1, Ordering::SeqCst);
            return Err(SynthesisError::RateLimited {
                message: "slow down".into(),
            });
        }

        Ok(stub_duration(&request.text).to_string().into_bytes())
    }
}

/// Media stub: every file it writes holds its own length in seconds, which
/// is what probing reads back.
#[derive(Default)]
pub struct StubMedia {
    pub clips: HashMap<PathBuf, f64>,
    pub fail_concat: bool,
    /// Extra seconds the joined file runs over its segments.
    pub concat_drift: f64,
    pub renders: Mutex<Vec<SegmentRender>>,
}

impl StubMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(mut self, path: impl Into<PathBuf>, duration: f64) -> Self {
        self.clips.insert(path.into(), duration);
        self
    }

    pub fn failing_concat() -> Self {
        Self {
            fail_concat: true,
            ..Self::default()
        }
    }

    pub fn with_concat_drift(mut self, seconds: f64) -> Self {
        self.concat_drift = seconds;
        self
    }

    pub fn rendered(&self) -> Vec<SegmentRender> {
        self.renders.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaBackend for StubMedia {
    async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let body = tokio::fs::read_to_string(path).await?;
        textreel_core::media::parse_duration(&body)
    }

    async fn validate_clip(&self, path: &Path) -> Result<Option<f64>, MediaError> {
        Ok(self.clips.get(path).copied())
    }

    async fn render_segment(&self, render: &SegmentRender) -> Result<(), MediaError> {
        assert!(render.audio_path.exists(), "audio must exist while rendering");
        let frames = render.duration * self.fps() as f64;
        assert!(
            (frames - frames.round()).abs() < 1e-9,
            "segment {} is not frame aligned: {}s",
            render.index,
            render.duration
        );
        tokio::fs::write(&render.output, render.duration.to_string()).await?;
        self.renders.lock().unwrap().push(render.clone());
        Ok(())
    }

    async fn concat(&self, entries: &[ConcatEntry], output: &Path) -> Result<(), MediaError> {
        if self.fail_concat {
            tokio::fs::write(output, b"half a container").await?;
            return Err(MediaError::Failed {
                tool: "ffmpeg",
                stderr: "No space left on device".into(),
            });
        }
        let mut total = 0.0;
        for entry in entries {
            let body = tokio::fs::read_to_string(&entry.path).await?;
            total += textreel_core::media::parse_duration(&body)?;
        }
        tokio::fs::write(output, (total + self.concat_drift).to_string()).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<PipelineState>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<PipelineState> {
        self.states.lock().unwrap().clone()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_transition(&self, _from: &PipelineState, to: &PipelineState) {
        self.states.lock().unwrap().push(to.clone());
    }
}

/// Config with instant retries and a private work root.
pub fn test_config(work_root: &Path) -> PipelineConfig {
    PipelineConfig {
        work_root: work_root.to_path_buf(),
        max_chars: 15_000,
        synthesis: SynthesisSettings {
            retry: RetryPolicy::new(3, Backoff::Constant(Duration::ZERO)),
            ..Default::default()
        },
        seed: Some(7),
        ..Default::default()
    }
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
