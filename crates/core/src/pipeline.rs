//! The end-to-end run: segment, synthesize, assemble, compose.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    assemble::Assembler,
    background::CaptionStrategy,
    cache::get_work_root,
    caption::{ApproxMetrics, CaptionLayout},
    compose::compose,
    error::{ConfigError, PipelineError, Result},
    media::{MediaBackend, silent_audio},
    segment::{DEFAULT_MAX_CHARS, Granularity, PauseMarker, plan_narration},
    synth::{SpeechClient, SynthesisSettings, Synthesizer},
    types::{Manifest, ManifestEntry, NarrationUnit, OutputVideo, RenderedSegment},
    voice::{DEFAULT_VOICE, VoiceCatalog},
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub voice: String,
    pub max_chars: usize,
    pub granularity: Granularity,
    /// `None` narrates pause markers as plain text.
    pub pause: Option<PauseMarker>,
    pub synthesis: SynthesisSettings,
    pub caption: CaptionLayout,
    pub font_size: u32,
    pub work_root: PathBuf,
    /// Fixes background clip selection.
    pub seed: Option<u64>,
    pub keep_work_dir: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            max_chars: DEFAULT_MAX_CHARS,
            granularity: Granularity::default(),
            pause: Some(PauseMarker::default()),
            synthesis: SynthesisSettings::default(),
            caption: CaptionLayout::default(),
            font_size: 30,
            work_root: get_work_root(),
            seed: None,
            keep_work_dir: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self, catalog: &VoiceCatalog) -> std::result::Result<(), ConfigError> {
        catalog.lookup(&self.voice)?;

        let invalid = |name: &'static str, reason: String| ConfigError::InvalidSetting { name, reason };
        if self.max_chars == 0 {
            return Err(invalid("max_chars", "must be greater than zero".into()));
        }
        if self.font_size == 0 {
            return Err(invalid("font_size", "must be greater than zero".into()));
        }
        if self.caption.max_width <= self.caption.margin {
            return Err(invalid(
                "caption width",
                format!(
                    "max width {} must exceed margin {}",
                    self.caption.max_width, self.caption.margin
                ),
            ));
        }
        if !(0.25..=4.0).contains(&self.synthesis.speaking_rate) {
            return Err(invalid(
                "speaking_rate",
                format!("{} is outside 0.25..=4.0", self.synthesis.speaking_rate),
            ));
        }
        if !(-20.0..=20.0).contains(&self.synthesis.pitch) {
            return Err(invalid(
                "pitch",
                format!("{} is outside -20..=20", self.synthesis.pitch),
            ));
        }
        if let Some(pause) = &self.pause {
            if pause.token.trim().is_empty() {
                return Err(invalid("pause marker", "must not be blank".into()));
            }
            if pause.duration.is_zero() {
                return Err(invalid(
                    "pause duration",
                    "must be longer than zero; disable pauses instead".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Segmenting,
    Synthesizing { index: usize, total: usize },
    Assembling { index: usize, total: usize },
    Composing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Segmenting => write!(f, "segmenting"),
            PipelineState::Synthesizing { index, total } => {
                write!(f, "synthesizing {}/{}", index + 1, total)
            }
            PipelineState::Assembling { index, total } => {
                write!(f, "assembling {}/{}", index + 1, total)
            }
            PipelineState::Composing => write!(f, "composing"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Receives every state change of a run.
pub trait PipelineObserver: Send + Sync {
    fn on_transition(&self, from: &PipelineState, to: &PipelineState);
}

pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_transition(&self, _from: &PipelineState, _to: &PipelineState) {}
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub voice: String,
    pub output: OutputVideo,
    pub segments: Vec<RenderedSegment>,
    pub state: PipelineState,
}

impl PipelineReport {
    pub fn manifest(&self) -> Manifest {
        Manifest {
            run_id: self.run_id,
            output: self.output.path.clone(),
            voice: self.voice.clone(),
            duration_seconds: self.output.duration_seconds,
            segments: self
                .segments
                .iter()
                .map(|segment| ManifestEntry {
                    index: segment.index,
                    start_seconds: segment.start_offset,
                    duration_seconds: segment.duration,
                    text: segment.caption.lines.join(" "),
                    background: segment.background.clone(),
                })
                .collect(),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    client: Arc<dyn SpeechClient>,
    media: Arc<dyn MediaBackend>,
    catalog: VoiceCatalog,
    observer: Arc<dyn PipelineObserver>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn SpeechClient>,
        media: Arc<dyn MediaBackend>,
    ) -> Self {
        Self {
            config,
            client,
            media,
            catalog: VoiceCatalog::default(),
            observer: Arc::new(NoopObserver),
            state: PipelineState::Idle,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn transition(&mut self, next: PipelineState) {
        let previous = std::mem::replace(&mut self.state, next);
        debug!(from = %previous, to = %self.state, "Pipeline transition");
        self.observer.on_transition(&previous, &self.state);
    }

    /// Narrate `text` into a captioned video at `output`.
    ///
    /// Every run starts from `Idle`; a failed run ends in `Failed` and leaves
    /// no output file behind.
    pub async fn run(
        &mut self,
        text: &str,
        strategy: CaptionStrategy,
        output: &Path,
    ) -> Result<PipelineReport> {
        self.state = PipelineState::Idle;

        let run_id = Uuid::new_v4();
        match self.execute(run_id, text, strategy, output).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(%run_id, error = %e, "Run failed");
                self.transition(PipelineState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        run_id: Uuid,
        text: &str,
        mut strategy: CaptionStrategy,
        output: &Path,
    ) -> Result<PipelineReport> {
        self.config.validate(&self.catalog)?;
        let config = self.config.clone();

        tokio::fs::create_dir_all(&config.work_root).await?;
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("run-{run_id}-"))
            .tempdir_in(&config.work_root)?;
        info!(%run_id, work_dir = %work_dir.path().display(), "Run started");

        if let CaptionStrategy::StockFootage(pool) = &mut strategy {
            pool.validate(self.media.as_ref()).await?;
        }

        self.transition(PipelineState::Segmenting);
        let units = plan_narration(
            text,
            config.max_chars,
            config.granularity,
            config.pause.as_ref(),
        )?;
        if units.is_empty() {
            return Err(PipelineError::EmptyText);
        }
        let total = units.len();
        info!(units = total, "Text segmented");

        let synthesizer = Synthesizer::new(
            self.client.clone(),
            self.media.clone(),
            self.catalog,
            config.synthesis.clone(),
            work_dir.path(),
        );
        let layout = if strategy.boxed_captions() {
            config.caption.clone().lower_third()
        } else {
            config.caption.clone()
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut assembler = Assembler::new(
            self.media.clone(),
            strategy,
            layout,
            Box::new(ApproxMetrics::new(config.font_size)),
            config.font_size,
            work_dir.path(),
            rng,
        );

        for unit in &units {
            let index = unit.index();
            let audio = match unit {
                NarrationUnit::Speech(chunk) => {
                    self.transition(PipelineState::Synthesizing { index, total });
                    synthesizer
                        .synthesize(chunk, &config.voice)
                        .await
                        .map_err(|source| PipelineError::Synthesis { index, source })?
                }
                NarrationUnit::Pause { duration, .. } => silent_audio(index, *duration)?,
            };

            self.transition(PipelineState::Assembling { index, total });
            assembler.push(unit.text(), audio).await?;
        }

        self.transition(PipelineState::Composing);
        let segments = assembler.into_segments();
        let video = compose(self.media.as_ref(), &segments, output).await?;

        if config.keep_work_dir {
            let kept = work_dir.keep();
            info!(path = %kept.display(), "Keeping work directory");
        } else if let Err(e) = work_dir.close() {
            warn!(error = %e, "Failed to remove work directory");
        }

        self.transition(PipelineState::Done);
        Ok(PipelineReport {
            run_id,
            voice: config.voice,
            output: video,
            segments,
            state: self.state.clone(),
        })
    }
}
