mod common;

use std::{path::PathBuf, sync::Arc, time::Duration};

use common::{RecordingObserver, StubMedia, StubSpeech, dir_is_empty, stub_duration, test_config};
use textreel_core::{
    BackgroundPool, CaptionStrategy, ConfigError, MediaError, Pipeline, PipelineConfig,
    PipelineError, PipelineState, SynthesisError,
    compose::partial_path,
    segment::PauseMarker,
    types::{AudioFormat, BackgroundChoice},
};

struct Harness {
    dir: tempfile::TempDir,
    speech: Arc<StubSpeech>,
    media: Arc<StubMedia>,
    observer: Arc<RecordingObserver>,
}

impl Harness {
    fn new(speech: StubSpeech, media: StubMedia) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            speech: Arc::new(speech),
            media: Arc::new(media),
            observer: Arc::new(RecordingObserver::default()),
        }
    }

    fn work_root(&self) -> PathBuf {
        self.dir.path().join("runs")
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("video.mp4")
    }

    fn config(&self) -> PipelineConfig {
        test_config(&self.work_root())
    }

    fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(config, self.speech.clone(), self.media.clone())
            .with_observer(self.observer.clone())
    }
}

#[tokio::test]
async fn narrates_each_sentence_into_one_segment() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let mut pipeline = h.pipeline(h.config());

    let report = pipeline
        .run("Hola. Adiós.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap();

    assert_eq!(report.segments.len(), 2);
    assert_eq!(report.segments[0].start_offset, 0.0);
    assert_eq!(report.segments[0].duration, stub_duration("Hola."));
    assert_eq!(report.segments[1].start_offset, stub_duration("Hola."));
    assert_eq!(
        report.output.duration_seconds,
        stub_duration("Hola.") + stub_duration("Adiós.")
    );
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(pipeline.state(), &PipelineState::Done);

    assert!(h.output().exists());
    assert!(!partial_path(&h.output()).exists());
    assert!(dir_is_empty(&h.work_root()), "run directory must be removed");
    assert_eq!(h.speech.call_count(), 2);
}

#[tokio::test]
async fn observer_sees_every_transition_in_order() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    h.pipeline(h.config())
        .run("Hola. Adiós.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap();

    assert_eq!(
        h.observer.states(),
        vec![
            PipelineState::Segmenting,
            PipelineState::Synthesizing { index: 0, total: 2 },
            PipelineState::Assembling { index: 0, total: 2 },
            PipelineState::Synthesizing { index: 1, total: 2 },
            PipelineState::Assembling { index: 1, total: 2 },
            PipelineState::Composing,
            PipelineState::Done,
        ]
    );
}

#[tokio::test]
async fn captions_follow_segment_text() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let report = h
        .pipeline(h.config())
        .run("Hola. Adiós.", CaptionStrategy::solid("navy"), &h.output())
        .await
        .unwrap();

    let manifest = report.manifest();
    let texts: Vec<_> = manifest.segments.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["Hola.", "Adiós."]);

    let renders = h.media.rendered();
    assert!(renders.iter().all(|r| !r.caption.boxed));
    assert!(renders.iter().all(|r| r.background
        == BackgroundChoice::Solid {
            color: "navy".into()
        }));
}

#[tokio::test]
async fn invalid_backgrounds_fail_before_synthesis() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let pool = BackgroundPool::new(vec!["/clips/a.mp4".into(), "/clips/b.mp4".into()]);

    let mut pipeline = h.pipeline(h.config());
    let err = pipeline
        .run("Hola.", CaptionStrategy::StockFootage(pool), &h.output())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoValidBackground { candidates: 2 }));
    assert_eq!(h.speech.call_count(), 0);
    assert_eq!(pipeline.state(), &PipelineState::Failed);
    assert!(!h.output().exists());
}

#[tokio::test]
async fn unknown_voice_fails_before_synthesis() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let config = PipelineConfig {
        voice: "es-ES-Imaginary-Q".into(),
        ..h.config()
    };

    let err = h
        .pipeline(config)
        .run("Hola.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Config(ConfigError::UnknownVoice { .. })));
    assert_eq!(h.speech.call_count(), 0);
    assert_eq!(h.observer.states(), vec![PipelineState::Failed]);
}

#[tokio::test]
async fn pause_marker_becomes_silent_segment() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let report = h
        .pipeline(h.config())
        .run("Uno.[PAUSE]Dos.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap();

    assert_eq!(report.segments.len(), 3);
    let pause = &report.segments[1];
    assert_eq!(pause.audio.format, AudioFormat::Wav);
    assert_eq!(pause.duration, 1.0);
    assert!(pause.caption.is_empty());
    assert_eq!(report.segments[2].start_offset, stub_duration("Uno.") + 1.0);
    assert_eq!(h.speech.call_count(), 2);
}

#[tokio::test]
async fn rate_limits_are_retried() {
    let h = Harness::new(StubSpeech::rate_limited_first(2), StubMedia::new());
    let report = h
        .pipeline(h.config())
        .run("Hola. Adiós.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap();

    assert_eq!(report.segments.len(), 2);
    assert_eq!(h.speech.call_count(), 4);
}

#[tokio::test]
async fn exhausted_retries_fail_the_whole_run() {
    let h = Harness::new(StubSpeech::always_limited_on("Adiós"), StubMedia::new());
    let mut pipeline = h.pipeline(h.config());
    let err = pipeline
        .run("Hola. Adiós.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap_err();

    match err {
        PipelineError::Synthesis {
            index: 1,
            source: SynthesisError::Exhausted { attempts, .. },
        } => assert_eq!(attempts, 4),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.speech.call_count(), 5);
    assert!(!h.output().exists());
    assert!(dir_is_empty(&h.work_root()));
    assert_eq!(pipeline.state(), &PipelineState::Failed);
}

#[tokio::test]
async fn failed_encoding_leaves_no_output() {
    let h = Harness::new(StubSpeech::new(), StubMedia::failing_concat());
    let err = h
        .pipeline(h.config())
        .run("Hola.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Encoding { .. }));
    assert!(!h.output().exists());
    assert!(!partial_path(&h.output()).exists());
    assert_eq!(h.observer.states().last(), Some(&PipelineState::Failed));
}

#[tokio::test]
async fn blank_text_is_rejected() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let err = h
        .pipeline(h.config())
        .run("   [PAUSE]  ", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::EmptyText));
    assert_eq!(h.speech.call_count(), 0);
}

#[tokio::test]
async fn stock_footage_is_seeded_and_boxed() {
    let starts = |report: &textreel_core::PipelineReport| -> Vec<BackgroundChoice> {
        report.segments.iter().map(|s| s.background.clone()).collect()
    };

    let mut runs = Vec::new();
    for _ in 0..2 {
        let h = Harness::new(
            StubSpeech::new(),
            StubMedia::new().with_clip("/clips/rain.mp4", 30.0),
        );
        let pool = BackgroundPool::new(vec!["/clips/rain.mp4".into(), "/clips/broken.mp4".into()]);
        let report = h
            .pipeline(h.config())
            .run(
                "Hola. Adiós.",
                CaptionStrategy::StockFootage(pool),
                &h.output(),
            )
            .await
            .unwrap();

        assert!(h.media.rendered().iter().all(|r| r.caption.boxed));
        runs.push(starts(&report));
    }

    assert_eq!(runs[0], runs[1]);
    for choice in &runs[0] {
        let BackgroundChoice::Clip { path, looped, .. } = choice else {
            panic!("expected a clip, got {choice:?}");
        };
        assert_eq!(path, &PathBuf::from("/clips/rain.mp4"));
        assert!(!looped);
    }
}

#[tokio::test]
async fn zero_length_pause_fails_before_synthesis() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let config = PipelineConfig {
        pause: Some(PauseMarker {
            token: "[PAUSE]".into(),
            duration: Duration::ZERO,
        }),
        ..h.config()
    };

    let err = h
        .pipeline(config)
        .run("Uno.[PAUSE]Dos.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Config(ConfigError::InvalidSetting {
            name: "pause duration",
            ..
        })
    ));
    assert_eq!(h.speech.call_count(), 0);
    assert!(h.media.rendered().is_empty());
}

#[tokio::test]
async fn segments_are_frame_aligned_and_output_matches_timeline() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new());
    let report = h
        .pipeline(h.config())
        .run("Buenos días. Hasta luego.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap();

    let total: f64 = report.segments.iter().map(|s| s.duration).sum();
    assert_eq!(report.output.duration_seconds, total);
    for segment in &report.segments {
        let frames = segment.duration * 24.0;
        assert!((frames - frames.round()).abs() < 1e-9);
        assert!((segment.duration - segment.audio.duration_seconds).abs() <= 0.5 / 24.0 + 1e-9);
    }
}

#[tokio::test]
async fn drifting_join_is_rejected() {
    let h = Harness::new(StubSpeech::new(), StubMedia::new().with_concat_drift(0.5));
    let mut pipeline = h.pipeline(h.config());
    let err = pipeline
        .run("Hola. Adiós.", CaptionStrategy::solid("black"), &h.output())
        .await
        .unwrap_err();

    match err {
        PipelineError::Encoding {
            source: MediaError::DurationMismatch { expected, actual },
            ..
        } => assert!((actual - expected - 0.5).abs() < 1e-9),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!h.output().exists());
    assert!(!partial_path(&h.output()).exists());
    assert_eq!(pipeline.state(), &PipelineState::Failed);
}
