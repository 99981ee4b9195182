use std::{
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use textreel_core::{
    Backoff, BackgroundPool, CaptionStrategy, Credentials, EncodingSettings, FfmpegBackend,
    GoogleTtsClient, Granularity, InputSource, PauseMarker, Pipeline, PipelineConfig,
    PipelineObserver, PipelineState, Provider, ProviderChat, RetryPolicy, Summarizer,
    SynthesisSettings, VoiceCatalog, cache::get_backgrounds_dir, format_manifest_readable,
    format_timestamp, get_manifest_path, get_work_root, save_manifest,
    segment::DEFAULT_MAX_CHARS, voice::DEFAULT_VOICE,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Grok,
    Openai,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Grok => Provider::Grok,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Parser)]
#[command(name = "textreel")]
#[command(about = "Turn text and EPUB books into narrated caption videos with Google TTS and ffmpeg")]
struct Cli {
    /// Text to narrate (use --file for .txt or .epub input)
    text: Option<String>,

    /// Read the text from a .txt or .epub file
    #[arg(short, long, conflicts_with = "text")]
    file: Option<PathBuf>,

    /// Output video path
    #[arg(short, long, default_value = "video.mp4")]
    output: PathBuf,

    /// Voice name (see --list-voices)
    #[arg(short, long, default_value = DEFAULT_VOICE)]
    voice: String,

    /// Print the voice catalog and exit
    #[arg(long)]
    list_voices: bool,

    /// Maximum characters per synthesis request
    #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
    max_chars: usize,

    /// One caption per chunk instead of one per sentence
    #[arg(long)]
    per_chunk: bool,

    /// Directory of stock clips to use as backgrounds
    #[arg(short, long, conflicts_with = "color")]
    backgrounds: Option<Option<PathBuf>>,

    /// Explicit stock clip (repeatable)
    #[arg(long = "clip", conflicts_with_all = ["backgrounds", "color"])]
    clips: Vec<PathBuf>,

    /// Solid background color (any ffmpeg color name or hex)
    #[arg(short, long)]
    color: Option<String>,

    /// Literal token that inserts a silent pause
    #[arg(long, default_value = "[PAUSE]")]
    pause_marker: String,

    /// Length of each pause in seconds
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    pause_seconds: f64,

    /// Narrate pause markers as plain text
    #[arg(long)]
    no_pauses: bool,

    /// Retries after a rate-limited synthesis request
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// First retry delay in milliseconds, doubled on each retry
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,

    /// Speaking rate (0.25 - 4.0)
    #[arg(long, default_value_t = 1.0)]
    speaking_rate: f64,

    /// Voice pitch in semitones (-20 - 20)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pitch: f64,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    font_size: u32,

    /// Font file for captions (defaults to ffmpeg's fontconfig choice)
    #[arg(long)]
    font: Option<PathBuf>,

    /// Seed for background clip selection
    #[arg(long)]
    seed: Option<u64>,

    /// Summarize the text with an AI provider before narrating
    #[arg(short, long)]
    summarize: bool,

    /// AI provider for --summarize
    #[arg(short, long, default_value = "grok")]
    provider: CliProvider,

    /// Write a JSON sidecar describing every segment
    #[arg(short, long)]
    manifest: bool,

    /// Keep intermediate segment files
    #[arg(long)]
    keep_work_dir: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long)]
    verbose: bool,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Drives the progress bar from pipeline transitions.
struct ProgressObserver {
    bar: ProgressBar,
}

impl PipelineObserver for ProgressObserver {
    fn on_transition(&self, _from: &PipelineState, to: &PipelineState) {
        match to {
            PipelineState::Segmenting => self.bar.set_message("Segmenting text..."),
            PipelineState::Synthesizing { index, total } => {
                self.bar.set_length(*total as u64);
                self.bar.set_position(*index as u64);
                self.bar.set_message("Narrating...");
            }
            PipelineState::Assembling { .. } => self.bar.set_message("Rendering..."),
            PipelineState::Composing => {
                self.bar.set_position(self.bar.length().unwrap_or(0));
                self.bar.set_message("Joining segments...");
            }
            PipelineState::Idle | PipelineState::Done | PipelineState::Failed => {}
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_voices() {
    println!("\n{}\n", style("Available voices").cyan().bold());
    for voice in VoiceCatalog::default().iter() {
        let marker = if voice.name == DEFAULT_VOICE {
            style("(default)").dim().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<20} {:<7} {}",
            voice.name,
            style(voice.gender.as_str()).yellow(),
            marker
        );
    }
    println!();
}

fn build_strategy(cli: &Cli) -> Result<CaptionStrategy> {
    if !cli.clips.is_empty() {
        return Ok(CaptionStrategy::StockFootage(BackgroundPool::new(
            cli.clips.clone(),
        )));
    }
    if let Some(dir) = &cli.backgrounds {
        let dir = dir.clone().unwrap_or_else(get_backgrounds_dir);
        let pool = BackgroundPool::from_dir(&dir)
            .with_context(|| format!("Could not list backgrounds in {}", dir.display()))?;
        if pool.candidates().is_empty() {
            bail!("No video clips found in {}", dir.display());
        }
        return Ok(CaptionStrategy::StockFootage(pool));
    }
    Ok(CaptionStrategy::solid(
        cli.color.clone().unwrap_or_else(|| "black".to_string()),
    ))
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let pause = if cli.no_pauses {
        None
    } else {
        let duration = Duration::try_from_secs_f64(cli.pause_seconds).with_context(|| {
            format!("Invalid --pause-seconds {}", cli.pause_seconds)
        })?;
        Some(PauseMarker {
            token: cli.pause_marker.clone(),
            duration,
        })
    };

    let defaults = PipelineConfig::default();
    Ok(PipelineConfig {
        voice: cli.voice.clone(),
        max_chars: cli.max_chars,
        granularity: if cli.per_chunk {
            Granularity::Chunk
        } else {
            Granularity::Sentence
        },
        pause,
        synthesis: SynthesisSettings {
            speaking_rate: cli.speaking_rate,
            pitch: cli.pitch,
            retry: RetryPolicy::new(
                cli.retries,
                Backoff::Exponential {
                    base: Duration::from_millis(cli.backoff_ms),
                    factor: 2,
                },
            ),
        },
        caption: textreel_core::CaptionLayout {
            frame_width: cli.width,
            frame_height: cli.height,
            max_width: (cli.width * 5 / 8).max(1),
            ..defaults.caption
        },
        font_size: cli.font_size,
        work_root: get_work_root(),
        seed: cli.seed,
        keep_work_dir: cli.keep_work_dir,
        ..defaults
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_voices {
        print_voices();
        return ExitCode::SUCCESS;
    }

    let result = match Credentials::from_env() {
        Ok(credentials) => run(&cli, credentials).await,
        Err(e) => Err(e.into()),
    };

    // credentials and temp files are dropped by now
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, credentials: Credentials) -> Result<()> {
    let source = match (&cli.text, &cli.file) {
        (Some(text), None) => InputSource::Inline(text.clone()),
        (None, Some(path)) => InputSource::from_path(path),
        _ => bail!("Provide the text to narrate or --file <PATH>"),
    };

    // Validate configuration early
    let config = build_config(cli)?;
    config.validate(&VoiceCatalog::default())?;
    let chat = if cli.summarize {
        Some(ProviderChat::from_env(cli.provider.clone().into())?)
    } else {
        None
    };
    let strategy = build_strategy(cli)?;
    debug!(voice = %config.voice, max_chars = config.max_chars, "Configuration accepted");

    let media = FfmpegBackend::new(EncodingSettings {
        width: cli.width,
        height: cli.height,
        font_file: cli.font.clone(),
        ..EncodingSettings::default()
    });
    media.check_installed().await?;

    println!(
        "\n{}  {}\n",
        style("textreel").cyan().bold(),
        style("Narrated Caption Videos").dim()
    );
    println!(
        "{} Voice {} {}",
        style("✓").green().bold(),
        style(&config.voice).yellow(),
        style(format!("({})", credentials.kind())).dim()
    );
    println!("{}", style("─".repeat(60)).dim());

    let total_start = Instant::now();

    // Step 1: Load text
    let step_start = Instant::now();
    let spinner = create_spinner("Loading text...");
    let mut text = match source.load().await {
        Ok(text) => text,
        Err(e) => {
            spinner.abandon_with_message(format!("{}", style("failed").red()));
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!(
        "{} Loaded {} characters {}",
        style("✓").green().bold(),
        text.chars().count(),
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));

    // Step 2: Summarize (optional)
    if let Some(chat) = chat {
        let step_start = Instant::now();
        let name = chat.provider().name();
        let spinner = create_spinner(&format!("Summarizing with {name}..."));
        text = match Summarizer::new(Arc::new(chat)).summarize(&text).await {
            Ok(summary) => summary,
            Err(e) => {
                spinner.abandon_with_message(format!("{}", style("failed").red()));
                return Err(e.into());
            }
        };
        spinner.finish_with_message(format!(
            "{} Summarized ({}): {} characters {}",
            style("✓").green().bold(),
            name,
            text.chars().count(),
            style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
        ));
    }

    // Step 3: Narrate, render and join
    let step_start = Instant::now();
    let bar = create_progress_bar();
    let mut pipeline = Pipeline::new(
        config,
        Arc::new(GoogleTtsClient::new(credentials)?),
        Arc::new(media),
    )
    .with_observer(Arc::new(ProgressObserver { bar: bar.clone() }));

    let report = match pipeline.run(&text, strategy, &cli.output).await {
        Ok(report) => report,
        Err(e) => {
            bar.abandon_with_message(format!("{}", style("failed").red()));
            return Err(e.into());
        }
    };
    bar.finish_and_clear();
    println!(
        "{} Rendered {} segments, {} {}",
        style("✓").green().bold(),
        report.segments.len(),
        format_timestamp(report.output.duration_seconds),
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    );

    // Step 4: Manifest (optional)
    let manifest = report.manifest();
    if cli.manifest {
        let manifest_path = get_manifest_path(&report.output.path);
        save_manifest(&manifest, &manifest_path)
            .await
            .with_context(|| format!("Could not write {}", manifest_path.display()))?;
        println!(
            "{} Manifest: {}",
            style("✓").green().bold(),
            style(manifest_path.display()).dim()
        );
    }

    println!(
        "\n{} {}\n",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );

    println!(
        "\n{} {}\n",
        style("Saved:").dim(),
        style(report.output.path.display()).cyan()
    );

    if cli.manifest {
        println!("{}", style("─".repeat(60)).dim());
        println!("{}", format_manifest_readable(&manifest));
    }

    Ok(())
}
