use std::path::PathBuf;

use thiserror::Error;

use crate::{media::MediaError, segment::SegmentationError, synth::SynthesisError};

/// Problems detected before any work is started.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown voice '{name}'. Run with --list-voices to see the catalog")]
    UnknownVoice { name: String },

    #[error("Missing credentials: set GOOGLE_API_KEY, GOOGLE_ACCESS_TOKEN or the GOOGLE_* service account variables")]
    MissingCredentials,

    #[error("Missing environment variable {env_var}")]
    MissingEnv { env_var: String },

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("Invalid service account key: {0}")]
    InvalidKey(#[from] serde_json::Error),

    #[error("Credentials file error: {0}")]
    CredentialsIo(#[from] std::io::Error),

    #[error("Could not obtain an access token: {reason}")]
    TokenFetch { reason: String },

    #[error("Could not build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("Input text contains nothing to narrate")]
    EmptyText,

    #[error("Synthesis failed for segment {index}: {source}")]
    Synthesis {
        index: usize,
        #[source]
        source: SynthesisError,
    },

    #[error("No valid background clips among {candidates} candidates")]
    NoValidBackground { candidates: usize },

    #[error("Rendering segment {index} failed: {source}")]
    Render {
        index: usize,
        #[source]
        source: MediaError,
    },

    #[error("Encoding {path} failed: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: MediaError,
    },

    #[error("Broken timeline: {reason}")]
    Timeline { reason: String },

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
