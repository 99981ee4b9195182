//! Narration synthesis through Google Cloud Text-to-Speech.

use std::{
    io::Write,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    credentials::{Credentials, ServiceAccountFile, fetch_access_token},
    error::ConfigError,
    media::{MediaBackend, MediaError},
    provider::build_http_client,
    retry::{RetryError, RetryPolicy},
    types::{AudioFormat, AudioSegment, TextChunk},
    voice::{Voice, VoiceCatalog, VoiceGender},
};

pub const GOOGLE_TTS_ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

const TTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Google access tokens expire after an hour.
pub const TOKEN_MAX_AGE: Duration = Duration::from_secs(50 * 60);

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Speech service is rate limiting requests: {message}")]
    RateLimited { message: String },

    #[error("Speech service rejected the request ({}): {message}", .status.map_or("no status".to_string(), |s| s.to_string()))]
    Fatal { status: Option<u16>, message: String },

    #[error("Unexpected speech service response: {reason}")]
    InvalidResponse { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<SynthesisError>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Could not measure synthesized audio: {0}")]
    Measure(#[from] MediaError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SynthesisError {
    /// Only quota/rate errors are worth waiting out.
    pub fn is_transient(&self) -> bool {
        matches!(self, SynthesisError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_name: String,
    pub language_code: String,
    pub gender: VoiceGender,
    pub speaking_rate: f64,
    pub pitch: f64,
}

impl SynthesisRequest {
    pub fn new(text: &str, voice: &Voice, settings: &SynthesisSettings) -> Self {
        Self {
            text: text.to_string(),
            voice_name: voice.name.to_string(),
            language_code: voice.language_code().to_string(),
            gender: voice.gender,
            speaking_rate: settings.speaking_rate,
            pitch: settings.pitch,
        }
    }

    /// JSON body for `text:synthesize`.
    pub fn to_body(&self) -> SynthesizeBody<'_> {
        SynthesizeBody {
            input: InputBody { text: &self.text },
            voice: VoiceBody {
                language_code: &self.language_code,
                name: &self.voice_name,
                ssml_gender: self.gender,
            },
            audio_config: AudioConfigBody {
                audio_encoding: "MP3",
                speaking_rate: self.speaking_rate,
                pitch: self.pitch,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeBody<'a> {
    input: InputBody<'a>,
    voice: VoiceBody<'a>,
    audio_config: AudioConfigBody,
}

#[derive(Debug, Serialize)]
struct InputBody<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceBody<'a> {
    language_code: &'a str,
    name: &'a str,
    ssml_gender: VoiceGender,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfigBody {
    audio_encoding: &'static str,
    speaking_rate: f64,
    pitch: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Anything that turns a request into encoded audio bytes.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError>;
}

/// Where bearer tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String, ConfigError>;
}

#[async_trait]
impl TokenSource for ServiceAccountFile {
    async fn fetch_token(&self) -> Result<String, ConfigError> {
        fetch_access_token(self).await
    }
}

/// Caches a fetched token and fetches a new one once it is `max_age` old.
pub struct TokenCache {
    source: Box<dyn TokenSource>,
    max_age: Duration,
    cached: Mutex<Option<(String, Instant)>>,
}

impl TokenCache {
    pub fn new(source: Box<dyn TokenSource>, max_age: Duration) -> Self {
        Self {
            source,
            max_age,
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, ConfigError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref()
            && fetched_at.elapsed() < self.max_age
        {
            return Ok(token.clone());
        }

        let token = self.source.fetch_token().await?;
        info!("Fetched access token");
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }

    /// Drop the cached token so the next call fetches a fresh one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

enum Auth {
    ApiKey(String),
    Bearer(String),
    Refreshing(TokenCache),
}

pub struct GoogleTtsClient {
    http: reqwest::Client,
    endpoint: String,
    auth: Auth,
}

impl GoogleTtsClient {
    pub fn new(credentials: Credentials) -> Result<Self, ConfigError> {
        let auth = match credentials {
            Credentials::ApiKey(key) => Auth::ApiKey(key),
            Credentials::AccessToken(token) => Auth::Bearer(token),
            Credentials::ServiceAccount(file) => {
                Auth::Refreshing(TokenCache::new(Box::new(file), TOKEN_MAX_AGE))
            }
        };
        Ok(Self {
            http: build_http_client(TTS_REQUEST_TIMEOUT)?,
            endpoint: GOOGLE_TTS_ENDPOINT.to_string(),
            auth,
        })
    }

    async fn send(&self, request: &SynthesisRequest) -> Result<(u16, String), SynthesisError> {
        let builder = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request.to_body());

        let builder = match &self.auth {
            Auth::ApiKey(key) => builder.header("x-goog-api-key", key),
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Refreshing(cache) => builder.bearer_auth(cache.token().await?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl SpeechClient for GoogleTtsClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        let (mut status, mut body) = self.send(request).await?;

        // a token revoked or expired early gets one fresh attempt
        if status == 401
            && let Auth::Refreshing(cache) = &self.auth
        {
            debug!("Access token rejected, fetching a new one");
            cache.invalidate().await;
            (status, body) = self.send(request).await?;
        }

        classify_response(status, &body)
    }
}

/// Map an HTTP status and body to audio bytes or a classified error.
pub fn classify_response(status: u16, body: &str) -> Result<Vec<u8>, SynthesisError> {
    if (200..300).contains(&status) {
        let parsed: SynthesizeResponse =
            serde_json::from_str(body).map_err(|e| SynthesisError::InvalidResponse {
                reason: e.to_string(),
            })?;
        return STANDARD
            .decode(parsed.audio_content)
            .map_err(|e| SynthesisError::InvalidResponse {
                reason: format!("audioContent is not base64: {e}"),
            });
    }

    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .unwrap_or(body)
        .trim()
        .to_string();
    let grpc_status = parsed
        .as_ref()
        .and_then(|v| v["error"]["status"].as_str())
        .unwrap_or_default();

    if status == 429 || grpc_status == "RESOURCE_EXHAUSTED" || body.contains("RESOURCE_EXHAUSTED") {
        Err(SynthesisError::RateLimited { message })
    } else {
        Err(SynthesisError::Fatal {
            status: Some(status),
            message,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisSettings {
    pub speaking_rate: f64,
    pub pitch: f64,
    pub retry: RetryPolicy,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            speaking_rate: 1.0,
            pitch: 0.0,
            retry: RetryPolicy::default(),
        }
    }
}

/// Voice lookup, retried synthesis and duration measurement for one chunk.
pub struct Synthesizer {
    client: Arc<dyn SpeechClient>,
    media: Arc<dyn MediaBackend>,
    catalog: VoiceCatalog,
    settings: SynthesisSettings,
    scratch_dir: PathBuf,
}

impl Synthesizer {
    pub fn new(
        client: Arc<dyn SpeechClient>,
        media: Arc<dyn MediaBackend>,
        catalog: VoiceCatalog,
        settings: SynthesisSettings,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            media,
            catalog,
            settings,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub async fn synthesize(
        &self,
        chunk: &TextChunk,
        voice_name: &str,
    ) -> Result<AudioSegment, SynthesisError> {
        let voice = self.catalog.lookup(voice_name)?;
        let request = SynthesisRequest::new(&chunk.content, voice, &self.settings);

        let audio_bytes = self
            .settings
            .retry
            .run(SynthesisError::is_transient, |attempt| {
                debug!(chunk = chunk.index, attempt, "Requesting speech");
                self.client.synthesize(&request)
            })
            .await
            .map_err(|e| match e {
                RetryError::Permanent(e) => e,
                RetryError::Exhausted { attempts, last } => SynthesisError::Exhausted {
                    attempts,
                    last: Box::new(last),
                },
            })?;

        // the probe needs a real file; it is removed when `file` drops
        let mut file = tempfile::Builder::new()
            .prefix(&format!("speech_{:05}_", chunk.index))
            .suffix(".mp3")
            .tempfile_in(&self.scratch_dir)?;
        file.write_all(&audio_bytes)?;
        file.flush()?;
        let duration_seconds = self.media.probe_duration(file.path()).await?;

        Ok(AudioSegment {
            chunk_index: chunk.index,
            audio_bytes,
            duration_seconds,
            format: AudioFormat::Mp3,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        media::{ConcatEntry, SegmentRender},
        retry::Backoff,
    };

    struct ScriptedClient {
        calls: AtomicUsize,
        rate_limits: usize,
        fatal: bool,
    }

    impl ScriptedClient {
        fn new(rate_limits: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rate_limits,
                fatal: false,
            }
        }
    }

    #[async_trait]
    impl SpeechClient for ScriptedClient {
        async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(SynthesisError::Fatal {
                    status: Some(400),
                    message: "bad voice".into(),
                });
            }
            if call < self.rate_limits {
                return Err(SynthesisError::RateLimited {
                    message: "quota".into(),
                });
            }
            Ok(request.text.as_bytes().to_vec())
        }
    }

    struct FixedDuration(f64);

    #[async_trait]
    impl MediaBackend for FixedDuration {
        async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
            assert!(path.exists());
            Ok(self.0)
        }
        async fn validate_clip(&self, _path: &Path) -> Result<Option<f64>, MediaError> {
            Ok(None)
        }
        async fn render_segment(&self, _render: &SegmentRender) -> Result<(), MediaError> {
            Ok(())
        }
        async fn concat(&self, _entries: &[ConcatEntry], _output: &Path) -> Result<(), MediaError> {
            Ok(())
        }
    }

    fn synthesizer(client: Arc<ScriptedClient>, scratch: &Path) -> Synthesizer {
        let settings = SynthesisSettings {
            retry: RetryPolicy::new(3, Backoff::Constant(Duration::ZERO)),
            ..Default::default()
        };
        Synthesizer::new(
            client,
            Arc::new(FixedDuration(2.5)),
            VoiceCatalog::spanish(),
            settings,
            scratch,
        )
    }

    #[tokio::test]
    async fn retries_rate_limits_and_cleans_scratch_file() {
        let scratch = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new(2));
        let synth = synthesizer(client.clone(), scratch.path());

        let audio = synth
            .synthesize(&TextChunk::new("Hola.", 7), "es-ES-Standard-A")
            .await
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(audio.chunk_index, 7);
        assert_eq!(audio.duration_seconds, 2.5);
        assert_eq!(audio.audio_bytes, b"Hola.");
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unknown_voice_fails_before_any_request() {
        let scratch = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new(0));
        let synth = synthesizer(client.clone(), scratch.path());

        let err = synth
            .synthesize(&TextChunk::new("Hola.", 0), "xx-XX-Nope")
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::Config(ConfigError::UnknownVoice { .. })));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persistent_rate_limit_is_exhausted() {
        let scratch = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new(usize::MAX));
        let synth = synthesizer(client.clone(), scratch.path());

        let err = synth
            .synthesize(&TextChunk::new("Hola.", 0), "es-ES-Standard-A")
            .await
            .unwrap_err();

        match err {
            SynthesisError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.is_transient());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let scratch = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient {
            fatal: true,
            ..ScriptedClient::new(0)
        });
        let synth = synthesizer(client.clone(), scratch.path());

        let err = synth
            .synthesize(&TextChunk::new("Hola.", 0), "es-ES-Standard-A")
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::Fatal { status: Some(400), .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    struct CountingTokens(Arc<AtomicUsize>);

    #[async_trait]
    impl TokenSource for CountingTokens {
        async fn fetch_token(&self) -> Result<String, ConfigError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{n}"))
        }
    }

    #[tokio::test]
    async fn token_is_reused_while_fresh() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let cache = TokenCache::new(Box::new(CountingTokens(fetches.clone())), TOKEN_MAX_AGE);

        assert_eq!(cache.token().await.unwrap(), "token-0");
        assert_eq!(cache.token().await.unwrap(), "token-0");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_or_rejected_tokens_are_refetched() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let stale = TokenCache::new(Box::new(CountingTokens(fetches.clone())), Duration::ZERO);
        assert_eq!(stale.token().await.unwrap(), "token-0");
        assert_eq!(stale.token().await.unwrap(), "token-1");

        let fetches = Arc::new(AtomicUsize::new(0));
        let cache = TokenCache::new(Box::new(CountingTokens(fetches.clone())), TOKEN_MAX_AGE);
        assert_eq!(cache.token().await.unwrap(), "token-0");
        cache.invalidate().await;
        assert_eq!(cache.token().await.unwrap(), "token-1");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn expired_token_is_not_retryable() {
        let body = r#"{"error":{"code":401,"message":"Request had invalid authentication credentials.","status":"UNAUTHENTICATED"}}"#;
        assert!(matches!(
            classify_response(401, body),
            Err(SynthesisError::Fatal { status: Some(401), .. })
        ));
    }

    #[test]
    fn classifies_rate_limits() {
        assert!(classify_response(429, "Too Many Requests").unwrap_err().is_transient());

        let body = r#"{"error":{"code":403,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        match classify_response(403, body).unwrap_err() {
            SynthesisError::RateLimited { message } => assert_eq!(message, "Quota exceeded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_errors_are_fatal() {
        let body = r#"{"error":{"code":400,"message":"Invalid voice","status":"INVALID_ARGUMENT"}}"#;
        let err = classify_response(400, body).unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, SynthesisError::Fatal { status: Some(400), message } if message == "Invalid voice"));
    }

    #[test]
    fn decodes_audio_content() {
        let body = format!(r#"{{"audioContent":"{}"}}"#, STANDARD.encode(b"ID3audio"));
        assert_eq!(classify_response(200, &body).unwrap(), b"ID3audio");

        assert!(matches!(
            classify_response(200, r#"{"audioContent":"***"}"#),
            Err(SynthesisError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn request_body_matches_api_shape() {
        let voice = VoiceCatalog::spanish().lookup("es-ES-Wavenet-B").unwrap();
        let request = SynthesisRequest::new("Hola", voice, &SynthesisSettings::default());
        let body = serde_json::to_value(request.to_body()).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "input": {"text": "Hola"},
                "voice": {"languageCode": "es-ES", "name": "es-ES-Wavenet-B", "ssmlGender": "MALE"},
                "audioConfig": {"audioEncoding": "MP3", "speakingRate": 1.0, "pitch": 0.0}
            })
        );
    }
}
