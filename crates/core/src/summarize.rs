//! Condense long books into narration-friendly prose before synthesis.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    error::ConfigError,
    provider::{Provider, build_http_client},
    segment::{SegmentationError, segment_text},
};

/// Only the beginning of very long books is summarized.
pub const MAX_SUMMARY_INPUT_CHARS: usize = 100_000;
pub const SUMMARY_PART_CHARS: usize = 15_000;

const CHAT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

const SUMMARY_PROMPT: &str = r#"Summarize the text as flowing narrative prose meant to be read aloud as video captions.

Guidelines:
- Write continuous paragraphs with no headings, markers or sections
- No bullet points, asterisks or special characters
- Do not mention chapters, introductions or sections
- Connect ideas naturally, in clear and direct language
- Narrate as if telling a story
- Separate ideas only with periods and commas
- Write in the same language as the text
- Output only the summary, nothing else"#;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not split text for summarizing: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API response: {reason}")]
    InvalidResponse { reason: String },

    #[error("All {parts} summary parts failed")]
    AllPartsFailed { parts: usize },
}

/// One system + user exchange with a chat model.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, SummaryError>;
}

pub struct ProviderChat {
    provider: Provider,
    api_key: String,
    http: reqwest::Client,
}

impl ProviderChat {
    pub fn new(provider: Provider, api_key: String) -> Result<Self, ConfigError> {
        Ok(Self {
            provider,
            api_key,
            http: build_http_client(CHAT_REQUEST_TIMEOUT)?,
        })
    }

    /// Reads the key from the provider's environment variable.
    pub fn from_env(provider: Provider) -> Result<Self, ConfigError> {
        let api_key = provider.validate_api_key()?;
        Self::new(provider, api_key)
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }
}

#[async_trait]
impl ChatCompletion for ProviderChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, SummaryError> {
        let config = self.provider.config();
        let response = self
            .http
            .post(config.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": config.model,
                "messages": [
                    {
                        "role": "system",
                        "content": system,
                    },
                    {
                        "role": "user",
                        "content": user,
                    },
                ],
                "temperature": 0.3,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        extract_message_content(&response)
    }
}

/// `choices[0].message.content` of a chat completion response.
pub fn extract_message_content(response: &serde_json::Value) -> Result<String, SummaryError> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.trim().to_string())
        .ok_or_else(|| SummaryError::InvalidResponse {
            reason: format!("{:?}", response),
        })
}

/// Prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

pub struct Summarizer {
    chat: Arc<dyn ChatCompletion>,
    max_input_chars: usize,
    part_chars: usize,
    pause: Duration,
}

impl Summarizer {
    pub fn new(chat: Arc<dyn ChatCompletion>) -> Self {
        Self {
            chat,
            max_input_chars: MAX_SUMMARY_INPUT_CHARS,
            part_chars: SUMMARY_PART_CHARS,
            pause: Duration::from_secs(2),
        }
    }

    /// Delay between consecutive requests.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_limits(mut self, max_input_chars: usize, part_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self.part_chars = part_chars;
        self
    }

    /// Summarize each part in turn. Failed parts are logged and skipped; the
    /// call only fails when every part does.
    pub async fn summarize(&self, text: &str) -> Result<String, SummaryError> {
        let text = truncate_chars(text, self.max_input_chars);
        let parts = segment_text(text, self.part_chars)?;
        let total = parts.len();
        info!(parts = total, "Summarizing text");

        let mut summaries = Vec::with_capacity(total);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            match self.chat.complete(SUMMARY_PROMPT, &part.content).await {
                Ok(summary) if !summary.is_empty() => {
                    info!(part = i + 1, total, "Part summarized");
                    summaries.push(summary);
                }
                Ok(_) => warn!(part = i + 1, total, "Empty summary, skipping part"),
                Err(e) => warn!(part = i + 1, total, error = %e, "Summary failed, skipping part"),
            }
        }

        if summaries.is_empty() {
            return Err(SummaryError::AllPartsFailed { parts: total });
        }
        Ok(summaries.join("\n\n"))
    }
}
