//! Google Cloud credentials, assembled explicitly instead of read from globals.

use std::{fmt, io::Write, path::Path};

use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::process::Command;
use tracing::debug;

use crate::error::ConfigError;

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";
pub const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const CERTS_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";

/// The JSON key file format issued for Google service accounts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    pub client_id: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub auth_provider_x509_cert_url: String,
    pub client_x509_cert_url: String,
}

impl ServiceAccountKey {
    /// Build a key from `GOOGLE_*` variables, or `None` when no private key is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(private_key) = lookup("GOOGLE_PRIVATE_KEY").filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        let require = |env_var: &str| {
            lookup(env_var)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnv {
                    env_var: env_var.to_string(),
                })
        };

        Ok(Some(Self {
            kind: "service_account".to_string(),
            project_id: require("GOOGLE_PROJECT_ID")?,
            private_key_id: require("GOOGLE_PRIVATE_KEY_ID")?,
            // keys pasted into env files carry escaped newlines
            private_key: private_key.replace("\\n", "\n"),
            client_email: require("GOOGLE_CLIENT_EMAIL")?,
            client_id: require("GOOGLE_CLIENT_ID")?,
            auth_uri: AUTH_URI.to_string(),
            token_uri: TOKEN_URI.to_string(),
            auth_provider_x509_cert_url: CERTS_URL.to_string(),
            client_x509_cert_url: require("GOOGLE_CLIENT_X509_CERT_URL")?,
        }))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

/// A service account key written to a private temp file; removed on drop.
#[derive(Debug)]
pub struct ServiceAccountFile {
    key: ServiceAccountKey,
    path: TempPath,
}

impl ServiceAccountFile {
    pub fn write(key: ServiceAccountKey) -> Result<Self, ConfigError> {
        let mut file = tempfile::Builder::new()
            .prefix("textreel-sa-")
            .suffix(".json")
            .tempfile()?;
        file.write_all(serde_json::to_string(&key)?.as_bytes())?;
        file.flush()?;
        Ok(Self {
            key,
            path: file.into_temp_path(),
        })
    }

    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub enum Credentials {
    ApiKey(String),
    AccessToken(String),
    ServiceAccount(ServiceAccountFile),
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials in order: API key, access token, service account
    /// variables, then a key file named by `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(API_KEY_ENV) {
            return Ok(Credentials::ApiKey(key));
        }
        if let Some(token) = non_empty(ACCESS_TOKEN_ENV) {
            return Ok(Credentials::AccessToken(token));
        }
        if let Some(key) = ServiceAccountKey::from_lookup(&lookup)? {
            return Ok(Credentials::ServiceAccount(ServiceAccountFile::write(key)?));
        }
        if let Some(path) = non_empty(APPLICATION_CREDENTIALS_ENV) {
            let key = ServiceAccountKey::from_file(Path::new(&path))?;
            return Ok(Credentials::ServiceAccount(ServiceAccountFile::write(key)?));
        }

        Err(ConfigError::MissingCredentials)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::ApiKey(_) => "api key",
            Credentials::AccessToken(_) => "access token",
            Credentials::ServiceAccount(_) => "service account",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Credentials::ServiceAccount(file) => {
                f.debug_tuple("ServiceAccount").field(file.key()).finish()
            }
        }
    }
}

/// Ask gcloud for an access token for the given service account.
///
/// The key path is passed only in the child's environment.
pub async fn fetch_access_token(file: &ServiceAccountFile) -> Result<String, ConfigError> {
    debug!(account = %file.key().client_email, "Fetching access token via gcloud");
    let output = Command::new("gcloud")
        .arg("auth")
        .arg("application-default")
        .arg("print-access-token")
        .env(APPLICATION_CREDENTIALS_ENV, file.path())
        .output()
        .await
        .map_err(|e| ConfigError::TokenFetch {
            reason: format!("could not run gcloud: {e}"),
        })?;

    if !output.status.success() {
        return Err(ConfigError::TokenFetch {
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ConfigError::TokenFetch {
            reason: "gcloud printed an empty token".to_string(),
        });
    }
    Ok(token)
}
