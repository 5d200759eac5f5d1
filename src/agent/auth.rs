//! OAuth credential storage and refresh.
//!
//! The agent CLI authenticates with a bearer token kept in a per-user JSON
//! file. This module reads that record, decides when the token is close
//! enough to expiry to refresh proactively, and performs the HTTPS
//! refresh-token exchange, backing up the previous file before overwriting.

use crate::errors::InvokeError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// On-disk credential file: `~/.claude/.credentials.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    pub oauth: OauthCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OauthCredentials {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    /// Expiry instant in epoch milliseconds.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OauthCredentials {
    /// Whether the access token expires within `lead` from now.
    pub fn expires_within(&self, lead: Duration) -> bool {
        let horizon = Utc::now().timestamp_millis() + lead.as_millis() as i64;
        self.expires_at <= horizon
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'static str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds.
    expires_in: i64,
}

/// Seam between the invoker and the credential store, so tests can count
/// refresh calls without touching the network.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Whether the stored credential expires within `lead`. `false` when the
    /// file is unreadable; the reactive path is the real safety net.
    fn needs_refresh(&self, lead: Duration) -> bool;

    /// Exchange the refresh token for fresh credentials and persist them.
    async fn refresh(&self) -> Result<(), InvokeError>;
}

/// Production refresher operating on the on-disk OAuth record.
pub struct CredentialManager {
    path: PathBuf,
    token_url: String,
    client: reqwest::Client,
}

impl CredentialManager {
    pub fn new() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude")
            .join(".credentials.json");
        Self::with_path(path)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token_url: TOKEN_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the credential file.
    pub fn load(&self) -> Result<CredentialsFile, InvokeError> {
        let content =
            fs::read_to_string(&self.path).map_err(|e| InvokeError::CredentialsUnreadable {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        serde_json::from_str(&content).map_err(|e| InvokeError::CredentialsUnreadable {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn store(&self, credentials: &CredentialsFile) -> Result<(), InvokeError> {
        // Best-effort backup of the previous record before overwriting
        let backup = PathBuf::from(format!("{}.bak", self.path.display()));
        if let Err(e) = fs::copy(&self.path, &backup) {
            warn!("Failed to back up credential file: {e}");
        }

        let json = serde_json::to_string_pretty(credentials).map_err(|e| {
            InvokeError::CredentialsUnreadable {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })?;
        fs::write(&self.path, json).map_err(|e| InvokeError::CredentialsUnreadable {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

impl Default for CredentialManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialRefresher for CredentialManager {
    fn needs_refresh(&self, lead: Duration) -> bool {
        match self.load() {
            Ok(file) => file.oauth.expires_within(lead),
            Err(_) => false,
        }
    }

    async fn refresh(&self) -> Result<(), InvokeError> {
        let mut file = self.load()?;
        if file.oauth.refresh_token.is_empty() {
            return Err(InvokeError::MissingRefreshToken);
        }

        let request = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: &file.oauth.refresh_token,
            client_id: CLIENT_ID,
        };

        let response = self
            .client
            .post(&self.token_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InvokeError::RefreshFailed {
                status: 0,
                body: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::RefreshFailed { status, body });
        }

        let tokens: RefreshResponse =
            response
                .json()
                .await
                .map_err(|e| InvokeError::RefreshFailed {
                    status,
                    body: format!("unparseable token response: {e}"),
                })?;

        file.oauth.access_token = tokens.access_token;
        if let Some(refresh_token) = tokens.refresh_token {
            file.oauth.refresh_token = refresh_token;
        }
        file.oauth.expires_at = Utc::now().timestamp_millis() + tokens.expires_in * 1000;

        self.store(&file)?;
        debug!("Credential refresh succeeded");
        Ok(())
    }
}
