use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::DiscordConfig;

pub mod embed;
pub mod webhook;

pub use self::embed::WebhookEmbed;
pub use self::webhook::{VerificationError, WebhookPayload, check_webhook_body};

pub const RICH_EMBED_KIND: &str = "rich";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedMedia {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordEmbed {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    #[serde(default)]
    pub thumbnail: Option<EmbedMedia>,
}

impl DiscordEmbed {
    pub fn is_rich(&self) -> bool {
        self.kind.as_deref() == Some(RICH_EMBED_KIND)
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail.as_ref().and_then(|media| media.url.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub author: DiscordAuthor,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<DiscordEmbed>,
}

#[derive(Error, Debug)]
pub enum DiscordError {
    #[error("Client error {status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("Unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl DiscordError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, DiscordError::ClientError { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DiscordError::ClientError { status, .. } | DiscordError::UnexpectedStatus { status } => {
                Some(*status)
            }
            DiscordError::Transport(err) => err.status().map(|status| status.as_u16()),
            DiscordError::InvalidPayload(_) => None,
        }
    }
}

/// Thin REST client for the three Discord calls the mirror needs: reading a
/// channel, executing a webhook and checking that a webhook exists.
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    fetch_limit: u32,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Result<Self, DiscordError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            fetch_limit: config.fetch_limit,
        })
    }

    pub async fn fetch_messages(
        &self,
        token: &SecretString,
        channel_id: &str,
    ) -> Result<Vec<DiscordMessage>, DiscordError> {
        let url = format!(
            "{}/channels/{}/messages?limit={}",
            self.api_base, channel_id, self.fetch_limit
        );
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.expose_secret())
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let value: Value = response.json().await?;
        if !value.is_array() {
            return Err(DiscordError::InvalidPayload(
                "expected a list of messages".to_string(),
            ));
        }
        let messages: Vec<DiscordMessage> = serde_json::from_value(value)
            .map_err(|err| DiscordError::InvalidPayload(err.to_string()))?;

        debug!("fetched {} messages from channel {}", messages.len(), channel_id);
        Ok(messages)
    }

    pub async fn execute_webhook(
        &self,
        webhook_url: &str,
        payload: &WebhookPayload,
    ) -> Result<(), DiscordError> {
        let response = self
            .http
            .post(webhook_url)
            .json(&payload.to_json())
            .send()
            .await?;
        error_for_status(response).await?;
        Ok(())
    }

    pub async fn verify_webhook(&self, webhook_url: &str) -> Result<(), VerificationError> {
        let url =
            Url::parse(webhook_url).map_err(|err| VerificationError::InvalidUrl(err.to_string()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| VerificationError::Request(err.to_string()))?;

        let response = match error_for_status(response).await {
            Ok(response) => response,
            Err(DiscordError::ClientError { status, message }) => {
                return Err(VerificationError::Rejected { status, message });
            }
            Err(DiscordError::UnexpectedStatus { status }) => {
                return Err(VerificationError::UnexpectedStatus { status });
            }
            Err(err) => return Err(VerificationError::Request(err.to_string())),
        };

        let body: Value = response
            .json()
            .await
            .map_err(|err| VerificationError::Request(err.to_string()))?;
        check_webhook_body(&body)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, DiscordError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.is_client_error() {
        let fallback = status.canonical_reason().unwrap_or("client error").to_string();
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("message")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
            })
            .unwrap_or(fallback);
        return Err(DiscordError::ClientError {
            status: status.as_u16(),
            message,
        });
    }

    Err(DiscordError::UnexpectedStatus {
        status: status.as_u16(),
    })
}
