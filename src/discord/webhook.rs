use serde_json::{Value, json};
use thiserror::Error;

use super::WebhookEmbed;

/// Body sent to the target webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookPayload {
    /// A rich embed rebuilt from the source message's first embed.
    Embed {
        username: String,
        avatar_url: Option<String>,
        embed: WebhookEmbed,
    },
    /// The source message's text, posted as a regular (non-embed) message.
    Text {
        username: String,
        avatar_url: Option<String>,
        content: String,
    },
}

impl WebhookPayload {
    pub fn username(&self) -> &str {
        match self {
            WebhookPayload::Embed { username, .. } | WebhookPayload::Text { username, .. } => {
                username
            }
        }
    }

    pub fn avatar_url(&self) -> Option<&str> {
        match self {
            WebhookPayload::Embed { avatar_url, .. } | WebhookPayload::Text { avatar_url, .. } => {
                avatar_url.as_deref()
            }
        }
    }

    pub fn is_embed(&self) -> bool {
        matches!(self, WebhookPayload::Embed { .. })
    }

    pub fn to_json(&self) -> Value {
        let mut body = match self {
            WebhookPayload::Embed { embed, .. } => json!({ "embeds": [embed.to_json()] }),
            WebhookPayload::Text { content, .. } => json!({ "content": content }),
        };
        body["username"] = json!(self.username());
        if let Some(avatar_url) = self.avatar_url() {
            body["avatar_url"] = json!(avatar_url);
        }
        body
    }
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("Error {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Webhook response has no token field")]
    MissingToken,

    #[error("Request Exception: {0}")]
    Request(String),
}

/// A live webhook answers a GET with an object that carries its `token`.
pub fn check_webhook_body(body: &Value) -> Result<(), VerificationError> {
    match body.get("token") {
        Some(_) => Ok(()),
        None => Err(VerificationError::MissingToken),
    }
}
