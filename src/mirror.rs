use async_trait::async_trait;
use secrecy::SecretString;

use crate::discord::{
    DiscordClient, DiscordError, DiscordMessage, VerificationError, WebhookPayload,
};

pub mod identity;
pub mod ledger;
pub mod pipeline;
pub mod runner;
pub mod validator;

pub use self::identity::IdentityMap;
pub use self::ledger::DeliveryLedger;
pub use self::pipeline::{ForwardingPipeline, MirrorContext, RetryPolicy};
pub use self::runner::TaskRunner;
pub use self::validator::{MirrorTask, TaskValidator, ValidationError};

/// Where candidate messages come from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_recent(
        &self,
        credential: &SecretString,
        channel_id: &str,
    ) -> Result<Vec<DiscordMessage>, DiscordError>;
}

/// Where mirrored messages go.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn forward(&self, endpoint: &str, payload: &WebhookPayload) -> Result<(), DiscordError>;
}

/// Confirms that a target endpoint exists and accepts messages.
#[async_trait]
pub trait EndpointVerifier: Send + Sync {
    async fn verify(&self, endpoint: &str) -> Result<(), VerificationError>;
}

#[async_trait]
impl MessageSource for DiscordClient {
    async fn fetch_recent(
        &self,
        credential: &SecretString,
        channel_id: &str,
    ) -> Result<Vec<DiscordMessage>, DiscordError> {
        self.fetch_messages(credential, channel_id).await
    }
}

#[async_trait]
impl MessageSink for DiscordClient {
    async fn forward(&self, endpoint: &str, payload: &WebhookPayload) -> Result<(), DiscordError> {
        self.execute_webhook(endpoint, payload).await
    }
}

#[async_trait]
impl EndpointVerifier for DiscordClient {
    async fn verify(&self, endpoint: &str) -> Result<(), VerificationError> {
        self.verify_webhook(endpoint).await
    }
}
