use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{error, info};

use super::EndpointVerifier;
use crate::config::TaskEntry;
use crate::discord::VerificationError;
use crate::utils::logging::SUCCESS_TARGET;

/// A task that passed validation and can be handed to a pipeline.
#[derive(Debug)]
pub struct MirrorTask {
    /// 1-based position in the task list.
    pub position: usize,
    pub account_token: SecretString,
    pub channel_id: String,
    pub webhook_url: String,
    pub interval: Duration,
    pub pseudonymize: bool,
}

#[derive(Error, Debug)]
pub enum TaskIssue {
    #[error("Error verifying the Discord Webhook. [{0}]")]
    Webhook(#[from] VerificationError),

    #[error("Incognito mode value MUST be true or false (got {0})")]
    IncognitoNotBoolean(String),

    #[error("Delay value MUST be an Integer or a Float (got {0})")]
    DelayNotNumeric(String),

    #[error("Delay value MUST be a finite, non-negative number of seconds (got {0})")]
    DelayOutOfRange(f64),
}

#[derive(Error, Debug)]
#[error("task #{position} (channel {channel_id}) failed validation: {}", summarize(.issues))]
pub struct ValidationError {
    pub position: usize,
    pub channel_id: String,
    pub issues: Vec<TaskIssue>,
}

fn summarize(issues: &[TaskIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct TaskValidator {
    verifier: Arc<dyn EndpointVerifier>,
}

impl TaskValidator {
    pub fn new(verifier: Arc<dyn EndpointVerifier>) -> Self {
        Self { verifier }
    }

    /// Runs every check on `entry` and reports all failures together.
    ///
    /// Never panics on malformed values; each failed check is logged at
    /// error level and collected into the returned [`ValidationError`].
    pub async fn validate(
        &self,
        position: usize,
        entry: TaskEntry,
    ) -> Result<MirrorTask, ValidationError> {
        let mut issues = Vec::new();

        let webhook = self.verifier.verify(&entry.webhook_url).await;
        let pseudonymize = check_pseudonymize(&entry.incognito_mode);
        let interval = check_interval(&entry.delay);

        if let Err(err) = webhook {
            issues.push(TaskIssue::from(err));
        }
        let pseudonymize = pseudonymize.unwrap_or_else(|issue| {
            issues.push(issue);
            false
        });
        let interval = interval.unwrap_or_else(|issue| {
            issues.push(issue);
            Duration::ZERO
        });

        if !issues.is_empty() {
            for issue in &issues {
                error!("task #{} (channel {}): {}", position, entry.channel_id, issue);
            }
            return Err(ValidationError {
                position,
                channel_id: entry.channel_id,
                issues,
            });
        }

        info!(
            target: SUCCESS_TARGET,
            "task #{} (channel {}) verified", position, entry.channel_id
        );
        Ok(MirrorTask {
            position,
            account_token: entry.account_token,
            channel_id: entry.channel_id,
            webhook_url: entry.webhook_url,
            interval,
            pseudonymize,
        })
    }
}

pub fn check_pseudonymize(value: &Value) -> Result<bool, TaskIssue> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        other => Err(TaskIssue::IncognitoNotBoolean(describe(other))),
    }
}

pub fn check_interval(value: &Value) -> Result<Duration, TaskIssue> {
    let seconds = match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| TaskIssue::DelayNotNumeric(describe(value)))?,
        other => return Err(TaskIssue::DelayNotNumeric(describe(other))),
    };

    Duration::try_from_secs_f64(seconds).map_err(|_| TaskIssue::DelayOutOfRange(seconds))
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "nothing".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => format!("{text:?}"),
        Value::Sequence(_) => "a list".to_string(),
        Value::Mapping(_) => "a mapping".to_string(),
        Value::Tagged(tagged) => format!("a value tagged {}", tagged.tag),
    }
}
