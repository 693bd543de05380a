use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{DeliveryLedger, IdentityMap, MessageSink, MessageSource, MirrorTask};
use crate::config::LimitsConfig;
use crate::discord::{DiscordAuthor, DiscordMessage, WebhookEmbed, WebhookPayload};
use crate::utils::apply_pattern_string;
use crate::utils::logging::SUCCESS_TARGET;

/// Fixed waits used instead of the task interval after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub client_error_delay: Duration,
    pub unknown_error_delay: Duration,
}

impl From<&LimitsConfig> for RetryPolicy {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            client_error_delay: Duration::from_secs(limits.client_error_delay_secs),
            unknown_error_delay: Duration::from_secs(limits.unknown_error_delay_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Collaborators shared by every pipeline in the process.
#[derive(Clone)]
pub struct MirrorContext {
    pub source: Arc<dyn MessageSource>,
    pub sink: Arc<dyn MessageSink>,
    pub identities: Arc<IdentityMap>,
    pub ledger: Arc<DeliveryLedger>,
    pub avatar_url_template: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Fetched {
        mirrored: usize,
        duplicates: usize,
        failed: usize,
    },
    /// The channel answered with a 4xx status.
    ClientError,
    /// Any other fetch failure: 5xx, transport error or an unreadable body.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Mirrored,
    Duplicate,
    Failed,
}

pub struct ForwardingPipeline {
    task: MirrorTask,
    context: MirrorContext,
}

impl ForwardingPipeline {
    pub fn new(task: MirrorTask, context: MirrorContext) -> Self {
        Self { task, context }
    }

    /// Polls until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "mirroring channel [{}] for task #{} every [{}]s",
            self.task.channel_id,
            self.task.position,
            self.task.interval.as_secs_f64()
        );

        while !*shutdown.borrow() {
            let outcome = self.poll_once().await;
            let delay = self.delay_after(outcome);

            if let PollOutcome::Fetched { mirrored: 0, .. } = outcome {
                info!(
                    "no new messages on channel [{}] | sleeping for [{}]s",
                    self.task.channel_id,
                    delay.as_secs_f64()
                );
            } else {
                debug!(
                    "channel [{}] waiting [{}]s after {:?}",
                    self.task.channel_id,
                    delay.as_secs_f64(),
                    outcome
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("stopped mirroring channel [{}]", self.task.channel_id);
    }

    /// One fetch plus the dedup-and-forward pass over whatever came back.
    pub async fn poll_once(&self) -> PollOutcome {
        let task = &self.task;
        let messages = match self
            .context
            .source
            .fetch_recent(&task.account_token, &task.channel_id)
            .await
        {
            Ok(messages) => {
                info!(
                    target: SUCCESS_TARGET,
                    "response obtained from discord api for channel [{}]", task.channel_id
                );
                messages
            }
            Err(err) if err.is_client_error() => {
                let hint = if err.status() == Some(404) {
                    " [Check input channel or account token]"
                } else {
                    ""
                };
                warn!("{} on channel [{}].{}", err, task.channel_id, hint);
                return PollOutcome::ClientError;
            }
            Err(err) => {
                warn!("unknown error on channel [{}]: {}", task.channel_id, err);
                return PollOutcome::Unavailable;
            }
        };

        let (mut mirrored, mut duplicates, mut failed) = (0, 0, 0);
        for message in &messages {
            match self.mirror_message(message).await {
                MessageOutcome::Mirrored => mirrored += 1,
                MessageOutcome::Duplicate => duplicates += 1,
                MessageOutcome::Failed => failed += 1,
            }
        }

        PollOutcome::Fetched {
            mirrored,
            duplicates,
            failed,
        }
    }

    pub fn delay_after(&self, outcome: PollOutcome) -> Duration {
        match outcome {
            PollOutcome::Fetched { .. } => self.task.interval,
            PollOutcome::ClientError => self.context.retry.client_error_delay,
            PollOutcome::Unavailable => self.context.retry.unknown_error_delay,
        }
    }

    async fn mirror_message(&self, message: &DiscordMessage) -> MessageOutcome {
        // Recorded before forwarding: a failed forward is not retried.
        match self.context.ledger.mark_new(&message.id).await {
            Ok(true) => {}
            Ok(false) => {
                info!("message [{}] already mirrored", message.id);
                return MessageOutcome::Duplicate;
            }
            Err(err) => {
                error!("failed to record message [{}]: {}", message.id, err);
                return MessageOutcome::Failed;
            }
        }
        info!(target: SUCCESS_TARGET, "new message [{}] detected", message.id);

        let payload = self.build_payload(message).await;
        if payload.is_embed() {
            info!("webhook detected on channel [{}]", self.task.channel_id);
        }

        match self
            .context
            .sink
            .forward(&self.task.webhook_url, &payload)
            .await
        {
            Ok(()) => {
                info!(
                    target: SUCCESS_TARGET,
                    "message [{}] mirrored to channel", message.id
                );
                MessageOutcome::Mirrored
            }
            Err(err) => {
                error!("failed to mirror message [{}]: {}", message.id, err);
                MessageOutcome::Failed
            }
        }
    }

    async fn build_payload(&self, message: &DiscordMessage) -> WebhookPayload {
        let (username, avatar_url) = if self.task.pseudonymize {
            let alias = self.context.identities.resolve_alias(&message.author.id).await;
            (alias, None)
        } else {
            (
                message.author.username.clone(),
                avatar_url(&self.context.avatar_url_template, &message.author),
            )
        };
        classify_message(message, username, avatar_url)
    }
}

/// Rich embeds with at least one field are re-posted as embeds; everything
/// else goes out as plain text.
pub fn classify_message(
    message: &DiscordMessage,
    username: String,
    avatar_url: Option<String>,
) -> WebhookPayload {
    match message.embeds.first() {
        Some(embed) if embed.is_rich() && !embed.fields.is_empty() => WebhookPayload::Embed {
            username,
            avatar_url,
            embed: WebhookEmbed::from_source(embed),
        },
        _ => WebhookPayload::Text {
            username,
            avatar_url,
            content: message.content.clone(),
        },
    }
}

fn avatar_url(template: &str, author: &DiscordAuthor) -> Option<String> {
    author
        .avatar
        .as_deref()
        .map(|hash| apply_pattern_string(template, &[("id", &author.id), ("avatar", hash)]))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::discord::DiscordError;
    use crate::store::{JsonAliasStore, LineLedgerStore};
    use crate::utils::logging::{CaptureWriter, capture_subscriber};

    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<DiscordMessage>, DiscordError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn with(responses: Vec<Result<Vec<DiscordMessage>, DiscordError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn fetch_recent(
            &self,
            _credential: &SecretString,
            _channel_id: &str,
        ) -> Result<Vec<DiscordMessage>, DiscordError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        sent: Mutex<Vec<(String, WebhookPayload)>>,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<(String, WebhookPayload)> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn forward(
            &self,
            endpoint: &str,
            payload: &WebhookPayload,
        ) -> Result<(), DiscordError> {
            self.sent
                .lock()
                .expect("sent lock")
                .push((endpoint.to_string(), payload.clone()));
            if self.fail {
                return Err(DiscordError::UnexpectedStatus { status: 500 });
            }
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
        ledger: Arc<DeliveryLedger>,
        pipeline: ForwardingPipeline,
    }

    fn message(id: &str, author_id: &str, username: &str, embeds: serde_json::Value) -> DiscordMessage {
        serde_json::from_value(json!({
            "id": id,
            "author": {"id": author_id, "username": username, "avatar": "hash"},
            "content": format!("content of {id}"),
            "embeds": embeds,
        }))
        .expect("message")
    }

    fn task(pseudonymize: bool, interval: Duration) -> MirrorTask {
        MirrorTask {
            position: 1,
            account_token: SecretString::from("token".to_string()),
            channel_id: "42".to_string(),
            webhook_url: "https://discord.com/api/webhooks/1/abc".to_string(),
            interval,
            pseudonymize,
        }
    }

    async fn harness(
        responses: Vec<Result<Vec<DiscordMessage>, DiscordError>>,
        seen: &[&str],
        pseudonymize: bool,
        sink: RecordingSink,
    ) -> Harness {
        let dir = tempdir().expect("tempdir");
        let ledger_path = dir.path().join("ids.txt");
        if !seen.is_empty() {
            let lines: String = seen.iter().map(|id| format!("{id}\n")).collect();
            std::fs::write(&ledger_path, lines).expect("seed ledger");
        }

        let source = Arc::new(ScriptedSource::with(responses));
        let sink = Arc::new(sink);
        let ledger = Arc::new(
            DeliveryLedger::load(Arc::new(LineLedgerStore::new(&ledger_path)))
                .await
                .expect("ledger"),
        );
        let identities = Arc::new(
            IdentityMap::load(
                Arc::new(JsonAliasStore::new(dir.path().join("custom_names.json"))),
                "user:n",
            )
            .await
            .expect("identities"),
        );

        let context = MirrorContext {
            source: source.clone(),
            sink: sink.clone(),
            identities,
            ledger: ledger.clone(),
            avatar_url_template: "https://cdn.discordapp.com/avatars/:id/:avatar.png".to_string(),
            retry: RetryPolicy {
                client_error_delay: Duration::from_secs(5),
                unknown_error_delay: Duration::from_secs(10),
            },
        };
        let pipeline = ForwardingPipeline::new(
            task(pseudonymize, Duration::from_millis(10)),
            context,
        );

        Harness {
            dir,
            source,
            sink,
            ledger,
            pipeline,
        }
    }

    #[tokio::test]
    async fn already_mirrored_messages_are_skipped() {
        let h = harness(
            vec![Ok(vec![
                message("A", "9", "alice", json!([])),
                message("B", "9", "bob", json!([])),
            ])],
            &["A"],
            false,
            RecordingSink::default(),
        )
        .await;

        let console = CaptureWriter::default();
        let outcome = {
            let _guard = tracing::subscriber::set_default(capture_subscriber(
                &console,
                &CaptureWriter::default(),
            ));
            h.pipeline.poll_once().await
        };

        assert_eq!(
            outcome,
            PollOutcome::Fetched {
                mirrored: 1,
                duplicates: 1,
                failed: 0
            }
        );
        let skipped: Vec<String> = console
            .lines()
            .into_iter()
            .filter(|line| line.contains("already mirrored"))
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].ends_with("INFO: message [A] already mirrored"));
        let sent = h.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://discord.com/api/webhooks/1/abc");
        assert_eq!(sent[0].1.username(), "bob");
        assert!(!h.ledger.is_new("A").await);
        assert!(!h.ledger.is_new("B").await);
        assert_eq!(
            std::fs::read_to_string(h.dir.path().join("ids.txt")).expect("ledger file"),
            "A\nB\n"
        );
    }

    #[tokio::test]
    async fn rich_embed_with_fields_is_forwarded_as_embed() {
        let h = harness(
            vec![Ok(vec![
                message(
                    "1",
                    "9",
                    "alice",
                    json!([{"type": "rich", "title": "T", "fields": [{"name": "k", "value": "v"}]}]),
                ),
                message("2", "9", "alice", json!([{"type": "rich", "fields": []}])),
                message(
                    "3",
                    "9",
                    "alice",
                    json!([{"type": "link", "fields": [{"name": "k", "value": "v"}]}]),
                ),
            ])],
            &[],
            false,
            RecordingSink::default(),
        )
        .await;

        h.pipeline.poll_once().await;

        let sent = h.sink.sent();
        assert_eq!(sent.len(), 3);
        match &sent[0].1 {
            WebhookPayload::Embed { embed, .. } => {
                assert_eq!(embed.title.as_deref(), Some("T"));
                assert_eq!(embed.fields[0].name, "k");
                assert_eq!(embed.fields[0].value, "v");
            }
            other => panic!("expected embed payload, got {other:?}"),
        }
        assert!(matches!(
            &sent[1].1,
            WebhookPayload::Text { content, .. } if content == "content of 2"
        ));
        assert!(!sent[2].1.is_embed());
    }

    #[tokio::test]
    async fn real_identity_carries_avatar() {
        let mut without_avatar = message("2", "8", "bob", json!([]));
        without_avatar.author.avatar = None;
        let h = harness(
            vec![Ok(vec![message("1", "9", "alice", json!([])), without_avatar])],
            &[],
            false,
            RecordingSink::default(),
        )
        .await;

        h.pipeline.poll_once().await;

        let sent = h.sink.sent();
        assert_eq!(sent[0].1.username(), "alice");
        assert_eq!(
            sent[0].1.avatar_url(),
            Some("https://cdn.discordapp.com/avatars/9/hash.png")
        );
        assert_eq!(sent[1].1.avatar_url(), None);
    }

    #[tokio::test]
    async fn pseudonymized_messages_use_stable_aliases() {
        let h = harness(
            vec![Ok(vec![
                message("1", "9", "alice", json!([])),
                message("2", "8", "bob", json!([])),
                message("3", "9", "alice", json!([])),
            ])],
            &[],
            true,
            RecordingSink::default(),
        )
        .await;

        h.pipeline.poll_once().await;

        let names: Vec<String> = h
            .sink
            .sent()
            .iter()
            .map(|(_, payload)| payload.username().to_string())
            .collect();
        assert_eq!(names, vec!["user1", "user2", "user1"]);
        assert!(h.sink.sent().iter().all(|(_, p)| p.avatar_url().is_none()));

        let persisted =
            std::fs::read_to_string(h.dir.path().join("custom_names.json")).expect("aliases");
        assert!(persisted.contains("\"9\": \"user1\""));
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_forward_once() {
        let h = harness(
            vec![Ok(vec![
                message("X", "9", "alice", json!([])),
                message("X", "9", "alice", json!([])),
            ])],
            &[],
            false,
            RecordingSink::default(),
        )
        .await;

        let outcome = h.pipeline.poll_once().await;

        assert_eq!(
            outcome,
            PollOutcome::Fetched {
                mirrored: 1,
                duplicates: 1,
                failed: 0
            }
        );
        assert_eq!(h.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_forward_is_not_retried() {
        let h = harness(
            vec![
                Ok(vec![message("1", "9", "alice", json!([]))]),
                Ok(vec![message("1", "9", "alice", json!([]))]),
            ],
            &[],
            false,
            RecordingSink {
                fail: true,
                ..RecordingSink::default()
            },
        )
        .await;

        let first = h.pipeline.poll_once().await;
        let second = h.pipeline.poll_once().await;

        assert_eq!(
            first,
            PollOutcome::Fetched {
                mirrored: 0,
                duplicates: 0,
                failed: 1
            }
        );
        assert_eq!(
            second,
            PollOutcome::Fetched {
                mirrored: 0,
                duplicates: 1,
                failed: 0
            }
        );
        assert_eq!(h.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failures_pick_fixed_delays() {
        let h = harness(
            vec![
                Err(DiscordError::ClientError {
                    status: 404,
                    message: "Unknown Channel".to_string(),
                }),
                Err(DiscordError::UnexpectedStatus { status: 503 }),
                Ok(Vec::new()),
            ],
            &[],
            false,
            RecordingSink::default(),
        )
        .await;

        let client = h.pipeline.poll_once().await;
        let unknown = h.pipeline.poll_once().await;
        let empty = h.pipeline.poll_once().await;

        assert_eq!(client, PollOutcome::ClientError);
        assert_eq!(unknown, PollOutcome::Unavailable);
        assert_eq!(h.pipeline.delay_after(client), Duration::from_secs(5));
        assert_eq!(h.pipeline.delay_after(unknown), Duration::from_secs(10));
        assert_eq!(h.pipeline.delay_after(empty), Duration::from_millis(10));
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let h = harness(
            vec![Ok(vec![message("1", "9", "alice", json!([]))])],
            &[],
            false,
            RecordingSink::default(),
        )
        .await;
        let Harness {
            source,
            sink,
            pipeline,
            dir: _dir,
            ..
        } = h;

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).expect("send stop");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pipeline stopped")
            .expect("join");

        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(sink.sent().len(), 1);
    }

    #[test]
    fn retry_policy_reads_limits() {
        let policy = RetryPolicy::from(&LimitsConfig {
            client_error_delay_secs: 3,
            unknown_error_delay_secs: 7,
        });
        assert_eq!(policy.client_error_delay, Duration::from_secs(3));
        assert_eq!(policy.unknown_error_delay, Duration::from_secs(7));
    }
}
