//! Redis Streams job queue (durable, at-least-once delivery).
//!
//! - **Pending stream**: published job messages, consumed by the external
//!   worker.
//! - **Completed stream**: completion messages, read through a consumer group.
//!   An entry stays in the group's pending list until acknowledged. Once it
//!   has been idle for the redelivery timeout it is claimed with `XCLAIM` and
//!   handed out again, next to new entries read with `>`.
//!
//! Every entry carries its JSON document in the `payload` field. One
//! auto-reconnecting connection is shared by all calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingId, StreamReadOptions,
    StreamReadReply,
};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use helpline_queue::{JobQueue, PublishMessage, QueueError, ReceivedMessage};

const PAYLOAD_FIELD: &str = "payload";
const DEFAULT_REDELIVERY_IDLE: Duration = Duration::from_secs(60);
/// Pending entries inspected per poll when looking for idle ones.
const PENDING_SCAN: usize = 100;

/// Stream and group names used by [`RedisStreamsJobQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKeys {
    pub pending: String,
    pub completed: String,
    pub group: String,
    pub consumer: String,
}

impl Default for StreamKeys {
    fn default() -> Self {
        Self {
            pending: "helpline:contact-jobs:pending".to_string(),
            completed: "helpline:contact-jobs:completed".to_string(),
            group: "contact-job-reconciler".to_string(),
            consumer: "reconciler-1".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct RedisStreamsJobQueue {
    client: Arc<redis::Client>,
    conn: Arc<OnceCell<ConnectionManager>>,
    keys: StreamKeys,
    redelivery_idle: Duration,
}

impl std::fmt::Debug for RedisStreamsJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsJobQueue")
            .field("keys", &self.keys)
            .field("redelivery_idle", &self.redelivery_idle)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsJobQueue {
    /// Open a client for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// No connection is made until the first command.
    pub fn new(redis_url: impl AsRef<str>, keys: StreamKeys) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Transport(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            conn: Arc::new(OnceCell::new()),
            keys,
            redelivery_idle: DEFAULT_REDELIVERY_IDLE,
        })
    }

    /// How long a completion stays unacknowledged before it is handed out
    /// again.
    pub fn with_redelivery_idle(mut self, idle: Duration) -> Self {
        self.redelivery_idle = idle;
        self
    }

    pub fn keys(&self) -> &StreamKeys {
        &self.keys
    }

    /// Create the completion consumer group (and stream) if missing.
    pub async fn ensure_consumer_group(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.keys.completed, &self.keys.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    /// Shared connection, opened on first use.
    async fn connection(&self) -> Result<ConnectionManager, QueueError> {
        self.conn
            .get_or_try_init(|| ConnectionManager::new(self.client.as_ref().clone()))
            .await
            .cloned()
            .map_err(|e| QueueError::Transport(format!("redis connection error: {e}")))
    }

    /// Claim up to `count` entries of the group that have been idle for the
    /// redelivery timeout, whichever consumer they were delivered to.
    async fn claim_idle(
        &self,
        conn: &mut ConnectionManager,
        count: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.keys.completed, &self.keys.group, "-", "+", PENDING_SCAN)
            .await
            .map_err(|e| command_error("XPENDING", e))?;
        let deliveries = idle_entries(pending.ids, self.redelivery_idle, count);
        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = deliveries.keys().map(String::as_str).collect();
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.keys.completed,
                &self.keys.group,
                &self.keys.consumer,
                idle_millis(self.redelivery_idle),
                &ids,
            )
            .await
            .map_err(|e| command_error("XCLAIM", e))?;

        // XCLAIM bumps the delivery counter once more.
        Ok(claimed
            .ids
            .into_iter()
            .map(|entry| {
                let count = deliveries.get(&entry.id).map_or(1, |n| n + 1);
                to_received(entry, count)
            })
            .collect())
    }

    async fn read_new(
        &self,
        conn: &mut ConnectionManager,
        count: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let options = StreamReadOptions::default()
            .group(&self.keys.group, &self.keys.consumer)
            .count(count);
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.keys.completed], &[">"], &options)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        Ok(reply
            .map(|r| received_messages(r, &self.keys.completed))
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobQueue for RedisStreamsJobQueue {
    #[instrument(
        skip(self, message),
        fields(stream = %self.keys.pending, job_id = %message.job_id()),
        err
    )]
    async fn publish(&self, message: &PublishMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.connection().await?;

        let _: String = conn
            .xadd(&self.keys.pending, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| command_error("XADD", e))?;
        Ok(())
    }

    async fn receive_completed(
        &self,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let mut messages = self.claim_idle(&mut conn, max_messages).await?;
        if !messages.is_empty() {
            debug!(count = messages.len(), "redelivering idle completions");
        }
        let remaining = max_messages - messages.len();
        if remaining > 0 {
            messages.extend(self.read_new(&mut conn, remaining).await?);
        }
        Ok(messages)
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: u64 = conn
            .xack(&self.keys.completed, &self.keys.group, &[receipt])
            .await
            .map_err(|e| command_error("XACK", e))?;
        let _: u64 = conn
            .xdel(&self.keys.completed, &[receipt])
            .await
            .map_err(|e| command_error("XDEL", e))?;
        Ok(())
    }
}

/// Flatten a stream reply of new entries into received messages.
fn received_messages(reply: StreamReadReply, stream: &str) -> Vec<ReceivedMessage> {
    reply
        .keys
        .into_iter()
        .filter(|k| k.key == stream)
        .flat_map(|k| k.ids)
        .map(|entry| to_received(entry, 1))
        .collect()
}

/// Entries without a readable `payload` field get an empty body, so the
/// reconciler rejects and acknowledges them instead of looping on them.
fn to_received(entry: StreamId, delivery_count: u32) -> ReceivedMessage {
    let body = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_else(|| {
        warn!(entry_id = %entry.id, "stream entry has no payload field");
        String::new()
    });
    ReceivedMessage {
        receipt: entry.id,
        body,
        delivery_count,
    }
}

/// Pending entries idle for at least `idle`, oldest first, mapped to their
/// delivery count so far.
fn idle_entries(
    pending: Vec<StreamPendingId>,
    idle: Duration,
    limit: usize,
) -> HashMap<String, u32> {
    let min_idle = idle_millis(idle);
    pending
        .into_iter()
        .filter(|p| p.last_delivered_ms >= min_idle)
        .take(limit)
        .map(|p| {
            let count = u32::try_from(p.times_delivered).unwrap_or(u32::MAX);
            (p.id, count)
        })
        .collect()
}

fn idle_millis(idle: Duration) -> usize {
    usize::try_from(idle.as_millis()).unwrap_or(usize::MAX)
}

fn command_error(command: &str, err: redis::RedisError) -> QueueError {
    QueueError::Transport(format!("{command} failed: {err}"))
}
