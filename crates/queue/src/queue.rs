//! External job queue abstraction (mechanics only).
//!
//! The queue carries two independent flows:
//!
//! ```text
//! Publisher ──publish──> [pending jobs]  ──> external worker
//! external worker ──> [completed jobs] ──receive/acknowledge──> Reconciler
//! ```
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a received completion that is never acknowledged is
//!   delivered again, so completion handling must be idempotent.
//! - **No ordering**: messages for different jobs (and retries of the same
//!   job) may arrive in any order.
//! - **No persistence assumptions**: the job store is the source of truth; a
//!   lost publish is recovered by the next retry cycle.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::PublishMessage;

/// Queue transport error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("queue serialization error: {0}")]
    Serialization(String),
}

/// A raw message pulled from the completed-jobs queue.
///
/// `receipt` is the transport-specific handle used to acknowledge it.
/// `delivery_count` starts at 1 and grows with every redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub receipt: String,
    pub body: String,
    pub delivery_count: u32,
}

/// Transport-agnostic job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Hand one job message to the external worker.
    async fn publish(&self, message: &PublishMessage) -> Result<(), QueueError>;

    /// Pull up to `max_messages` completion messages.
    ///
    /// Returning fewer (or none) is normal; callers poll again later.
    /// Unacknowledged messages must not starve new ones: a transport hands
    /// them back only after a redelivery timeout.
    async fn receive_completed(&self, max_messages: usize)
    -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Remove a processed completion message so it is not redelivered.
    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn publish(&self, message: &PublishMessage) -> Result<(), QueueError> {
        (**self).publish(message).await
    }

    async fn receive_completed(
        &self,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        (**self).receive_completed(max_messages).await
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        (**self).acknowledge(receipt).await
    }
}
