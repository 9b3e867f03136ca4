//! In-memory job queue for tests/dev.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use helpline_core::ContactJobId;

use crate::messages::{CompletionMessage, PublishMessage};
use crate::queue::{JobQueue, QueueError, ReceivedMessage};

/// In-memory queue pair (pending jobs out, completed jobs in).
///
/// - No IO
/// - Received-but-unacknowledged messages stay in flight until
///   [`InMemoryJobQueue::redeliver_unacknowledged`] puts them back, which is
///   how tests model a visibility timeout expiring.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    published: Mutex<Vec<PublishMessage>>,
    completed: Mutex<VecDeque<ReceivedMessage>>,
    in_flight: Mutex<HashMap<String, ReceivedMessage>>,
    acknowledged: Mutex<Vec<String>>,
    rejected_jobs: Mutex<HashSet<ContactJobId>>,
    next_receipt: Mutex<u64>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<PublishMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Receipts acknowledged so far.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }

    /// Number of completion messages waiting to be received.
    pub fn completed_len(&self) -> usize {
        self.completed.lock().unwrap().len()
    }

    /// Number of received-but-unacknowledged completion messages.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Make publishes for `job_id` fail with a transport error.
    pub fn reject_publishes_for(&self, job_id: ContactJobId) {
        self.rejected_jobs.lock().unwrap().insert(job_id);
    }

    /// Enqueue a raw completion body, returning its receipt.
    pub fn push_completed_raw(&self, body: impl Into<String>) -> String {
        let receipt = {
            let mut next = self.next_receipt.lock().unwrap();
            *next += 1;
            format!("receipt-{}", *next)
        };
        self.completed.lock().unwrap().push_back(ReceivedMessage {
            receipt: receipt.clone(),
            body: body.into(),
            delivery_count: 0,
        });
        receipt
    }

    /// Enqueue a typed completion message, returning its receipt.
    pub fn push_completed(&self, message: &CompletionMessage) -> Result<String, QueueError> {
        let body = serde_json::to_string(message)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok(self.push_completed_raw(body))
    }

    /// Return every in-flight message to the back of the queue.
    pub fn redeliver_unacknowledged(&self) {
        // Lock order: completed, then in_flight.
        let mut completed = self.completed.lock().unwrap();
        let mut in_flight = self.in_flight.lock().unwrap();
        completed.extend(in_flight.drain().map(|(_, msg)| msg));
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, message: &PublishMessage) -> Result<(), QueueError> {
        if self.rejected_jobs.lock().unwrap().contains(&message.job_id()) {
            return Err(QueueError::Transport(format!(
                "publish rejected for job {}",
                message.job_id()
            )));
        }
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn receive_completed(
        &self,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut completed = self.completed.lock().unwrap();
        let mut in_flight = self.in_flight.lock().unwrap();

        let take = max_messages.min(completed.len());
        let mut batch: Vec<ReceivedMessage> = completed.drain(..take).collect();
        for msg in &mut batch {
            msg.delivery_count += 1;
            in_flight.insert(msg.receipt.clone(), msg.clone());
        }

        debug!(count = batch.len(), "received completed job messages");
        Ok(batch)
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        // Acknowledging an unknown receipt is a no-op (duplicate ack).
        self.in_flight.lock().unwrap().remove(receipt);
        self.acknowledged.lock().unwrap().push(receipt.to_string());
        Ok(())
    }
}
