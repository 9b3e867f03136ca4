//! Completion reconciliation.
//!
//! Polls the completed-jobs queue in bounded batches. Each message is parsed,
//! dispatched by job type and applied to the job store; messages are handled
//! independently and concurrently, so one bad message never holds up the
//! rest of the batch.
//!
//! ## Acknowledgement
//!
//! A message is acknowledged once its handling is finished: success, handled
//! failure, or a permanent error (unparseable body, unknown job type, unknown
//! job, unusable payload). A transient store/records error leaves the message
//! unacknowledged so the queue redelivers it; every handler is idempotent.
//! After `max_deliveries` deliveries a still-failing message is dead-lettered
//! (logged with its body and acknowledged), so it cannot hold up the stream.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};

use helpline_core::{AccountSid, ArtifactLocation, ContactJobId};
use helpline_queue::{
    AttemptResult, CompletionMessage, CompletionParseError, JobQueue, QueueError,
    ReceivedMessage, RetrieveTranscriptCompletion,
};

use super::store::{JobStore, JobStoreError};
use super::types::{CompletionPayload, ContactJob};
use crate::contacts::{ContactRecords, ContactRecordsError};
use crate::workers::{PeriodicWorker, WorkerHandle};

/// Completion handling error for one message.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("{0}")]
    Parse(CompletionParseError),

    #[error("unrecognized job type in completion message: {0}")]
    UnrecognizedJobType(String),

    #[error("job not found: {0}")]
    JobNotFound(ContactJobId),

    #[error("completion for job {job_id} names another account")]
    AccountMismatch { job_id: ContactJobId },

    #[error("invalid completion for job {job_id}: {reason}")]
    InvalidPayload { job_id: ContactJobId, reason: String },

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Records(#[from] ContactRecordsError),
}

impl From<CompletionParseError> for CompletionError {
    fn from(err: CompletionParseError) -> Self {
        match err {
            CompletionParseError::UnrecognizedJobType(tag) => Self::UnrecognizedJobType(tag),
            other => Self::Parse(other),
        }
    }
}

impl CompletionError {
    /// Worth redelivering: the same message may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::Store(JobStoreError::Storage(_))
                | CompletionError::Records(ContactRecordsError::Storage(_))
        )
    }
}

/// What handling one completion message did to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Success recorded and the artifact attached to the contact.
    Succeeded,
    /// Failure logged; the job stays pending for a later retry.
    FailureRecorded { attempt: u32 },
    /// Failure logged and the job completed as a terminal failure.
    AttemptsExhausted { attempt: u32 },
    /// The job was already completed; nothing changed.
    AlreadyCompleted,
}

/// Counts for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub received: usize,
    pub processed: usize,
    pub failed: usize,
    pub acknowledged: usize,
}

/// Reconciler configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Attempts after which a reported failure becomes terminal.
    pub max_attempts: u32,
    /// Upper bound of messages pulled per poll.
    pub batch_size: usize,
    /// Deliveries of one message before a transient error is given up on.
    pub max_deliveries: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            batch_size: 10,
            max_deliveries: 5,
        }
    }
}

/// Applies completion messages to the job store.
#[derive(Debug)]
pub struct CompletionReconciler<S, Q, R> {
    store: S,
    queue: Q,
    records: R,
    config: ReconcilerConfig,
}

impl<S, Q, R> CompletionReconciler<S, Q, R>
where
    S: JobStore + 'static,
    Q: JobQueue + 'static,
    R: ContactRecords + 'static,
{
    pub fn new(store: S, queue: Q, records: R, config: ReconcilerConfig) -> Self {
        Self {
            store,
            queue,
            records,
            config,
        }
    }

    /// Pull one batch of completion messages and reconcile it.
    pub async fn poll_once(&self) -> Result<ReconcileReport, QueueError> {
        let batch = self
            .queue
            .receive_completed(self.config.batch_size.max(1))
            .await?;
        if batch.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let received = batch.len();
        let results = join_all(batch.into_iter().map(|m| self.process_received(m))).await;

        let mut report = ReconcileReport {
            received,
            ..ReconcileReport::default()
        };
        for (handled, acknowledged) in results {
            if handled {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
            if acknowledged {
                report.acknowledged += 1;
            }
        }

        info!(
            received = report.received,
            processed = report.processed,
            failed = report.failed,
            acknowledged = report.acknowledged,
            "completion poll finished"
        );
        Ok(report)
    }

    /// Handle one raw message and acknowledge it when appropriate.
    ///
    /// Returns `(handled, acknowledged)`.
    async fn process_received(&self, message: ReceivedMessage) -> (bool, bool) {
        let result = self.handle_body(&message.body).await;

        let ack = match &result {
            Ok(outcome) => {
                debug!(receipt = %message.receipt, outcome = ?outcome, "completion handled");
                true
            }
            Err(err @ CompletionError::UnrecognizedJobType(_)) => {
                error!(
                    receipt = %message.receipt,
                    error = %err,
                    body = %message.body,
                    "completion message has unrecognized job type"
                );
                true
            }
            Err(err) if err.is_retryable() && message.delivery_count >= self.config.max_deliveries => {
                error!(
                    receipt = %message.receipt,
                    deliveries = message.delivery_count,
                    error = %err,
                    body = %message.body,
                    "completion keeps failing; dead-lettering message"
                );
                true
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    deliveries = message.delivery_count,
                    receipt = %message.receipt,
                    error = %err,
                    "completion handling failed; leaving message for redelivery"
                );
                false
            }
            Err(err) => {
                warn!(
                    receipt = %message.receipt,
                    error = %err,
                    body = %message.body,
                    "discarding unprocessable completion message"
                );
                true
            }
        };

        let acknowledged = if ack {
            match self.queue.acknowledge(&message.receipt).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(receipt = %message.receipt, error = %err, "failed to acknowledge completion message");
                    false
                }
            }
        } else {
            false
        };

        (result.is_ok(), acknowledged)
    }

    /// Parse a raw body and apply it.
    pub async fn handle_body(&self, body: &str) -> Result<CompletionOutcome, CompletionError> {
        let message = CompletionMessage::parse(body)?;
        self.handle_completion(message).await
    }

    /// Dispatch a parsed completion to its job-type handler.
    pub async fn handle_completion(
        &self,
        message: CompletionMessage,
    ) -> Result<CompletionOutcome, CompletionError> {
        match message {
            CompletionMessage::RetrieveContactTranscript(m) => self.complete_transcript(m).await,
        }
    }

    #[instrument(
        skip(self, message),
        fields(
            job_id = %message.job_id,
            account_sid = %message.account_sid,
            contact_id = %message.contact_id,
            attempt_result = ?message.attempt_result
        )
    )]
    async fn complete_transcript(
        &self,
        message: RetrieveTranscriptCompletion,
    ) -> Result<CompletionOutcome, CompletionError> {
        let job = self.load_open_job(&message.job_id, &message.account_sid).await?;
        let Some(job) = job else {
            return Ok(CompletionOutcome::AlreadyCompleted);
        };

        let media_id = job
            .transcript_payload()
            .map(|p| p.conversation_media_id)
            .ok_or_else(|| CompletionError::InvalidPayload {
                job_id: job.id,
                reason: "job has no conversation media".to_string(),
            })?;
        if message.contact_id != job.contact_id || message.conversation_media_id != media_id {
            return Err(CompletionError::InvalidPayload {
                job_id: job.id,
                reason: format!(
                    "completion names contact {} / media {}, job targets contact {} / media {}",
                    message.contact_id, message.conversation_media_id, job.contact_id, media_id
                ),
            });
        }

        match message.attempt_result {
            AttemptResult::Success => {
                let location: ArtifactLocation =
                    serde_json::from_value(message.attempt_payload.clone()).map_err(|e| {
                        CompletionError::InvalidPayload {
                            job_id: job.id,
                            reason: e.to_string(),
                        }
                    })?;

                self.records
                    .attach_artifact_location(&job.account_sid, job.contact_id, media_id, &location)
                    .await?;
                self.store
                    .complete_job(job.id, &CompletionPayload::success(message.attempt_payload))
                    .await?;

                info!(location = %location, "transcript retrieved");
                Ok(CompletionOutcome::Succeeded)
            }
            AttemptResult::Failure => {
                self.record_failure(&job, message.attempt_number, &message.attempt_payload)
                    .await
            }
        }
    }

    /// Load the job a completion refers to.
    ///
    /// `Ok(None)` when it is already completed.
    async fn load_open_job(
        &self,
        job_id: &ContactJobId,
        account_sid: &AccountSid,
    ) -> Result<Option<ContactJob>, CompletionError> {
        let job = self
            .store
            .get_by_id(*job_id)
            .await?
            .ok_or(CompletionError::JobNotFound(*job_id))?;

        if &job.account_sid != account_sid {
            return Err(CompletionError::AccountMismatch { job_id: *job_id });
        }
        if job.is_completed() {
            debug!("job already completed; ignoring completion");
            return Ok(None);
        }
        Ok(Some(job))
    }

    /// Log a reported failure and convert it to a terminal completion once
    /// the attempts are exhausted.
    ///
    /// The failure record carries the attempt the worker reports (falling back
    /// to the stored count). The terminal decision uses the larger of the two:
    /// the store only ever increments, so a stale message cannot keep a job
    /// that will never be republished pending forever.
    async fn record_failure(
        &self,
        job: &ContactJob,
        reported_attempt: Option<u32>,
        payload: &JsonValue,
    ) -> Result<CompletionOutcome, CompletionError> {
        let reported = reported_attempt.unwrap_or(job.number_of_attempts);
        if i32::try_from(reported).is_err() {
            return Err(CompletionError::InvalidPayload {
                job_id: job.id,
                reason: format!("attempt number {reported} is out of range"),
            });
        }
        self.store.append_failure(job.id, reported, payload).await?;

        let attempt = reported.max(job.number_of_attempts);
        if attempt >= self.config.max_attempts {
            self.store
                .complete_job(job.id, &CompletionPayload::attempts_limit_reached())
                .await?;
            warn!(attempt, "job failed permanently: attempts limit reached");
            return Ok(CompletionOutcome::AttemptsExhausted { attempt });
        }

        debug!(attempt, "job attempt failed; will retry");
        Ok(CompletionOutcome::FailureRecorded { attempt })
    }

    /// Start polling every `period` until the handle is stopped.
    pub fn start(self: Arc<Self>, period: Duration) -> WorkerHandle {
        let reconciler = self;
        PeriodicWorker::spawn("contact-job-reconciler", period, move || {
            let reconciler = Arc::clone(&reconciler);
            async move {
                if let Err(err) = reconciler.poll_once().await {
                    error!(error = %err, "completion poll failed");
                }
            }
        })
    }
}
