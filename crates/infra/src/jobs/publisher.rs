//! Publishing of due jobs to the external queue.
//!
//! For each due job: mark it attempted, translate it together with its
//! contact snapshot into the type-specific wire message, and hand the message
//! to the queue. Marking happens first, so a crash between marking and
//! sending costs at most one retry interval and never loses the job.
//!
//! Jobs are published with bounded concurrency and every job's outcome is
//! collected independently; one failing job never aborts the others.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, instrument, warn};

use helpline_core::{AccountSid, ContactId, ContactJobId, ContactJobType, ContactSnapshot};
use helpline_queue::{JobQueue, PublishMessage, QueueError, RetrieveTranscriptPublish};

use super::store::{JobStore, JobStoreError};
use super::types::{ContactJob, DueContactJob};

/// Publish error for one job.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("job {job_id} has unrecognized job type {job_type:?}")]
    UnrecognizedJobType {
        job_id: ContactJobId,
        job_type: String,
    },

    #[error("job {0} is missing its additional payload")]
    MissingAdditionalPayload(ContactJobId),

    #[error("contact of job {job_id} has no {field}")]
    MissingContactField {
        job_id: ContactJobId,
        field: &'static str,
    },

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Outcome of publishing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(PublishMessage),
    /// Completed between selection and marking; nothing was sent.
    AlreadyCompleted,
}

/// Counts for one publish pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Publishes due jobs to a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct JobPublisher<S, Q> {
    store: S,
    queue: Q,
    concurrency: usize,
}

impl<S, Q> JobPublisher<S, Q>
where
    S: JobStore,
    Q: JobQueue,
{
    pub fn new(store: S, queue: Q, concurrency: usize) -> Self {
        Self {
            store,
            queue,
            concurrency: concurrency.max(1),
        }
    }

    /// Publish every job of `due`, collecting each outcome.
    pub async fn publish_due_jobs(&self, due: Vec<DueContactJob>) -> PublishReport {
        let pending: Vec<_> = due.into_iter().map(|d| self.publish_tracked(d)).collect();
        let results: Vec<_> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = PublishReport::default();
        for (job_id, account_sid, contact_id, result) in results {
            match result {
                Ok(PublishOutcome::Published(_)) => report.published += 1,
                Ok(PublishOutcome::AlreadyCompleted) => report.skipped += 1,
                Err(err @ PublishError::UnrecognizedJobType { .. }) => {
                    report.skipped += 1;
                    error!(
                        job_id = %job_id,
                        account_sid = %account_sid,
                        contact_id = %contact_id,
                        error = %err,
                        "cannot publish job of unrecognized type; it will stay pending"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        job_id = %job_id,
                        account_sid = %account_sid,
                        contact_id = %contact_id,
                        error = %err,
                        "failed to publish contact job"
                    );
                }
            }
        }
        report
    }

    async fn publish_tracked(
        &self,
        due: DueContactJob,
    ) -> (ContactJobId, AccountSid, ContactId, Result<PublishOutcome, PublishError>) {
        let job_id = due.job.id;
        let account_sid = due.job.account_sid.clone();
        let contact_id = due.job.contact_id;
        (job_id, account_sid, contact_id, self.publish_job(due).await)
    }

    /// Publish one due job.
    #[instrument(
        skip(self, due),
        fields(
            job_id = %due.job.id,
            account_sid = %due.job.account_sid,
            job_type = %due.job.job_type
        )
    )]
    pub async fn publish_job(&self, due: DueContactJob) -> Result<PublishOutcome, PublishError> {
        let job_type =
            due.job
                .parsed_job_type()
                .map_err(|_| PublishError::UnrecognizedJobType {
                    job_id: due.job.id,
                    job_type: due.job.job_type.clone(),
                })?;

        let marked = self.store.mark_attempted(due.job.id, Utc::now()).await?;
        if marked.is_completed() {
            debug!("job completed before it could be published");
            return Ok(PublishOutcome::AlreadyCompleted);
        }

        let message = translate(job_type, &marked, &due.contact)?;
        self.queue.publish(&message).await?;

        debug!(attempt = marked.number_of_attempts, "published contact job");
        Ok(PublishOutcome::Published(message))
    }
}

/// Build the wire message of a marked job.
pub fn translate(
    job_type: ContactJobType,
    job: &ContactJob,
    contact: &ContactSnapshot,
) -> Result<PublishMessage, PublishError> {
    match job_type {
        ContactJobType::RetrieveContactTranscript => {
            let payload = job
                .transcript_payload()
                .ok_or(PublishError::MissingAdditionalPayload(job.id))?;
            let required = |value: &Option<String>, field: &'static str| {
                value
                    .clone()
                    .filter(|v| !v.is_empty())
                    .ok_or(PublishError::MissingContactField {
                        job_id: job.id,
                        field,
                    })
            };
            let task_id = required(&contact.task_id, "taskId")?;

            Ok(PublishMessage::RetrieveContactTranscript(
                RetrieveTranscriptPublish {
                    job_id: job.id,
                    account_sid: job.account_sid.clone(),
                    contact_id: job.contact_id,
                    conversation_media_id: payload.conversation_media_id,
                    channel_sid: required(&contact.channel_sid, "channelSid")?,
                    service_sid: required(&contact.service_sid, "serviceSid")?,
                    file_path: transcript_file_path(job.requested, &task_id),
                    task_id,
                    twilio_worker_id: contact.twilio_worker_id.clone(),
                    attempt_number: job.number_of_attempts,
                },
            ))
        }
    }
}

/// Artifact path of a transcript, derived from job creation time and task.
///
/// Both the external worker and the reconciler see the same path, so no round
/// trip is needed to agree on it.
pub fn transcript_file_path(requested: DateTime<Utc>, task_id: &str) -> String {
    format!(
        "transcripts/{}/{}-{}.json",
        requested.format("%Y/%m/%d"),
        requested.format("%Y%m%d%H%M%S"),
        task_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use helpline_core::{ContactId, ConversationMediaId};
    use helpline_queue::InMemoryJobQueue;

    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewContactJob;
    use crate::testing::{contact_snapshot, test_account};

    fn fixture() -> (Arc<InMemoryJobStore>, Arc<InMemoryJobQueue>) {
        let store = InMemoryJobStore::arc();
        store.contacts().insert_contact(contact_snapshot(1), Vec::new());
        (store, Arc::new(InMemoryJobQueue::new()))
    }

    fn seed(store: &InMemoryJobStore, media: i64) -> ContactJob {
        let job = NewContactJob::retrieve_transcript(
            test_account(),
            ContactId::new(1),
            ConversationMediaId::new(media),
        )
        .into_job(Utc::now());
        store.insert_raw(job.clone());
        job
    }

    async fn due(store: &InMemoryJobStore) -> Vec<DueContactJob> {
        store.select_due_jobs(Utc::now(), 20).await.unwrap()
    }

    #[test]
    fn file_path_is_derived_from_requested_time_and_task() {
        let requested = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            transcript_file_path(requested, "WT123"),
            "transcripts/2024/01/02/20240102030405-WT123.json"
        );
    }

    #[tokio::test]
    async fn publishes_with_incremented_attempt_number() {
        let (store, queue) = fixture();
        let job = seed(&store, 10);
        let publisher = JobPublisher::new(store.clone(), queue.clone(), 4);

        let report = publisher.publish_due_jobs(due(&store).await).await;
        assert_eq!(report.published, 1);

        let published = queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].job_id(), job.id);
        assert_eq!(published[0].attempt_number(), 1);

        let stored = store.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.number_of_attempts, 1);
        assert!(stored.last_attempt.is_some());
    }

    #[tokio::test]
    async fn unrecognized_job_type_does_not_stop_the_batch() {
        let (store, queue) = fixture();
        let a = seed(&store, 10);
        let mut unknown = seed(&store, 11);
        unknown.job_type = "scrub-transcript".into();
        store.insert_raw(unknown.clone());
        let b = seed(&store, 12);
        let publisher = JobPublisher::new(store.clone(), queue.clone(), 1);

        let report = publisher.publish_due_jobs(due(&store).await).await;
        assert_eq!(
            report,
            PublishReport {
                published: 2,
                failed: 0,
                skipped: 1
            }
        );

        for id in [a.id, b.id] {
            assert_eq!(
                store.get_by_id(id).await.unwrap().unwrap().number_of_attempts,
                1
            );
        }
        let unknown = store.get_by_id(unknown.id).await.unwrap().unwrap();
        assert_eq!(unknown.number_of_attempts, 0);
        assert!(unknown.completed.is_none());

        let mut ids: Vec<_> = queue.published().iter().map(|m| m.job_id()).collect();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn transport_failure_is_isolated_and_retried_later() {
        let (store, queue) = fixture();
        let ok = seed(&store, 10);
        let rejected = seed(&store, 11);
        queue.reject_publishes_for(rejected.id);
        let publisher = JobPublisher::new(store.clone(), queue.clone(), 8);

        let report = publisher.publish_due_jobs(due(&store).await).await;
        assert_eq!(report.published, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(queue.published()[0].job_id(), ok.id);

        let rejected = store.get_by_id(rejected.id).await.unwrap().unwrap();
        assert_eq!(rejected.number_of_attempts, 1);
        assert!(rejected.completed.is_none());
    }

    #[tokio::test]
    async fn missing_contact_fields_fail_translation() {
        let (store, queue) = fixture();
        let mut contact = contact_snapshot(1);
        contact.channel_sid = None;
        store.contacts().insert_contact(contact, Vec::new());
        seed(&store, 10);
        let publisher = JobPublisher::new(store.clone(), queue.clone(), 1);

        let mut due = due(&store).await;
        let err = publisher.publish_job(due.remove(0)).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::MissingContactField {
                field: "channelSid",
                ..
            }
        ));
        assert!(queue.published().is_empty());
    }

    #[tokio::test]
    async fn missing_additional_payload_fails_translation() {
        let (store, queue) = fixture();
        let mut job = seed(&store, 10);
        job.additional_payload = None;
        store.insert_raw(job);
        let publisher = JobPublisher::new(store.clone(), queue.clone(), 1);

        let mut due = due(&store).await;
        assert!(matches!(
            publisher.publish_job(due.remove(0)).await,
            Err(PublishError::MissingAdditionalPayload(_))
        ));
    }
}
