//! End-to-end tests of the contact job lifecycle.
//!
//! Creation → Scheduler tick → external worker (simulated) → Reconciler →
//! Retention sweep, all over the in-memory adapters.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as TimeDelta, Utc};
    use serde_json::json;

    use helpline_core::{ArtifactLocation, ContactId};
    use helpline_queue::{
        AttemptResult, CompletionMessage, InMemoryJobQueue, PublishMessage,
        RetrieveTranscriptCompletion,
    };

    use crate::artifacts::InMemoryArtifactStore;
    use crate::contacts::InMemoryContactRecords;
    use crate::jobs::{
        ATTEMPTS_LIMIT_MESSAGE, CompletionReconciler, DuePolicy, InMemoryJobStore, JobScheduler,
        JobStore, ReconcilerConfig, RetentionSweeper, SUCCESS_MESSAGE, create_jobs_for_contact,
    };
    use crate::testing::{contact_snapshot, pending_transcript, test_account};

    struct Pipeline {
        store: Arc<InMemoryJobStore>,
        queue: Arc<InMemoryJobQueue>,
        scheduler: JobScheduler<Arc<InMemoryJobStore>, Arc<InMemoryJobQueue>>,
        reconciler: CompletionReconciler<
            Arc<InMemoryJobStore>,
            Arc<InMemoryJobQueue>,
            Arc<InMemoryContactRecords>,
        >,
    }

    fn pipeline(max_attempts: u32) -> Pipeline {
        let store = InMemoryJobStore::arc();
        let queue = Arc::new(InMemoryJobQueue::new());
        let policy = DuePolicy {
            retry_interval: Duration::from_secs(60),
            max_attempts,
        };
        Pipeline {
            scheduler: JobScheduler::new(store.clone(), queue.clone(), policy, 4),
            reconciler: CompletionReconciler::new(
                store.clone(),
                queue.clone(),
                store.contacts().clone(),
                ReconcilerConfig {
                    max_attempts,
                    batch_size: 10,
                    max_deliveries: 5,
                },
            ),
            store,
            queue,
        }
    }

    /// What the external worker would answer for a published message.
    fn answer(published: &PublishMessage, result: AttemptResult) -> CompletionMessage {
        let PublishMessage::RetrieveContactTranscript(m) = published;
        let attempt_payload = match result {
            AttemptResult::Success => json!({"bucket": "docs", "key": m.file_path}),
            AttemptResult::Failure => json!({"error": "transcript not ready"}),
        };
        CompletionMessage::RetrieveContactTranscript(RetrieveTranscriptCompletion {
            job_id: m.job_id,
            account_sid: m.account_sid.clone(),
            contact_id: m.contact_id,
            conversation_media_id: m.conversation_media_id,
            task_id: m.task_id.clone(),
            channel_sid: m.channel_sid.clone(),
            service_sid: m.service_sid.clone(),
            twilio_worker_id: m.twilio_worker_id.clone(),
            file_path: m.file_path.clone(),
            attempt_number: Some(m.attempt_number),
            attempt_result: result,
            attempt_payload,
        })
    }

    #[tokio::test]
    async fn transcript_job_runs_from_creation_to_retention() {
        let p = pipeline(20);
        let contact = contact_snapshot(1);
        let media = vec![pending_transcript(1, 11)];
        p.store.contacts().insert_contact(contact.clone(), media.clone());

        let jobs = create_jobs_for_contact(&p.store, None, &contact, &media, true)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        let job_id = jobs[0].id;
        assert!(jobs[0].completed.is_none());
        assert_eq!(jobs[0].number_of_attempts, 0);

        let report = p.scheduler.tick().await.unwrap();
        assert_eq!(report.published, 1);
        let stored = p.store.get_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(stored.number_of_attempts, 1);

        let published = p.queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].attempt_number(), 1);

        p.queue
            .push_completed(&answer(&published[0], AttemptResult::Success))
            .unwrap();
        let report = p.reconciler.poll_once().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.acknowledged, 1);

        let done = p.store.get_by_id(job_id).await.unwrap().unwrap();
        assert!(done.completed.is_some());
        assert_eq!(done.completion().unwrap().message, SUCCESS_MESSAGE);

        let PublishMessage::RetrieveContactTranscript(sent) = &published[0];
        let location = ArtifactLocation::new("docs", sent.file_path.clone());
        let recorded = p.store.contacts().media_of(&test_account(), ContactId::new(1));
        assert_eq!(recorded[0].location.as_ref(), Some(&location));

        // Nothing left to publish.
        assert_eq!(p.scheduler.tick().await.unwrap().published, 0);

        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.put(location.clone());
        let sweeper = RetentionSweeper::new(
            p.store.clone(),
            p.store.contacts().clone(),
            artifacts.clone(),
            Duration::from_secs(365 * 24 * 3600),
        );

        assert_eq!(sweeper.sweep(Utc::now()).await.unwrap().deleted, 0);
        let report = sweeper.sweep(Utc::now() + TimeDelta::days(366)).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!artifacts.contains(&location));
        assert!(p.store.get_by_id(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_failures_end_in_terminal_completion() {
        let p = pipeline(2);
        let contact = contact_snapshot(1);
        let media = vec![pending_transcript(1, 11)];
        p.store.contacts().insert_contact(contact.clone(), media.clone());
        let job_id = create_jobs_for_contact(&p.store, None, &contact, &media, true)
            .await
            .unwrap()[0]
            .id;

        for attempt in 1..=2u32 {
            // Make the job due again without waiting out the retry interval.
            let mut job = p.store.get_by_id(job_id).await.unwrap().unwrap();
            job.last_attempt = job.last_attempt.map(|t| t - TimeDelta::minutes(5));
            p.store.insert_raw(job);

            assert_eq!(p.scheduler.tick().await.unwrap().published, 1);
            let published = p.queue.published();
            let latest = published.last().unwrap();
            assert_eq!(latest.attempt_number(), attempt);

            p.queue
                .push_completed(&answer(latest, AttemptResult::Failure))
                .unwrap();
            p.reconciler.poll_once().await.unwrap();
        }

        let job = p.store.get_by_id(job_id).await.unwrap().unwrap();
        assert!(job.completed.is_some());
        assert_eq!(job.completion().unwrap().message, ATTEMPTS_LIMIT_MESSAGE);
        assert_eq!(p.store.list_failures(job_id).await.unwrap().len(), 2);
        assert_eq!(p.scheduler.tick().await.unwrap().published, 0);
    }
}
