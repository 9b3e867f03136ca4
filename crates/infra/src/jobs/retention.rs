//! Retention sweeping of completed jobs and their artifacts.
//!
//! For each job completed before the retention cutoff whose contact still
//! points at a stored artifact, the artifact is deleted first and the job row
//! second. If the artifact delete fails the row stays, so the next sweep
//! retries it. Jobs without an artifact are left in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, instrument};

use helpline_core::ContactJobType;

use super::store::{JobStore, JobStoreError};
use super::types::ContactJob;
use crate::artifacts::{ArtifactStore, ArtifactStoreError};
use crate::contacts::{ContactRecords, ContactRecordsError};
use crate::workers::{PeriodicWorker, WorkerHandle};

/// Retention error for one job (or for the sweep query).
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("unrecognized job type {0:?}")]
    UnrecognizedJobType(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactStoreError),

    #[error(transparent)]
    Records(#[from] ContactRecordsError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// What the sweep did with one expired job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Artifact and job row deleted.
    Deleted,
    /// No stored artifact; row left in place.
    NoArtifact,
}

/// Counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Purges artifacts and rows of completed jobs past the retention window.
#[derive(Debug)]
pub struct RetentionSweeper<S, R, A> {
    store: S,
    records: R,
    artifacts: A,
    retention: Duration,
}

impl<S, R, A> RetentionSweeper<S, R, A>
where
    S: JobStore + 'static,
    R: ContactRecords + 'static,
    A: ArtifactStore + 'static,
{
    pub fn new(store: S, records: R, artifacts: A, retention: Duration) -> Self {
        Self {
            store,
            records,
            artifacts,
            retention,
        }
    }

    /// Jobs completed before this instant are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.retention)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Sweep every job expired as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<RetentionReport, RetentionError> {
        let expired = self.store.select_completed_before(self.cutoff(now)).await?;

        let mut report = RetentionReport::default();
        for job in expired {
            match self.sweep_job(&job).await {
                Ok(SweepOutcome::Deleted) => report.deleted += 1,
                Ok(SweepOutcome::NoArtifact) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        job_id = %job.id,
                        account_sid = %job.account_sid,
                        contact_id = %job.contact_id,
                        error = %err,
                        "failed to purge expired contact job"
                    );
                }
            }
        }

        if report != RetentionReport::default() {
            info!(
                deleted = report.deleted,
                skipped = report.skipped,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, account_sid = %job.account_sid))]
    async fn sweep_job(&self, job: &ContactJob) -> Result<SweepOutcome, RetentionError> {
        let job_type = job
            .parsed_job_type()
            .map_err(|_| RetentionError::UnrecognizedJobType(job.job_type.clone()))?;

        let location = match job_type {
            ContactJobType::RetrieveContactTranscript => match job.transcript_payload() {
                Some(payload) => {
                    self.records
                        .artifact_location(
                            &job.account_sid,
                            job.contact_id,
                            payload.conversation_media_id,
                        )
                        .await?
                }
                None => None,
            },
        };

        let Some(location) = location else {
            debug!("no stored artifact; leaving job in place");
            return Ok(SweepOutcome::NoArtifact);
        };

        self.artifacts
            .delete(&job.account_sid, job.contact_id, &location)
            .await?;
        self.store.delete_job(job.id).await?;

        debug!(location = %location, "purged artifact and job");
        Ok(SweepOutcome::Deleted)
    }

    /// Start sweeping every `period` until the handle is stopped.
    pub fn start(self: Arc<Self>, period: Duration) -> WorkerHandle {
        let sweeper = self;
        PeriodicWorker::spawn("contact-job-retention", period, move || {
            let sweeper = Arc::clone(&sweeper);
            async move {
                if let Err(err) = sweeper.sweep(Utc::now()).await {
                    error!(error = %err, "retention sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use helpline_core::{AccountSid, ArtifactLocation, ContactId, ConversationMediaId};

    use crate::artifacts::InMemoryArtifactStore;
    use crate::contacts::InMemoryContactRecords;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewContactJob;
    use crate::testing::{contact_snapshot, stored_transcript, test_account};

    const YEAR: Duration = Duration::from_secs(365 * 24 * 3600);

    fn location() -> ArtifactLocation {
        ArtifactLocation::new("docs", "transcripts/old.json")
    }

    fn completed_job(store: &InMemoryJobStore, media: i64, age_days: i64) -> ContactJob {
        let now = Utc::now();
        let mut job = NewContactJob::retrieve_transcript(
            test_account(),
            ContactId::new(1),
            ConversationMediaId::new(media),
        )
        .into_job(now - TimeDelta::days(age_days + 1));
        job.completed = Some(now - TimeDelta::days(age_days));
        store.insert_raw(job.clone());
        job
    }

    /// Artifact store that records whether the job row still existed when
    /// it was asked to delete.
    #[derive(Debug)]
    struct OrderCheckingArtifacts {
        store: Arc<InMemoryJobStore>,
        row_present_at_delete: Mutex<Vec<bool>>,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactStore for OrderCheckingArtifacts {
        async fn delete(
            &self,
            _account_sid: &AccountSid,
            _contact_id: ContactId,
            _location: &ArtifactLocation,
        ) -> Result<(), ArtifactStoreError> {
            let present = !self.store.is_empty();
            self.row_present_at_delete.lock().unwrap().push(present);
            if self.fail {
                return Err(ArtifactStoreError::Storage("bucket unavailable".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn deletes_artifact_before_row() {
        let store = InMemoryJobStore::arc();
        store
            .contacts()
            .insert_contact(contact_snapshot(1), vec![stored_transcript(1, 11, location())]);
        let job = completed_job(&store, 11, 400);
        let artifacts = Arc::new(OrderCheckingArtifacts {
            store: store.clone(),
            row_present_at_delete: Mutex::new(Vec::new()),
            fail: false,
        });
        let sweeper = RetentionSweeper::new(
            store.clone(),
            store.contacts().clone(),
            artifacts.clone(),
            YEAR,
        );

        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(*artifacts.row_present_at_delete.lock().unwrap(), vec![true]);
        assert!(store.get_by_id(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_artifact_delete_keeps_the_row() {
        let store = InMemoryJobStore::arc();
        store
            .contacts()
            .insert_contact(contact_snapshot(1), vec![stored_transcript(1, 11, location())]);
        let job = completed_job(&store, 11, 400);
        let artifacts = Arc::new(OrderCheckingArtifacts {
            store: store.clone(),
            row_present_at_delete: Mutex::new(Vec::new()),
            fail: true,
        });
        let sweeper = RetentionSweeper::new(store.clone(), store.contacts().clone(), artifacts, YEAR);

        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(store.get_by_id(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_delete_is_retried_on_the_next_sweep() {
        let store = InMemoryJobStore::arc();
        store
            .contacts()
            .insert_contact(contact_snapshot(1), vec![stored_transcript(1, 11, location())]);
        let job = completed_job(&store, 11, 400);
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.put(location());
        artifacts.set_fail_deletes(true);
        let sweeper = RetentionSweeper::new(
            store.clone(),
            store.contacts().clone(),
            artifacts.clone(),
            YEAR,
        );

        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(artifacts.contains(&location()));
        assert!(store.get_by_id(job.id).await.unwrap().is_some());

        artifacts.set_fail_deletes(false);
        let report = sweeper.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(artifacts.deleted(), vec![location()]);
        assert!(store.get_by_id(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leaves_recent_pending_and_artifactless_jobs_alone() {
        let records = Arc::new(InMemoryContactRecords::new());
        records.insert_contact(
            contact_snapshot(1),
            vec![
                stored_transcript(1, 11, location()),
                crate::testing::pending_transcript(1, 12),
            ],
        );
        let store = Arc::new(InMemoryJobStore::with_contacts(records.clone()));
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        artifacts.put(location());

        let recent = completed_job(&store, 11, 10);
        let artifactless = completed_job(&store, 12, 400);
        let pending = NewContactJob::retrieve_transcript(
            test_account(),
            ContactId::new(1),
            ConversationMediaId::new(11),
        )
        .into_job(Utc::now() - TimeDelta::days(800));
        store.insert_raw(pending.clone());

        let sweeper = RetentionSweeper::new(store.clone(), records, artifacts.clone(), YEAR);
        let report = sweeper.sweep(Utc::now()).await.unwrap();

        assert_eq!(
            report,
            RetentionReport {
                deleted: 0,
                skipped: 1,
                failed: 0
            }
        );
        for id in [recent.id, artifactless.id, pending.id] {
            assert!(store.get_by_id(id).await.unwrap().is_some());
        }
        assert!(artifacts.contains(&location()));
        assert!(artifacts.deleted().is_empty());
    }
}
