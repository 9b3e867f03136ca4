//! Due-job selection.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::store::{JobStore, JobStoreError};
use super::types::DueContactJob;

/// Retry policy shared by every job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePolicy {
    /// Minimum time between two publish attempts of the same job.
    pub retry_interval: Duration,
    /// Attempts after which a job is no longer republished.
    pub max_attempts: u32,
}

impl Default for DuePolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(120),
            max_attempts: 20,
        }
    }
}

impl DuePolicy {
    /// Jobs last attempted before this instant are due again.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.retry_interval)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Read-only query computing the jobs eligible for (re)publishing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DueJobSelector {
    policy: DuePolicy,
}

impl DueJobSelector {
    pub fn new(policy: DuePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DuePolicy {
        self.policy
    }

    pub async fn select<S: JobStore>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueContactJob>, JobStoreError> {
        store
            .select_due_jobs(self.policy.cutoff(now), self.policy.max_attempts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpline_core::{ContactId, ConversationMediaId};

    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewContactJob;
    use crate::testing::{contact_snapshot, test_account};

    #[test]
    fn cutoff_subtracts_retry_interval() {
        let now = Utc::now();
        let policy = DuePolicy {
            retry_interval: Duration::from_secs(60),
            max_attempts: 3,
        };
        assert_eq!(policy.cutoff(now), now - TimeDelta::seconds(60));
    }

    #[tokio::test]
    async fn job_attempted_30s_ago_is_due_only_after_61s() {
        let store = InMemoryJobStore::new();
        store.contacts().insert_contact(contact_snapshot(1), Vec::new());
        let selector = DueJobSelector::new(DuePolicy {
            retry_interval: Duration::from_secs(60),
            max_attempts: 20,
        });

        let now = Utc::now();
        let mut job = NewContactJob::retrieve_transcript(
            test_account(),
            ContactId::new(1),
            ConversationMediaId::new(5),
        )
        .into_job(now - TimeDelta::minutes(10));
        job.number_of_attempts = 1;
        job.last_attempt = Some(now - TimeDelta::seconds(30));
        store.insert_raw(job.clone());

        assert!(selector.select(&store, now).await.unwrap().is_empty());

        let due = selector
            .select(&store, now + TimeDelta::seconds(31))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job.id, job.id);
    }

    #[tokio::test]
    async fn exhausted_jobs_drop_out_of_the_due_set() {
        let store = InMemoryJobStore::new();
        store.contacts().insert_contact(contact_snapshot(1), Vec::new());
        let selector = DueJobSelector::new(DuePolicy {
            retry_interval: Duration::from_secs(0),
            max_attempts: 2,
        });

        let mut job = NewContactJob::retrieve_transcript(
            test_account(),
            ContactId::new(1),
            ConversationMediaId::new(5),
        )
        .into_job(Utc::now());
        job.number_of_attempts = 2;
        job.last_attempt = Some(Utc::now() - TimeDelta::hours(1));
        store.insert_raw(job);

        assert!(selector.select(&store, Utc::now()).await.unwrap().is_empty());
    }
}
