//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use helpline_core::{AccountSid, ContactId, ContactJobId};

use super::types::{
    CompletionPayload, ContactJob, DueContactJob, JobFailureRecord, JobStats, NewContactJob,
};
use crate::contacts::InMemoryContactRecords;

/// Job store abstraction.
///
/// Pure data access: no retry policy lives here. Every mutation of a job row
/// goes through one of the narrow operations below so concurrent writers only
/// ever race on independent fields (attempt bookkeeping vs completion).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Unit of work shared with the owning contact's write.
    ///
    /// Dropping it without [`JobStore::commit`] rolls back.
    type Tx: Send;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Tx, JobStoreError>;

    /// Commit a unit of work.
    async fn commit(&self, tx: Self::Tx) -> Result<(), JobStoreError>;

    /// Insert a pending job inside `tx`.
    async fn create_job(
        &self,
        tx: &mut Self::Tx,
        job: NewContactJob,
    ) -> Result<ContactJob, JobStoreError>;

    /// Jobs that are not completed, below `max_attempts`, and never attempted
    /// or last attempted before `last_attempted_before`, each joined with a
    /// fresh contact snapshot. No ordering guarantee.
    async fn select_due_jobs(
        &self,
        last_attempted_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DueContactJob>, JobStoreError>;

    /// Set `last_attempt = attempted_at` and increment `number_of_attempts`.
    ///
    /// `attempted_at` comes from the same clock as the due cutoff. A completed
    /// job is returned unchanged.
    async fn mark_attempted(
        &self,
        job_id: ContactJobId,
        attempted_at: DateTime<Utc>,
    ) -> Result<ContactJob, JobStoreError>;

    /// Set `completed = now` and store `payload`.
    ///
    /// Idempotent: an already completed job keeps its first payload and
    /// timestamp and is returned as is.
    async fn complete_job(
        &self,
        job_id: ContactJobId,
        payload: &CompletionPayload,
    ) -> Result<ContactJob, JobStoreError>;

    /// Append one failed-attempt record. Never mutates the job row.
    async fn append_failure(
        &self,
        job_id: ContactJobId,
        attempt_number: u32,
        payload: &JsonValue,
    ) -> Result<(), JobStoreError>;

    /// Point lookup.
    async fn get_by_id(&self, job_id: ContactJobId) -> Result<Option<ContactJob>, JobStoreError>;

    /// Completed jobs whose `completed` timestamp is before `cutoff`.
    async fn select_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ContactJob>, JobStoreError>;

    /// Delete a job row (and its failure records).
    async fn delete_job(&self, job_id: ContactJobId) -> Result<(), JobStoreError>;

    /// All jobs of one contact, oldest first.
    async fn list_jobs_for_contact(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ContactJob>, JobStoreError>;

    /// Failure log of one job, by attempt number.
    async fn list_failures(
        &self,
        job_id: ContactJobId,
    ) -> Result<Vec<JobFailureRecord>, JobStoreError>;

    /// Job statistics for one account.
    async fn stats(&self, account_sid: &AccountSid) -> Result<JobStats, JobStoreError>;

    /// Create a job in `uow` when one is given, otherwise in a unit of work
    /// opened and committed here.
    async fn create_job_in(
        &self,
        uow: Option<&mut Self::Tx>,
        job: NewContactJob,
    ) -> Result<ContactJob, JobStoreError> {
        match uow {
            Some(tx) => self.create_job(tx, job).await,
            None => {
                let mut tx = self.begin().await?;
                let created = self.create_job(&mut tx, job).await?;
                self.commit(tx).await?;
                Ok(created)
            }
        }
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(ContactJobId),
    #[error("job already exists: {0}")]
    AlreadyExists(ContactJobId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Staged writes of an in-memory unit of work.
#[derive(Debug, Default)]
pub struct InMemoryUnitOfWork {
    staged: Vec<ContactJob>,
}

/// In-memory job store for tests/dev.
///
/// Due jobs are joined against the shared [`InMemoryContactRecords`]; jobs
/// whose contact is unknown are left out of the due set, like an inner join.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<ContactJobId, ContactJob>>,
    failures: RwLock<Vec<JobFailureRecord>>,
    contacts: Arc<InMemoryContactRecords>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_contacts(Arc::new(InMemoryContactRecords::new()))
    }

    pub fn with_contacts(contacts: Arc<InMemoryContactRecords>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            failures: RwLock::new(Vec::new()),
            contacts,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn contacts(&self) -> &Arc<InMemoryContactRecords> {
        &self.contacts
    }

    /// Insert a row as is, bypassing creation (fixtures, foreign job types).
    pub fn insert_raw(&self, job: ContactJob) {
        self.jobs.write().unwrap().insert(job.id, job);
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, JobStoreError> {
        Ok(InMemoryUnitOfWork::default())
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(dup) = tx.staged.iter().find(|j| jobs.contains_key(&j.id)) {
            return Err(JobStoreError::AlreadyExists(dup.id));
        }
        for job in tx.staged {
            jobs.insert(job.id, job);
        }
        Ok(())
    }

    async fn create_job(
        &self,
        tx: &mut Self::Tx,
        job: NewContactJob,
    ) -> Result<ContactJob, JobStoreError> {
        let job = job.into_job(Utc::now());
        tx.staged.push(job.clone());
        Ok(job)
    }

    async fn select_due_jobs(
        &self,
        last_attempted_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DueContactJob>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let due = jobs
            .values()
            .filter(|j| j.is_due(last_attempted_before, max_attempts))
            .filter_map(|j| {
                self.contacts
                    .snapshot_of(&j.account_sid, j.contact_id)
                    .map(|contact| DueContactJob {
                        job: j.clone(),
                        contact,
                    })
            })
            .collect();
        Ok(due)
    }

    async fn mark_attempted(
        &self,
        job_id: ContactJobId,
        attempted_at: DateTime<Utc>,
    ) -> Result<ContactJob, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !job.is_completed() {
            job.last_attempt = Some(attempted_at);
            job.number_of_attempts += 1;
        }
        Ok(job.clone())
    }

    async fn complete_job(
        &self,
        job_id: ContactJobId,
        payload: &CompletionPayload,
    ) -> Result<ContactJob, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !job.is_completed() {
            job.completed = Some(Utc::now());
            job.completion_payload = Some(payload.to_json());
        }
        Ok(job.clone())
    }

    async fn append_failure(
        &self,
        job_id: ContactJobId,
        attempt_number: u32,
        payload: &JsonValue,
    ) -> Result<(), JobStoreError> {
        if !self.jobs.read().unwrap().contains_key(&job_id) {
            return Err(JobStoreError::NotFound(job_id));
        }

        let mut failures = self.failures.write().unwrap();
        // Keyed by (job, attempt): a redelivered failure replaces nothing.
        if failures
            .iter()
            .any(|f| f.contact_job_id == job_id && f.attempt_number == attempt_number)
        {
            return Ok(());
        }
        failures.push(JobFailureRecord {
            contact_job_id: job_id,
            attempt_number,
            payload: payload.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_by_id(&self, job_id: ContactJobId) -> Result<Option<ContactJob>, JobStoreError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    async fn select_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ContactJob>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.completed.is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, job_id: ContactJobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.remove(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        self.failures
            .write()
            .unwrap()
            .retain(|f| f.contact_job_id != job_id);
        Ok(())
    }

    async fn list_jobs_for_contact(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ContactJob>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| &j.account_sid == account_sid && j.contact_id == contact_id)
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.requested, j.id));
        Ok(result)
    }

    async fn list_failures(
        &self,
        job_id: ContactJobId,
    ) -> Result<Vec<JobFailureRecord>, JobStoreError> {
        let failures = self.failures.read().unwrap();
        let mut result: Vec<_> = failures
            .iter()
            .filter(|f| f.contact_job_id == job_id)
            .cloned()
            .collect();

        result.sort_by_key(|f| f.attempt_number);
        Ok(result)
    }

    async fn stats(&self, account_sid: &AccountSid) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut stats = JobStats::default();
        for job in jobs.values().filter(|j| &j.account_sid == account_sid) {
            stats.record(job);
        }
        Ok(stats)
    }
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, JobStoreError> {
        (**self).begin().await
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), JobStoreError> {
        (**self).commit(tx).await
    }

    async fn create_job(
        &self,
        tx: &mut Self::Tx,
        job: NewContactJob,
    ) -> Result<ContactJob, JobStoreError> {
        (**self).create_job(tx, job).await
    }

    async fn select_due_jobs(
        &self,
        last_attempted_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DueContactJob>, JobStoreError> {
        (**self)
            .select_due_jobs(last_attempted_before, max_attempts)
            .await
    }

    async fn mark_attempted(
        &self,
        job_id: ContactJobId,
        attempted_at: DateTime<Utc>,
    ) -> Result<ContactJob, JobStoreError> {
        (**self).mark_attempted(job_id, attempted_at).await
    }

    async fn complete_job(
        &self,
        job_id: ContactJobId,
        payload: &CompletionPayload,
    ) -> Result<ContactJob, JobStoreError> {
        (**self).complete_job(job_id, payload).await
    }

    async fn append_failure(
        &self,
        job_id: ContactJobId,
        attempt_number: u32,
        payload: &JsonValue,
    ) -> Result<(), JobStoreError> {
        (**self).append_failure(job_id, attempt_number, payload).await
    }

    async fn get_by_id(&self, job_id: ContactJobId) -> Result<Option<ContactJob>, JobStoreError> {
        (**self).get_by_id(job_id).await
    }

    async fn select_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ContactJob>, JobStoreError> {
        (**self).select_completed_before(cutoff).await
    }

    async fn delete_job(&self, job_id: ContactJobId) -> Result<(), JobStoreError> {
        (**self).delete_job(job_id).await
    }

    async fn list_jobs_for_contact(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ContactJob>, JobStoreError> {
        (**self).list_jobs_for_contact(account_sid, contact_id).await
    }

    async fn list_failures(
        &self,
        job_id: ContactJobId,
    ) -> Result<Vec<JobFailureRecord>, JobStoreError> {
        (**self).list_failures(job_id).await
    }

    async fn stats(&self, account_sid: &AccountSid) -> Result<JobStats, JobStoreError> {
        (**self).stats(account_sid).await
    }
}
