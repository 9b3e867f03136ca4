//! Postgres-backed job store.
//!
//! Tables are created by `migrations/0001_contact_jobs.sql`. Due jobs are
//! joined with `"Contacts"` (owned by the contact layer) so each row comes
//! back with a fresh snapshot.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (on create) |
//! | Database (foreign key violation) | `23503` | `NotFound` (on append_failure) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed | N/A | `Storage` |
//! | RowNotFound | N/A | `Storage` |
//! | Other | N/A | `Storage` |
//!
//! ## Idempotent updates
//!
//! `mark_attempted` and `complete_job` only touch rows with
//! `"completed" IS NULL`; when nothing was updated the current row is read
//! back, so a completed job is returned unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{Span, instrument};

use helpline_core::{AccountSid, ContactId, ContactJobId, ContactSnapshot};

use super::store::{JobStore, JobStoreError};
use super::types::{
    CompletionPayload, ContactJob, DueContactJob, JobFailureRecord, JobStats, NewContactJob,
};

/// Embedded migrations of the job tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const JOB_COLUMNS: &str = r#"
    j."id", j."contactId", j."accountSid", j."jobType", j."requested",
    j."lastAttempt", j."numberOfAttempts", j."completed",
    j."completionPayload", j."additionalPayload"
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        MIGRATOR
            .run(&*self.pool)
            .await
            .map_err(|e| JobStoreError::Storage(format!("migration failed: {e}")))
    }

    async fn fetch_job(&self, job_id: ContactJobId) -> Result<Option<ContactJob>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"SELECT {JOB_COLUMNS} FROM "ContactJobs" j WHERE j."id" = $1"#
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_id", e))?;

        row.map(|r| job_from_row(&r)).transpose()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, JobStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), JobStoreError> {
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(
        skip(self, tx, job),
        fields(
            account_sid = %job.account_sid,
            contact_id = %job.contact_id,
            job_type = %job.job_type
        ),
        err
    )]
    async fn create_job(
        &self,
        tx: &mut Self::Tx,
        job: NewContactJob,
    ) -> Result<ContactJob, JobStoreError> {
        let job = job.into_job(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO "ContactJobs" (
                "id", "contactId", "accountSid", "jobType", "requested",
                "lastAttempt", "numberOfAttempts", "completed",
                "completionPayload", "additionalPayload"
            )
            VALUES ($1, $2, $3, $4, $5, NULL, 0, NULL, NULL, $6)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.contact_id.get())
        .bind(job.account_sid.as_str())
        .bind(&job.job_type)
        .bind(job.requested)
        .bind(&job.additional_payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("create_job", e)
            }
        })?;

        Ok(job)
    }

    #[instrument(skip(self), fields(due_count = tracing::field::Empty), err)]
    async fn select_due_jobs(
        &self,
        last_attempted_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DueContactJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS},
                   c."taskId", c."channelSid", c."serviceSid",
                   c."twilioWorkerId", c."timeOfContact"
            FROM "ContactJobs" j
            JOIN "Contacts" c ON c."accountSid" = j."accountSid" AND c."id" = j."contactId"
            WHERE j."completed" IS NULL
              AND (j."lastAttempt" IS NULL OR j."lastAttempt" < $1)
              AND j."numberOfAttempts" < $2
            "#
        ))
        .bind(last_attempted_before)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_due_jobs", e))?;

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let job = job_from_row(&row)?;
            let contact = ContactSnapshot {
                id: job.contact_id,
                account_sid: job.account_sid.clone(),
                task_id: row.try_get("taskId").map_err(decode_error)?,
                channel_sid: row.try_get("channelSid").map_err(decode_error)?,
                service_sid: row.try_get("serviceSid").map_err(decode_error)?,
                twilio_worker_id: row.try_get("twilioWorkerId").map_err(decode_error)?,
                time_of_contact: row.try_get("timeOfContact").map_err(decode_error)?,
            };
            due.push(DueContactJob { job, contact });
        }

        Span::current().record("due_count", due.len());
        Ok(due)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_attempted(
        &self,
        job_id: ContactJobId,
        attempted_at: DateTime<Utc>,
    ) -> Result<ContactJob, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE "ContactJobs" j
            SET "lastAttempt" = $2, "numberOfAttempts" = j."numberOfAttempts" + 1
            WHERE j."id" = $1 AND j."completed" IS NULL
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .bind(attempted_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_attempted", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => self
                .fetch_job(job_id)
                .await?
                .ok_or(JobStoreError::NotFound(job_id)),
        }
    }

    #[instrument(skip(self, payload), fields(job_id = %job_id), err)]
    async fn complete_job(
        &self,
        job_id: ContactJobId,
        payload: &CompletionPayload,
    ) -> Result<ContactJob, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE "ContactJobs" j
            SET "completed" = NOW(), "completionPayload" = $2
            WHERE j."id" = $1 AND j."completed" IS NULL
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .bind(payload.to_json())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => self
                .fetch_job(job_id)
                .await?
                .ok_or(JobStoreError::NotFound(job_id)),
        }
    }

    #[instrument(skip(self, payload), fields(job_id = %job_id, attempt = attempt_number), err)]
    async fn append_failure(
        &self,
        job_id: ContactJobId,
        attempt_number: u32,
        payload: &JsonValue,
    ) -> Result<(), JobStoreError> {
        let attempt = i32::try_from(attempt_number)
            .map_err(|_| JobStoreError::Storage(format!("attempt number {attempt_number} out of range")))?;

        sqlx::query(
            r#"
            INSERT INTO "ContactJobsFailures" ("contactJobId", "attemptNumber", "payload", "createdAt")
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT ("contactJobId", "attemptNumber") DO NOTHING
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(attempt)
        .bind(payload)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                JobStoreError::NotFound(job_id)
            } else {
                map_sqlx_error("append_failure", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_by_id(&self, job_id: ContactJobId) -> Result<Option<ContactJob>, JobStoreError> {
        self.fetch_job(job_id).await
    }

    #[instrument(skip(self), err)]
    async fn select_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ContactJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM "ContactJobs" j
            WHERE j."completed" IS NOT NULL AND j."completed" < $1
            "#
        ))
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_completed_before", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn delete_job(&self, job_id: ContactJobId) -> Result<(), JobStoreError> {
        // Failure records go with the row (ON DELETE CASCADE).
        let result = sqlx::query(r#"DELETE FROM "ContactJobs" WHERE "id" = $1"#)
            .bind(job_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(account_sid = %account_sid, contact_id = %contact_id), err)]
    async fn list_jobs_for_contact(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ContactJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM "ContactJobs" j
            WHERE j."accountSid" = $1 AND j."contactId" = $2
            ORDER BY j."requested" ASC, j."id" ASC
            "#
        ))
        .bind(account_sid.as_str())
        .bind(contact_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs_for_contact", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn list_failures(
        &self,
        job_id: ContactJobId,
    ) -> Result<Vec<JobFailureRecord>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "contactJobId", "attemptNumber", "payload", "createdAt"
            FROM "ContactJobsFailures"
            WHERE "contactJobId" = $1
            ORDER BY "attemptNumber" ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_failures", e))?;

        let mut failures = Vec::with_capacity(rows.len());
        for row in rows {
            let id: uuid::Uuid = row.try_get("contactJobId").map_err(decode_error)?;
            let attempt: i32 = row.try_get("attemptNumber").map_err(decode_error)?;
            failures.push(JobFailureRecord {
                contact_job_id: ContactJobId::from_uuid(id),
                attempt_number: u32::try_from(attempt).unwrap_or_default(),
                payload: row.try_get("payload").map_err(decode_error)?,
                created_at: row.try_get("createdAt").map_err(decode_error)?,
            });
        }
        Ok(failures)
    }

    #[instrument(skip(self), fields(account_sid = %account_sid), err)]
    async fn stats(&self, account_sid: &AccountSid) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {JOB_COLUMNS} FROM "ContactJobs" j WHERE j."accountSid" = $1"#
        ))
        .bind(account_sid.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in &rows {
            stats.record(&job_from_row(row)?);
        }
        Ok(stats)
    }
}

fn job_from_row(row: &PgRow) -> Result<ContactJob, JobStoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(decode_error)?;
    let account_sid: String = row.try_get("accountSid").map_err(decode_error)?;
    let attempts: i32 = row.try_get("numberOfAttempts").map_err(decode_error)?;

    Ok(ContactJob {
        id: ContactJobId::from_uuid(id),
        contact_id: ContactId::new(row.try_get("contactId").map_err(decode_error)?),
        account_sid: AccountSid::new(account_sid)
            .map_err(|e| JobStoreError::Serialization(e.to_string()))?,
        job_type: row.try_get("jobType").map_err(decode_error)?,
        requested: row.try_get("requested").map_err(decode_error)?,
        last_attempt: row.try_get("lastAttempt").map_err(decode_error)?,
        number_of_attempts: u32::try_from(attempts).unwrap_or_default(),
        completed: row.try_get("completed").map_err(decode_error)?,
        completion_payload: row.try_get("completionPayload").map_err(decode_error)?,
        additional_payload: row.try_get("additionalPayload").map_err(decode_error)?,
    })
}

fn decode_error(err: sqlx::Error) -> JobStoreError {
    JobStoreError::Serialization(format!("failed to decode job row: {err}"))
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            JobStoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23505")
}

/// Check if an error is a foreign key violation (the job row is gone).
fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23503")
}

fn has_code(err: &sqlx::Error, expected: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == expected;
        }
    }
    false
}
