//! Asynchronous contact jobs: scheduling, publishing, retry and reconciliation.
//!
//! ## Lifecycle
//!
//! ```text
//! PENDING ──publish──> PENDING (attempt++, lastAttempt=now)
//! PENDING ──success completion──> COMPLETED(success)
//! PENDING ──failure completion, attempts < max──> PENDING (failure logged)
//! PENDING ──failure completion, attempts >= max──> COMPLETED(failure)
//! COMPLETED(*) ──any further completion──> COMPLETED(*)  (no-op)
//! ```
//!
//! There is no separate in-flight state: a recently published job is PENDING
//! with a recent `last_attempt`, which keeps it out of the due set until the
//! retry interval has elapsed.
//!
//! ## Components
//!
//! - `JobStore`: durable job rows and the failure log (in-memory or Postgres)
//! - `DueJobSelector`: which jobs to (re)publish
//! - `JobPublisher`: marks, translates and publishes due jobs
//! - `JobScheduler`: timer-driven selector → publisher ticks
//! - `CompletionReconciler`: applies completion messages
//! - `RetentionSweeper`: purges old artifacts and job rows

pub mod creation;
pub mod postgres;
pub mod publisher;
pub mod reconciler;
pub mod retention;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod types;

pub use creation::{create_jobs_for_contact, jobs_for_contact};
pub use postgres::PostgresJobStore;
pub use publisher::{JobPublisher, PublishError, PublishOutcome, PublishReport, transcript_file_path};
pub use reconciler::{
    CompletionError, CompletionOutcome, CompletionReconciler, ReconcileReport, ReconcilerConfig,
};
pub use retention::{RetentionError, RetentionReport, RetentionSweeper, SweepOutcome};
pub use scheduler::JobScheduler;
pub use selector::{DueJobSelector, DuePolicy};
pub use store::{InMemoryJobStore, InMemoryUnitOfWork, JobStore, JobStoreError};
pub use types::{
    ATTEMPTS_LIMIT_MESSAGE, CompletionPayload, ContactJob, DueContactJob, JobFailureRecord,
    JobStats, NewContactJob, RetrieveTranscriptPayload, SUCCESS_MESSAGE,
};
