//! Wiring of the contact job loops into one long-running process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use helpline_infra::JobsConfig;
use helpline_infra::artifacts::LocalFsArtifactStore;
use helpline_infra::config::required;
use helpline_infra::contacts::PostgresContactRecords;
use helpline_infra::jobs::{CompletionReconciler, JobScheduler, PostgresJobStore, RetentionSweeper};
use helpline_infra::queue::{RedisStreamsJobQueue, StreamKeys};
use helpline_infra::workers::WorkerHandle;

/// Process settings that are not job tunables.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub redis_url: String,
    pub streams: StreamKeys,
    pub artifact_root: PathBuf,
    pub max_connections: u32,
}

impl WorkerSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let or_default = |var: &str, default: String| {
            lookup(var).unwrap_or_else(|| {
                tracing::warn!("{var} not set; using default {default}");
                default
            })
        };

        let defaults = StreamKeys::default();
        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid DATABASE_MAX_CONNECTIONS={raw:?}"))?,
            None => 10,
        };

        Ok(Self {
            database_url,
            redis_url: or_default("REDIS_URL", "redis://localhost:6379".to_string()),
            streams: StreamKeys {
                pending: or_default("CONTACT_JOB_PENDING_STREAM", defaults.pending),
                completed: or_default("CONTACT_JOB_COMPLETED_STREAM", defaults.completed),
                group: or_default("CONTACT_JOB_CONSUMER_GROUP", defaults.group),
                consumer: or_default("CONTACT_JOB_CONSUMER_NAME", defaults.consumer),
            },
            artifact_root: PathBuf::from(or_default("ARTIFACT_ROOT", "./artifacts".to_string())),
            max_connections,
        })
    }
}

/// Handles of the running loops.
#[derive(Debug)]
pub struct RunningWorkers {
    handles: Vec<WorkerHandle>,
}

impl RunningWorkers {
    /// Stop every loop, letting in-flight passes finish.
    pub async fn shutdown(self) {
        for handle in self.handles {
            let name = handle.name();
            handle.stop().await;
            tracing::info!(worker = name, "worker stopped");
        }
    }
}

/// Connect to the backing services and start publisher, reconciler and
/// retention loops.
pub async fn start(settings: &WorkerSettings, config: &JobsConfig) -> anyhow::Result<RunningWorkers> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let pool = Arc::new(pool);

    let store = PostgresJobStore::from_shared(Arc::clone(&pool));
    store.migrate().await.context("failed to run migrations")?;
    let records = PostgresContactRecords::from_shared(pool);

    let queue = Arc::new(
        RedisStreamsJobQueue::new(&settings.redis_url, settings.streams.clone())?
            .with_redelivery_idle(config.redelivery_idle),
    );
    queue
        .ensure_consumer_group()
        .await
        .context("failed to create completion consumer group")?;

    let scheduler = Arc::new(JobScheduler::new(
        store.clone(),
        Arc::clone(&queue),
        config.due_policy(),
        config.publish_concurrency,
    ));
    let reconciler = Arc::new(CompletionReconciler::new(
        store.clone(),
        queue,
        records.clone(),
        config.reconciler(),
    ));
    let sweeper = Arc::new(RetentionSweeper::new(
        store,
        records,
        LocalFsArtifactStore::new(settings.artifact_root.clone()),
        config.retention,
    ));

    Ok(RunningWorkers {
        handles: vec![
            scheduler.start(config.publish_interval),
            reconciler.start(config.completion_poll_interval),
            sweeper.start(config.retention_sweep_interval),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_require_database_url() {
        assert!(WorkerSettings::from_lookup(|_| None).is_err());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let settings = WorkerSettings::from_lookup(|var| match var {
            "DATABASE_URL" => Some("postgres://localhost/helpline".to_string()),
            "CONTACT_JOB_CONSUMER_GROUP" => Some("reconcilers".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.redis_url, "redis://localhost:6379");
        assert_eq!(settings.streams.group, "reconcilers");
        assert_eq!(settings.streams.pending, StreamKeys::default().pending);
        assert_eq!(settings.max_connections, 10);
    }
}
