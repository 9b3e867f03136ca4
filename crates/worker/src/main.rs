#[tokio::main]
async fn main() -> anyhow::Result<()> {
    helpline_observability::init();

    let settings = helpline_jobs_worker::WorkerSettings::from_env()?;
    let config = helpline_infra::JobsConfig::from_env()?;
    tracing::info!(?config, "starting contact job worker");

    let workers = helpline_jobs_worker::start(&settings, &config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    workers.shutdown().await;
    Ok(())
}
