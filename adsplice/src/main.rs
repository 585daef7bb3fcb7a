use tokio::sync::mpsc;
use tracing::{error, info};

use adsplice::api::{ApiServer, ApiServerConfig, AppState};
use adsplice::config::AppConfig;
use adsplice::container::ServiceContainer;
use adsplice::logging::{LogFormat, init_logging};
use adsplice::variant::TranscodeJob;

/// Jobs go to an external transcoder; this process only records them.
async fn log_transcode_jobs(mut jobs: mpsc::Receiver<TranscodeJob>) {
    while let Some(job) = jobs.recv().await {
        info!(
            job_id = %job.job_id,
            asset_id = %job.asset_id,
            bitrates = ?job.target_bitrates,
            incremental = job.incremental,
            "Transcode job submitted"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let logging_config = init_logging(LogFormat::from_env())?;

    let config = AppConfig::from_env_or_default();
    info!(
        origin = %config.origin_base_url,
        decision_url = ?config.decision_url,
        "Starting adsplice {}",
        env!("CARGO_PKG_VERSION")
    );

    let container = ServiceContainer::new(config).await?;
    if let Some(jobs) = container.take_transcode_jobs() {
        tokio::spawn(log_transcode_jobs(jobs));
    }
    let tasks = container.start().await;

    let state = AppState::from_container(&container).with_logging_config(logging_config);
    let server = ApiServer::new(
        ApiServerConfig::from(&container.config),
        state,
        container.cancellation_token().child_token(),
    );

    let shutdown_token = container.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down");
        shutdown_token.cancel();
    });

    if let Err(e) = server.run().await {
        error!("API server failed: {}", e);
        container.shutdown().await;
        return Err(e.into());
    }

    container.shutdown().await;
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!("Background task failed: {}", e);
        }
    }
    info!("adsplice stopped");
    Ok(())
}
