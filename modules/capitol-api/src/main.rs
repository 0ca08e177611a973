use std::sync::Arc;

use anyhow::{Context, Result};
use capitol_common::Config;
use capitol_ingest::{Controller, Database, MetricsSink, NoopMetrics, Pipeline, PrometheusMetrics};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capitol_api::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("capitol=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let metrics: Arc<dyn MetricsSink> = if config.metrics_enabled {
        Arc::new(PrometheusMetrics::new())
    } else {
        Arc::new(NoopMetrics)
    };

    let mut pipeline = Pipeline::new(config.clone(), metrics).context("Failed to build pipeline")?;

    let database = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url, config.db_max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.run_migrations().await.context("Failed to run migrations")?;
            info!("Database migrations applied");
            let db = Arc::new(db);
            pipeline = pipeline.with_database(db.clone());
            Some(db)
        }
        None => {
            warn!("DATABASE_URL not set; runs stop after download and extraction");
            None
        }
    };

    let controller = Controller::new(pipeline);
    let state = Arc::new(AppState {
        controller: controller.clone(),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Capitol ingest control service starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // Let an in-flight transfer finish so its partial file stays resumable.
    if controller.cancel() {
        info!("Waiting for the current run to stop");
        controller.wait_idle().await;
    }
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}
