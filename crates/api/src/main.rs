use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ledgerflow_api::app::{build_app, services::AppServices};
use ledgerflow_infra::config::LedgerConfig;
use ledgerflow_infra::workers::{ProjectionWorker, ProjectorError};

const BIND_ADDR: &str = "0.0.0.0:8080";

enum Exit {
    Server(std::io::Result<()>),
    Projector(Result<(), ProjectorError>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledgerflow_observability::init();

    let config = LedgerConfig::from_env()?;
    info!(
        data_dir = %config.data_dir().display(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "starting ledgerflow"
    );

    let services = Arc::new(AppServices::open_sqlite(&config).await?);
    let mut projector = ProjectionWorker::spawn(services.projector(config.poll_interval));

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(BIND_ADDR)
        .await
        .with_context(|| format!("failed to bind {BIND_ADDR}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    let exit = tokio::select! {
        served = server.into_future() => Exit::Server(served),
        stopped = projector.finished() => Exit::Projector(stopped),
    };

    match exit {
        Exit::Server(served) => {
            served.context("http server failed")?;
            projector.shutdown().await?;
            info!("shutdown complete");
            Ok(())
        }
        Exit::Projector(stopped) => {
            stopped?;
            anyhow::bail!("projector exited while the server was running")
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
