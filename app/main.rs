use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use veridex::resolver::scheduler::ResolutionScheduler;

mod app;
mod config;
mod rpc_server;

use app::App;
use config::Config;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    tracing::info!(?config, "starting veridex");

    let app = App::new(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = if config.scheduler_enabled {
        let scheduler = ResolutionScheduler::new(
            Arc::clone(&app.resolver),
            config.scheduler_period,
        );
        Some(scheduler.spawn(shutdown_rx))
    } else {
        tracing::info!("resolution scheduler disabled");
        None
    };

    let (addr, server_handle) =
        rpc_server::run_server(app, config.rpc_addr).await?;
    tracing::info!(%addr, "RPC server listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        // drains the in-flight sweep before exiting
        let _ = task.await;
    }
    let _ = server_handle.stop();
    server_handle.stopped().await;
    Ok(())
}
