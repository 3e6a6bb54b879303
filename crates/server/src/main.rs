mod approvals;
mod bootstrap;
mod health;
mod notify;

use anyhow::Result;
use greenlight_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use greenlight_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = approvals::router(app.workflow.clone());

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "greenlight-server started"
    );

    let drain_deadline =
        std::time::Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let shutdown_started = std::sync::Arc::new(tokio::sync::Notify::new());

    let serve = axum::serve(listener, router).with_graceful_shutdown({
        let shutdown_started = shutdown_started.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_started.notify_one();
        }
    });
    let serve = std::future::IntoFuture::into_future(serve);
    tokio::pin!(serve);

    // Drain open connections after ctrl-c, but no longer than the configured
    // deadline.
    tokio::select! {
        result = &mut serve => result?,
        () = async {
            shutdown_started.notified().await;
            tokio::time::sleep(drain_deadline).await;
        } => {
            tracing::warn!(
                event_name = "system.server.shutdown_deadline",
                deadline_secs = drain_deadline.as_secs(),
                "connections did not drain before the shutdown deadline"
            );
        }
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "greenlight-server stopping"
    );

    Ok(())
}
