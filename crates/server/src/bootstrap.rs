use std::sync::Arc;

use greenlight_core::config::{AppConfig, ConfigError, LoadOptions};
use greenlight_core::workflow::ApprovalWorkflow;
use greenlight_db::repositories::{
    SqlApprovalStore, SqlQuotationStore, SqlTimelineStore, SqlUserDirectory,
};
use greenlight_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::notify;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: ApprovalWorkflow,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let workflow = ApprovalWorkflow::new(
        Arc::new(SqlApprovalStore::new(db_pool.clone())),
        Arc::new(SqlQuotationStore::new(db_pool.clone())),
        Arc::new(SqlTimelineStore::new(db_pool.clone())),
        Arc::new(SqlUserDirectory::new(db_pool.clone())),
        notify::from_config(&config.notifier),
        config.workflow.policy(),
        config.workflow.settings(),
    );

    Ok(Application { config, db_pool, workflow })
}
