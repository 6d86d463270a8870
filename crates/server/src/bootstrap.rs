use std::sync::Arc;

use expensa_core::config::{AppConfig, ConfigError};
use expensa_db::{connect_with_settings, migrations, DbPool, ExpenseWorkflow};
use thiserror::Error;
use tracing::info;

use crate::notifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<ExpenseWorkflow>,
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

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    let notifier = notifier::from_config(&config.notifications);
    info!(
        event_name = "system.bootstrap.notifications",
        correlation_id = "bootstrap",
        delivery = if config.notifications.enabled { "webhook" } else { "log" },
        missing_rule_policy = config.approvals.missing_rule_policy.as_str(),
        "notification sender initialized"
    );

    let workflow =
        Arc::new(ExpenseWorkflow::new(db_pool.clone(), notifier, config.approvals.clone()));

    Ok(Application { config, db_pool, workflow })
}
