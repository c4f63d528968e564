use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use tagdesk_agent::{LlmSemanticClassifier, OpenAiChatClient, SemanticClassifier};
use tagdesk_core::classifier::keyword::KeywordTableError;
use tagdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use tagdesk_core::{ConfidenceRouter, KeywordClassifier, MetricsRecorder};
use tagdesk_db::{connect, migrations, DbPool, SqlSessionStore, SqlTicketRepository};

use crate::ingest::IngestionService;
use crate::queries::TicketQueryService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub ingestion: Arc<IngestionService>,
    pub queries: Arc<TicketQueryService>,
    pub metrics: Arc<MetricsRecorder>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("keyword table rejected: {0}")]
    KeywordTable(#[from] KeywordTableError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let tickets = Arc::new(SqlTicketRepository::new(db_pool.clone()));
    let sessions = Arc::new(SqlSessionStore::new(db_pool.clone()));
    let llm = Arc::new(OpenAiChatClient::from_config(&config.llm));
    let semantic: Arc<dyn SemanticClassifier> = Arc::new(LlmSemanticClassifier::new(
        llm,
        sessions,
        Duration::from_secs(config.llm.timeout_secs),
        config.llm.max_retries,
    ));
    let keyword = Arc::new(KeywordClassifier::with_default_table()?);
    let router = ConfidenceRouter::new(config.tagging.confidence_threshold);
    let metrics = Arc::new(MetricsRecorder::new());

    let ingestion = Arc::new(IngestionService::new(
        Arc::clone(&tickets) as Arc<dyn tagdesk_db::TicketRepository>,
        Arc::clone(&keyword),
        router,
        Arc::clone(&semantic),
        Arc::clone(&metrics),
    ));
    let queries = Arc::new(TicketQueryService::new(
        tickets,
        keyword,
        semantic,
        Arc::clone(&metrics),
    ));

    info!(event_name = "system.bootstrap.ready", "application services wired");
    Ok(Application { config, db_pool, ingestion, queries, metrics })
}

#[cfg(test)]
mod tests {
    use tagdesk_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            config_path: Some("/nonexistent/tagdesk.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_services() {
        let app = bootstrap(memory_options()).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('tickets', 'messages', 'sessions', 'session_turns')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4);

        assert_eq!(app.metrics.snapshot().total, 0);
        app.db_pool.close().await;
    }
}
