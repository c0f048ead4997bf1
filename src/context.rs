/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    db,
    error::ModResult,
    moderation::{
        content::{ContentDirectory, SqliteContentDirectory},
        service::{ModerationService, ServiceOptions},
    },
};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub moderation: Arc<ModerationService>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ModResult<Self> {
        // Validate configuration
        config.validate()?;

        let options = db::DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..db::DatabaseOptions::default()
        };
        let db = db::create_pool(&config.storage.database_path, options).await?;

        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        // Topics and comments live in the shared forum database
        let content: Arc<dyn ContentDirectory> = Arc::new(SqliteContentDirectory::new(db.clone()));

        Ok(Self::with_parts(config, db, content))
    }

    /// Assemble a context over an existing pool and content directory
    pub fn with_parts(config: ServerConfig, db: SqlitePool, content: Arc<dyn ContentDirectory>) -> Self {
        let options = ServiceOptions {
            bootstrap_admins: config.authentication.admin_user_ids.clone(),
            default_suspension_days: config.moderation.default_suspension_days,
        };
        let moderation = Arc::new(ModerationService::new(db.clone(), content, options));

        Self {
            config: Arc::new(config),
            db,
            moderation,
        }
    }

    /// Run a Core call under the configured request deadline
    pub async fn run<T, F>(&self, operation: F) -> ModResult<T>
    where
        F: Future<Output = ModResult<T>>,
    {
        ModerationService::with_deadline(self.config.request_timeout(), operation).await
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
