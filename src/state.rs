use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::{
    config::{AppConfig, JwtConfig, PasswordScheme},
    users::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let store = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        Ok(Self::from_parts(config, store))
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn UserStore>) -> Self {
        Self { config, store }
    }

    /// State backed by an empty in-memory store.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: "memory://".into(),
            jwt: JwtConfig {
                secret: "test".into(),
                ttl_days: 60,
            },
            password_scheme: PasswordScheme::Argon2,
        });
        let store = Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>;
        Self::from_parts(config, store)
    }
}
