use crate::config::AppConfig;
use crate::users::{password::PasswordHasher, repo::PgUserStore, services::AccountService};
use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub hasher: PasswordHasher,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let hasher = PasswordHasher::new(&config.password)?;

        Ok(Self { db, config, hasher })
    }

    pub fn accounts(&self) -> AccountService<PgUserStore> {
        AccountService::new(PgUserStore::new(self.db.clone()), self.hasher.clone())
    }
}
