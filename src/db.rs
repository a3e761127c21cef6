use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

use crate::config::Settings;

pub type Db = Pool<Postgres>;

pub async fn connect(settings: &Settings) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .acquire_timeout(Duration::from_secs(settings.db_acquire_timeout_secs))
        .connect(&settings.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    Ok(pool)
}

pub async fn migrate(pool: &Db) -> Result<()> {
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
