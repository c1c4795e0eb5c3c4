//! SQLite persistence for thoughtmates.
//!
//! Timestamps are stored as UNIX milliseconds and vectors as JSON arrays.
//! All queries are built at runtime so the crate compiles without a live
//! database.

mod content;
mod matches;
mod messages;
mod social;
mod users;


use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use thoughtmates_core::{ContentId, CoreError, DatabaseConfig, DatabaseError, Vector};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.acquire_timeout());

        // Every connection to an in-memory database is a separate database
        let in_memory = config.url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(config.acquire_timeout())
            .max_connections(if in_memory { 1 } else { config.max_connections });
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to {}", config.url);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn encode_vector(vector: &Vector) -> Result<String, CoreError> {
    Ok(serde_json::to_string(vector)?)
}

pub(crate) fn decode_vector(thought_id: ContentId, raw: &str) -> Result<Vector, CoreError> {
    let vector: Vector =
        serde_json::from_str(raw).map_err(|e| DatabaseError::MalformedVector {
            thought_id,
            reason: e.to_string(),
        })?;
    if vector.is_empty() {
        return Err(DatabaseError::MalformedVector {
            thought_id,
            reason: "empty vector".to_string(),
        }
        .into());
    }
    Ok(vector)
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
