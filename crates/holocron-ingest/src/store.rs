//! Destination storage
//!
//! The pipeline only depends on [`RecordStore`]. [`SqliteStore`] implements it
//! on a sqlx connection pool: every batch runs in its own transaction on its
//! own pooled connection, so concurrent loads never share a session.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{CanonicalRecord, Identifier};

const INSERT_PERSON: &str = r#"
    INSERT INTO people (
        id, name, height, mass, hair_color, skin_color, eye_color,
        birth_year, gender, homeworld, films, species, vehicles, starships
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
"#;

const SELECT_PERSON: &str = r#"
    SELECT id, name, height, mass, hair_color, skin_color, eye_color,
           birth_year, gender, homeworld, films, species, vehicles, starships
    FROM people
    WHERE id = ?1
"#;

/// Batch persistence contract
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert every record in one transaction, or none of them
    ///
    /// Returns the number of committed rows. An existing primary key fails the
    /// whole batch with [`StoreError::DuplicateKey`].
    async fn insert_all(&self, records: &[CanonicalRecord]) -> Result<u64, StoreError>;

    /// Read one record back by primary key
    async fn get(&self, id: Identifier) -> Result<Option<CanonicalRecord>, StoreError>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(url = %config.url, max_connections = config.max_connections, "Connected to record store");

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Remove every stored record
    pub async fn reset(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM people").execute(&self.pool).await?;
        info!(removed = result.rows_affected(), "Cleared people table");
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM people")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_all(&self, records: &[CanonicalRecord]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            let result = sqlx::query(INSERT_PERSON)
                .bind(record.id)
                .bind(&record.name)
                .bind(record.height)
                .bind(&record.mass)
                .bind(&record.hair_color)
                .bind(&record.skin_color)
                .bind(&record.eye_color)
                .bind(&record.birth_year)
                .bind(&record.gender)
                .bind(&record.homeworld)
                .bind(&record.films)
                .bind(&record.species)
                .bind(&record.vehicles)
                .bind(&record.starships)
                .execute(&mut *tx)
                .await;

            // Returning early drops `tx`, which rolls the batch back
            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::DuplicateKey { id: record.id });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        debug!(rows = records.len(), "Committed batch");
        Ok(records.len() as u64)
    }

    async fn get(&self, id: Identifier) -> Result<Option<CanonicalRecord>, StoreError> {
        let record = sqlx::query_as::<_, CanonicalRecord>(SELECT_PERSON)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| {
        db.is_unique_violation() || db.message().contains("UNIQUE constraint failed")
    })
}
