// src/db.rs
//! Storage backends for the roster and event settings.
//!
//! Two interchangeable backends sit behind [`Store`]: a JSON document on disk
//! and PostgreSQL. Each mutation is atomic with respect to every other
//! mutation, so concurrent vote increments always commute and a reset never
//! interleaves with a half-applied increment.

use std::path::{Path, PathBuf};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::models::{seed_roster, Couple, CoupleUpdate, Snapshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Couple {0} not found")]
    UnknownCouple(i64),
}

/// Next reset timestamp: wall clock in milliseconds, but always strictly
/// greater than the previous one.
fn next_reset_timestamp(previous: i64) -> i64 {
    Utc::now().timestamp_millis().max(previous + 1)
}

pub enum Store {
    File(FileStore),
    Postgres(PgStore),
}

impl Store {
    pub async fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        match config {
            StorageConfig::File { path } => Ok(Self::File(FileStore::open(path).await?)),
            StorageConfig::Postgres {
                url,
                max_connections,
            } => Ok(Self::Postgres(PgStore::connect(url, *max_connections).await?)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        match self {
            Self::File(store) => Ok(store.snapshot().await),
            Self::Postgres(store) => store.snapshot().await,
        }
    }

    pub async fn couples(&self) -> Result<Vec<Couple>, StoreError> {
        Ok(self.snapshot().await?.couples)
    }

    pub async fn results_visible(&self) -> Result<bool, StoreError> {
        Ok(self.snapshot().await?.results_visible)
    }

    /// Adds one vote. Returns `None` when no couple has this id.
    pub async fn increment_votes(&self, couple_id: i64) -> Result<Option<Couple>, StoreError> {
        match self {
            Self::File(store) => store.increment_votes(couple_id).await,
            Self::Postgres(store) => store.increment_votes(couple_id).await,
        }
    }

    /// Zeroes every tally and returns the new reset timestamp.
    pub async fn reset_votes(&self) -> Result<i64, StoreError> {
        match self {
            Self::File(store) => store.reset_votes().await,
            Self::Postgres(store) => store.reset_votes().await,
        }
    }

    pub async fn toggle_results(&self) -> Result<bool, StoreError> {
        match self {
            Self::File(store) => store.toggle_results().await,
            Self::Postgres(store) => store.toggle_results().await,
        }
    }

    /// Applies name/image edits as one batch; nothing changes if any id is unknown.
    pub async fn update_metadata(
        &self,
        updates: &[CoupleUpdate],
    ) -> Result<Vec<Couple>, StoreError> {
        match self {
            Self::File(store) => store.update_metadata(updates).await,
            Self::Postgres(store) => store.update_metadata(updates).await,
        }
    }
}

/// JSON document store.
///
/// The document is cached in memory; writes go to a temp file that is renamed
/// over the target before the in-memory copy is replaced.
pub struct FileStore {
    path: PathBuf,
    document: Mutex<Snapshot>,
}

impl FileStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let document = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let mut document: Snapshot = serde_json::from_slice(&bytes)?;
                document.validate().map_err(StoreError::Corrupt)?;
                document.sort();
                info!(path = %path.display(), couples = document.couples.len(), "Loaded database file");
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let document = Snapshot::seeded();
                write_document(path, &document).await?;
                info!(path = %path.display(), "Created database file with seeded roster");
                document
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            document: Mutex::new(document),
        })
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.document.lock().await.clone()
    }

    /// Runs `mutate` on a copy of the document, persists it if it changed,
    /// then commits. The lock is held throughout, which serializes all writers.
    async fn mutate<T>(
        &self,
        mutate: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.document.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        if next != *guard {
            write_document(&self.path, &next).await?;
            *guard = next;
        }
        Ok(out)
    }

    async fn increment_votes(&self, couple_id: i64) -> Result<Option<Couple>, StoreError> {
        self.mutate(|doc| {
            Ok(doc
                .couples
                .iter_mut()
                .find(|c| c.id == couple_id)
                .map(|couple| {
                    couple.votes += 1;
                    couple.clone()
                }))
        })
        .await
    }

    async fn reset_votes(&self) -> Result<i64, StoreError> {
        self.mutate(|doc| {
            for couple in &mut doc.couples {
                couple.votes = 0;
            }
            doc.last_reset = next_reset_timestamp(doc.last_reset);
            Ok(doc.last_reset)
        })
        .await
    }

    async fn toggle_results(&self) -> Result<bool, StoreError> {
        self.mutate(|doc| {
            doc.results_visible = !doc.results_visible;
            Ok(doc.results_visible)
        })
        .await
    }

    async fn update_metadata(&self, updates: &[CoupleUpdate]) -> Result<Vec<Couple>, StoreError> {
        self.mutate(|doc| {
            for update in updates {
                let couple = doc
                    .couples
                    .iter_mut()
                    .find(|c| c.id == update.id)
                    .ok_or(StoreError::UnknownCouple(update.id))?;
                couple.name.clone_from(&update.name);
                couple.image.clone_from(&update.image);
            }
            Ok(doc.couples.clone())
        })
        .await
    }
}

async fn write_document(path: &Path, document: &Snapshot) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let written = match tokio::fs::write(&tmp, &bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(source));
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote database file");
    Ok(())
}

#[derive(Debug, FromRow)]
struct CoupleRow {
    id: i64,
    name: String,
    image: String,
    votes: i64,
}

impl TryFrom<CoupleRow> for Couple {
    type Error = StoreError;

    fn try_from(row: CoupleRow) -> Result<Self, Self::Error> {
        let votes = u64::try_from(row.votes)
            .map_err(|_| StoreError::Corrupt(format!("couple {} has {} votes", row.id, row.votes)))?;
        Ok(Self {
            id: row.id,
            name: row.name,
            image: row.image,
            votes,
        })
    }
}

fn into_couples(rows: Vec<CoupleRow>) -> Result<Vec<Couple>, StoreError> {
    rows.into_iter().map(Couple::try_from).collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &SecretString, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url.expose_secret())
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS couples (
                id BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                image TEXT NOT NULL DEFAULT '',
                votes BIGINT NOT NULL DEFAULT 0 CHECK (votes >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                singleton BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
                results_visible BOOLEAN NOT NULL DEFAULT FALSE,
                last_reset BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT INTO settings (singleton) VALUES (TRUE) ON CONFLICT DO NOTHING")
            .execute(&self.pool)
            .await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM couples")
            .fetch_one(&self.pool)
            .await?;

        if count == 0 {
            let mut tx = self.pool.begin().await?;
            for couple in seed_roster() {
                sqlx::query(
                    "INSERT INTO couples (id, name, image, votes) VALUES ($1, $2, $3, 0) ON CONFLICT (id) DO NOTHING",
                )
                .bind(couple.id)
                .bind(&couple.name)
                .bind(&couple.image)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            info!("Seeded couples table");
        }

        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query_as::<_, CoupleRow>(
            "SELECT id, name, image, votes FROM couples ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let (results_visible, last_reset): (bool, i64) =
            sqlx::query_as("SELECT results_visible, last_reset FROM settings")
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(Snapshot {
            couples: into_couples(rows)?,
            results_visible,
            last_reset,
        })
    }

    async fn increment_votes(&self, couple_id: i64) -> Result<Option<Couple>, StoreError> {
        sqlx::query_as::<_, CoupleRow>(
            "UPDATE couples SET votes = votes + 1 WHERE id = $1 RETURNING id, name, image, votes",
        )
        .bind(couple_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Couple::try_from)
        .transpose()
    }

    async fn reset_votes(&self) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock the settings row first so concurrent resets queue up.
        let (previous,): (i64,) = sqlx::query_as("SELECT last_reset FROM settings FOR UPDATE")
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE couples SET votes = 0")
            .execute(&mut *tx)
            .await?;

        let last_reset = next_reset_timestamp(previous);
        sqlx::query("UPDATE settings SET last_reset = $1")
            .bind(last_reset)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(last_reset)
    }

    async fn toggle_results(&self) -> Result<bool, StoreError> {
        let (visible,): (bool,) = sqlx::query_as(
            "UPDATE settings SET results_visible = NOT results_visible RETURNING results_visible",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(visible)
    }

    async fn update_metadata(&self, updates: &[CoupleUpdate]) -> Result<Vec<Couple>, StoreError> {
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let result = sqlx::query("UPDATE couples SET name = $2, image = $3 WHERE id = $1")
                .bind(update.id)
                .bind(&update.name)
                .bind(&update.image)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back the earlier rows.
                return Err(StoreError::UnknownCouple(update.id));
            }
        }

        let rows = sqlx::query_as::<_, CoupleRow>(
            "SELECT id, name, image, votes FROM couples ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        into_couples(rows)
    }
}
