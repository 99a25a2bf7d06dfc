//! # Evaluation Store
//!
//! The authoritative book: one row per canonical position, keyed by its
//! 16-byte encoding. Seeded rows start at level 0, meaning not yet
//! computed. A submitted evaluation replaces a row only when its level is
//! strictly higher than the stored one, and the store reports each row it
//! changed so the statistics can follow along.
//!
//! ## Schema
//!
//! ```sql
//! evaluations (
//!     position    BLOB PRIMARY KEY,   -- NormalizedPosition::to_bytes
//!     disc_count  INTEGER NOT NULL,
//!     level       INTEGER NOT NULL,   -- 0 = uncomputed
//!     depth       INTEGER NOT NULL,
//!     confidence  INTEGER NOT NULL,
//!     score       INTEGER NOT NULL,
//!     best_moves  TEXT NOT NULL       -- JSON array of square indices
//! )
//! ```

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use othello_board::{Evaluation, Move, NormalizedPosition};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::BackendResult;

/// A row whose level moved because of a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub disc_count: u32,
    /// `None` when the row did not exist before
    pub old_level: Option<u32>,
    pub new_level: u32,
}

/// One bucket of the grouped level count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelCount {
    pub disc_count: u32,
    pub level: u32,
    pub count: u64,
}

/// Durable storage for book evaluations
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Insert uncomputed rows, ignoring positions already present
    ///
    /// Returns how many rows were inserted.
    async fn add_positions(&self, positions: &[NormalizedPosition]) -> BackendResult<u64>;

    /// Up to `limit` random positions with `disc_count` discs and a level
    /// below `below_level`, skipping `exclude`
    async fn sample_uncomputed(
        &self,
        disc_count: u32,
        below_level: u32,
        limit: usize,
        exclude: &HashSet<NormalizedPosition>,
    ) -> BackendResult<Vec<NormalizedPosition>>;

    /// Write evaluations whose level beats the stored one
    async fn upsert_evaluations(&self, evaluations: &[Evaluation])
        -> BackendResult<Vec<LevelChange>>;

    /// Row counts grouped by disc count and level
    async fn level_counts(&self) -> BackendResult<Vec<LevelCount>>;

    /// Stored evaluation; `None` when absent or still uncomputed
    async fn lookup(&self, position: NormalizedPosition) -> BackendResult<Option<Evaluation>>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS evaluations (
    position BLOB PRIMARY KEY,
    disc_count INTEGER NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    depth INTEGER NOT NULL DEFAULT 0,
    confidence INTEGER NOT NULL DEFAULT 0,
    score INTEGER NOT NULL DEFAULT 0,
    best_moves TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS evaluations_disc_level ON evaluations (disc_count, level);";

/// [`BookStore`] backed by SQLite through sqlx
#[derive(Clone, Debug)]
pub struct SqliteBookStore {
    pool: SqlitePool,
}

impl SqliteBookStore {
    /// Open (creating if missing) the database at `database_url`
    pub async fn connect(database_url: &str) -> BackendResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self::from_pool(pool).await?;
        info!(database_url, "book store connected");
        Ok(store)
    }

    /// Private in-memory database
    pub async fn in_memory() -> BackendResult<Self> {
        Self::from_pool(memory_pool().await?).await
    }

    pub async fn from_pool(pool: SqlitePool) -> BackendResult<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Pool over a private in-memory database
pub(crate) async fn memory_pool() -> BackendResult<SqlitePool> {
    // Every connection to :memory: is its own database, so keep exactly one
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?)
}

type EvaluationRow = (i64, i64, i64, i64, String);

fn decode_row(position: NormalizedPosition, row: EvaluationRow) -> BackendResult<Evaluation> {
    let (level, depth, confidence, score, best_moves) = row;
    let best_moves = serde_json::from_str::<Vec<u8>>(&best_moves)?
        .into_iter()
        .map(Move::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Evaluation::new(
        position,
        level as u32,
        depth as u32,
        confidence as u32,
        score as i32,
        best_moves,
    )?)
}

fn encode_moves(moves: &[Move]) -> BackendResult<String> {
    let indices: Vec<u8> = moves.iter().map(|&mv| u8::from(mv)).collect();
    Ok(serde_json::to_string(&indices)?)
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn add_positions(&self, positions: &[NormalizedPosition]) -> BackendResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for position in positions {
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO evaluations (position, disc_count) VALUES (?, ?)",
            )
            .bind(position.to_bytes().to_vec())
            .bind(i64::from(position.count_discs()))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        debug!(inserted, offered = positions.len(), "positions added");
        Ok(inserted)
    }

    async fn sample_uncomputed(
        &self,
        disc_count: u32,
        below_level: u32,
        limit: usize,
        exclude: &HashSet<NormalizedPosition>,
    ) -> BackendResult<Vec<NormalizedPosition>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // Over-fetch by the exclusion set so filtering cannot starve the batch
        let fetch = limit.saturating_add(exclude.len());
        let rows: Vec<Vec<u8>> = sqlx::query_scalar(
            "SELECT position FROM evaluations
             WHERE disc_count = ? AND level < ?
             ORDER BY RANDOM() LIMIT ?",
        )
        .bind(i64::from(disc_count))
        .bind(i64::from(below_level))
        .bind(i64::try_from(fetch).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut sampled = Vec::with_capacity(limit.min(rows.len()));
        for bytes in rows {
            let position = NormalizedPosition::from_bytes(&bytes)?;
            if !exclude.contains(&position) {
                sampled.push(position);
                if sampled.len() == limit {
                    break;
                }
            }
        }
        Ok(sampled)
    }

    async fn upsert_evaluations(
        &self,
        evaluations: &[Evaluation],
    ) -> BackendResult<Vec<LevelChange>> {
        let mut tx = self.pool.begin().await?;
        let mut changes = Vec::new();

        for evaluation in evaluations {
            let key = evaluation.position.to_bytes().to_vec();
            let old_level: Option<i64> =
                sqlx::query_scalar("SELECT level FROM evaluations WHERE position = ?")
                    .bind(&key)
                    .fetch_optional(&mut *tx)
                    .await?;
            let old_level = old_level.map(|level| level as u32);

            if old_level.is_some_and(|stored| !evaluation.outranks_level(stored)) {
                continue;
            }

            let written = sqlx::query(
                "INSERT INTO evaluations
                     (position, disc_count, level, depth, confidence, score, best_moves)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (position) DO UPDATE SET
                     level = excluded.level,
                     depth = excluded.depth,
                     confidence = excluded.confidence,
                     score = excluded.score,
                     best_moves = excluded.best_moves
                 WHERE excluded.level > evaluations.level",
            )
            .bind(&key)
            .bind(i64::from(evaluation.disc_count()))
            .bind(i64::from(evaluation.level))
            .bind(i64::from(evaluation.depth))
            .bind(i64::from(evaluation.confidence))
            .bind(i64::from(evaluation.score))
            .bind(encode_moves(&evaluation.best_moves)?)
            .execute(&mut *tx)
            .await?;

            if written.rows_affected() > 0 {
                changes.push(LevelChange {
                    disc_count: evaluation.disc_count(),
                    old_level,
                    new_level: evaluation.level,
                });
            }
        }

        tx.commit().await?;
        debug!(
            submitted = evaluations.len(),
            changed = changes.len(),
            "evaluations upserted"
        );
        Ok(changes)
    }

    async fn level_counts(&self) -> BackendResult<Vec<LevelCount>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT disc_count, level, COUNT(*) FROM evaluations GROUP BY disc_count, level",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(disc_count, level, count)| LevelCount {
                disc_count: disc_count as u32,
                level: level as u32,
                count: count as u64,
            })
            .collect())
    }

    async fn lookup(&self, position: NormalizedPosition) -> BackendResult<Option<Evaluation>> {
        let row: Option<EvaluationRow> = sqlx::query_as(
            "SELECT level, depth, confidence, score, best_moves
             FROM evaluations WHERE position = ? AND level > 0",
        )
        .bind(position.to_bytes().to_vec())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| decode_row(position, row)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_evaluation(level: u32, score: i32) -> Evaluation {
        Evaluation::new(
            NormalizedPosition::start(),
            level,
            level,
            100,
            score,
            vec!["d3".parse().unwrap()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_seeded_rows_are_uncomputed() {
        let store = SqliteBookStore::in_memory().await.unwrap();
        let start = NormalizedPosition::start();
        assert_eq!(store.add_positions(&[start]).await.unwrap(), 1);
        assert_eq!(store.add_positions(&[start]).await.unwrap(), 0, "duplicate ignored");

        assert_eq!(store.lookup(start).await.unwrap(), None);
        assert_eq!(
            store.level_counts().await.unwrap(),
            vec![LevelCount {
                disc_count: 4,
                level: 0,
                count: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_upsert_requires_higher_level() {
        let store = SqliteBookStore::in_memory().await.unwrap();
        store.add_positions(&[NormalizedPosition::start()]).await.unwrap();

        let changes = store.upsert_evaluations(&[start_evaluation(30, 2)]).await.unwrap();
        assert_eq!(
            changes,
            vec![LevelChange {
                disc_count: 4,
                old_level: Some(0),
                new_level: 30
            }]
        );

        let same = store.upsert_evaluations(&[start_evaluation(30, 8)]).await.unwrap();
        assert!(same.is_empty(), "equal level does not overwrite");
        let stored = store.lookup(NormalizedPosition::start()).await.unwrap().unwrap();
        assert_eq!(stored.score, 2);
        assert_eq!(stored.best_moves, vec!["d3".parse::<Move>().unwrap()]);
    }

    #[tokio::test]
    async fn test_upsert_inserts_unknown_position() {
        let store = SqliteBookStore::in_memory().await.unwrap();
        let changes = store.upsert_evaluations(&[start_evaluation(12, 0)]).await.unwrap();
        assert_eq!(changes[0].old_level, None);
        assert!(store.lookup(NormalizedPosition::start()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sample_respects_level_and_exclusions() {
        let store = SqliteBookStore::in_memory().await.unwrap();
        let start = NormalizedPosition::start();
        store.add_positions(&[start]).await.unwrap();

        let none_excluded = HashSet::new();
        let sampled = store.sample_uncomputed(4, 44, 10, &none_excluded).await.unwrap();
        assert_eq!(sampled, vec![start]);

        let excluded = HashSet::from([start]);
        assert!(store.sample_uncomputed(4, 44, 10, &excluded).await.unwrap().is_empty());
        assert!(store.sample_uncomputed(5, 44, 10, &none_excluded).await.unwrap().is_empty());

        store.upsert_evaluations(&[start_evaluation(44, 0)]).await.unwrap();
        assert!(
            store.sample_uncomputed(4, 44, 10, &none_excluded).await.unwrap().is_empty(),
            "positions at target level are done"
        );
    }
}
