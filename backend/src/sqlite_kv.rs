//! # SQLite Key-Value Store
//!
//! A [`KeyValueStore`] in the book's own database, so every process opened
//! on the same file shares one queue, one set of leases and one refill lock.
//!
//! Each live key has a row in `kv_keys` naming its type. List elements and
//! hash fields live in `kv_list` and `kv_hash`. Expiry is wall-clock
//! milliseconds because the processes share no monotonic clock. Expired keys
//! are ignored by reads and dropped by the next write that touches them.
//!
//! Every method runs in one transaction. Writing transactions start with a
//! write statement, so SQLite hands out the write lock before anything is
//! read and concurrent writers queue on the busy timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::error::{BackendError, BackendResult};
use crate::kv::{wrong_type, KeyValueStore};
use crate::store::memory_pool;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_keys (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    value TEXT,
    expires_at INTEGER
);
CREATE TABLE IF NOT EXISTS kv_list (
    key TEXT NOT NULL,
    seq INTEGER NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, seq)
);
CREATE TABLE IF NOT EXISTS kv_hash (
    key TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (key, field)
);";

const TEXT: &str = "text";
const LIST: &str = "list";
const HASH: &str = "hash";

/// [`KeyValueStore`] shared through a SQLite database
#[derive(Clone, Debug)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Use `pool`, creating the key-value tables if needed
    pub async fn from_pool(pool: SqlitePool) -> BackendResult<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database
    pub async fn in_memory() -> BackendResult<Self> {
        Self::from_pool(memory_pool().await?).await
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Drop `key` if it has expired
async fn purge_expired(conn: &mut SqliteConnection, key: &str) -> BackendResult<()> {
    let expired = sqlx::query("DELETE FROM kv_keys WHERE key = ? AND expires_at <= ?")
        .bind(key)
        .bind(now_millis())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if expired > 0 {
        drop_contents(conn, key).await?;
    }
    Ok(())
}

async fn drop_contents(conn: &mut SqliteConnection, key: &str) -> BackendResult<()> {
    sqlx::query("DELETE FROM kv_list WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM kv_hash WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Remove `key` with its contents; `true` when it existed
async fn drop_key(conn: &mut SqliteConnection, key: &str) -> BackendResult<bool> {
    let deleted = sqlx::query("DELETE FROM kv_keys WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    drop_contents(conn, key).await?;
    Ok(deleted > 0)
}

/// Type of the live value under `key`
async fn live_kind(conn: &mut SqliteConnection, key: &str) -> BackendResult<Option<String>> {
    Ok(sqlx::query_scalar(
        "SELECT kind FROM kv_keys WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(key)
    .bind(now_millis())
    .fetch_optional(&mut *conn)
    .await?)
}

/// `true` when `key` holds a live `expected`, `false` when it is absent
async fn holds(conn: &mut SqliteConnection, key: &str, expected: &str) -> BackendResult<bool> {
    match live_kind(conn, key).await?.as_deref() {
        None => Ok(false),
        Some(kind) if kind == expected => Ok(true),
        Some(_) => Err(wrong_type(key, expected)),
    }
}

async fn insert_key(
    conn: &mut SqliteConnection,
    key: &str,
    kind: &str,
    value: Option<&str>,
    expires_at: Option<i64>,
) -> BackendResult<()> {
    sqlx::query("INSERT INTO kv_keys (key, kind, value, expires_at) VALUES (?, ?, ?, ?)")
        .bind(key)
        .bind(kind)
        .bind(value)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn set_field(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
    value: &str,
) -> BackendResult<()> {
    sqlx::query(
        "INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
         ON CONFLICT (key, field) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(field)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn list_pop_front(&self, key: &str) -> BackendResult<Option<String>> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        if !holds(&mut tx, key, LIST).await? {
            tx.commit().await?;
            return Ok(None);
        }

        let front: Option<(i64, String)> =
            sqlx::query_as("SELECT seq, value FROM kv_list WHERE key = ? ORDER BY seq LIMIT 1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((seq, value)) = front else {
            drop_key(&mut tx, key).await?;
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM kv_list WHERE key = ? AND seq = ?")
            .bind(key)
            .bind(seq)
            .execute(&mut *tx)
            .await?;
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_list WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        if remaining == 0 {
            drop_key(&mut tx, key).await?;
        }
        tx.commit().await?;
        Ok(Some(value))
    }

    async fn list_replace(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> BackendResult<()> {
        let mut tx = self.pool.begin().await?;
        drop_key(&mut tx, key).await?;
        if !values.is_empty() {
            insert_key(&mut tx, key, LIST, None, Some(expiry(ttl))).await?;
            for (seq, value) in values.iter().enumerate() {
                sqlx::query("INSERT INTO kv_list (key, seq, value) VALUES (?, ?, ?)")
                    .bind(key)
                    .bind(seq as i64)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_push_front(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        if !holds(&mut tx, key, LIST).await? {
            insert_key(&mut tx, key, LIST, None, Some(expiry(ttl))).await?;
        }
        let first: Option<i64> = sqlx::query_scalar("SELECT MIN(seq) FROM kv_list WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO kv_list (key, seq, value) VALUES (?, ?, ?)")
            .bind(key)
            .bind(first.map_or(0, |seq| seq - 1))
            .bind(value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_len(&self, key: &str) -> BackendResult<usize> {
        let mut tx = self.pool.begin().await?;
        if !holds(&mut tx, key, LIST).await? {
            return Ok(0);
        }
        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_list WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        Ok(len as usize)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        if live_kind(&mut tx, key).await?.is_some() {
            tx.commit().await?;
            return Ok(false);
        }
        insert_key(&mut tx, key, TEXT, Some(value), Some(expiry(ttl))).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        let deleted = drop_key(&mut tx, key).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM kv_keys WHERE key = ? AND kind = ?")
                .bind(key)
                .bind(TEXT)
                .fetch_optional(&mut *tx)
                .await?;
        let deleted = current.flatten().as_deref() == Some(expected);
        if deleted {
            drop_key(&mut tx, key).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Ok(live_kind(&mut conn, key).await?.is_some())
    }

    async fn hash_get(&self, key: &str, field: &str) -> BackendResult<Option<String>> {
        let mut tx = self.pool.begin().await?;
        if !holds(&mut tx, key, HASH).await? {
            return Ok(None);
        }
        Ok(
            sqlx::query_scalar("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
                .bind(key)
                .bind(field)
                .fetch_optional(&mut *tx)
                .await?,
        )
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        let mut tx = self.pool.begin().await?;
        if !holds(&mut tx, key, HASH).await? {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT field, value FROM kv_hash WHERE key = ?")
                .bind(key)
                .fetch_all(&mut *tx)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> BackendResult<()> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        if holds(&mut tx, key, HASH).await? {
            sqlx::query("UPDATE kv_keys SET expires_at = ? WHERE key = ?")
                .bind(expiry(ttl))
                .bind(key)
                .execute(&mut *tx)
                .await?;
        } else {
            insert_key(&mut tx, key, HASH, None, Some(expiry(ttl))).await?;
        }
        set_field(&mut tx, key, field, value).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn hash_replace(
        &self,
        key: &str,
        entries: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        let mut tx = self.pool.begin().await?;
        drop_key(&mut tx, key).await?;
        insert_key(&mut tx, key, HASH, None, ttl.map(expiry)).await?;
        for (field, value) in &entries {
            set_field(&mut tx, key, field, value).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn hash_increment_existing(
        &self,
        key: &str,
        increments: &[(String, i64)],
    ) -> BackendResult<bool> {
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, key).await?;
        if !holds(&mut tx, key, HASH).await? {
            tx.commit().await?;
            return Ok(false);
        }

        // An error drops `tx`, which rolls every earlier increment back
        for (field, delta) in increments {
            let current: Option<String> =
                sqlx::query_scalar("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
                    .bind(key)
                    .bind(field)
                    .fetch_optional(&mut *tx)
                    .await?;
            let current = match current {
                Some(text) => text.parse::<i64>().map_err(|_| {
                    BackendError::key_value(
                        key,
                        format!("field {field} is not an integer"),
                    )
                })?,
                None => 0,
            };
            let updated = current + delta;
            if updated > 0 {
                set_field(&mut tx, key, field, &updated.to_string()).await?;
            } else {
                sqlx::query("DELETE FROM kv_hash WHERE key = ? AND field = ?")
                    .bind(key)
                    .bind(field)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(true)
    }
}
