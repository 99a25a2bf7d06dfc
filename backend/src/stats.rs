//! # Level Statistics
//!
//! How many book positions sit at each `(disc count, level)` pair. The
//! aggregate lives in a shared hash with fields `"{discs}:{level}"` and is
//! kept current by folding the level changes of every submission into it
//! as signed increments, so the refill path never scans the table.
//!
//! The hash is cache-aside: when it is missing it is rebuilt once from a
//! full grouped count over the store. Increments against a missing hash are
//! dropped, since the next rebuild already reflects them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BackendError, BackendResult};
use crate::kv::KeyValueStore;
use crate::store::{BookStore, LevelChange, LevelCount};

/// Level the book wants for positions with `disc_count` discs
///
/// Positions closer to the end are cheaper to search, so they are searched
/// harder.
pub fn target_level(disc_count: u32) -> u32 {
    match disc_count {
        0..=9 => 44,
        10..=13 => 40,
        14..=16 => 36,
        17..=20 => 34,
        _ => 32,
    }
}

/// Snapshot of the `(disc count, level) -> positions` aggregate
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookStats {
    counts: BTreeMap<(u32, u32), u64>,
}

impl BookStats {
    pub fn from_counts(counts: impl IntoIterator<Item = LevelCount>) -> Self {
        let mut stats = BookStats::default();
        for count in counts {
            if count.count > 0 {
                *stats
                    .counts
                    .entry((count.disc_count, count.level))
                    .or_default() += count.count;
            }
        }
        stats
    }

    fn from_hash(key: &str, hash: &HashMap<String, String>) -> BackendResult<Self> {
        let mut counts = BTreeMap::new();
        for (field, value) in hash {
            let bucket = parse_field(field)
                .ok_or_else(|| BackendError::key_value(key, format!("bad stats field {field}")))?;
            let count = value
                .parse::<u64>()
                .map_err(|_| BackendError::key_value(key, format!("bad count for {field}")))?;
            if count > 0 {
                counts.insert(bucket, count);
            }
        }
        Ok(BookStats { counts })
    }

    fn to_hash(&self) -> HashMap<String, String> {
        self.counts
            .iter()
            .map(|(&(discs, level), count)| (field(discs, level), count.to_string()))
            .collect()
    }

    pub fn count(&self, disc_count: u32, level: u32) -> u64 {
        self.counts.get(&(disc_count, level)).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// `(disc count, level, positions)` in ascending order
    pub fn rows(&self) -> impl Iterator<Item = (u32, u32, u64)> + '_ {
        self.counts
            .iter()
            .map(|(&(discs, level), &count)| (discs, level, count))
    }

    /// Disc counts that still hold positions below their target level,
    /// ascending
    ///
    /// This looks at every bucket, not at the highest level reached: a disc
    /// count with one position at its target and others below it stays
    /// learnable.
    pub fn learnable_disc_counts(&self) -> Vec<u32> {
        let mut learnable: Vec<u32> = self
            .rows()
            .filter(|&(discs, level, _)| level < target_level(discs))
            .map(|(discs, _, _)| discs)
            .collect();
        learnable.dedup();
        learnable
    }
}

fn field(disc_count: u32, level: u32) -> String {
    format!("{disc_count}:{level}")
}

fn parse_field(field: &str) -> Option<(u32, u32)> {
    let (discs, level) = field.split_once(':')?;
    Some((discs.parse().ok()?, level.parse().ok()?))
}

/// Signed bucket deltas for a batch of level changes
fn increments(changes: &[LevelChange]) -> Vec<(String, i64)> {
    let mut deltas: BTreeMap<(u32, u32), i64> = BTreeMap::new();
    for change in changes {
        if let Some(old_level) = change.old_level {
            *deltas.entry((change.disc_count, old_level)).or_default() -= 1;
        }
        *deltas.entry((change.disc_count, change.new_level)).or_default() += 1;
    }
    deltas
        .into_iter()
        .filter(|&(_, delta)| delta != 0)
        .map(|((discs, level), delta)| (field(discs, level), delta))
        .collect()
}

/// Cache-aside access to the shared statistics hash
pub struct StatsCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
    rebuild: Mutex<()>,
}

impl StatsCache {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            rebuild: Mutex::new(()),
        }
    }

    /// Current statistics, rebuilding from `book` when the hash is missing
    pub async fn get(&self, book: &dyn BookStore) -> BackendResult<BookStats> {
        if let Some(stats) = self.cached().await? {
            return Ok(stats);
        }

        let _guard = self.rebuild.lock().await;
        // Another caller may have rebuilt while we waited
        if let Some(stats) = self.cached().await? {
            return Ok(stats);
        }

        let stats = BookStats::from_counts(book.level_counts().await?);
        self.store.hash_replace(&self.key, stats.to_hash(), None).await?;
        info!(positions = stats.total(), "stats rebuilt from store");
        Ok(stats)
    }

    /// Fold submitted level changes into the hash in one atomic step
    pub async fn apply(&self, changes: &[LevelChange]) -> BackendResult<()> {
        let deltas = increments(changes);
        if deltas.is_empty() {
            return Ok(());
        }
        if !self
            .store
            .hash_increment_existing(&self.key, &deltas)
            .await?
        {
            debug!(changes = changes.len(), "stats not cached, increments dropped");
        }
        Ok(())
    }

    /// Drop the cached hash so the next `get` rebuilds
    pub async fn invalidate(&self) -> BackendResult<()> {
        if self.store.delete(&self.key).await? {
            debug!("stats invalidated");
        }
        Ok(())
    }

    async fn cached(&self) -> BackendResult<Option<BookStats>> {
        if !self.store.exists(&self.key).await? {
            return Ok(None);
        }
        let hash = self.store.hash_get_all(&self.key).await?;
        match BookStats::from_hash(&self.key, &hash) {
            Ok(stats) => Ok(Some(stats)),
            Err(err) => {
                warn!(error = %err, "discarding corrupt stats");
                self.store.delete(&self.key).await?;
                Ok(None)
            }
        }
    }
}
