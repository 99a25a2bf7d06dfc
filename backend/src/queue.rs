//! # Job Queue
//!
//! Hands out positions to workers and takes their evaluations back.
//!
//! ## Job dispatch
//!
//! `get_job` pops the shared queue. An empty queue is not an error: it
//! starts a detached refill and tells the caller to come back later, so a
//! slow store never delays the request that noticed the shortage.
//!
//! ## Refill
//!
//! 1. Take the single-flight lock, or return [`RefillOutcome::AlreadyRunning`].
//! 2. Read the level statistics and pick the learnable disc counts.
//! 3. Collect positions leased to live clients.
//! 4. Sample uncomputed positions per disc count, fewest discs first, up to
//!    the batch size in total.
//! 5. Replace the queue with the shuffled batch.
//!
//! ## Submission
//!
//! Evaluations are written under the store's level rule and the resulting
//! level changes are folded into the statistics in one atomic batch.

use std::sync::Arc;

use othello_board::{Evaluation, Job, NormalizedPosition};
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BookConfig;
use crate::error::BackendResult;
use crate::kv::KeyValueStore;
use crate::lease::{ClientLease, Lease};
use crate::lock::SingleFlightLock;
use crate::seed;
use crate::stats::{target_level, BookStats, StatsCache};
use crate::store::BookStore;

/// Result of a refill attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Another refresher holds the lock; nothing was written
    AlreadyRunning,
    /// The queue now holds `queued` positions
    Refilled { queued: usize },
}

struct QueueInner {
    config: BookConfig,
    kv: Arc<dyn KeyValueStore>,
    book: Arc<dyn BookStore>,
    leases: Lease,
    refill_lock: SingleFlightLock,
    stats: StatsCache,
}

/// Shared job queue over a key-value store and a book store
#[derive(Clone)]
pub struct BookQueue {
    inner: Arc<QueueInner>,
}

impl BookQueue {
    pub fn new(config: BookConfig, kv: Arc<dyn KeyValueStore>, book: Arc<dyn BookStore>) -> Self {
        let leases = Lease::new(Arc::clone(&kv), config.clients_key.clone(), config.lease_ttl);
        let refill_lock = SingleFlightLock::new(
            Arc::clone(&kv),
            config.refill_lock_key.clone(),
            config.refill_lock_ttl,
        );
        let stats = StatsCache::new(Arc::clone(&kv), config.stats_key.clone());
        Self {
            inner: Arc::new(QueueInner {
                config,
                kv,
                book,
                leases,
                refill_lock,
                stats,
            }),
        }
    }

    pub fn config(&self) -> &BookConfig {
        &self.inner.config
    }

    pub async fn register_client(
        &self,
        hostname: &str,
        git_commit: Option<&str>,
    ) -> BackendResult<ClientLease> {
        let lease = self.inner.leases.register(hostname, git_commit).await?;
        info!(client_id = %lease.client_id, hostname, "client registered");
        Ok(lease)
    }

    pub async fn heartbeat(&self, client_id: Uuid) -> BackendResult<ClientLease> {
        self.inner.leases.heartbeat(client_id).await
    }

    pub async fn active_clients(&self) -> BackendResult<Vec<ClientLease>> {
        self.inner.leases.active().await
    }

    /// Next job for `client_id`, or `None` to retry later
    pub async fn get_job(&self, client_id: Uuid) -> BackendResult<Option<Job>> {
        self.inner.leases.get(client_id).await?;

        let Some(text) = self.inner.kv.list_pop_front(&self.inner.config.queue_key).await? else {
            debug!(%client_id, "queue empty, refill triggered");
            self.trigger_refill();
            return Ok(None);
        };

        let position = NormalizedPosition::from_hex(&text)?;
        if let Err(err) = self.inner.leases.assign(client_id, position).await {
            // Not leased to anyone, so it goes back for the next caller
            self.inner
                .kv
                .list_push_front(&self.inner.config.queue_key, &text, self.inner.config.queue_ttl)
                .await?;
            return Err(err);
        }
        let disc_count = position.count_discs();
        let level = target_level(disc_count);
        debug!(%client_id, %position, disc_count, level, "job assigned");
        Ok(Some(Job { position, level }))
    }

    /// Run a refill in the background, bounded by the refill timeout
    pub fn trigger_refill(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let timeout = queue.inner.config.refill_timeout;
            match tokio::time::timeout(timeout, queue.refill()).await {
                Ok(Ok(outcome)) => debug!(?outcome, "background refill done"),
                Ok(Err(err)) => warn!(error = %err, "background refill failed"),
                Err(_) => warn!(?timeout, "background refill timed out"),
            }
        })
    }

    /// Replace the queue with a fresh batch of learnable positions
    pub async fn refill(&self) -> BackendResult<RefillOutcome> {
        let Some(guard) = self.inner.refill_lock.try_acquire().await? else {
            return Ok(RefillOutcome::AlreadyRunning);
        };
        let filled = self.fill_queue().await;
        guard.release().await?;
        let queued = filled?;
        info!(queued, "queue refilled");
        Ok(RefillOutcome::Refilled { queued })
    }

    async fn fill_queue(&self) -> BackendResult<usize> {
        let inner = &*self.inner;
        let stats = inner.stats.get(&*inner.book).await?;
        let leased = inner.leases.leased_positions().await?;

        let mut batch = Vec::new();
        for disc_count in stats.learnable_disc_counts() {
            let remaining = inner.config.batch_size.saturating_sub(batch.len());
            if remaining == 0 {
                break;
            }
            let sampled = inner
                .book
                .sample_uncomputed(disc_count, target_level(disc_count), remaining, &leased)
                .await?;
            debug!(disc_count, sampled = sampled.len(), "sampled learnable positions");
            batch.extend(sampled);
        }

        batch.shuffle(&mut rand::rng());
        let values: Vec<String> = batch.iter().map(|position| position.to_hex()).collect();
        inner
            .kv
            .list_replace(&inner.config.queue_key, &values, inner.config.queue_ttl)
            .await?;
        Ok(values.len())
    }

    /// Clear the client's assignment without crediting a result
    pub async fn release_job(&self, client_id: Uuid) -> BackendResult<ClientLease> {
        let lease = self.inner.leases.complete(client_id, 0).await?;
        debug!(%client_id, "job released");
        Ok(lease)
    }

    /// Store a client's results and release its lease position
    ///
    /// Returns how many stored rows changed level.
    pub async fn submit(&self, client_id: Uuid, results: &[Evaluation]) -> BackendResult<usize> {
        self.inner.leases.get(client_id).await?;
        for evaluation in results {
            evaluation.validate()?;
        }

        let changes = self.inner.book.upsert_evaluations(results).await?;
        self.inner.stats.apply(&changes).await?;
        self.inner
            .leases
            .complete(client_id, results.len() as u64)
            .await?;
        info!(
            %client_id,
            submitted = results.len(),
            changed = changes.len(),
            "results submitted"
        );
        Ok(changes.len())
    }

    pub async fn stats(&self) -> BackendResult<BookStats> {
        self.inner.stats.get(&*self.inner.book).await
    }

    pub async fn lookup(&self, position: NormalizedPosition) -> BackendResult<Option<Evaluation>> {
        self.inner.book.lookup(position).await
    }

    pub async fn queue_len(&self) -> BackendResult<usize> {
        self.inner.kv.list_len(&self.inner.config.queue_key).await
    }

    /// Add every position up to `max_discs` discs to the book
    ///
    /// Returns how many were new.
    pub async fn seed(&self, max_discs: u32) -> BackendResult<u64> {
        let positions = seed::explore(max_discs);
        let inserted = self.inner.book.add_positions(&positions).await?;
        self.inner.stats.invalidate().await?;
        info!(max_discs, explored = positions.len(), inserted, "book seeded");
        Ok(inserted)
    }
}
