//! Queue flow tests
//!
//! Runs the queue against the in-memory key-value store and an in-memory
//! SQLite book.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backend::{
    BackendError, BackendResult, BookConfig, BookQueue, BookStore, KeyValueStore, LevelChange,
    LevelCount, MemoryStore, RefillOutcome, SingleFlightLock, SqliteBookStore,
};
use othello_board::{Evaluation, NormalizedPosition};

struct Harness {
    kv: Arc<MemoryStore>,
    queue: BookQueue,
}

async fn harness(config: BookConfig) -> Harness {
    let kv = Arc::new(MemoryStore::new());
    let book = Arc::new(SqliteBookStore::in_memory().await.expect("in-memory book"));
    let queue = BookQueue::new(config, kv.clone(), book);
    Harness { kv, queue }
}

/// The canonical position after the first move
fn first_reply() -> NormalizedPosition {
    backend::seed::explore(5)
        .into_iter()
        .find(|position| position.count_discs() == 5)
        .expect("one position with five discs")
}

fn evaluation(position: NormalizedPosition, level: u32, score: i32) -> Evaluation {
    Evaluation::new(position, level, level, 100, score, Vec::new()).unwrap()
}

#[tokio::test]
async fn test_submission_moves_stats_buckets() {
    let Harness { queue, .. } = harness(BookConfig::default()).await;
    queue.seed(5).await.unwrap();
    let client = queue.register_client("test-host", None).await.unwrap().client_id;
    let position = first_reply();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.count(5, 0), 1, "seeded rows are level 0");

    assert_eq!(queue.submit(client, &[evaluation(position, 30, 4)]).await.unwrap(), 1);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.count(5, 0), 0);
    assert_eq!(stats.count(5, 30), 1);

    assert_eq!(queue.submit(client, &[evaluation(position, 50, 6)]).await.unwrap(), 1);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.count(5, 30), 0, "old bucket decremented");
    assert_eq!(stats.count(5, 50), 1, "new bucket incremented");

    assert_eq!(queue.submit(client, &[evaluation(position, 10, -8)]).await.unwrap(), 0);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.count(5, 50), 1, "lower level changes nothing");
    assert_eq!(stats.count(5, 10), 0);

    let stored = queue.lookup(position).await.unwrap().expect("stored row");
    assert_eq!(stored.level, 50);
    assert_eq!(stored.score, 6);
}

#[tokio::test]
async fn test_refill_is_single_flight() {
    let config = BookConfig::default();
    let Harness { kv, queue } = harness(config.clone()).await;
    queue.seed(6).await.unwrap();

    let store: Arc<dyn KeyValueStore> = kv.clone();
    let other_refresher = SingleFlightLock::new(store, config.refill_lock_key, config.refill_lock_ttl);
    let held = other_refresher.try_acquire().await.unwrap().expect("lock is free");

    let writes = kv.write_count();
    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::AlreadyRunning);
    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::AlreadyRunning);
    assert_eq!(kv.write_count(), writes, "a blocked refill writes nothing");
    assert_eq!(queue.queue_len().await.unwrap(), 0);

    held.release().await.unwrap();
    assert_eq!(
        queue.refill().await.unwrap(),
        RefillOutcome::Refilled { queued: 5 }
    );
}

#[tokio::test]
async fn test_refill_replaces_queue_and_skips_leased() {
    let Harness { queue, .. } = harness(BookConfig::default()).await;
    queue.seed(6).await.unwrap();
    let client = queue.register_client("test-host", None).await.unwrap().client_id;

    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::Refilled { queued: 5 });
    let job = queue.get_job(client).await.unwrap().expect("queued job");
    assert_eq!(job.level, 44);
    assert_eq!(queue.queue_len().await.unwrap(), 4);

    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::Refilled { queued: 4 });
    assert_eq!(queue.queue_len().await.unwrap(), 4, "refill replaces, never appends");

    let mut handed_out = Vec::new();
    while let Some(next) = queue.get_job(client).await.unwrap() {
        handed_out.push(next.position);
        if handed_out.len() == 4 {
            break;
        }
    }
    assert!(!handed_out.contains(&job.position), "leased position is not requeued");
}

#[tokio::test]
async fn test_empty_queue_triggers_background_refill() {
    let Harness { queue, .. } = harness(BookConfig::default()).await;
    queue.seed(5).await.unwrap();
    let client = queue.register_client("test-host", None).await.unwrap().client_id;

    assert!(queue.get_job(client).await.unwrap().is_none(), "try again");

    let mut waited = Duration::ZERO;
    while queue.queue_len().await.unwrap() == 0 {
        assert!(waited < Duration::from_secs(5), "refill never happened");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    let job = queue.get_job(client).await.unwrap().expect("job after refill");
    assert!(job.position.count_discs() <= 5);
}

#[tokio::test]
async fn test_expired_lease_releases_position() {
    let config = BookConfig {
        lease_ttl: Duration::from_millis(300),
        ..BookConfig::default()
    };
    let Harness { queue, .. } = harness(config).await;
    queue.seed(4).await.unwrap();
    let client = queue.register_client("test-host", None).await.unwrap().client_id;

    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::Refilled { queued: 1 });
    queue.get_job(client).await.unwrap().expect("the start position");
    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::Refilled { queued: 0 });

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(matches!(
        queue.get_job(client).await,
        Err(BackendError::UnknownClient(id)) if id == client
    ));
    assert_eq!(
        queue.refill().await.unwrap(),
        RefillOutcome::Refilled { queued: 1 },
        "dead client's position is available again"
    );
}

#[tokio::test]
async fn test_invalid_submission_is_rejected() {
    let Harness { queue, .. } = harness(BookConfig::default()).await;
    queue.seed(5).await.unwrap();
    let client = queue.register_client("test-host", None).await.unwrap().client_id;

    let mut bad = evaluation(first_reply(), 30, 0);
    bad.score = 100;
    assert!(matches!(
        queue.submit(client, &[bad]).await,
        Err(BackendError::Evaluation(_))
    ));
    assert!(queue.lookup(first_reply()).await.unwrap().is_none());
}

/// Book whose sampling is slow and records how many samplers overlap
struct SlowSampling {
    book: SqliteBookStore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl BookStore for SlowSampling {
    async fn add_positions(&self, positions: &[NormalizedPosition]) -> BackendResult<u64> {
        self.book.add_positions(positions).await
    }

    async fn sample_uncomputed(
        &self,
        disc_count: u32,
        below_level: u32,
        limit: usize,
        exclude: &HashSet<NormalizedPosition>,
    ) -> BackendResult<Vec<NormalizedPosition>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let sampled = self
            .book
            .sample_uncomputed(disc_count, below_level, limit, exclude)
            .await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        sampled
    }

    async fn upsert_evaluations(
        &self,
        evaluations: &[Evaluation],
    ) -> BackendResult<Vec<LevelChange>> {
        self.book.upsert_evaluations(evaluations).await
    }

    async fn level_counts(&self) -> BackendResult<Vec<LevelCount>> {
        self.book.level_counts().await
    }

    async fn lookup(&self, position: NormalizedPosition) -> BackendResult<Option<Evaluation>> {
        self.book.lookup(position).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_refills_never_overlap() {
    let book = Arc::new(SlowSampling {
        book: SqliteBookStore::in_memory().await.unwrap(),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let queue = BookQueue::new(BookConfig::default(), Arc::new(MemoryStore::new()), book.clone());
    queue.seed(6).await.unwrap();

    let refills: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.refill().await })
        })
        .collect();

    let mut refilled = 0;
    for refill in refills {
        match refill.await.unwrap().unwrap() {
            RefillOutcome::Refilled { queued } => {
                assert_eq!(queued, 5);
                refilled += 1;
            }
            RefillOutcome::AlreadyRunning => {}
        }
    }
    assert!(refilled >= 1, "some refill ran");
    assert_eq!(book.max_in_flight.load(Ordering::SeqCst), 1, "refills overlapped");
    assert_eq!(queue.queue_len().await.unwrap(), 5);
}

/// Memory store that can be told to refuse writes to one hash
struct RefusingHashWrites {
    store: MemoryStore,
    refused_key: String,
    refusing: AtomicBool,
}

#[async_trait]
impl KeyValueStore for RefusingHashWrites {
    async fn list_pop_front(&self, key: &str) -> BackendResult<Option<String>> {
        self.store.list_pop_front(key).await
    }

    async fn list_replace(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> BackendResult<()> {
        self.store.list_replace(key, values, ttl).await
    }

    async fn list_push_front(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        self.store.list_push_front(key, value, ttl).await
    }

    async fn list_len(&self, key: &str) -> BackendResult<usize> {
        self.store.list_len(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool> {
        self.store.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        self.store.delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool> {
        self.store.delete_if_equals(key, expected).await
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        self.store.exists(key).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> BackendResult<Option<String>> {
        self.store.hash_get(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        self.store.hash_get_all(key).await
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> BackendResult<()> {
        if key == self.refused_key && self.refusing.load(Ordering::SeqCst) {
            return Err(BackendError::KeyValue {
                key: key.to_string(),
                message: "write refused".to_string(),
            });
        }
        self.store.hash_set(key, field, value, ttl).await
    }

    async fn hash_replace(
        &self,
        key: &str,
        entries: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        self.store.hash_replace(key, entries, ttl).await
    }

    async fn hash_increment_existing(
        &self,
        key: &str,
        increments: &[(String, i64)],
    ) -> BackendResult<bool> {
        self.store.hash_increment_existing(key, increments).await
    }
}

#[tokio::test]
async fn test_failed_assignment_requeues_position() {
    let config = BookConfig::default();
    let kv = Arc::new(RefusingHashWrites {
        store: MemoryStore::new(),
        refused_key: config.clients_key.clone(),
        refusing: AtomicBool::new(false),
    });
    let book = Arc::new(SqliteBookStore::in_memory().await.unwrap());
    let queue = BookQueue::new(config, kv.clone(), book);
    queue.seed(4).await.unwrap();
    let client = queue.register_client("test-host", None).await.unwrap().client_id;
    assert_eq!(queue.refill().await.unwrap(), RefillOutcome::Refilled { queued: 1 });

    kv.refusing.store(true, Ordering::SeqCst);
    assert!(matches!(
        queue.get_job(client).await,
        Err(BackendError::KeyValue { .. })
    ));
    assert_eq!(queue.queue_len().await.unwrap(), 1, "unleased position is back");

    kv.refusing.store(false, Ordering::SeqCst);
    let job = queue.get_job(client).await.unwrap().expect("requeued job");
    assert_eq!(job.position, NormalizedPosition::start());
}
