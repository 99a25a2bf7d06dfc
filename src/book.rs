//! Read-through view of the book
//!
//! Lookups are answered from an [`EvaluationCache`] and fall back to the
//! backend, one batched round trip for all missing positions.

use std::collections::HashSet;

use backend::{BackendResult, BookQueue};
use othello_board::{Evaluation, EvaluationCache, NormalizedPosition};
use tracing::debug;

pub struct Book {
    cache: EvaluationCache,
    queue: BookQueue,
}

impl Book {
    pub fn new(queue: BookQueue) -> Self {
        Self {
            cache: EvaluationCache::new(),
            queue,
        }
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    pub async fn lookup(&self, position: NormalizedPosition) -> BackendResult<Option<Evaluation>> {
        Ok(self.lookup_many(&[position]).await?.pop().flatten())
    }

    /// Evaluations for `positions`, in order
    pub async fn lookup_many(
        &self,
        positions: &[NormalizedPosition],
    ) -> BackendResult<Vec<Option<Evaluation>>> {
        let stored_keys: Vec<NormalizedPosition> = positions
            .iter()
            .filter_map(|&position| stored_key(position))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let missing = self.cache.get_missing(&stored_keys);
        if !missing.is_empty() {
            debug!(missing = missing.len(), "fetching from book store");
        }
        for key in missing {
            if let Some(evaluation) = self.queue.lookup(key).await? {
                self.cache.upsert(evaluation);
            }
        }

        Ok(positions
            .iter()
            .map(|&position| self.cache.lookup(position))
            .collect())
    }
}

/// Key under which the answer for `position` is stored, if any
fn stored_key(position: NormalizedPosition) -> Option<NormalizedPosition> {
    if position.has_moves() {
        return Some(position);
    }
    let passed = position.pass();
    passed.has_moves().then(|| passed.normalize().0)
}
