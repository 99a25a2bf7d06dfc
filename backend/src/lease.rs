//! Client leases
//!
//! Every worker registers once and then holds a lease: a JSON record in the
//! shared clients hash, keyed by client id. The lease's `position` marks the
//! job the client is working on, so refills can skip it. A lease counts as
//! live while its `last_active` is within the lease TTL; a crashed worker
//! therefore releases its position by simply going quiet.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use othello_board::NormalizedPosition;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BackendError, BackendResult};
use crate::kv::KeyValueStore;

/// One worker's registration record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLease {
    pub client_id: Uuid,
    pub hostname: String,
    /// Build the worker runs, when known
    pub git_commit: Option<String>,
    /// Position currently assigned to the client
    pub position: Option<NormalizedPosition>,
    pub positions_computed: u64,
    pub registered_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl ClientLease {
    fn new(
        client_id: Uuid,
        hostname: String,
        git_commit: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id,
            hostname,
            git_commit,
            position: None,
            positions_computed: 0,
            registered_at: now,
            last_active: now,
        }
    }

    /// Whether the lease is still held at `now`
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.last_active + ttl > now,
            // A TTL beyond chrono's range never expires
            Err(_) => true,
        }
    }
}

/// Lease bookkeeping over the shared clients hash
pub struct Lease {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: Duration,
    // Serialises read-modify-write of lease records within this process
    update: Mutex<()>,
}

impl Lease {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            update: Mutex::new(()),
        }
    }

    /// Create a lease for a fresh client id
    pub async fn register(
        &self,
        hostname: &str,
        git_commit: Option<&str>,
    ) -> BackendResult<ClientLease> {
        let lease = ClientLease::new(
            Uuid::new_v4(),
            hostname.to_string(),
            git_commit.map(str::to_string),
            Utc::now(),
        );
        self.save(&lease).await?;
        debug!(client_id = %lease.client_id, hostname, "lease created");
        Ok(lease)
    }

    /// The client's live lease
    pub async fn get(&self, client_id: Uuid) -> BackendResult<ClientLease> {
        let Some(text) = self.store.hash_get(&self.key, &client_id.to_string()).await? else {
            return Err(BackendError::UnknownClient(client_id));
        };
        let lease: ClientLease = serde_json::from_str(&text)?;
        if !lease.is_live(Utc::now(), self.ttl) {
            return Err(BackendError::UnknownClient(client_id));
        }
        Ok(lease)
    }

    /// Refresh `last_active`
    pub async fn heartbeat(&self, client_id: Uuid) -> BackendResult<ClientLease> {
        self.update(client_id, |_| {}).await
    }

    /// Record `position` as the client's current job
    pub async fn assign(
        &self,
        client_id: Uuid,
        position: NormalizedPosition,
    ) -> BackendResult<ClientLease> {
        self.update(client_id, |lease| lease.position = Some(position))
            .await
    }

    /// Clear the assignment and credit `computed` positions to the client
    pub async fn complete(&self, client_id: Uuid, computed: u64) -> BackendResult<ClientLease> {
        self.update(client_id, |lease| {
            lease.position = None;
            lease.positions_computed += computed;
        })
        .await
    }

    /// All live leases
    pub async fn active(&self) -> BackendResult<Vec<ClientLease>> {
        let now = Utc::now();
        let mut leases = Vec::new();
        for text in self.store.hash_get_all(&self.key).await?.into_values() {
            let lease: ClientLease = serde_json::from_str(&text)?;
            if lease.is_live(now, self.ttl) {
                leases.push(lease);
            }
        }
        Ok(leases)
    }

    /// Positions assigned to live clients
    pub async fn leased_positions(&self) -> BackendResult<HashSet<NormalizedPosition>> {
        Ok(self
            .active()
            .await?
            .into_iter()
            .filter_map(|lease| lease.position)
            .collect())
    }

    async fn update(
        &self,
        client_id: Uuid,
        change: impl FnOnce(&mut ClientLease),
    ) -> BackendResult<ClientLease> {
        let _guard = self.update.lock().await;
        let mut lease = self.get(client_id).await?;
        change(&mut lease);
        lease.last_active = Utc::now();
        self.save(&lease).await?;
        Ok(lease)
    }

    async fn save(&self, lease: &ClientLease) -> BackendResult<()> {
        let text = serde_json::to_string(lease)?;
        self.store
            .hash_set(&self.key, &lease.client_id.to_string(), &text, self.ttl)
            .await
    }
}
