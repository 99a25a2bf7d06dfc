use std::time::Duration;

use crate::error::{BackendError, BackendResult};

/// Key names and tuning for the job queue
#[derive(Clone, Debug)]
pub struct BookConfig {
    /// List of queued positions, hex encoded
    pub queue_key: String,
    /// Single-flight refill lock
    pub refill_lock_key: String,
    /// Hash of client leases
    pub clients_key: String,
    /// Hash of `"{discs}:{level}" -> count`
    pub stats_key: String,
    pub queue_ttl: Duration,
    /// Safety net for a refresher that dies holding the lock; must cover
    /// `refill_timeout`
    pub refill_lock_ttl: Duration,
    /// A client whose last activity is older than this has lost its lease
    pub lease_ttl: Duration,
    /// Upper bound on a detached refill
    pub refill_timeout: Duration,
    /// Positions queued per refill, across all disc counts
    pub batch_size: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            queue_key: "book:queue".to_string(),
            refill_lock_key: "book:refill_lock".to_string(),
            clients_key: "book:clients".to_string(),
            stats_key: "book:stats".to_string(),
            queue_ttl: Duration::from_secs(10 * 60),
            refill_lock_ttl: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(5 * 60),
            refill_timeout: Duration::from_secs(30),
            batch_size: 1000,
        }
    }
}

impl BookConfig {
    /// Reject settings under which a refill can outlive its lock
    pub fn validate(&self) -> BackendResult<()> {
        if self.refill_lock_ttl < self.refill_timeout {
            return Err(BackendError::Config(format!(
                "refill lock TTL {:?} is shorter than the refill timeout {:?}",
                self.refill_lock_ttl, self.refill_timeout
            )));
        }
        if self.batch_size == 0 {
            return Err(BackendError::Config("batch size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        BookConfig::default().validate().unwrap();
    }

    #[test]
    fn test_lock_must_outlive_refill() {
        let config = BookConfig {
            refill_lock_ttl: Duration::from_secs(30),
            refill_timeout: Duration::from_secs(60),
            ..BookConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackendError::Config(_))));
    }
}
