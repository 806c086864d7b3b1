use std::time::Duration;

/// Engine-wide tuning parameters. Construct with `EngineConfig::default()`
/// for tests, or `EngineConfig::from_env()` to pick up the documented
/// environment variables with these same defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gc_lookback: Duration,
    pub gc_cutoff: Duration,
    pub gc_sweep_interval: Duration,
    pub retry_backoff: Duration,
    pub lock_ttl: Duration,
    pub queue_limit: usize,
    pub queue_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_lookback: Duration::from_millis(5_000),
            gc_cutoff: Duration::from_millis(7_200_000),
            gc_sweep_interval: Duration::from_millis(30_000),
            retry_backoff: Duration::from_millis(10_000),
            lock_ttl: Duration::from_millis(900_000),
            queue_limit: 10,
            queue_backoff: Duration::from_millis(1_000),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_millis("SAGA_WORKFLOW_GC_LOOKBACK_MS") {
            config.gc_lookback = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("SAGA_WORKFLOW_GC_CUTOFF_MS") {
            config.gc_cutoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("SAGA_WORKFLOW_GC_INTERVAL_MS") {
            config.gc_sweep_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("SAGA_RETRY_BACKOFF_MS") {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("SAGA_LOCK_TTL_MS") {
            config.lock_ttl = Duration::from_millis(ms);
        }
        if let Some(limit) = std::env::var("SAGA_QUEUE_LIMIT").ok().and_then(|v| v.parse().ok()) {
            config.queue_limit = limit;
        }
        if let Some(ms) = env_millis("SAGA_QUEUE_BACKOFF_MS") {
            config.queue_backoff = Duration::from_millis(ms);
        }

        config
    }

    pub fn gc_lookback_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.gc_lookback).unwrap_or_else(|_| chrono::Duration::zero())
    }

    pub fn gc_cutoff_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.gc_cutoff).unwrap_or_else(|_| chrono::Duration::zero())
    }

    pub fn retry_backoff_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.retry_backoff).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

fn env_millis(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
