use dashmap::DashMap;
use routecodex_core::config::{CleanupStrategy, MemoryConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// A registered transient resource (execution context, cached payload,
/// simulated data). The manager only tracks bookkeeping; dropping the
/// entry releases the caller's handle on the budget, not the data itself.
#[derive(Debug, Clone)]
pub struct TrackedResource {
    pub id: String,
    pub bytes: u64,
    pub created_ms: u64,
    pub last_access_ms: u64,
    pub access_count: u64,
}

#[derive(Debug, Default, PartialEq)]
pub struct CleanupReport {
    pub evicted: usize,
    pub reclaimed_bytes: u64,
    /// True when the critical threshold forced a synchronous pass.
    pub forced: bool,
}

/// Tracks transient resources against a memory budget with a pluggable
/// cleanup strategy. The warning threshold triggers opportunistic
/// cleanup; the critical threshold forces a synchronous pass that evicts
/// until the total is back under the warning line.
pub struct MemoryManager {
    resources: DashMap<String, TrackedResource>,
    total_bytes: AtomicU64,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            resources: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            config,
        }
    }

    pub fn register(&self, id: &str, bytes: u64) {
        let now = now_ms();
        if let Some(old) = self.resources.insert(
            id.to_string(),
            TrackedResource {
                id: id.to_string(),
                bytes,
                created_ms: now,
                last_access_ms: now,
                access_count: 0,
            },
        ) {
            self.total_bytes.fetch_sub(old.bytes, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn touch(&self, id: &str) {
        if let Some(mut entry) = self.resources.get_mut(id) {
            entry.last_access_ms = now_ms();
            entry.access_count += 1;
        }
    }

    pub fn release(&self, id: &str) -> bool {
        match self.resources.remove(id) {
            Some((_, resource)) => {
                self.total_bytes.fetch_sub(resource.bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Run cleanup if a threshold is crossed. Returns what happened.
    pub fn maybe_cleanup(&self) -> CleanupReport {
        let total = self.total_bytes();
        if total >= self.config.critical_bytes {
            warn!(total, "Memory critical threshold crossed, forcing cleanup");
            let mut report = self.cleanup_to(self.config.warning_bytes);
            report.forced = true;
            report
        } else if total >= self.config.warning_bytes {
            info!(total, "Memory warning threshold crossed");
            self.cleanup_to(self.config.warning_bytes)
        } else {
            CleanupReport::default()
        }
    }

    /// Evict by strategy until `target_bytes` or nothing left to evict.
    fn cleanup_to(&self, target_bytes: u64) -> CleanupReport {
        let mut candidates: Vec<TrackedResource> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        self.sort_victims_first(&mut candidates);

        let mut report = CleanupReport::default();
        for victim in candidates {
            if self.total_bytes() <= target_bytes {
                break;
            }
            if self.release(&victim.id) {
                report.evicted += 1;
                report.reclaimed_bytes += victim.bytes;
            }
        }
        report
    }

    fn sort_victims_first(&self, resources: &mut [TrackedResource]) {
        let ttl_ms = self.config.resource_ttl_secs * 1000;
        let now = now_ms();
        match self.config.strategy {
            CleanupStrategy::Lru => {
                resources.sort_by_key(|r| r.last_access_ms);
            }
            CleanupStrategy::Lfu => {
                resources.sort_by_key(|r| r.access_count);
            }
            CleanupStrategy::Fifo => {
                resources.sort_by_key(|r| r.created_ms);
            }
            CleanupStrategy::Ttl => {
                // Expired entries first, oldest expiry first; unexpired
                // entries keep FIFO order after them.
                resources.sort_by_key(|r| {
                    let expired = now.saturating_sub(r.created_ms) >= ttl_ms;
                    (!expired, r.created_ms)
                });
            }
            CleanupStrategy::Size => {
                resources.sort_by(|a, b| b.bytes.cmp(&a.bytes));
            }
            CleanupStrategy::Hybrid => {
                // Expired first, then coldest-and-largest.
                resources.sort_by_key(|r| {
                    let expired = now.saturating_sub(r.created_ms) >= ttl_ms;
                    (!expired, r.last_access_ms, u64::MAX - r.bytes)
                });
            }
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
