use routecodex_core::config::BreakerConfig;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Per-error-boundary circuit breaker with classical
/// closed → open → half-open → closed semantics.
///
/// Breakers block future requests; they never mask an individual failure.
/// Callers still surface the error that tripped the breaker.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    last_failure_ms: AtomicU64,
    next_attempt_ms: AtomicU64,
    threshold: u32,
    reset_window_ms: u64,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed as u8),
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            next_attempt_ms: AtomicU64::new(0),
            threshold: config.failure_threshold,
            reset_window_ms: config.reset_window_secs * 1000,
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Whether a request may proceed. An open breaker lets exactly one
    /// probe through once the reset window has elapsed (half-open).
    pub fn allow(&self) -> bool {
        self.allow_at(now_ms())
    }

    fn allow_at(&self, now: u64) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                if now >= self.next_attempt_ms.load(Ordering::Acquire) {
                    // First caller past the window becomes the probe.
                    self.state
                        .compare_exchange(
                            BreakerState::Open as u8,
                            BreakerState::HalfOpen as u8,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.state
            .store(BreakerState::Closed as u8, Ordering::Release);
    }

    pub fn on_failure(&self) {
        self.on_failure_at(now_ms())
    }

    fn on_failure_at(&self, now: u64) {
        self.last_failure_ms.store(now, Ordering::Relaxed);
        match self.state() {
            BreakerState::HalfOpen => {
                // Probe failed; reopen for another window.
                self.next_attempt_ms
                    .store(now + self.reset_window_ms, Ordering::Release);
                self.state.store(BreakerState::Open as u8, Ordering::Release);
            }
            _ => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.threshold {
                    self.next_attempt_ms
                        .store(now + self.reset_window_ms, Ordering::Release);
                    self.state.store(BreakerState::Open as u8, Ordering::Release);
                }
            }
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
