//! Outbound request throttling, one limiter per upstream host.
//!
//! A limiter combines two gates:
//!
//! 1. **Admission** -- at most `max_concurrent` tasks run at once (a semaphore).
//! 2. **Cycle time** -- an admitted task keeps its slot for at least
//!    `cycle_time`, even if it finishes sooner.
//!
//! Together these cap the request rate at `max_concurrent / cycle_time`
//! regardless of how fast the upstream answers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until};

use crate::config::duration_serde;

/// Limits applied to each upstream host.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed in flight per host.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum time a request slot stays occupied.
    #[serde(default = "default_cycle_time", with = "duration_serde")]
    pub cycle_time: Duration,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_cycle_time() -> Duration {
    Duration::from_millis(500)
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cycle_time: default_cycle_time(),
        }
    }
}

/// Counting admission gate with a minimum per-slot hold time.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// `None` disables admission control entirely.
    slots: Option<Arc<Semaphore>>,
    cycle_time: Duration,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, cycle_time: Duration) -> Self {
        Self {
            slots: Some(Arc::new(Semaphore::new(max_concurrent.max(1)))),
            cycle_time,
        }
    }

    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(config.max_concurrent, config.cycle_time)
    }

    /// A limiter that admits everything immediately.
    pub fn unlimited() -> Self {
        Self {
            slots: None,
            cycle_time: Duration::ZERO,
        }
    }

    /// Run `task` inside a slot.
    ///
    /// The slot is released once the task has finished *and* `cycle_time` has
    /// elapsed since admission. Task errors propagate unchanged.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquisition only fails if it were.
        let _permit = match &self.slots {
            Some(slots) => slots.acquire().await.ok(),
            None => None,
        };
        let release_at = Instant::now() + self.cycle_time;

        let output = task.await;

        if !self.cycle_time.is_zero() {
            sleep_until(release_at).await;
        }
        output
    }

    /// Slots currently free, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.slots.as_ref().map(|s| s.available_permits())
    }
}

/// Builds the limiter for a host the first time that host is contacted.
pub type LimiterFactory = Arc<dyn Fn(&str) -> RateLimiter + Send + Sync>;

/// Factory handing every host its own limiter with the same settings.
pub fn per_host_factory(config: RateLimitingConfig) -> LimiterFactory {
    Arc::new(move |_host: &str| RateLimiter::from_config(&config))
}

/// Factory that disables throttling, for tests and local fixtures.
pub fn unlimited_factory() -> LimiterFactory {
    Arc::new(|_host: &str| RateLimiter::unlimited())
}
