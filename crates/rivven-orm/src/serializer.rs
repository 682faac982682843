//! Single-writer discipline for the embedded engine
//!
//! SQLite allows one writer per database file. Transaction bodies against it
//! go through one of two strategies:
//!
//! - [`SerializerConfig::Mutex`]: a [`WriteLock`] is held for the whole body,
//!   so at most one transaction runs at a time.
//! - [`SerializerConfig::Retry`]: bodies run unlocked and a failed attempt is
//!   retried after a jittered sleep, up to [`RetryPolicy::max_attempts`].
//!
//! Entry outcomes ([`Error::is_entry_outcome`]) and caller-input errors
//! ([`Error::is_caller_input`]) are never retried.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Error;

/// Bounded retry with jittered backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    /// Create a policy; zero attempts is treated as one
    pub fn new(max_attempts: u32, delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            jitter,
        }
    }

    /// Total attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base sleep between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Maximum deviation from the base sleep
    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    /// Sample a sleep in `[delay - jitter, delay + jitter]`, floored at zero
    pub fn backoff(&self) -> Duration {
        let jitter = self.jitter.as_micros() as i64;
        let spread = if jitter > 0 {
            rand::thread_rng().gen_range(0..=2 * jitter)
        } else {
            0
        };
        let micros = self.delay.as_micros() as i64 - jitter + spread;
        Duration::from_micros(micros.max(0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50), Duration::from_millis(25))
    }
}

/// Transaction strategy of the embedded engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerializerConfig {
    /// Hold the write lock for the whole transaction
    #[default]
    Mutex,
    /// Retry failed transactions with jittered backoff
    Retry(RetryPolicy),
}

/// Exclusive write lock shared by engines against the same database file.
///
/// Cloning shares the lock; two engines serialize against each other only
/// when they hold clones of the same `WriteLock`.
#[derive(Debug, Clone, Default)]
pub struct WriteLock(Arc<Mutex<()>>);

impl WriteLock {
    /// Create an unshared lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.0.clone().lock_owned().await
    }

    /// Whether both handles guard the same lock
    pub fn same_as(&self, other: &WriteLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Applies a [`SerializerConfig`] to transaction bodies
#[derive(Debug, Clone)]
pub struct Serializer {
    config: SerializerConfig,
    lock: WriteLock,
}

impl Serializer {
    /// Create a serializer with its own write lock
    pub fn new(config: SerializerConfig) -> Self {
        Self {
            config,
            lock: WriteLock::new(),
        }
    }

    /// Replace the write lock with a shared one
    pub fn with_write_lock(mut self, lock: WriteLock) -> Self {
        self.lock = lock;
        self
    }

    /// Active strategy
    pub fn config(&self) -> SerializerConfig {
        self.config
    }

    /// Write lock used by the mutex strategy
    pub fn write_lock(&self) -> &WriteLock {
        &self.lock
    }

    /// Enter a transaction: under the mutex strategy this waits for the
    /// write lock, which the caller holds until the body has finished.
    pub async fn enter(&self) -> Option<OwnedMutexGuard<()>> {
        match self.config {
            SerializerConfig::Mutex => Some(self.lock.acquire().await),
            SerializerConfig::Retry(_) => None,
        }
    }

    /// Attempts allowed per transaction
    pub fn max_attempts(&self) -> u32 {
        match self.config {
            SerializerConfig::Mutex => 1,
            SerializerConfig::Retry(policy) => policy.max_attempts(),
        }
    }

    /// Sleep before the next attempt, or `None` when `error` after attempt
    /// number `attempt` (1-based) must be returned to the caller.
    pub fn retry_after(&self, attempt: u32, error: &Error) -> Option<Duration> {
        match self.config {
            SerializerConfig::Mutex => None,
            SerializerConfig::Retry(policy) => {
                if error.is_entry_outcome()
                    || error.is_caller_input()
                    || attempt >= policy.max_attempts()
                {
                    None
                } else {
                    Some(policy.backoff())
                }
            }
        }
    }
}
