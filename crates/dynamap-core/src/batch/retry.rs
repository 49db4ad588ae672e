//! Retry policies for batch writes and batch loads.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use dynamap_model::input::BatchGetItemInput;
use dynamap_model::output::BatchGetItemOutput;
use dynamap_model::types::WriteRequest;
use rand::RngExt;

const MAX_BACKOFF: Duration = Duration::from_millis(3000);

/// Write requests grouped by table.
pub type WriteRequests = HashMap<String, Vec<WriteRequest>>;

/// Decides how often and how patiently unprocessed batch writes are resent.
pub trait BatchWriteRetryStrategy: Send + Sync + fmt::Debug {
    /// Maximum resends for `batch`; `None` keeps going until the store
    /// accepts every item.
    fn max_retries(&self, batch: &WriteRequests) -> Option<u32>;

    /// Delay before resending `unprocessed`, given the resends so far.
    fn delay_before_retry(&self, unprocessed: &WriteRequests, retries_attempted: u32) -> Duration;
}

/// State of one batch load between attempts.
#[derive(Debug, Clone)]
pub struct BatchLoadContext {
    /// The request that was just sent.
    pub request: BatchGetItemInput,
    /// Its response.
    pub response: BatchGetItemOutput,
    /// Resends so far.
    pub retries_attempted: u32,
}

impl BatchLoadContext {
    /// Number of keys in the request just sent.
    #[must_use]
    pub fn requested_count(&self) -> usize {
        self.request.key_count()
    }

    /// Number of keys the store did not get to.
    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.response.unprocessed_keys.values().map(|k| k.keys.len()).sum()
    }

    /// Whether the store processed none of the requested keys.
    #[must_use]
    pub fn is_complete_failure(&self) -> bool {
        let unprocessed = self.unprocessed_count();
        unprocessed > 0 && unprocessed == self.requested_count()
    }
}

/// Decides whether and when unprocessed batch load keys are resent.
pub trait BatchLoadRetryStrategy: Send + Sync + fmt::Debug {
    /// Whether to resend the unprocessed keys in `context`.
    fn should_retry(&self, context: &BatchLoadContext) -> bool;

    /// Delay before the resend.
    fn delay_before_next_retry(&self, context: &BatchLoadContext) -> Duration;
}

fn jitter(bound: u16) -> u64 {
    rand::rng().random_range(0..u64::from(bound))
}

fn backoff(retries: u32, base_ms: u64, jitter_bound: u16) -> Duration {
    let scale = 1u64.checked_shl(retries.min(16)).unwrap_or(u64::MAX);
    let delay = scale.saturating_mul(base_ms + jitter(jitter_bound));
    Duration::from_millis(delay).min(MAX_BACKOFF)
}

/// Resends unprocessed writes with exponential backoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBatchWriteRetryStrategy {
    max_retries: Option<u32>,
}

impl DefaultBatchWriteRetryStrategy {
    /// Gives up after `max_retries` resends.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
        }
    }
}

impl BatchWriteRetryStrategy for DefaultBatchWriteRetryStrategy {
    fn max_retries(&self, _batch: &WriteRequests) -> Option<u32> {
        self.max_retries
    }

    fn delay_before_retry(&self, _unprocessed: &WriteRequests, retries_attempted: u32) -> Duration {
        backoff(retries_attempted, 1000, 200)
    }
}

/// Never resends unprocessed writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBatchWriteRetryStrategy;

impl BatchWriteRetryStrategy for NoBatchWriteRetryStrategy {
    fn max_retries(&self, _batch: &WriteRequests) -> Option<u32> {
        Some(0)
    }

    fn delay_before_retry(&self, _unprocessed: &WriteRequests, _retries_attempted: u32) -> Duration {
        Duration::ZERO
    }
}

/// Resends unprocessed keys, backing off only when nothing was processed.
///
/// A round that returns no items at all looks like throttling and waits with
/// exponential backoff, up to 5 resends. A round that returned some items is
/// resent at once, up to 3 resends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBatchLoadRetryStrategy;

impl DefaultBatchLoadRetryStrategy {
    /// Resend ceiling when every key came back unprocessed.
    pub const MAX_COMPLETE_FAILURE_RETRIES: u32 = 5;
    /// Resend ceiling when some keys were processed.
    pub const MAX_PARTIAL_FAILURE_RETRIES: u32 = 3;
}

impl BatchLoadRetryStrategy for DefaultBatchLoadRetryStrategy {
    fn should_retry(&self, context: &BatchLoadContext) -> bool {
        if context.unprocessed_count() == 0 {
            return false;
        }
        let ceiling = if context.is_complete_failure() {
            Self::MAX_COMPLETE_FAILURE_RETRIES
        } else {
            Self::MAX_PARTIAL_FAILURE_RETRIES
        };
        context.retries_attempted < ceiling
    }

    fn delay_before_next_retry(&self, context: &BatchLoadContext) -> Duration {
        if context.is_complete_failure() {
            backoff(context.retries_attempted, 500, 100)
        } else {
            Duration::ZERO
        }
    }
}

/// Never resends unprocessed keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBatchLoadRetryStrategy;

impl BatchLoadRetryStrategy for NoBatchLoadRetryStrategy {
    fn should_retry(&self, _context: &BatchLoadContext) -> bool {
        false
    }

    fn delay_before_next_retry(&self, _context: &BatchLoadContext) -> Duration {
        Duration::ZERO
    }
}
