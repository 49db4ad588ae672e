//! Batch execution: splitting writes and loads into store-sized calls and
//! resending whatever the store leaves unprocessed.
//!
//! Writes report failures as [`FailedBatch`] values and never abort sibling
//! chunks. Loads fail with [`BatchGetError`](crate::error::BatchGetError)
//! once the retry strategy gives up, carrying the partial results.

mod read;
mod retry;
mod write;

pub use self::read::{BatchLoader, MAX_KEYS_PER_BATCH};
pub use self::retry::{
    BatchLoadContext, BatchLoadRetryStrategy, BatchWriteRetryStrategy,
    DefaultBatchLoadRetryStrategy, DefaultBatchWriteRetryStrategy, NoBatchLoadRetryStrategy,
    NoBatchWriteRetryStrategy, WriteRequests,
};
pub use self::write::{BatchWriteOutcome, BatchWriter, FailedBatch, MAX_ITEMS_PER_BATCH, PendingWrite};
