//! Batch writes: chunking, unprocessed-item retries and oversized-batch
//! bisection.

use std::collections::HashMap;
use std::time::Duration;

use dynamap_model::DynamoDBError;
use dynamap_model::input::BatchWriteItemInput;
use dynamap_model::types::WriteRequest;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::retry::{BatchWriteRetryStrategy, WriteRequests};
use crate::client::DynamoDBClient;

/// Most puts and deletes the store accepts in one call.
pub const MAX_ITEMS_PER_BATCH: usize = 25;

/// Writes that did not make it into the store.
///
/// `exception` is `None` when the store kept returning the items as
/// unprocessed until the retry strategy gave up.
#[derive(Debug)]
pub struct FailedBatch {
    /// The writes left over, by table.
    pub unprocessed_items: WriteRequests,
    /// The error that ended the attempt, if any.
    pub exception: Option<DynamoDBError>,
}

impl FailedBatch {
    /// Whether the store rejected the call as too large.
    #[must_use]
    pub fn is_request_entity_too_large(&self) -> bool {
        self.exception
            .as_ref()
            .is_some_and(DynamoDBError::is_request_entity_too_large)
    }

    /// Whether the store rejected the call as throttled.
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        self.exception.as_ref().is_some_and(DynamoDBError::is_throttling)
    }

    /// Number of writes left over.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.unprocessed_items.values().map(Vec::len).sum()
    }

    fn contains(&self, write: &PendingWrite) -> bool {
        self.unprocessed_items
            .get(&write.table_name)
            .is_some_and(|requests| requests.contains(&write.request))
    }
}

/// One put or delete destined for a table.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Target table.
    pub table_name: String,
    /// The put or delete.
    pub request: WriteRequest,
}

impl PendingWrite {
    /// A write of `request` to `table_name`.
    pub fn new(table_name: impl Into<String>, request: WriteRequest) -> Self {
        Self {
            table_name: table_name.into(),
            request,
        }
    }
}

/// Result of [`BatchWriter::write`].
#[derive(Debug, Default)]
pub struct BatchWriteOutcome {
    /// Writes that failed, grouped by the call that failed.
    pub failed_batches: Vec<FailedBatch>,
    /// Per input write, whether the store accepted it.
    pub written: Vec<bool>,
}

type Indexed = (usize, PendingWrite);

fn group(chunk: &[Indexed]) -> WriteRequests {
    let mut grouped: WriteRequests = HashMap::new();
    for (_, write) in chunk {
        grouped
            .entry(write.table_name.clone())
            .or_default()
            .push(write.request.clone());
    }
    grouped
}

/// Sends writes in store-sized chunks with retries.
#[derive(Clone, Copy)]
pub struct BatchWriter<'a> {
    client: &'a dyn DynamoDBClient,
    strategy: &'a dyn BatchWriteRetryStrategy,
    max_items: usize,
}

impl<'a> BatchWriter<'a> {
    /// A writer over `client` using `strategy` for unprocessed items.
    #[must_use]
    pub fn new(client: &'a dyn DynamoDBClient, strategy: &'a dyn BatchWriteRetryStrategy) -> Self {
        Self {
            client,
            strategy,
            max_items: MAX_ITEMS_PER_BATCH,
        }
    }

    /// Overrides the per-call item limit.
    #[must_use]
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    /// Writes everything, chunk by chunk, in input order.
    ///
    /// A failing chunk never stops later chunks. When a chunk fails with
    /// throttling, one extra strategy delay is taken before the next one.
    pub async fn write(&self, writes: Vec<PendingWrite>) -> BatchWriteOutcome {
        let mut outcome = BatchWriteOutcome {
            failed_batches: Vec::new(),
            written: vec![false; writes.len()],
        };
        let indexed: Vec<Indexed> = writes.into_iter().enumerate().collect();
        let chunks = indexed.chunks(self.max_items);
        let total = chunks.len();
        for (n, chunk) in chunks.enumerate() {
            debug!(chunk = n + 1, total, chunk_size = chunk.len(), "writing batch");
            let failures = self.write_one(chunk).await;
            for (index, write) in chunk {
                outcome.written[*index] = !failures.iter().any(|f| f.contains(write));
            }
            if failures.iter().any(FailedBatch::is_throttling) {
                let delay = self.strategy.delay_before_retry(&group(chunk), 0);
                warn!(chunk = n + 1, delay_ms = millis(delay), "batch throttled, backing off");
                pause(delay).await;
            }
            outcome.failed_batches.extend(failures);
        }
        outcome
    }

    fn write_one<'s>(&'s self, chunk: &'s [Indexed]) -> BoxFuture<'s, Vec<FailedBatch>> {
        async move {
            let Some(failed) = self.send_with_retry(chunk).await else {
                return Vec::new();
            };
            if failed.is_request_entity_too_large() && chunk.len() > 1 {
                let (first, second) = chunk.split_at(chunk.len() / 2);
                warn!(
                    chunk_size = chunk.len(),
                    "batch too large, splitting into {} and {}",
                    first.len(),
                    second.len()
                );
                let mut failures = self.write_one(first).await;
                failures.extend(self.write_one(second).await);
                failures
            } else {
                vec![failed]
            }
        }
        .boxed()
    }

    async fn send_with_retry(&self, chunk: &[Indexed]) -> Option<FailedBatch> {
        let mut pending = group(chunk);
        let max_retries = self.strategy.max_retries(&pending);
        let mut retries = 0;
        loop {
            let input = BatchWriteItemInput {
                request_items: pending.clone(),
                ..BatchWriteItemInput::default()
            };
            let output = match self.client.batch_write_item(input).await {
                Ok(output) => output,
                Err(err) => {
                    warn!(%err, attempt = retries, "batch write failed");
                    return Some(FailedBatch {
                        unprocessed_items: pending,
                        exception: Some(err),
                    });
                }
            };
            pending = output.unprocessed_items;
            pending.retain(|_, requests| !requests.is_empty());
            if pending.is_empty() {
                return None;
            }
            let unprocessed: usize = pending.values().map(Vec::len).sum();
            if max_retries.is_some_and(|max| retries >= max) {
                warn!(unprocessed, attempt = retries, "giving up on unprocessed items");
                return Some(FailedBatch {
                    unprocessed_items: pending,
                    exception: None,
                });
            }
            let delay = self.strategy.delay_before_retry(&pending, retries);
            debug!(unprocessed, attempt = retries + 1, delay_ms = millis(delay), "resending unprocessed items");
            pause(delay).await;
            retries += 1;
        }
    }
}

pub(crate) fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
