//! Batch loads: key chunking and unprocessed-key retries.

use std::collections::{HashMap, HashSet};

use dynamap_model::Item;
use dynamap_model::input::BatchGetItemInput;
use dynamap_model::types::KeysAndAttributes;
use tracing::{debug, warn};

use super::retry::{BatchLoadContext, BatchLoadRetryStrategy};
use super::write::{millis, pause};
use crate::client::DynamoDBClient;
use crate::error::{BatchGetError, MapperError, MapperResult};

/// Most keys the store accepts in one call.
pub const MAX_KEYS_PER_BATCH: usize = 100;

/// Reads keys in store-sized chunks with retries.
#[derive(Clone, Copy)]
pub struct BatchLoader<'a> {
    client: &'a dyn DynamoDBClient,
    strategy: &'a dyn BatchLoadRetryStrategy,
    max_keys: usize,
}

impl<'a> BatchLoader<'a> {
    /// A loader over `client` using `strategy` for unprocessed keys.
    #[must_use]
    pub fn new(client: &'a dyn DynamoDBClient, strategy: &'a dyn BatchLoadRetryStrategy) -> Self {
        Self {
            client,
            strategy,
            max_keys: MAX_KEYS_PER_BATCH,
        }
    }

    /// Overrides the per-call key limit.
    #[must_use]
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Reads every `(table, key)` pair and returns the items found by table.
    ///
    /// Duplicate keys are requested once. If the strategy stops while keys
    /// are still unprocessed, the error carries them along with every item
    /// read so far.
    pub async fn load(
        &self,
        keys: Vec<(String, Item)>,
        consistent_read: Option<bool>,
    ) -> MapperResult<HashMap<String, Vec<Item>>> {
        let mut seen = HashSet::new();
        let keys: Vec<(String, Item)> = keys
            .into_iter()
            .filter(|(table, key)| seen.insert((table.clone(), key_fingerprint(key))))
            .collect();

        let mut responses: HashMap<String, Vec<Item>> = HashMap::new();
        let total = keys.len().div_ceil(self.max_keys);
        for (n, chunk) in keys.chunks(self.max_keys).enumerate() {
            debug!(chunk = n + 1, total, chunk_size = chunk.len(), "loading batch");
            let mut request_items: HashMap<String, KeysAndAttributes> = HashMap::new();
            for (table, key) in chunk {
                let entry = request_items
                    .entry(table.clone())
                    .or_insert_with(|| KeysAndAttributes {
                        consistent_read,
                        ..KeysAndAttributes::default()
                    });
                entry.keys.push(key.clone());
            }
            self.load_one(request_items, &mut responses).await?;
        }
        Ok(responses)
    }

    async fn load_one(
        &self,
        request_items: HashMap<String, KeysAndAttributes>,
        responses: &mut HashMap<String, Vec<Item>>,
    ) -> MapperResult<()> {
        let mut request = BatchGetItemInput {
            request_items,
            ..BatchGetItemInput::default()
        };
        let mut retries = 0;
        loop {
            let mut response = self
                .client
                .batch_get_item(request.clone())
                .await
                .map_err(MapperError::from)?;
            for (table, items) in std::mem::take(&mut response.responses) {
                responses.entry(table).or_default().extend(items);
            }
            response.unprocessed_keys.retain(|_, k| !k.keys.is_empty());
            let context = BatchLoadContext {
                request,
                response,
                retries_attempted: retries,
            };
            if context.unprocessed_count() == 0 {
                return Ok(());
            }
            if !self.strategy.should_retry(&context) {
                warn!(
                    unprocessed = context.unprocessed_count(),
                    attempt = retries,
                    "giving up on unprocessed keys"
                );
                return Err(BatchGetError {
                    unprocessed_keys: context.response.unprocessed_keys,
                    responses: std::mem::take(responses),
                }
                .into());
            }
            let delay = self.strategy.delay_before_next_retry(&context);
            debug!(
                unprocessed = context.unprocessed_count(),
                requested = context.requested_count(),
                attempt = retries + 1,
                delay_ms = millis(delay),
                "resending unprocessed keys"
            );
            pause(delay).await;
            retries += 1;
            request = BatchGetItemInput {
                request_items: context.response.unprocessed_keys,
                ..context.request
            };
        }
    }
}

/// Order-independent identity of a key, used to drop duplicate requests.
fn key_fingerprint(key: &Item) -> Vec<(String, String)> {
    let mut parts: Vec<(String, String)> = key
        .iter()
        .map(|(name, value)| (name.clone(), format!("{value:?}")))
        .collect();
    parts.sort();
    parts
}
