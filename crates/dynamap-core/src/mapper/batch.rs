//! Multi-type batch builders.

use std::collections::HashMap;
use std::fmt;

use dynamap_model::Item;
use dynamap_model::types::WriteRequest;
use tracing::debug;

use super::DynamoDBMapper;
use super::save::{any_key_generatable, can_generate, next_value};
use crate::batch::{BatchLoader, BatchWriter, FailedBatch, PendingWrite};
use crate::error::{MapperResult, MappingError};
use crate::field::Record;
use crate::value::Value;

type Deferred<'a> = Box<dyn FnOnce() -> Result<(), MappingError> + Send + 'a>;

/// Puts and deletes across any number of record types, sent as one batch.
///
/// Generated keys and versions are computed when a record is added and
/// written back to it only if the store accepted the put.
pub struct WriteBatch<'a> {
    mapper: &'a DynamoDBMapper,
    writes: Vec<PendingWrite>,
    updates: Vec<Option<Deferred<'a>>>,
}

impl fmt::Debug for WriteBatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBatch")
            .field("writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

impl<'a> WriteBatch<'a> {
    pub(super) fn new(mapper: &'a DynamoDBMapper) -> Self {
        Self {
            mapper,
            writes: Vec::new(),
            updates: Vec::new(),
        }
    }

    /// Queues a put of `record`.
    pub fn save<T: Record>(mut self, record: &'a mut T) -> MapperResult<Self> {
        let model = self.mapper.table_model::<T>()?;
        let table_name = self.mapper.table_name::<T>()?;
        let behavior = self.mapper.config().save_behavior;
        let owner = model.owner();
        let defaults = T::default();
        let any_key = any_key_generatable(&model, record, &defaults, behavior);

        let mut item = Item::new();
        let mut generated: Vec<(usize, Value)> = Vec::new();
        for (pos, field) in model.fields().iter().enumerate() {
            let value = if can_generate(field, record, &defaults, behavior, any_key) {
                let next = next_value(owner, field, record, &defaults)?;
                let converted = field.convert_value(next.clone())?;
                generated.push((pos, next));
                converted
            } else {
                field.convert(record)?
            };
            if let Some(value) = value {
                item.insert(field.attribute_name().to_owned(), value);
            }
        }
        if let Some(key) = model.keys().find(|k| !item.contains_key(k.attribute_name())) {
            return Err(MappingError::new(owner, "null or empty value for primary key")
                .with_property(key.name())
                .into());
        }

        self.writes
            .push(PendingWrite::new(table_name, WriteRequest::put(item)));
        let update: Deferred<'a> = Box::new(move || {
            for (pos, value) in generated {
                model.fields()[pos].set(record, value)?;
            }
            Ok(())
        });
        self.updates.push(Some(update));
        Ok(self)
    }

    /// Queues puts of every record.
    pub fn save_all<T: Record>(
        self,
        records: impl IntoIterator<Item = &'a mut T>,
    ) -> MapperResult<Self> {
        records.into_iter().try_fold(self, |batch, record| batch.save(record))
    }

    /// Queues a delete of `record`'s key.
    pub fn delete<T: Record>(mut self, record: &T) -> MapperResult<Self> {
        let model = self.mapper.table_model::<T>()?;
        let table_name = self.mapper.table_name::<T>()?;
        let key = model.convert_key(record)?;
        self.writes
            .push(PendingWrite::new(table_name, WriteRequest::delete(key)));
        self.updates.push(None);
        Ok(self)
    }

    /// Queues deletes of every record.
    pub fn delete_all<'r, T: Record>(
        self,
        records: impl IntoIterator<Item = &'r T>,
    ) -> MapperResult<Self> {
        records.into_iter().try_fold(self, |batch, record| batch.delete(record))
    }

    /// Number of queued writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Sends every queued write and returns the batches that failed.
    ///
    /// Failed writes leave their records untouched.
    pub async fn execute(self) -> MapperResult<Vec<FailedBatch>> {
        if self.writes.is_empty() {
            return Ok(Vec::new());
        }
        debug!(writes = self.writes.len(), "executing batch write");
        let strategy = self.mapper.config().batch_write_retry_strategy.as_ref();
        let outcome = BatchWriter::new(self.mapper.client().as_ref(), strategy)
            .write(self.writes)
            .await;
        for (update, written) in self.updates.into_iter().zip(outcome.written) {
            if let (Some(update), true) = (update, written) {
                update()?;
            }
        }
        Ok(outcome.failed_batches)
    }
}

/// Keys across any number of record types, read as one batch.
#[derive(Debug)]
pub struct KeyBatch<'a> {
    mapper: &'a DynamoDBMapper,
    keys: Vec<(String, Item)>,
}

impl<'a> KeyBatch<'a> {
    pub(super) fn new(mapper: &'a DynamoDBMapper) -> Self {
        Self {
            mapper,
            keys: Vec::new(),
        }
    }

    /// Adds the key of `record`.
    pub fn add<T: Record>(mut self, record: &T) -> MapperResult<Self> {
        let model = self.mapper.table_model::<T>()?;
        let table_name = self.mapper.table_name::<T>()?;
        self.keys.push((table_name, model.convert_key(record)?));
        Ok(self)
    }

    /// Adds a key given as hash and optional range values.
    pub fn add_key<T: Record>(mut self, hash: Value, range: Option<Value>) -> MapperResult<Self> {
        let model = self.mapper.table_model::<T>()?;
        let table_name = self.mapper.table_name::<T>()?;
        self.keys
            .push((table_name, model.convert_key_values(hash, range)?));
        Ok(self)
    }

    /// Number of keys added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Reads every key.
    pub async fn load(self) -> MapperResult<LoadedItems<'a>> {
        let items = if self.keys.is_empty() {
            HashMap::new()
        } else {
            debug!(keys = self.keys.len(), "executing batch load");
            let config = self.mapper.config();
            BatchLoader::new(
                self.mapper.client().as_ref(),
                config.batch_load_retry_strategy.as_ref(),
            )
            .load(self.keys, config.consistent_read.as_flag())
            .await?
        };
        Ok(LoadedItems {
            mapper: self.mapper,
            items,
        })
    }
}

/// Items returned by a [`KeyBatch`], by table.
#[derive(Debug)]
pub struct LoadedItems<'a> {
    mapper: &'a DynamoDBMapper,
    items: HashMap<String, Vec<Item>>,
}

impl LoadedItems<'_> {
    /// The records of type `T`, in no particular order.
    pub fn records<T: Record>(&self) -> MapperResult<Vec<T>> {
        let table_name = self.mapper.table_name::<T>()?;
        self.items
            .get(&table_name)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .map(|item| self.mapper.marshal_into_object::<T>(item))
            .collect()
    }

    /// Raw items read from `table_name`.
    #[must_use]
    pub fn items(&self, table_name: &str) -> &[Item] {
        self.items.get(table_name).map_or(&[], Vec::as_slice)
    }

    /// All raw items by table.
    #[must_use]
    pub fn into_items(self) -> HashMap<String, Vec<Item>> {
        self.items
    }
}
