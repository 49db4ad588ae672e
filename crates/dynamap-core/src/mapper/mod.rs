//! The object mapper facade.
//!
//! [`DynamoDBMapper`] ties the table models, the conversion engine and the
//! batch and scan machinery to a [`DynamoDBClient`]. Every operation resolves
//! the record's table model under the configured conversion schema, builds
//! the wire request and converts the response back into records.

mod batch;
mod save;

use std::fmt;
use std::sync::Arc;

use dynamap_model::input::{CreateTableInput, DeleteTableInput, GetItemInput};
use dynamap_model::types::{ConsumedCapacity, Select};
use dynamap_model::{DynamoDBOperation, Item};
use tracing::{debug, info};

pub use self::batch::{KeyBatch, LoadedItems, WriteBatch};
pub use self::save::{DeleteExpression, SaveExpression};
use self::save::{SavePlan, delete_input, merge_expected};
use crate::batch::FailedBatch;
use crate::client::DynamoDBClient;
use crate::config::MapperConfig;
use crate::error::{MapperError, MapperResult, MappingError};
use crate::field::Record;
use crate::query::{self, Page, QueryExpression, ScanExpression};
use crate::scan::ParallelScanTask;
use crate::table::{ModelRegistry, TableModel, short_type_name};
use crate::value::Value;

/// Maps records to and from DynamoDB items.
///
/// Cloning is cheap: clones share the client and the model cache.
#[derive(Clone)]
pub struct DynamoDBMapper {
    client: Arc<dyn DynamoDBClient>,
    config: MapperConfig,
    registry: Arc<ModelRegistry>,
}

impl fmt::Debug for DynamoDBMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamoDBMapper")
            .field("config", &self.config)
            .field("tables", &self.registry.table_count())
            .finish_non_exhaustive()
    }
}

impl DynamoDBMapper {
    /// A mapper with the default configuration.
    pub fn new(client: Arc<dyn DynamoDBClient>) -> Self {
        Self::with_config(client, MapperConfig::default())
    }

    /// A mapper with `config`.
    pub fn with_config(client: Arc<dyn DynamoDBClient>, config: MapperConfig) -> Self {
        info!(
            save_behavior = ?config.save_behavior,
            consistent_read = ?config.consistent_read,
            schema = config.conversion_schema.name(),
            "dynamap mapper created"
        );
        Self {
            client,
            config,
            registry: Arc::new(ModelRegistry::new()),
        }
    }

    /// A mapper sharing this one's client and model cache, with `config`
    /// for every call made through it.
    #[must_use]
    pub fn with_overrides(&self, config: MapperConfig) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config,
            registry: Arc::clone(&self.registry),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn DynamoDBClient> {
        &self.client
    }

    /// The table model of `T` under the configured conversion schema.
    pub fn table_model<T: Record>(&self) -> MapperResult<Arc<TableModel<T>>> {
        Ok(self.registry.table::<T>(&self.config.conversion_schema)?)
    }

    /// The table `T` is stored in.
    pub fn table_name<T: Record>(&self) -> MapperResult<String> {
        self.config.table_name::<T>().ok_or_else(|| {
            MappingError::new(
                short_type_name::<T>(),
                "no table name declared and no table name override configured",
            )
            .into()
        })
    }

    // -----------------------------------------------------------------------
    // Single-item operations
    // -----------------------------------------------------------------------

    /// Loads the record with the key of `key`.
    pub async fn load<T: Record>(&self, key: &T) -> MapperResult<Option<T>> {
        let model = self.table_model::<T>()?;
        let key = model.convert_key(key)?;
        self.get(&model, key).await
    }

    /// Loads the record with the given hash and optional range key.
    pub async fn load_by_key<T: Record>(
        &self,
        hash: Value,
        range: Option<Value>,
    ) -> MapperResult<Option<T>> {
        let model = self.table_model::<T>()?;
        let key = model.convert_key_values(hash, range)?;
        self.get(&model, key).await
    }

    async fn get<T: Record>(&self, model: &TableModel<T>, key: Item) -> MapperResult<Option<T>> {
        let input = GetItemInput {
            table_name: self.table_name::<T>()?,
            key,
            consistent_read: self.config.consistent_read.as_flag(),
            ..GetItemInput::default()
        };
        debug!(operation = %DynamoDBOperation::GetItem, table = %input.table_name, "loading record");
        let output = self.client.get_item(input).await?;
        match output.item {
            Some(item) if !item.is_empty() => Ok(Some(model.unconvert(&item)?)),
            _ => Ok(None),
        }
    }

    /// Saves `record` using the configured save behavior.
    ///
    /// Generated keys, timestamps and versions are written back into the
    /// record once the store accepts the write.
    pub async fn save<T: Record>(&self, record: &mut T) -> MapperResult<()> {
        self.save_with(record, &SaveExpression::default()).await
    }

    /// Saves `record` with additional write conditions.
    pub async fn save_with<T: Record>(
        &self,
        record: &mut T,
        expression: &SaveExpression,
    ) -> MapperResult<()> {
        let model = self.table_model::<T>()?;
        let table_name = self.table_name::<T>()?;
        let mut plan = SavePlan::build(&model, record, self.config.save_behavior)?;
        let expected = merge_expected(std::mem::take(&mut plan.assertions), expression)?;

        if plan.force_put {
            let input = plan.put_input(table_name, expected, expression);
            debug!(operation = %DynamoDBOperation::PutItem, table = %input.table_name, "saving record");
            self.client.put_item(input).await?;
        } else {
            let input = plan.update_input(table_name.clone(), expected.clone(), expression);
            debug!(
                operation = %DynamoDBOperation::UpdateItem,
                table = %input.table_name,
                updates = input.attribute_updates.len(),
                "saving record"
            );
            let output = self.client.update_item(input).await?;
            if output.attributes.is_empty() {
                debug!(table = %table_name, "update returned no attributes, resending as a put");
                let input = plan.put_input(table_name, expected, expression);
                self.client.put_item(input).await?;
            }
        }
        plan.apply(&model, record)?;
        Ok(())
    }

    /// Deletes `record`, checking its version unless clobbering.
    pub async fn delete<T: Record>(&self, record: &T) -> MapperResult<()> {
        self.delete_with(record, &DeleteExpression::default()).await
    }

    /// Deletes `record` with additional conditions.
    pub async fn delete_with<T: Record>(
        &self,
        record: &T,
        expression: &DeleteExpression,
    ) -> MapperResult<()> {
        let model = self.table_model::<T>()?;
        let input = delete_input(
            &model,
            record,
            self.table_name::<T>()?,
            self.config.save_behavior,
            expression,
        )?;
        debug!(operation = %DynamoDBOperation::DeleteItem, table = %input.table_name, "deleting record");
        self.client.delete_item(input).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    /// Starts a batch of puts and deletes across record types.
    #[must_use]
    pub fn write_batch(&self) -> WriteBatch<'_> {
        WriteBatch::new(self)
    }

    /// Puts every record; returns the batches that failed.
    pub async fn batch_save<T: Record>(&self, records: &mut [T]) -> MapperResult<Vec<FailedBatch>> {
        self.write_batch().save_all(records.iter_mut())?.execute().await
    }

    /// Deletes every record; returns the batches that failed.
    pub async fn batch_delete<T: Record>(&self, records: &[T]) -> MapperResult<Vec<FailedBatch>> {
        self.write_batch().delete_all(records)?.execute().await
    }

    /// Puts `to_save` and deletes `to_delete` in one batch.
    pub async fn batch_write<T: Record>(
        &self,
        to_save: &mut [T],
        to_delete: &[T],
    ) -> MapperResult<Vec<FailedBatch>> {
        self.write_batch()
            .save_all(to_save.iter_mut())?
            .delete_all(to_delete)?
            .execute()
            .await
    }

    /// Starts a batch load across record types.
    #[must_use]
    pub fn batch_load_keys(&self) -> KeyBatch<'_> {
        KeyBatch::new(self)
    }

    /// Loads the records with the keys of `keys`, in no particular order.
    pub async fn batch_load<T: Record>(&self, keys: &[T]) -> MapperResult<Vec<T>> {
        let batch = keys
            .iter()
            .try_fold(self.batch_load_keys(), |batch, key| batch.add(key))?;
        batch.load().await?.records::<T>()
    }

    // -----------------------------------------------------------------------
    // Query and scan
    // -----------------------------------------------------------------------

    /// Every record matching `expression`, following continuation keys.
    pub async fn query<T: Record>(&self, expression: &QueryExpression<T>) -> MapperResult<Vec<T>> {
        let model = self.table_model::<T>()?;
        let mut input = query::query_input(
            &model,
            expression,
            self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
        )?;
        let mut records = Vec::new();
        loop {
            debug!(
                operation = %DynamoDBOperation::Query,
                table = %input.table_name,
                index = ?input.index_name,
                "querying"
            );
            let output = self.client.query(input.clone()).await?;
            for item in &output.items {
                records.push(model.unconvert(item)?);
            }
            if output.last_evaluated_key.is_empty() {
                return Ok(records);
            }
            input.exclusive_start_key = output.last_evaluated_key;
        }
    }

    /// One page of records matching `expression`.
    pub async fn query_page<T: Record>(
        &self,
        expression: &QueryExpression<T>,
    ) -> MapperResult<Page<T>> {
        let model = self.table_model::<T>()?;
        let input = query::query_input(
            &model,
            expression,
            self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
        )?;
        debug!(operation = %DynamoDBOperation::Query, table = %input.table_name, "querying one page");
        let output = self.client.query(input).await?;
        Self::page(
            &model,
            &output.items,
            output.last_evaluated_key,
            (output.count, output.scanned_count),
            output.consumed_capacity,
        )
    }

    /// Number of records matching `expression`.
    pub async fn count_query<T: Record>(&self, expression: &QueryExpression<T>) -> MapperResult<i64> {
        let model = self.table_model::<T>()?;
        let mut input = query::query_input(
            &model,
            expression,
            self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
        )?;
        input.select = Some(Select::Count);
        let mut count = 0;
        loop {
            let output = self.client.query(input.clone()).await?;
            count += i64::from(output.count);
            if output.last_evaluated_key.is_empty() {
                debug!(table = %input.table_name, count, "query counted");
                return Ok(count);
            }
            input.exclusive_start_key = output.last_evaluated_key;
        }
    }

    /// Every record matching `expression`, following continuation keys.
    pub async fn scan<T: Record>(&self, expression: &ScanExpression) -> MapperResult<Vec<T>> {
        let model = self.table_model::<T>()?;
        let mut input = query::scan_input(
            expression,
            self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
        );
        let mut records = Vec::new();
        loop {
            debug!(operation = %DynamoDBOperation::Scan, table = %input.table_name, "scanning");
            let output = self.client.scan(input.clone()).await?;
            for item in &output.items {
                records.push(model.unconvert(item)?);
            }
            if output.last_evaluated_key.is_empty() {
                return Ok(records);
            }
            input.exclusive_start_key = output.last_evaluated_key;
        }
    }

    /// One page of records matching `expression`.
    pub async fn scan_page<T: Record>(&self, expression: &ScanExpression) -> MapperResult<Page<T>> {
        let model = self.table_model::<T>()?;
        let input = query::scan_input(
            expression,
            self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
        );
        debug!(operation = %DynamoDBOperation::Scan, table = %input.table_name, "scanning one page");
        let output = self.client.scan(input).await?;
        Self::page(
            &model,
            &output.items,
            output.last_evaluated_key,
            (output.count, output.scanned_count),
            output.consumed_capacity,
        )
    }

    /// Number of records matching `expression`.
    pub async fn count_scan<T: Record>(&self, expression: &ScanExpression) -> MapperResult<i64> {
        let mut input = query::scan_input(
            expression,
            self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
        );
        input.select = Some(Select::Count);
        let mut count = 0;
        loop {
            let output = self.client.scan(input.clone()).await?;
            count += i64::from(output.count);
            if output.last_evaluated_key.is_empty() {
                debug!(table = %input.table_name, count, "scan counted");
                return Ok(count);
            }
            input.exclusive_start_key = output.last_evaluated_key;
        }
    }

    /// A segment-parallel scan of `T`'s table, driven round by round.
    ///
    /// The expression's exclusive start key and segment settings are ignored.
    pub fn parallel_scan_task<T: Record>(
        &self,
        expression: &ScanExpression,
        total_segments: i32,
    ) -> MapperResult<ParallelScanTask> {
        if total_segments < 1 {
            return Err(MapperError::InvalidRequest(format!(
                "parallel scan needs at least one segment, got {total_segments}"
            )));
        }
        if !expression.exclusive_start_key.is_empty()
            || expression.segment.is_some()
            || expression.total_segments.is_some()
        {
            info!("ignoring exclusive start key and segment settings of a parallel scan expression");
        }
        self.table_model::<T>()?;
        let requests = query::parallel_scan_inputs(
            expression,
            &self.table_name::<T>()?,
            self.config.consistent_read.as_flag(),
            total_segments,
        );
        ParallelScanTask::new(Arc::clone(&self.client), requests)
    }

    /// Every record of `T`'s table, read with `total_segments` concurrent
    /// segment scans.
    pub async fn parallel_scan<T: Record>(
        &self,
        expression: &ScanExpression,
        total_segments: i32,
    ) -> MapperResult<Vec<T>> {
        let model = self.table_model::<T>()?;
        let mut task = self.parallel_scan_task::<T>(expression, total_segments)?;
        let mut records = Vec::new();
        while !task.is_finished() {
            for page in task.next_batch().await? {
                for item in &page.items {
                    records.push(model.unconvert(item)?);
                }
            }
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Schema and conversion
    // -----------------------------------------------------------------------

    /// A `CreateTable` request for `T`'s table and indexes.
    pub fn generate_create_table_request<T: Record>(&self) -> MapperResult<CreateTableInput> {
        let model = self.table_model::<T>()?;
        Ok(model.create_table_input(&self.table_name::<T>()?))
    }

    /// A `DeleteTable` request for `T`'s table.
    pub fn generate_delete_table_request<T: Record>(&self) -> MapperResult<DeleteTableInput> {
        let model = self.table_model::<T>()?;
        Ok(model.delete_table_input(&self.table_name::<T>()?))
    }

    /// Converts a raw item into a record.
    pub fn marshal_into_object<T: Record>(&self, item: &Item) -> MapperResult<T> {
        Ok(self.table_model::<T>()?.unconvert(item)?)
    }

    /// Converts raw items into records.
    pub fn marshal_into_objects<T: Record>(&self, items: &[Item]) -> MapperResult<Vec<T>> {
        let model = self.table_model::<T>()?;
        items
            .iter()
            .map(|item| model.unconvert(item).map_err(MapperError::from))
            .collect()
    }

    /// Converts a record into a raw item.
    pub fn marshal_from_object<T: Record>(&self, record: &T) -> MapperResult<Item> {
        Ok(self.table_model::<T>()?.convert(record)?)
    }

    fn page<T: Record>(
        model: &TableModel<T>,
        items: &[Item],
        last_evaluated_key: Item,
        (count, scanned_count): (i32, i32),
        consumed_capacity: Option<ConsumedCapacity>,
    ) -> MapperResult<Page<T>> {
        Ok(Page {
            items: items
                .iter()
                .map(|item| model.unconvert(item))
                .collect::<Result<_, _>>()?,
            last_evaluated_key: (!last_evaluated_key.is_empty()).then_some(last_evaluated_key),
            count,
            scanned_count,
            consumed_capacity,
        })
    }
}
