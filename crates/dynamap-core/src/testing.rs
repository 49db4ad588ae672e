//! Scripted client for unit tests.

use async_trait::async_trait;
use dynamap_model::DynamoDBError;
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput, ScanInput, UpdateItemInput,
};
use dynamap_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, UpdateItemOutput,
};
use parking_lot::Mutex;

use crate::client::DynamoDBClient;

type Handler<I, O> = Box<dyn Fn(&I) -> Result<O, DynamoDBError> + Send + Sync>;

/// Answers calls from closures and records every request.
///
/// Calls without a handler succeed with an empty output.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    get: Option<Handler<GetItemInput, GetItemOutput>>,
    update: Option<Handler<UpdateItemInput, UpdateItemOutput>>,
    query: Option<Handler<QueryInput, QueryOutput>>,
    batch_write: Option<Handler<BatchWriteItemInput, BatchWriteItemOutput>>,
    batch_get: Option<Handler<BatchGetItemInput, BatchGetItemOutput>>,
    scan: Option<Handler<ScanInput, ScanOutput>>,
    pub(crate) puts: Mutex<Vec<PutItemInput>>,
    pub(crate) updates: Mutex<Vec<UpdateItemInput>>,
    pub(crate) deletes: Mutex<Vec<DeleteItemInput>>,
    pub(crate) queries: Mutex<Vec<QueryInput>>,
    pub(crate) batch_writes: Mutex<Vec<BatchWriteItemInput>>,
    pub(crate) batch_gets: Mutex<Vec<BatchGetItemInput>>,
    pub(crate) scans: Mutex<Vec<ScanInput>>,
}

fn answer<I, O: Default>(handler: Option<&Handler<I, O>>, input: &I) -> Result<O, DynamoDBError> {
    handler.map_or_else(|| Ok(O::default()), |f| f(input))
}

impl ScriptedClient {
    pub(crate) fn on_get(
        mut self,
        f: impl Fn(&GetItemInput) -> Result<GetItemOutput, DynamoDBError> + Send + Sync + 'static,
    ) -> Self {
        self.get = Some(Box::new(f));
        self
    }

    pub(crate) fn on_update(
        mut self,
        f: impl Fn(&UpdateItemInput) -> Result<UpdateItemOutput, DynamoDBError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub(crate) fn on_query(
        mut self,
        f: impl Fn(&QueryInput) -> Result<QueryOutput, DynamoDBError> + Send + Sync + 'static,
    ) -> Self {
        self.query = Some(Box::new(f));
        self
    }

    pub(crate) fn on_batch_write(
        mut self,
        f: impl Fn(&BatchWriteItemInput) -> Result<BatchWriteItemOutput, DynamoDBError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.batch_write = Some(Box::new(f));
        self
    }

    pub(crate) fn on_batch_get(
        mut self,
        f: impl Fn(&BatchGetItemInput) -> Result<BatchGetItemOutput, DynamoDBError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.batch_get = Some(Box::new(f));
        self
    }

    pub(crate) fn on_scan(
        mut self,
        f: impl Fn(&ScanInput) -> Result<ScanOutput, DynamoDBError> + Send + Sync + 'static,
    ) -> Self {
        self.scan = Some(Box::new(f));
        self
    }

    pub(crate) fn batch_write_sizes(&self) -> Vec<usize> {
        self.batch_writes
            .lock()
            .iter()
            .map(BatchWriteItemInput::request_count)
            .collect()
    }
}

#[async_trait]
impl DynamoDBClient for ScriptedClient {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        answer(self.get.as_ref(), &input)
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        self.puts.lock().push(input);
        Ok(PutItemOutput::default())
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, DynamoDBError> {
        let result = answer(self.update.as_ref(), &input);
        self.updates.lock().push(input);
        result
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, DynamoDBError> {
        self.deletes.lock().push(input);
        Ok(DeleteItemOutput::default())
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, DynamoDBError> {
        let result = answer(self.batch_get.as_ref(), &input);
        self.batch_gets.lock().push(input);
        result
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoDBError> {
        let result = answer(self.batch_write.as_ref(), &input);
        self.batch_writes.lock().push(input);
        result
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        let result = answer(self.query.as_ref(), &input);
        self.queries.lock().push(input);
        result
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        let result = answer(self.scan.as_ref(), &input);
        self.scans.lock().push(input);
        result
    }
}
