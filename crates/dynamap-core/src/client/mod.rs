//! The store client the mapper talks to.
//!
//! The mapper never speaks a transport protocol itself. Everything goes
//! through [`DynamoDBClient`], which takes and returns the wire-level request
//! and response shapes from `dynamap-model`. [`JsonClient`] adapts the trait
//! to the `awsJson1_0` protocol over any [`JsonTransport`].

mod json;

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

pub use self::json::{CONTENT_TYPE, JsonClient, JsonTransport};

/// Item, query, scan and batch calls against a DynamoDB-compatible store.
#[async_trait]
pub trait DynamoDBClient: Send + Sync {
    /// Reads one item by primary key.
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError>;

    /// Writes one whole item.
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError>;

    /// Updates attributes of one item, creating it if needed.
    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, DynamoDBError>;

    /// Deletes one item by primary key.
    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, DynamoDBError>;

    /// Reads up to 100 keys across tables.
    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, DynamoDBError>;

    /// Writes up to 25 puts or deletes across tables.
    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoDBError>;

    /// Reads one page of a query.
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError>;

    /// Reads one page of a scan or scan segment.
    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError>;
}
