//! DynamoDB operations the mapper issues.

use std::fmt;

/// JSON protocol target prefix, e.g. `DynamoDB_20120810.PutItem`.
pub const TARGET_PREFIX: &str = "DynamoDB_20120810";

/// Operations issued by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamoDBOperation {
    /// Get an item by primary key.
    GetItem,
    /// Put (insert or replace) an item.
    PutItem,
    /// Update an item.
    UpdateItem,
    /// Delete an item by primary key.
    DeleteItem,
    /// Batch get items from multiple tables.
    BatchGetItem,
    /// Batch write (put/delete) items to multiple tables.
    BatchWriteItem,
    /// Query items by key condition.
    Query,
    /// Scan a table or one of its segments.
    Scan,
}

impl DynamoDBOperation {
    /// Returns the AWS operation name string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetItem => "GetItem",
            Self::PutItem => "PutItem",
            Self::UpdateItem => "UpdateItem",
            Self::DeleteItem => "DeleteItem",
            Self::BatchGetItem => "BatchGetItem",
            Self::BatchWriteItem => "BatchWriteItem",
            Self::Query => "Query",
            Self::Scan => "Scan",
        }
    }

    /// Returns the `X-Amz-Target` header value for this operation.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{TARGET_PREFIX}.{}", self.as_str())
    }
}

impl fmt::Display for DynamoDBOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
