//! DynamoDB wire model for the dynamap object mapper.
//!
//! These are the request/response shapes the mapper speaks to a DynamoDB
//! client: the `AttributeValue` tagged union, the JSON-protocol error type,
//! and the inputs/outputs of the item, query, scan and batch operations.
//! Everything serializes to the `awsJson1_0` wire format via serde.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(missing_docs)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod operations;
pub mod output;
pub mod types;

pub use attribute_value::{AttributeValue, Item, WireType};
pub use error::{DynamoDBError, DynamoDBErrorCode};
pub use operations::DynamoDBOperation;
