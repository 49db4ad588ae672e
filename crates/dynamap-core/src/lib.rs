//! Object mapper for DynamoDB tables.
//!
//! Records implement [`Record`] by listing their fields with [`field!`]:
//!
//! ```
//! use dynamap_core::{FieldSpec, Record, field};
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: String,
//!     email: Option<String>,
//!     version: Option<i64>,
//! }
//!
//! impl Record for User {
//!     fn table_name() -> Option<&'static str> {
//!         Some("users")
//!     }
//!
//!     fn fields() -> Vec<FieldSpec<Self>> {
//!         vec![
//!             field!(User, id).hash_key(),
//!             field!(User, email).global_index_hash("by-email"),
//!             field!(User, version).version(),
//!         ]
//!     }
//! }
//! ```
//!
//! A [`DynamoDBMapper`] then loads, saves, queries and scans them through any
//! [`DynamoDBClient`](client::DynamoDBClient).
#![allow(missing_docs, clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod field;
pub mod mapper;
pub mod query;
pub mod scan;
pub mod table;
pub mod value;

#[cfg(test)]
mod testing;

pub use config::{ConsistentRead, MapperConfig, SaveBehavior, TableNameOverride};
pub use convert::{ConversionSchema, SchemaKind};
pub use error::{BatchGetError, MapperError, MapperResult, MappingError};
pub use field::{FieldSpec, GenerateStrategy, Record};
pub use mapper::{DeleteExpression, DynamoDBMapper, KeyBatch, LoadedItems, SaveExpression, WriteBatch};
pub use query::{Page, QueryExpression, ScanExpression};
pub use scan::{ParallelScanTask, SegmentScanState};
pub use table::{ModelRegistry, TableModel};
pub use value::{Attribute, Value};
