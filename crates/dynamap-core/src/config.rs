//! Mapper configuration.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::batch::{
    BatchLoadRetryStrategy, BatchWriteRetryStrategy, DefaultBatchLoadRetryStrategy,
    DefaultBatchWriteRetryStrategy,
};
use crate::convert::{ConversionSchema, SchemaKind};
use crate::field::Record;

/// How `save` writes a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveBehavior {
    /// Update modeled attributes; null fields delete their attribute.
    #[default]
    Update,
    /// Update modeled attributes; null fields are left untouched.
    UpdateSkipNullAttributes,
    /// Replace the whole item and skip version checks.
    Clobber,
    /// Like `UpdateSkipNullAttributes`, but sets are unioned into the stored
    /// value.
    AppendSet,
}

impl FromStr for SaveBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UPDATE" => Ok(Self::Update),
            "UPDATE_SKIP_NULL_ATTRIBUTES" => Ok(Self::UpdateSkipNullAttributes),
            "CLOBBER" => Ok(Self::Clobber),
            "APPEND_SET" => Ok(Self::AppendSet),
            other => Err(format!("unknown save behavior: {other}")),
        }
    }
}

/// Read consistency for loads, queries and scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistentRead {
    /// Eventually consistent reads.
    #[default]
    Eventual,
    /// Strongly consistent reads.
    Consistent,
}

impl ConsistentRead {
    /// Value for the `ConsistentRead` request flag.
    #[must_use]
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Self::Eventual => None,
            Self::Consistent => Some(true),
        }
    }
}

/// Rewrites the table name declared by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableNameOverride {
    /// Use this table name for every record.
    Replace(String),
    /// Prepend this prefix to the declared name.
    Prefix(String),
}

impl TableNameOverride {
    /// Applies the override to a declared table name.
    #[must_use]
    pub fn apply(&self, declared: &str) -> String {
        match self {
            Self::Replace(name) => name.clone(),
            Self::Prefix(prefix) => format!("{prefix}{declared}"),
        }
    }
}

/// Configuration for a [`DynamoDBMapper`](crate::DynamoDBMapper).
#[derive(Clone)]
pub struct MapperConfig {
    /// Write behavior for `save`.
    pub save_behavior: SaveBehavior,
    /// Read consistency.
    pub consistent_read: ConsistentRead,
    /// Conversion schema used for every field.
    pub conversion_schema: Arc<ConversionSchema>,
    /// Optional table name rewrite.
    pub table_name_override: Option<TableNameOverride>,
    /// Retry policy for batch writes.
    pub batch_write_retry_strategy: Arc<dyn BatchWriteRetryStrategy>,
    /// Retry policy for batch loads.
    pub batch_load_retry_strategy: Arc<dyn BatchLoadRetryStrategy>,
}

impl fmt::Debug for MapperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperConfig")
            .field("save_behavior", &self.save_behavior)
            .field("consistent_read", &self.consistent_read)
            .field("conversion_schema", &self.conversion_schema.name())
            .field("table_name_override", &self.table_name_override)
            .field("batch_write_retry_strategy", &self.batch_write_retry_strategy)
            .field("batch_load_retry_strategy", &self.batch_load_retry_strategy)
            .finish()
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            save_behavior: SaveBehavior::default(),
            consistent_read: ConsistentRead::default(),
            conversion_schema: ConversionSchema::of(SchemaKind::default()),
            table_name_override: None,
            batch_write_retry_strategy: Arc::new(DefaultBatchWriteRetryStrategy::default()),
            batch_load_retry_strategy: Arc::new(DefaultBatchLoadRetryStrategy),
        }
    }
}

impl MapperConfig {
    /// Create configuration from environment variables.
    ///
    /// Unparseable values are logged and replaced by the default.
    #[must_use]
    pub fn from_env() -> Self {
        let schema = env_parse("DYNAMAP_CONVERSION_SCHEMA", SchemaKind::default());
        Self {
            save_behavior: env_parse("DYNAMAP_SAVE_BEHAVIOR", SaveBehavior::default()),
            consistent_read: if env_bool("DYNAMAP_CONSISTENT_READS", false) {
                ConsistentRead::Consistent
            } else {
                ConsistentRead::Eventual
            },
            conversion_schema: ConversionSchema::of(schema),
            table_name_override: env::var("DYNAMAP_TABLE_NAME_PREFIX")
                .ok()
                .filter(|p| !p.is_empty())
                .map(TableNameOverride::Prefix),
            ..Self::default()
        }
    }

    /// Sets the save behavior.
    #[must_use]
    pub fn with_save_behavior(mut self, save_behavior: SaveBehavior) -> Self {
        self.save_behavior = save_behavior;
        self
    }

    /// Sets read consistency.
    #[must_use]
    pub fn with_consistent_read(mut self, consistent_read: ConsistentRead) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    /// Sets the conversion schema.
    #[must_use]
    pub fn with_conversion_schema(mut self, schema: Arc<ConversionSchema>) -> Self {
        self.conversion_schema = schema;
        self
    }

    /// Sets the table name override.
    #[must_use]
    pub fn with_table_name_override(mut self, table_name_override: TableNameOverride) -> Self {
        self.table_name_override = Some(table_name_override);
        self
    }

    /// Sets the batch write retry strategy.
    #[must_use]
    pub fn with_batch_write_retry_strategy(
        mut self,
        strategy: Arc<dyn BatchWriteRetryStrategy>,
    ) -> Self {
        self.batch_write_retry_strategy = strategy;
        self
    }

    /// Sets the batch load retry strategy.
    #[must_use]
    pub fn with_batch_load_retry_strategy(mut self, strategy: Arc<dyn BatchLoadRetryStrategy>) -> Self {
        self.batch_load_retry_strategy = strategy;
        self
    }

    /// Resolves the table name for `R`, applying any override.
    ///
    /// Returns `None` when `R` declares no table and no replacement is set.
    #[must_use]
    pub fn table_name<R: Record>(&self) -> Option<String> {
        match (&self.table_name_override, R::table_name()) {
            (Some(TableNameOverride::Replace(name)), _) => Some(name.clone()),
            (Some(ov), Some(declared)) => Some(ov.apply(declared)),
            (None, Some(declared)) => Some(declared.to_owned()),
            (_, None) => None,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| {
        matches!(v.as_str(), "1" | "true" | "yes" | "TRUE" | "YES")
    })
}

fn env_parse<T: FromStr<Err = String>>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|err| {
            warn!(key, %err, "ignoring invalid configuration value");
            default
        }),
        Err(_) => default,
    }
}
