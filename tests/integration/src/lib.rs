//! End-to-end tests for the dynamap mapper.
//!
//! Every test drives a [`DynamoDBMapper`] against [`MemoryClient`], an
//! in-process store that honours keys, expected-value conditions, paging and
//! scan segments. Run them with:
//! ```text
//! cargo test -p dynamap-integration
//! ```

use std::sync::{Arc, Once};

use dynamap_core::{DynamoDBMapper, MapperConfig, Record, TableNameOverride};

mod memory;

pub use memory::MemoryClient;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Generate a unique table name prefix for a test.
#[must_use]
pub fn test_table_prefix(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}-")
}

/// A mapper and the store behind it.
#[derive(Debug)]
pub struct Harness {
    /// The in-memory store.
    pub client: Arc<MemoryClient>,
    /// A mapper writing to uniquely prefixed tables.
    pub mapper: DynamoDBMapper,
}

impl Harness {
    /// A harness over `client` with `config`, prefixing every table name.
    #[must_use]
    pub fn new(prefix: &str, client: MemoryClient, config: MapperConfig) -> Self {
        init_tracing();
        let client = Arc::new(client);
        let config =
            config.with_table_name_override(TableNameOverride::Prefix(test_table_prefix(prefix)));
        let mapper = DynamoDBMapper::with_config(client.clone(), config);
        Self { client, mapper }
    }

    /// A harness with a default store and configuration.
    #[must_use]
    pub fn with_defaults(prefix: &str) -> Self {
        Self::new(prefix, MemoryClient::new(), MapperConfig::default())
    }

    /// Creates the table of `T` from its generated `CreateTable` request.
    pub fn create_table<T: Record>(&self) -> String {
        let input = self
            .mapper
            .generate_create_table_request::<T>()
            .unwrap_or_else(|e| panic!("failed to build create table request: {e}"));
        self.client.create_table(&input);
        input.table_name
    }
}

mod test_batch;
mod test_conversion;
mod test_query;
mod test_save;
mod test_scan;
