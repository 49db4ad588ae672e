//! Conversion engine: picks a wire representation for every field type.
//!
//! A [`ConversionSchema`] is an ordered list of rules, one list for scalar
//! and collection types and a separate one for sets. Resolution walks the
//! list and the first matching rule wins. Custom rules added through the
//! builder are prepended, so the most recently added one shadows both earlier
//! custom rules and the built-ins.
//!
//! Three built-in schemas exist:
//!
//! - [`SchemaKind::V1`]: scalars and scalar sets only; booleans stored as
//!   numbers.
//! - [`SchemaKind::V2Compatible`] (default): adds lists, maps, nested
//!   documents and raw attribute values while keeping booleans as numbers.
//! - [`SchemaKind::V2`]: native booleans and sets of arbitrary values stored
//!   as lists.

mod converter;
mod engine;
mod rules;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dynamap_model::{AttributeValue, WireType};

pub use self::converter::Converter;
pub use self::engine::{ConversionEngine, DocumentModel};
use self::rules::{Rule, RuleEntry};
use crate::value::{Attribute, Value, ValueError};

/// A user-supplied converter for one field or type.
///
/// Null values never reach a custom converter; the engine omits them.
pub trait CustomConverter: Send + Sync + fmt::Debug {
    /// The wire type this converter produces.
    fn wire_type(&self) -> WireType;

    /// Runtime value to wire value.
    fn convert(&self, value: &Value) -> Result<AttributeValue, ValueError>;

    /// Wire value to runtime value.
    fn unconvert(&self, value: &AttributeValue) -> Result<Value, ValueError>;
}

/// Which built-in rule set a schema starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchemaKind {
    /// Legacy scalars and sets only.
    V1,
    /// V1 representations plus lists, maps and documents.
    #[default]
    V2Compatible,
    /// Native booleans and list-backed object sets.
    V2,
}

impl SchemaKind {
    /// Configuration name of the schema.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "V1",
            Self::V2Compatible => "V2_COMPATIBLE",
            Self::V2 => "V2",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "V1" => Ok(Self::V1),
            "V2_COMPATIBLE" | "V2COMPATIBLE" => Ok(Self::V2Compatible),
            "V2" => Ok(Self::V2),
            other => Err(format!("unknown conversion schema: {other}")),
        }
    }
}

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(1);

static V1: LazyLock<Arc<ConversionSchema>> =
    LazyLock::new(|| Arc::new(ConversionSchema::builder(SchemaKind::V1, "V1ConversionSchema").build()));
static V2_COMPATIBLE: LazyLock<Arc<ConversionSchema>> = LazyLock::new(|| {
    Arc::new(ConversionSchema::builder(SchemaKind::V2Compatible, "V2CompatibleConversionSchema").build())
});
static V2: LazyLock<Arc<ConversionSchema>> =
    LazyLock::new(|| Arc::new(ConversionSchema::builder(SchemaKind::V2, "V2ConversionSchema").build()));

/// An immutable, ordered set of conversion rules.
#[derive(Debug)]
pub struct ConversionSchema {
    id: u64,
    name: String,
    kind: SchemaKind,
    scalar_rules: Vec<RuleEntry>,
    set_rules: Vec<RuleEntry>,
}

impl ConversionSchema {
    /// The shared built-in schema of the given kind.
    #[must_use]
    pub fn of(kind: SchemaKind) -> Arc<Self> {
        match kind {
            SchemaKind::V1 => Arc::clone(&V1),
            SchemaKind::V2Compatible => Arc::clone(&V2_COMPATIBLE),
            SchemaKind::V2 => Arc::clone(&V2),
        }
    }

    /// Starts a custom schema on top of a built-in rule set.
    #[must_use]
    pub fn builder(kind: SchemaKind, name: impl Into<String>) -> ConversionSchemaBuilder {
        ConversionSchemaBuilder {
            name: name.into(),
            kind,
            custom_scalars: Vec::new(),
            custom_sets: Vec::new(),
        }
    }

    /// Unique identity, used as a cache key.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Schema name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The built-in rule set this schema extends.
    #[must_use]
    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub(crate) fn scalar_rules(&self) -> &[RuleEntry] {
        &self.scalar_rules
    }

    pub(crate) fn set_rules(&self) -> &[RuleEntry] {
        &self.set_rules
    }
}

/// Builder for a [`ConversionSchema`] with custom rules.
#[derive(Debug)]
pub struct ConversionSchemaBuilder {
    name: String,
    kind: SchemaKind,
    custom_scalars: Vec<RuleEntry>,
    custom_sets: Vec<RuleEntry>,
}

impl ConversionSchemaBuilder {
    /// Converts every field of type `A` with `converter`, ahead of all
    /// previously added rules.
    #[must_use]
    pub fn add_first_type<A: Attribute>(mut self, converter: Arc<dyn CustomConverter>) -> Self {
        self.custom_scalars.insert(
            0,
            RuleEntry::enabled(Rule::Custom {
                type_id: A::descriptor().type_id,
                converter,
            }),
        );
        self
    }

    /// Converts every set whose elements are of type `A` with `converter`,
    /// ahead of all previously added set rules.
    #[must_use]
    pub fn add_first_set_type<A: Attribute>(mut self, converter: Arc<dyn CustomConverter>) -> Self {
        self.custom_sets.insert(
            0,
            RuleEntry::enabled(Rule::CustomSet {
                element: A::descriptor().type_id,
                converter,
            }),
        );
        self
    }

    /// Builds the schema.
    #[must_use]
    pub fn build(self) -> ConversionSchema {
        let mut scalar_rules = self.custom_scalars;
        scalar_rules.extend(rules::standard_scalar_rules(self.kind));
        let mut set_rules = self.custom_sets;
        set_rules.extend(rules::standard_set_rules(self.kind));
        ConversionSchema {
            id: NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            kind: self.kind,
            scalar_rules,
            set_rules,
        }
    }
}
