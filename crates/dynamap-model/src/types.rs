//! Shared DynamoDB types used by the item, query, scan and batch operations.
//!
//! Structs use `#[serde(rename_all = "PascalCase")]` to match the JSON wire
//! format. Enums keep idiomatic Rust names and rename to the
//! `SCREAMING_SNAKE_CASE` strings DynamoDB uses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::{AttributeValue, Item};

/// Declares a wire enum with serde renames, `as_str` and `Display`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant, )+
        }

        impl $name {
            /// Returns the DynamoDB wire-format string representation.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

wire_enum! {
    /// Role of an attribute within a key schema.
    KeyType {
        /// Partition key.
        Hash => "HASH",
        /// Sort key.
        Range => "RANGE",
    }
}

wire_enum! {
    /// Scalar types allowed for key attributes.
    ScalarAttributeType {
        /// String.
        S => "S",
        /// Number.
        N => "N",
        /// Binary.
        B => "B",
    }
}

wire_enum! {
    /// Table billing mode.
    BillingMode {
        /// Provisioned capacity.
        Provisioned => "PROVISIONED",
        /// On-demand capacity.
        PayPerRequest => "PAY_PER_REQUEST",
    }
}

wire_enum! {
    /// Attributes copied into a secondary index.
    ProjectionType {
        /// Every attribute.
        All => "ALL",
        /// Only the table and index keys.
        KeysOnly => "KEYS_ONLY",
        /// Keys plus the listed non-key attributes.
        Include => "INCLUDE",
    }
}

wire_enum! {
    /// Values returned by a write operation.
    ReturnValue {
        /// Nothing is returned.
        None => "NONE",
        /// All attributes as they were before the write.
        AllOld => "ALL_OLD",
        /// Updated attributes as they were before the write.
        UpdatedOld => "UPDATED_OLD",
        /// All attributes as they are after the write.
        AllNew => "ALL_NEW",
        /// Updated attributes as they are after the write.
        UpdatedNew => "UPDATED_NEW",
    }
}

wire_enum! {
    /// Level of consumed-capacity detail returned.
    ReturnConsumedCapacity {
        /// Table and index breakdown.
        Indexes => "INDEXES",
        /// Totals only.
        Total => "TOTAL",
        /// No capacity information.
        None => "NONE",
    }
}

wire_enum! {
    /// Attributes returned by `Query` and `Scan`.
    Select {
        /// All attributes of the item.
        AllAttributes => "ALL_ATTRIBUTES",
        /// All attributes projected into the index.
        AllProjectedAttributes => "ALL_PROJECTED_ATTRIBUTES",
        /// Only the attributes in the projection expression.
        SpecificAttributes => "SPECIFIC_ATTRIBUTES",
        /// Only the number of matching items.
        Count => "COUNT",
    }
}

wire_enum! {
    /// Logical operator joining legacy conditions.
    ConditionalOperator {
        /// All conditions must hold.
        And => "AND",
        /// At least one condition must hold.
        Or => "OR",
    }
}

wire_enum! {
    /// Comparison operator for legacy `Condition` and `Expected` maps.
    ComparisonOperator {
        /// Equal to.
        Eq => "EQ",
        /// Not equal to.
        Ne => "NE",
        /// Less than or equal to.
        Le => "LE",
        /// Less than.
        Lt => "LT",
        /// Greater than or equal to.
        Ge => "GE",
        /// Greater than.
        Gt => "GT",
        /// Attribute exists.
        NotNull => "NOT_NULL",
        /// Attribute does not exist.
        Null => "NULL",
        /// Substring or set membership.
        Contains => "CONTAINS",
        /// Negated substring or set membership.
        NotContains => "NOT_CONTAINS",
        /// String or binary prefix.
        BeginsWith => "BEGINS_WITH",
        /// Member of the value list.
        In => "IN",
        /// Inclusive range.
        Between => "BETWEEN",
    }
}

wire_enum! {
    /// Action applied by a legacy `AttributeUpdates` entry.
    AttributeAction {
        /// Replace the attribute.
        Put => "PUT",
        /// Remove the attribute, or elements from a set.
        Delete => "DELETE",
        /// Add to a number, or elements to a set.
        Add => "ADD",
    }
}

impl Default for ReturnValue {
    fn default() -> Self {
        Self::None
    }
}

impl Default for ConditionalOperator {
    fn default() -> Self {
        Self::And
    }
}

// ---------------------------------------------------------------------------
// Key schema and indexes
// ---------------------------------------------------------------------------

/// An element of the key schema for a table or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    /// The name of the key attribute.
    pub attribute_name: String,
    /// The role of the attribute in the key schema.
    pub key_type: KeyType,
}

impl KeySchemaElement {
    /// Creates a key schema element.
    #[must_use]
    pub fn new(attribute_name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            key_type,
        }
    }
}

/// Declares the scalar type of a key attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    /// The name of the attribute.
    pub attribute_name: String,
    /// The scalar data type of the attribute.
    pub attribute_type: ScalarAttributeType,
}

/// Projection settings for a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Projection {
    /// The set of attributes projected into the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_type: Option<ProjectionType>,
    /// Non-key attributes projected when the type is `INCLUDE`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_key_attributes: Vec<String>,
}

impl Projection {
    /// A projection of the given type with no extra attributes.
    #[must_use]
    pub fn of(projection_type: ProjectionType) -> Self {
        Self {
            projection_type: Some(projection_type),
            non_key_attributes: Vec::new(),
        }
    }
}

/// Global secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalSecondaryIndex {
    /// The name of the index.
    pub index_name: String,
    /// Hash key and optional range key of the index.
    pub key_schema: Vec<KeySchemaElement>,
    /// Attributes projected into the index.
    pub projection: Projection,
}

/// Local secondary index definition.
///
/// Shares the table's hash key and adds an alternate range key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalSecondaryIndex {
    /// The name of the index.
    pub index_name: String,
    /// Table hash key plus the alternate range key.
    pub key_schema: Vec<KeySchemaElement>,
    /// Attributes projected into the index.
    pub projection: Projection,
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

/// Capacity consumed by one call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumedCapacity {
    /// The table that was affected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Total capacity units consumed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_units: Option<f64>,
    /// Read capacity units consumed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_capacity_units: Option<f64>,
    /// Write capacity units consumed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_capacity_units: Option<f64>,
}

// ---------------------------------------------------------------------------
// Legacy conditions and updates
// ---------------------------------------------------------------------------

/// A legacy condition used by `KeyConditions`, `QueryFilter` and `ScanFilter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Condition {
    /// The comparison operator.
    pub comparison_operator: ComparisonOperator,
    /// The values compared against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_value_list: Vec<AttributeValue>,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(comparison_operator: ComparisonOperator, values: Vec<AttributeValue>) -> Self {
        Self {
            comparison_operator,
            attribute_value_list: values,
        }
    }
}

/// A legacy `AttributeUpdates` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeValueUpdate {
    /// The new value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    /// The action to perform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<AttributeAction>,
}

impl AttributeValueUpdate {
    /// Replace the attribute with `value`.
    #[must_use]
    pub fn put(value: AttributeValue) -> Self {
        Self {
            value: Some(value),
            action: Some(AttributeAction::Put),
        }
    }

    /// Add `value` to a number or set attribute.
    #[must_use]
    pub fn add(value: AttributeValue) -> Self {
        Self {
            value: Some(value),
            action: Some(AttributeAction::Add),
        }
    }

    /// Remove the attribute.
    #[must_use]
    pub fn delete() -> Self {
        Self {
            value: None,
            action: Some(AttributeAction::Delete),
        }
    }
}

/// A legacy `Expected` entry for conditional writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpectedAttributeValue {
    /// Value the attribute must currently hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    /// Whether the attribute must exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    /// Comparison operator (extended form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_operator: Option<ComparisonOperator>,
    /// Values compared against (extended form).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_value_list: Vec<AttributeValue>,
}

impl ExpectedAttributeValue {
    /// The attribute must currently equal `value`.
    #[must_use]
    pub fn equals(value: AttributeValue) -> Self {
        Self {
            value: Some(value),
            exists: Some(true),
            ..Self::default()
        }
    }

    /// The attribute must not exist.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            exists: Some(false),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// Keys (and read options) for one table of a `BatchGetItem` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    /// Primary keys of the items to retrieve.
    pub keys: Vec<Item>,
    /// Attributes to retrieve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// Name substitutions for the projection expression.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expression_attribute_names: HashMap<String, String>,
    /// Whether to use a consistent read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

/// One put or delete within a `BatchWriteItem` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// A request to put an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    /// A request to delete an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

impl WriteRequest {
    /// A put of `item`.
    #[must_use]
    pub fn put(item: Item) -> Self {
        Self {
            put_request: Some(PutRequest { item }),
            delete_request: None,
        }
    }

    /// A delete of `key`.
    #[must_use]
    pub fn delete(key: Item) -> Self {
        Self {
            put_request: None,
            delete_request: Some(DeleteRequest { key }),
        }
    }
}

/// A put within a `BatchWriteItem` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    /// The item to put.
    pub item: Item,
}

/// A delete within a `BatchWriteItem` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    /// Primary key of the item to delete.
    pub key: Item,
}
