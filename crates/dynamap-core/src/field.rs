//! Declarative field model for mapped records.
//!
//! A [`Record`] lists its fields as [`FieldSpec`]s. Each spec pairs plain
//! `fn` accessors with a [`FieldMeta`] describing the wire attribute name, key
//! role, index memberships, wire-type hint, custom converter and generation
//! strategy. The [`field!`](crate::field!) macro derives the accessors and the
//! type descriptor from a struct field:
//!
//! ```
//! use dynamap_core::field::Record;
//! use dynamap_core::{FieldSpec, field};
//!
//! #[derive(Debug, Default)]
//! struct Order {
//!     customer: String,
//!     placed_at: i64,
//!     note: Option<String>,
//! }
//!
//! impl Record for Order {
//!     fn table_name() -> Option<&'static str> {
//!         Some("orders")
//!     }
//!
//!     fn fields() -> Vec<FieldSpec<Self>> {
//!         vec![
//!             field!(Order, customer).hash_key(),
//!             field!(Order, placed_at).range_key(),
//!             field!(Order, note).rename("Note"),
//!         ]
//!     }
//! }
//!
//! assert_eq!(Order::fields()[2].meta.attribute_name, "Note");
//! ```

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use dynamap_model::WireType;
use dynamap_model::types::KeyType;

use crate::convert::CustomConverter;
use crate::value::{Attribute, Number, TypeDescriptor, TypeKind, Value, ValueError};

/// A Rust type mapped to a table row or a nested document.
pub trait Record: Default + Send + Sync + 'static {
    /// Table the record is stored in. Nested documents return `None`.
    fn table_name() -> Option<&'static str> {
        None
    }

    /// The mapped fields, in declaration order.
    fn fields() -> Vec<FieldSpec<Self>>;
}

// ---------------------------------------------------------------------------
// Index membership and generation
// ---------------------------------------------------------------------------

/// Kind of secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Global secondary index with its own hash key.
    Global,
    /// Local secondary index sharing the table's hash key.
    Local,
}

/// One index a field takes part in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexMembership {
    /// Global or local.
    pub kind: IndexKind,
    /// Index name.
    pub index_name: String,
    /// Role of the field within the index key.
    pub key_type: KeyType,
}

/// When a generated value is produced on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GenerateStrategy {
    /// Never generated.
    #[default]
    Never,
    /// Generated only while the field is still unset.
    OnInsertOnly,
    /// Regenerated on every save.
    Always,
}

/// Source of generated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generator {
    /// Random UUID text.
    Uuid,
    /// Version counter starting at 1.
    Version,
    /// Current time as ISO-8601 text.
    Timestamp,
}

/// A generator paired with its strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AutoGenerate {
    /// Value source.
    pub generator: Generator,
    /// When to generate.
    pub strategy: GenerateStrategy,
}

impl AutoGenerate {
    /// Produces the next value from the field's current one.
    pub fn generate(&self, current: &Value) -> Result<Value, ValueError> {
        match self.generator {
            Generator::Uuid => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            Generator::Timestamp => Ok(Utc::now().to_value()),
            Generator::Version => match current {
                Value::Null => Ok(Value::Number(Number::from(1))),
                Value::Number(n) => {
                    let version: i128 = n.to()?;
                    Ok(Value::Number(Number::from(version + 1)))
                }
                other => Err(ValueError::unexpected("version number", other)),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// FieldMeta
// ---------------------------------------------------------------------------

/// Everything the mapper knows about a field apart from its accessors.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    /// The Rust field name.
    pub name: &'static str,
    /// The wire attribute name.
    pub attribute_name: String,
    /// Static type information.
    pub descriptor: TypeDescriptor,
    /// Primary key role, if any.
    pub key_type: Option<KeyType>,
    /// Secondary index memberships.
    pub indexes: Vec<IndexMembership>,
    /// Explicit wire-type hint.
    pub wire_hint: Option<WireType>,
    /// Field-level converter, overriding the schema rules.
    pub converter: Option<Arc<dyn CustomConverter>>,
    /// Generation settings.
    pub auto_generate: Option<AutoGenerate>,
    /// Whether this is the optimistic-locking version field.
    pub version: bool,
}

impl FieldMeta {
    /// Creates metadata with the attribute name equal to the field name.
    #[must_use]
    pub fn new(name: &'static str, descriptor: TypeDescriptor) -> Self {
        Self {
            name,
            attribute_name: name.to_owned(),
            descriptor,
            key_type: None,
            indexes: Vec::new(),
            wire_hint: None,
            converter: None,
            auto_generate: None,
            version: false,
        }
    }

    /// Returns `true` when the field takes part in any secondary index.
    #[must_use]
    pub fn indexed(&self) -> bool {
        !self.indexes.is_empty()
    }

    /// Names of global indexes where this field has the given role.
    pub fn global_indexes(&self, key_type: KeyType) -> impl Iterator<Item = &str> {
        self.indexes
            .iter()
            .filter(move |m| m.kind == IndexKind::Global && m.key_type == key_type)
            .map(|m| m.index_name.as_str())
    }

    /// Names of local indexes using this field as range key.
    pub fn local_indexes(&self) -> impl Iterator<Item = &str> {
        self.indexes
            .iter()
            .filter(|m| m.kind == IndexKind::Local)
            .map(|m| m.index_name.as_str())
    }

    /// The active generation strategy.
    #[must_use]
    pub fn generate_strategy(&self) -> GenerateStrategy {
        self.auto_generate.map_or(GenerateStrategy::Never, |g| g.strategy)
    }
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// Reads a field as a runtime value.
pub type Getter<T> = fn(&T) -> Value;

/// Writes a runtime value into a field.
pub type Setter<T> = fn(&mut T, Value) -> Result<(), ValueError>;

/// A field declaration: metadata plus accessors.
pub struct FieldSpec<T> {
    /// Field metadata.
    pub meta: FieldMeta,
    getter: Getter<T>,
    setter: Setter<T>,
}

impl<T> Clone for FieldSpec<T> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            getter: self.getter,
            setter: self.setter,
        }
    }
}

impl<T> fmt::Debug for FieldSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec").field("meta", &self.meta).finish_non_exhaustive()
    }
}

impl<T> FieldSpec<T> {
    /// Creates a field from explicit accessors.
    #[must_use]
    pub fn new(
        name: &'static str,
        descriptor: TypeDescriptor,
        getter: Getter<T>,
        setter: Setter<T>,
    ) -> Self {
        Self {
            meta: FieldMeta::new(name, descriptor),
            getter,
            setter,
        }
    }

    /// Stores the field under a different attribute name.
    #[must_use]
    pub fn rename(mut self, attribute_name: impl Into<String>) -> Self {
        self.meta.attribute_name = attribute_name.into();
        self
    }

    /// Marks the field as the table's hash key.
    #[must_use]
    pub fn hash_key(mut self) -> Self {
        self.meta.key_type = Some(KeyType::Hash);
        self
    }

    /// Marks the field as the table's range key.
    #[must_use]
    pub fn range_key(mut self) -> Self {
        self.meta.key_type = Some(KeyType::Range);
        self
    }

    /// Adds the field as hash key of a global secondary index.
    #[must_use]
    pub fn global_index_hash(self, index_name: impl Into<String>) -> Self {
        self.index(IndexKind::Global, index_name, KeyType::Hash)
    }

    /// Adds the field as range key of a global secondary index.
    #[must_use]
    pub fn global_index_range(self, index_name: impl Into<String>) -> Self {
        self.index(IndexKind::Global, index_name, KeyType::Range)
    }

    /// Adds the field as range key of a local secondary index.
    #[must_use]
    pub fn local_index_range(self, index_name: impl Into<String>) -> Self {
        self.index(IndexKind::Local, index_name, KeyType::Range)
    }

    fn index(mut self, kind: IndexKind, index_name: impl Into<String>, key_type: KeyType) -> Self {
        self.meta.indexes.push(IndexMembership {
            kind,
            index_name: index_name.into(),
            key_type,
        });
        self
    }

    /// Forces the stored wire type.
    #[must_use]
    pub fn typed(mut self, wire_type: WireType) -> Self {
        self.meta.wire_hint = Some(wire_type);
        self
    }

    /// Converts the field with a custom converter.
    #[must_use]
    pub fn converter(mut self, converter: Arc<dyn CustomConverter>) -> Self {
        self.meta.converter = Some(converter);
        self
    }

    /// Generates a random UUID while the field is unset.
    #[must_use]
    pub fn auto_generated_key(mut self) -> Self {
        self.meta.auto_generate = Some(AutoGenerate {
            generator: Generator::Uuid,
            strategy: GenerateStrategy::OnInsertOnly,
        });
        self
    }

    /// Stamps the current time on save.
    #[must_use]
    pub fn auto_timestamp(mut self, strategy: GenerateStrategy) -> Self {
        self.meta.auto_generate = Some(AutoGenerate {
            generator: Generator::Timestamp,
            strategy,
        });
        self
    }

    /// Marks the field as the optimistic-locking version.
    #[must_use]
    pub fn version(mut self) -> Self {
        self.meta.version = true;
        self.meta.auto_generate = Some(AutoGenerate {
            generator: Generator::Version,
            strategy: GenerateStrategy::Always,
        });
        self
    }

    /// Reads the field.
    pub fn get(&self, record: &T) -> Value {
        (self.getter)(record)
    }

    /// Writes the field.
    pub fn set(&self, record: &mut T, value: Value) -> Result<(), ValueError> {
        (self.setter)(record, value)
    }
}

/// Returns the descriptor of the value a projection yields.
///
/// Used by [`field!`](crate::field!) to name a field's type without spelling it.
pub fn descriptor_of<R, A: Attribute>(_projection: impl FnOnce(R) -> A) -> TypeDescriptor {
    A::descriptor()
}

/// Declares a [`FieldSpec`] for a named struct field.
#[macro_export]
macro_rules! field {
    ($ty:ty, $name:ident) => {
        $crate::field::FieldSpec::<$ty>::new(
            stringify!($name),
            $crate::field::descriptor_of(|r: $ty| r.$name),
            |r: &$ty| -> $crate::value::Value { $crate::value::Attribute::to_value(&r.$name) },
            |r: &mut $ty,
             v: $crate::value::Value|
             -> ::std::result::Result<(), $crate::value::ValueError> {
                r.$name = $crate::value::Attribute::from_value(v)?;
                Ok(())
            },
        )
    };
}

// ---------------------------------------------------------------------------
// Nested documents
// ---------------------------------------------------------------------------

/// Identity and field list of a nested document type.
#[derive(Clone, Copy)]
pub struct DocumentType {
    /// The Rust type name.
    pub name: &'static str,
    /// Identity of the document type.
    pub type_id: TypeId,
    /// Field metadata, produced lazily so recursive documents terminate.
    pub fields: fn() -> Vec<FieldMeta>,
}

impl fmt::Debug for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentType").field(&self.name).finish()
    }
}

impl PartialEq for DocumentType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for DocumentType {}

impl Hash for DocumentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

fn document_fields<R: Record>() -> Vec<FieldMeta> {
    R::fields().into_iter().map(|f| f.meta).collect()
}

/// Descriptor of a record used as a nested document.
#[must_use]
pub fn document_descriptor<R: Record>() -> TypeDescriptor {
    TypeDescriptor::of::<R>(TypeKind::Document(DocumentType {
        name: std::any::type_name::<R>(),
        type_id: TypeId::of::<R>(),
        fields: document_fields::<R>,
    }))
}

/// Reads every field of a nested document.
pub fn document_to_value<R: Record>(record: &R) -> Value {
    Value::Document(
        R::fields()
            .iter()
            .map(|f| (f.meta.attribute_name.clone(), f.get(record)))
            .collect(),
    )
}

/// Rebuilds a nested document; missing attributes keep their defaults.
pub fn document_from_value<R: Record>(value: Value) -> Result<R, ValueError> {
    let mut entries = match value {
        Value::Document(entries) => entries,
        other => return Err(ValueError::unexpected("document", &other)),
    };
    let mut record = R::default();
    for field in R::fields() {
        if let Some(pos) = entries
            .iter()
            .position(|(name, _)| *name == field.meta.attribute_name)
        {
            let (_, v) = entries.swap_remove(pos);
            field.set(&mut record, v).map_err(|e| {
                ValueError::Message(format!("{}[{}]: {e}", std::any::type_name::<R>(), field.meta.name))
            })?;
        }
    }
    Ok(record)
}

/// Implements [`Attribute`] for a [`Record`] so it can nest inside other
/// records as a map attribute.
#[macro_export]
macro_rules! document_attribute {
    ($ty:ty) => {
        impl $crate::value::Attribute for $ty {
            fn descriptor() -> $crate::value::TypeDescriptor {
                $crate::field::document_descriptor::<$ty>()
            }

            fn to_value(&self) -> $crate::value::Value {
                $crate::field::document_to_value(self)
            }

            fn from_value(
                value: $crate::value::Value,
            ) -> ::std::result::Result<Self, $crate::value::ValueError> {
                $crate::field::document_from_value(value)
            }
        }
    };
}
