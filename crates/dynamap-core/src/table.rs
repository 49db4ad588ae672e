//! Table models: resolved fields, keys and indexes of one record type.
//!
//! A [`TableModel`] is built once per (record type, conversion schema) and
//! shared. Construction resolves a converter for every field and walks nested
//! documents, so an unmappable type fails here instead of on the first
//! request.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use dynamap_model::types::{
    AttributeDefinition, ComparisonOperator, Condition, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, LocalSecondaryIndex, Projection, ProjectionType, ScalarAttributeType,
};
use dynamap_model::{AttributeValue, Item, WireType};
use dynamap_model::input::{CreateTableInput, DeleteTableInput};
use tracing::debug;

use crate::cache::OnceCache;
use crate::convert::{ConversionEngine, ConversionSchema, Converter};
use crate::error::MappingError;
use crate::field::{FieldMeta, FieldSpec, GenerateStrategy, Record};
use crate::value::{Attribute, Value};

/// Short name of a Rust type, used as the owner in mapping errors.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ---------------------------------------------------------------------------
// FieldModel
// ---------------------------------------------------------------------------

/// A field with its resolved converter.
#[derive(Debug)]
pub struct FieldModel<T> {
    owner: &'static str,
    spec: FieldSpec<T>,
    converter: Converter,
    engine: Arc<ConversionEngine>,
}

impl<T> FieldModel<T> {
    /// Field metadata.
    #[must_use]
    pub fn meta(&self) -> &FieldMeta {
        &self.spec.meta
    }

    /// The Rust field name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.spec.meta.name
    }

    /// The wire attribute name.
    #[must_use]
    pub fn attribute_name(&self) -> &str {
        &self.spec.meta.attribute_name
    }

    /// Primary key role.
    #[must_use]
    pub fn key_type(&self) -> Option<KeyType> {
        self.spec.meta.key_type
    }

    /// Whether this is the optimistic-locking version field.
    #[must_use]
    pub fn versioned(&self) -> bool {
        self.spec.meta.version
    }

    /// The resolved converter.
    #[must_use]
    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// The wire type written, when fixed.
    #[must_use]
    pub fn wire_type(&self) -> Option<WireType> {
        self.converter.wire_type()
    }

    fn error(&self, reason: impl Into<String>) -> MappingError {
        MappingError::new(self.owner, reason).with_property(self.name())
    }

    /// Reads the field's runtime value.
    pub fn get(&self, record: &T) -> Value {
        self.spec.get(record)
    }

    /// Writes a runtime value into the field.
    pub fn set(&self, record: &mut T, value: Value) -> Result<(), MappingError> {
        self.spec
            .set(record, value)
            .map_err(|e| self.error(e.to_string()))
    }

    /// Converts a runtime value; `None` when it is omitted on the wire.
    pub fn convert_value(&self, value: Value) -> Result<Option<AttributeValue>, MappingError> {
        self.converter
            .convert(value, &self.engine)
            .map_err(|e| self.error(format!("could not convert attribute: {e}")))
    }

    /// Reads and converts the field.
    pub fn convert(&self, record: &T) -> Result<Option<AttributeValue>, MappingError> {
        self.convert_value(self.get(record))
    }

    /// Decodes a wire value.
    pub fn unconvert(&self, value: &AttributeValue) -> Result<Value, MappingError> {
        self.converter
            .unconvert(value, &self.engine)
            .map_err(|e| self.error(format!("could not unconvert attribute: {e}")).with_value(value))
    }

    /// Decodes a wire value and writes it into the field.
    pub fn unconvert_and_set(&self, record: &mut T, value: &AttributeValue) -> Result<(), MappingError> {
        let decoded = self.unconvert(value)?;
        self.set(record, decoded).map_err(|e| e.with_value(value))
    }

    fn operand(&self, value: &impl Attribute) -> Result<AttributeValue, MappingError> {
        self.convert_value(value.to_value())?
            .ok_or_else(|| self.error("null value in condition"))
    }

    /// `attribute = value`.
    pub fn eq(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Eq, vec![self.operand(value)?]))
    }

    /// `attribute <> value`.
    pub fn ne(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Ne, vec![self.operand(value)?]))
    }

    /// `attribute < value`.
    pub fn lt(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Lt, vec![self.operand(value)?]))
    }

    /// `attribute <= value`.
    pub fn le(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Le, vec![self.operand(value)?]))
    }

    /// `attribute > value`.
    pub fn gt(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Gt, vec![self.operand(value)?]))
    }

    /// `attribute >= value`.
    pub fn ge(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Ge, vec![self.operand(value)?]))
    }

    /// `attribute BETWEEN lo AND hi`.
    pub fn between<A: Attribute>(&self, lo: &A, hi: &A) -> Result<Condition, MappingError> {
        Ok(Condition::new(
            ComparisonOperator::Between,
            vec![self.operand(lo)?, self.operand(hi)?],
        ))
    }

    /// `begins_with(attribute, prefix)`.
    pub fn begins_with(&self, prefix: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::BeginsWith, vec![self.operand(prefix)?]))
    }

    /// `contains(attribute, value)`.
    pub fn contains(&self, value: &impl Attribute) -> Result<Condition, MappingError> {
        Ok(Condition::new(ComparisonOperator::Contains, vec![self.operand(value)?]))
    }

    /// `attribute IN (values...)`.
    pub fn in_values<'a, A: Attribute + 'a>(
        &self,
        values: impl IntoIterator<Item = &'a A>,
    ) -> Result<Condition, MappingError> {
        let list = values
            .into_iter()
            .map(|v| self.operand(v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Condition::new(ComparisonOperator::In, list))
    }

    /// The attribute is present.
    #[must_use]
    pub fn exists(&self) -> Condition {
        Condition::new(ComparisonOperator::NotNull, Vec::new())
    }

    /// The attribute is absent.
    #[must_use]
    pub fn not_exists(&self) -> Condition {
        Condition::new(ComparisonOperator::Null, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// TableModel
// ---------------------------------------------------------------------------

/// Resolved model of a record type.
#[derive(Debug)]
pub struct TableModel<T: Record> {
    owner: &'static str,
    fields: Vec<FieldModel<T>>,
    hash_key: usize,
    range_key: Option<usize>,
    versions: Vec<usize>,
    global_indexes: Vec<GlobalSecondaryIndex>,
    local_indexes: Vec<LocalSecondaryIndex>,
}

impl<T: Record> TableModel<T> {
    /// Builds the model of `T` against `engine`.
    pub fn new(engine: &Arc<ConversionEngine>) -> Result<Self, MappingError> {
        let owner = short_type_name::<T>();
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for spec in T::fields() {
            if !seen.insert(spec.meta.attribute_name.clone()) {
                return Err(MappingError::new(owner, "duplicate attribute name")
                    .with_property(spec.meta.attribute_name.clone()));
            }
            let converter = engine.resolve_field(owner, &spec.meta)?;
            engine.validate(&converter)?;
            fields.push(FieldModel {
                owner,
                spec,
                converter,
                engine: Arc::clone(engine),
            });
        }

        let mut hash_key = None;
        let mut range_key = None;
        let mut versions = Vec::new();
        for (pos, field) in fields.iter().enumerate() {
            let meta = field.meta();
            if meta.key_type.is_some() || meta.indexed() {
                let scalar = matches!(field.wire_type(), Some(WireType::S | WireType::N | WireType::B));
                if !scalar {
                    return Err(field.error("only scalar (B, N, or S) type allowed for key"));
                }
            }
            if meta.key_type.is_some() && meta.generate_strategy() == GenerateStrategy::Always {
                return Err(field.error("auto-generated key and ALWAYS not allowed"));
            }
            let slot = match meta.key_type {
                Some(KeyType::Hash) => &mut hash_key,
                Some(KeyType::Range) => &mut range_key,
                None => {
                    if meta.version {
                        versions.push(pos);
                    }
                    continue;
                }
            };
            if slot.replace(pos).is_some() {
                return Err(MappingError::new(
                    owner,
                    format!("multiple {} keys", meta.key_type.map_or("", |k| k.as_str())),
                ));
            }
            if meta.version {
                versions.push(pos);
            }
        }
        let Some(hash_key) = hash_key else {
            return Err(MappingError::new(owner, "no mapping for HASH key"));
        };

        let global_indexes = derive_global_indexes(owner, &fields)?;
        let local_indexes = derive_local_indexes(owner, &fields, &fields[hash_key])?;
        debug!(
            record = owner,
            fields = fields.len(),
            gsis = global_indexes.len(),
            lsis = local_indexes.len(),
            "built table model"
        );
        Ok(Self {
            owner,
            fields,
            hash_key,
            range_key,
            versions,
            global_indexes,
            local_indexes,
        })
    }

    /// Short type name of the record.
    #[must_use]
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// All fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldModel<T>] {
        &self.fields
    }

    /// The field stored under `attribute_name`.
    pub fn field(&self, attribute_name: &str) -> Result<&FieldModel<T>, MappingError> {
        self.fields
            .iter()
            .find(|f| f.attribute_name() == attribute_name)
            .ok_or_else(|| {
                MappingError::new(self.owner, "no mapping for attribute by name")
                    .with_property(attribute_name)
            })
    }

    /// The field with the given Rust name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldModel<T>> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// The hash key field.
    #[must_use]
    pub fn hash_key(&self) -> &FieldModel<T> {
        &self.fields[self.hash_key]
    }

    /// The range key field, if the table has one.
    #[must_use]
    pub fn range_key(&self) -> Option<&FieldModel<T>> {
        self.range_key.map(|pos| &self.fields[pos])
    }

    /// The key fields: hash first, then range.
    pub fn keys(&self) -> impl Iterator<Item = &FieldModel<T>> {
        std::iter::once(self.hash_key()).chain(self.range_key())
    }

    /// Version fields.
    pub fn versions(&self) -> impl Iterator<Item = &FieldModel<T>> {
        self.versions.iter().map(|pos| &self.fields[*pos])
    }

    /// Whether the record has a version field.
    #[must_use]
    pub fn versioned(&self) -> bool {
        !self.versions.is_empty()
    }

    /// Derived global secondary indexes.
    #[must_use]
    pub fn global_secondary_indexes(&self) -> &[GlobalSecondaryIndex] {
        &self.global_indexes
    }

    /// Derived local secondary indexes.
    #[must_use]
    pub fn local_secondary_indexes(&self) -> &[LocalSecondaryIndex] {
        &self.local_indexes
    }

    /// Converts a record. Null fields and empty sets are omitted.
    pub fn convert(&self, record: &T) -> Result<Item, MappingError> {
        let mut item = Item::with_capacity(self.fields.len());
        for field in &self.fields {
            if let Some(av) = field.convert(record)? {
                item.insert(field.attribute_name().to_owned(), av);
            }
        }
        Ok(item)
    }

    /// Rebuilds a record. Absent attributes and `NULL` markers leave the
    /// field at its default.
    pub fn unconvert(&self, item: &Item) -> Result<T, MappingError> {
        let mut record = T::default();
        for field in &self.fields {
            match item.get(field.attribute_name()) {
                Some(av) if !av.is_null() => field.unconvert_and_set(&mut record, av)?,
                _ => {}
            }
        }
        Ok(record)
    }

    /// The hash and range key values of a record.
    pub fn key_pair(&self, record: &T) -> (Value, Option<Value>) {
        (
            self.hash_key().get(record),
            self.range_key().map(|rk| rk.get(record)),
        )
    }

    /// The primary key of a record as a wire item.
    pub fn convert_key(&self, record: &T) -> Result<Item, MappingError> {
        let (hash, range) = self.key_pair(record);
        self.convert_key_values(hash, range)
    }

    /// A primary key from runtime values.
    pub fn convert_key_values(&self, hash: Value, range: Option<Value>) -> Result<Item, MappingError> {
        let mut key = Item::with_capacity(2);
        let hk = self.hash_key();
        match hk.convert_value(hash)? {
            Some(av) => key.insert(hk.attribute_name().to_owned(), av),
            None => return Err(hk.error("no HASH key value present")),
        };
        if let Some(rk) = self.range_key() {
            match rk.convert_value(range.unwrap_or(Value::Null))? {
                Some(av) => key.insert(rk.attribute_name().to_owned(), av),
                None => return Err(rk.error("no RANGE key value present")),
            };
        }
        Ok(key)
    }

    /// A new record with only the key fields set.
    pub fn create_key(&self, hash: Value, range: Option<Value>) -> Result<T, MappingError> {
        let mut record = T::default();
        if !hash.is_null() {
            self.hash_key().set(&mut record, hash)?;
        }
        if let Some(range) = range.filter(|v| !v.is_null()) {
            let rk = self
                .range_key()
                .ok_or_else(|| MappingError::new(self.owner, "no mapping for RANGE key"))?;
            rk.set(&mut record, range)?;
        }
        Ok(record)
    }

    /// A `CreateTable` request for this model.
    #[must_use]
    pub fn create_table_input(&self, table_name: &str) -> CreateTableInput {
        let key_schema = self
            .keys()
            .map(|f| KeySchemaElement::new(f.attribute_name(), f.key_type().unwrap_or(KeyType::Hash)))
            .collect();
        let attribute_definitions = self
            .fields
            .iter()
            .filter(|f| f.key_type().is_some() || f.meta().indexed())
            .filter_map(|f| {
                let attribute_type = match f.wire_type()? {
                    WireType::S => ScalarAttributeType::S,
                    WireType::N => ScalarAttributeType::N,
                    WireType::B => ScalarAttributeType::B,
                    _ => return None,
                };
                Some(AttributeDefinition {
                    attribute_name: f.attribute_name().to_owned(),
                    attribute_type,
                })
            })
            .collect();
        CreateTableInput {
            table_name: table_name.to_owned(),
            key_schema,
            attribute_definitions,
            global_secondary_indexes: self.global_indexes.clone(),
            local_secondary_indexes: self.local_indexes.clone(),
            ..Default::default()
        }
    }

    /// A `DeleteTable` request for this model.
    #[must_use]
    pub fn delete_table_input(&self, table_name: &str) -> DeleteTableInput {
        DeleteTableInput {
            table_name: table_name.to_owned(),
        }
    }
}

fn derive_global_indexes<T>(
    owner: &'static str,
    fields: &[FieldModel<T>],
) -> Result<Vec<GlobalSecondaryIndex>, MappingError> {
    let mut indexes: Vec<GlobalSecondaryIndex> = Vec::new();
    for field in fields {
        for name in field.meta().global_indexes(KeyType::Hash) {
            if indexes.iter().any(|gsi| gsi.index_name == name) {
                return Err(field.error(format!("must not duplicate GSI {name}")));
            }
            indexes.push(GlobalSecondaryIndex {
                index_name: name.to_owned(),
                key_schema: vec![KeySchemaElement::new(field.attribute_name(), KeyType::Hash)],
                projection: Projection::of(ProjectionType::All),
            });
        }
    }
    for field in fields {
        for name in field.meta().global_indexes(KeyType::Range) {
            let Some(gsi) = indexes.iter_mut().find(|gsi| gsi.index_name == name) else {
                return Err(MappingError::new(owner, format!("no HASH key for GSI {name}"))
                    .with_property(field.name()));
            };
            if gsi.key_schema.len() > 1 {
                return Err(field.error(format!("must not duplicate GSI {name}")));
            }
            gsi.key_schema
                .push(KeySchemaElement::new(field.attribute_name(), KeyType::Range));
        }
    }
    Ok(indexes)
}

fn derive_local_indexes<T>(
    owner: &'static str,
    fields: &[FieldModel<T>],
    hash_key: &FieldModel<T>,
) -> Result<Vec<LocalSecondaryIndex>, MappingError> {
    let mut indexes: Vec<LocalSecondaryIndex> = Vec::new();
    for field in fields {
        for name in field.meta().local_indexes() {
            if indexes.iter().any(|lsi| lsi.index_name == name) {
                return Err(MappingError::new(owner, format!("must not duplicate LSI {name}"))
                    .with_property(field.name()));
            }
            indexes.push(LocalSecondaryIndex {
                index_name: name.to_owned(),
                key_schema: vec![
                    KeySchemaElement::new(hash_key.attribute_name(), KeyType::Hash),
                    KeySchemaElement::new(field.attribute_name(), KeyType::Range),
                ],
                projection: Projection::of(ProjectionType::KeysOnly),
            });
        }
    }
    Ok(indexes)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type AnyModel = Arc<dyn Any + Send + Sync>;

/// Caches conversion engines per schema and table models per
/// (record type, schema).
#[derive(Debug, Default)]
pub struct ModelRegistry {
    engines: OnceCache<u64, Arc<ConversionEngine>>,
    tables: OnceCache<(TypeId, u64), Result<AnyModel, MappingError>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared engine for `schema`.
    pub fn engine(&self, schema: &Arc<ConversionSchema>) -> Arc<ConversionEngine> {
        self.engines.get_or_init(&schema.id(), || {
            Arc::new(ConversionEngine::new(Arc::clone(schema)))
        })
    }

    /// The shared table model of `T` under `schema`, built on first use.
    pub fn table<T: Record>(&self, schema: &Arc<ConversionSchema>) -> Result<Arc<TableModel<T>>, MappingError> {
        let engine = self.engine(schema);
        let model = self
            .tables
            .get_or_init(&(TypeId::of::<T>(), schema.id()), || {
                TableModel::<T>::new(&engine).map(|m| Arc::new(m) as AnyModel)
            })?;
        model.downcast::<TableModel<T>>().map_err(|_| {
            MappingError::new(short_type_name::<T>(), "cached table model has an unexpected type")
        })
    }

    /// Number of table models built so far.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}
