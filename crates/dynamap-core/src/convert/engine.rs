//! Converter resolution and nested document models.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use dynamap_model::{Item, WireType};
use tracing::debug;

use super::ConversionSchema;
use super::converter::Converter;
use super::rules::{Rule, RuleEntry};
use crate::cache::OnceCache;
use crate::error::MappingError;
use crate::field::{DocumentType, FieldMeta};
use crate::value::{TypeDescriptor, TypeKind, Value, ValueError};

type TypeKey = (TypeDescriptor, Option<WireType>);

/// Resolves converters against one [`ConversionSchema`] and caches the
/// results.
///
/// Resolution for a given type and hint happens at most once, even when
/// many tasks miss the cache at the same time.
#[derive(Debug)]
pub struct ConversionEngine {
    schema: Arc<ConversionSchema>,
    types: OnceCache<TypeKey, Result<Converter, String>>,
    documents: OnceCache<TypeId, Result<Arc<DocumentModel>, MappingError>>,
}

impl ConversionEngine {
    /// Creates an engine for `schema`.
    #[must_use]
    pub fn new(schema: Arc<ConversionSchema>) -> Self {
        Self {
            schema,
            types: OnceCache::new(),
            documents: OnceCache::new(),
        }
    }

    /// The schema this engine resolves against.
    #[must_use]
    pub fn schema(&self) -> &Arc<ConversionSchema> {
        &self.schema
    }

    /// Picks the converter for a field. A field-level converter wins over
    /// every schema rule.
    pub fn resolve_field(&self, owner: &str, meta: &FieldMeta) -> Result<Converter, MappingError> {
        if let Some(converter) = &meta.converter {
            return Ok(Converter::Custom(Arc::clone(converter)));
        }
        self.resolve_type(&meta.descriptor, meta.wire_hint)
            .map_err(|reason| MappingError::new(owner, reason).with_property(meta.name))
    }

    /// Picks the converter for a type, optionally forced to a wire type.
    pub fn resolve_type(
        &self,
        desc: &TypeDescriptor,
        hint: Option<WireType>,
    ) -> Result<Converter, String> {
        let key = (desc.clone(), hint);
        self.types.get_or_init(&key, || self.resolve_uncached(desc, hint))
    }

    fn resolve_uncached(
        &self,
        desc: &TypeDescriptor,
        hint: Option<WireType>,
    ) -> Result<Converter, String> {
        let rules: &[RuleEntry] = if desc.is_set() {
            self.schema.set_rules()
        } else {
            self.schema.scalar_rules()
        };
        let chosen = match hint {
            Some(hint) => rules.iter().find(|e| e.rule.accepts_hint(desc, hint)),
            None => rules.iter().find(|e| e.enabled && e.rule.supports(desc)),
        };
        let Some(entry) = chosen else {
            return Err(self.explain_failure(desc, hint));
        };
        debug!(
            schema = self.schema.name(),
            type_name = desc.name,
            rule = ?entry.rule,
            "resolved converter"
        );
        self.instantiate(&entry.rule, desc)
    }

    fn instantiate(&self, rule: &Rule, desc: &TypeDescriptor) -> Result<Converter, String> {
        let converter = match (rule, &desc.kind) {
            (Rule::Custom { converter, .. } | Rule::CustomSet { converter, .. }, _) => {
                Converter::Custom(Arc::clone(converter))
            }
            (Rule::Native, _) => Converter::Native,
            (Rule::BoolAsNumber, _) => Converter::BoolAsNumber,
            (Rule::NativeBool, _) => Converter::NativeBool,
            (Rule::StringScalar, _) => Converter::String,
            (Rule::NumberScalar, _) => Converter::Number,
            (Rule::BinaryScalar, _) => Converter::Binary,
            (Rule::StringSet, _) => Converter::StringSet,
            (Rule::NumberSet, _) => Converter::NumberSet,
            (Rule::BinarySet, _) => Converter::BinarySet,
            (Rule::NativeBoolSet, _) => Converter::ListSet(Box::new(Converter::NativeBool)),
            (Rule::List, TypeKind::List(Some(element))) => {
                Converter::List(Box::new(self.resolve_type(element, None)?))
            }
            (Rule::ObjectSet, TypeKind::Set(Some(element))) => {
                Converter::ListSet(Box::new(self.resolve_type(element, None)?))
            }
            (Rule::Map, TypeKind::Map { value: Some(value), .. }) => {
                Converter::Map(Box::new(self.resolve_type(value, None)?))
            }
            (Rule::Document, TypeKind::Document(doc)) => Converter::Document(*doc),
            (rule, _) => return Err(format!("rule {rule:?} cannot convert {}", desc.name)),
        };
        Ok(converter)
    }

    fn explain_failure(&self, desc: &TypeDescriptor, hint: Option<WireType>) -> String {
        let schema = self.schema.name();
        match &desc.kind {
            TypeKind::List(None) | TypeKind::Set(None) | TypeKind::Map { value: None, .. } => {
                format!("collection type {} has no element type", desc.name)
            }
            TypeKind::Map { key: Some(key), .. } if key.kind != TypeKind::String => {
                format!("map keys must be strings, found {} in {}", key.name, desc.name)
            }
            TypeKind::Set(Some(element)) if hint.is_none() => format!(
                "sets of {} are not supported by the {schema} schema; use a list",
                element.name
            ),
            TypeKind::Opaque => format!(
                "{} has no conversion; mark it as a document or attach a custom converter",
                desc.name
            ),
            _ => match hint {
                Some(hint) => format!("{} cannot be stored as {}", desc.name, hint.as_str()),
                None => format!("{} is not supported by the {schema} schema", desc.name),
            },
        }
    }

    /// Returns the model of a nested document type, building it on first use.
    pub fn document(&self, doc: &DocumentType) -> Result<Arc<DocumentModel>, MappingError> {
        self.documents.get_or_init(&doc.type_id, || {
            let fields = (doc.fields)()
                .into_iter()
                .map(|meta| {
                    let converter = self.resolve_field(doc.name, &meta)?;
                    Ok((meta, converter))
                })
                .collect::<Result<Vec<_>, MappingError>>()?;
            Ok(Arc::new(DocumentModel {
                name: doc.name,
                fields,
            }))
        })
    }

    pub(crate) fn document_model(&self, doc: &DocumentType) -> Result<Arc<DocumentModel>, ValueError> {
        self.document(doc).map_err(|e| ValueError::Message(e.to_string()))
    }

    /// Resolves every nested document reachable from `converter` so schema
    /// problems surface before the first value is converted.
    pub fn validate(&self, converter: &Converter) -> Result<(), MappingError> {
        self.validate_inner(converter, &mut HashSet::new())
    }

    fn validate_inner(
        &self,
        converter: &Converter,
        visited: &mut HashSet<TypeId>,
    ) -> Result<(), MappingError> {
        match converter {
            Converter::List(element) | Converter::ListSet(element) | Converter::Map(element) => {
                self.validate_inner(element, visited)
            }
            Converter::Document(doc) => {
                if !visited.insert(doc.type_id) {
                    return Ok(());
                }
                let model = self.document(doc)?;
                for (_, nested) in &model.fields {
                    self.validate_inner(nested, visited)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Resolved converters for the fields of a nested document.
#[derive(Debug)]
pub struct DocumentModel {
    name: &'static str,
    fields: Vec<(FieldMeta, Converter)>,
}

impl DocumentModel {
    /// The document's Rust type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Field metadata paired with converters.
    #[must_use]
    pub fn fields(&self) -> &[(FieldMeta, Converter)] {
        &self.fields
    }

    /// Converts document entries into a map attribute. Unknown attribute
    /// names are ignored and nulls omitted.
    pub fn convert(
        &self,
        entries: Vec<(String, Value)>,
        engine: &ConversionEngine,
    ) -> Result<Item, ValueError> {
        let mut item = Item::with_capacity(entries.len());
        for (name, value) in entries {
            let Some((meta, converter)) = self.fields.iter().find(|(m, _)| m.attribute_name == name)
            else {
                continue;
            };
            if let Some(av) = converter
                .convert(value, engine)
                .map_err(|e| self.nested_error(meta, &e))?
            {
                item.insert(name, av);
            }
        }
        Ok(item)
    }

    /// Reads a map attribute back into document entries.
    pub fn unconvert(&self, map: &Item, engine: &ConversionEngine) -> Result<Vec<(String, Value)>, ValueError> {
        let mut entries = Vec::with_capacity(self.fields.len());
        for (meta, converter) in &self.fields {
            let Some(av) = map.get(&meta.attribute_name) else {
                continue;
            };
            if av.is_null() {
                continue;
            }
            let value = converter
                .unconvert(av, engine)
                .map_err(|e| self.nested_error(meta, &e))?;
            entries.push((meta.attribute_name.clone(), value));
        }
        Ok(entries)
    }

    fn nested_error(&self, meta: &FieldMeta, err: &ValueError) -> ValueError {
        ValueError::Message(format!("{}[{}]: {err}", self.name, meta.name))
    }
}
