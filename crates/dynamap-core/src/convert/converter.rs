//! Resolved bidirectional converters.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dynamap_model::{AttributeValue, WireType};

use super::CustomConverter;
use super::engine::ConversionEngine;
use crate::field::DocumentType;
use crate::value::{Attribute, Number, Value, ValueError};

/// The converter chosen for one field or element type.
#[derive(Debug, Clone)]
pub enum Converter {
    /// Raw attribute values pass through.
    Native,
    /// Booleans as `N` `1`/`0`, read back from `N` or `BOOL`.
    BoolAsNumber,
    /// Booleans as `BOOL`, read back from `BOOL` or `N`.
    NativeBool,
    /// Scalars as `S`.
    String,
    /// Scalars as `N`.
    Number,
    /// Bytes as `B`.
    Binary,
    /// Scalar sets as `SS`.
    StringSet,
    /// Numeric or boolean sets as `NS`.
    NumberSet,
    /// Binary sets as `BS`.
    BinarySet,
    /// Lists as `L`.
    List(Box<Converter>),
    /// Sets stored as `L`.
    ListSet(Box<Converter>),
    /// String-keyed maps as `M`.
    Map(Box<Converter>),
    /// Nested documents as `M`.
    Document(DocumentType),
    /// A user-supplied converter.
    Custom(Arc<dyn CustomConverter>),
}

fn number_text(value: &Value) -> Result<String, ValueError> {
    match value {
        Value::Number(n) => Ok(Number::parse(n.as_str())?.into_string()),
        Value::String(s) => Ok(Number::parse(s)?.into_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_owned()),
        other => Err(ValueError::unexpected("number", other)),
    }
}

fn string_text(value: &Value) -> Result<String, ValueError> {
    value
        .scalar_text()
        .ok_or_else(|| ValueError::unexpected("string", value))
}

fn binary(value: &Value) -> Result<Bytes, ValueError> {
    match value {
        Value::Binary(b) => Ok(b.clone()),
        other => Err(ValueError::unexpected("binary", other)),
    }
}

fn elements(value: Value) -> Result<Vec<Value>, ValueError> {
    match value {
        Value::Set(items) | Value::List(items) => Ok(items),
        other => Err(ValueError::unexpected("collection", &other)),
    }
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn non_empty<T>(items: Vec<T>, wrap: fn(Vec<T>) -> AttributeValue) -> Option<AttributeValue> {
    (!items.is_empty()).then(|| wrap(items))
}

fn decode_bool(value: &AttributeValue) -> Result<Value, ValueError> {
    match value {
        AttributeValue::Bool(b) => Ok(Value::Bool(*b)),
        AttributeValue::N(n) => bool::from_value(Value::Number(Number::parse(n)?)).map(Value::Bool),
        other => Err(ValueError::unexpected("BOOL or N", other)),
    }
}

impl Converter {
    /// The wire type written, `None` when it depends on the value.
    #[must_use]
    pub fn wire_type(&self) -> Option<WireType> {
        match self {
            Self::Native => None,
            Self::BoolAsNumber | Self::Number => Some(WireType::N),
            Self::NativeBool => Some(WireType::Bool),
            Self::String => Some(WireType::S),
            Self::Binary => Some(WireType::B),
            Self::StringSet => Some(WireType::Ss),
            Self::NumberSet => Some(WireType::Ns),
            Self::BinarySet => Some(WireType::Bs),
            Self::List(_) | Self::ListSet(_) => Some(WireType::L),
            Self::Map(_) | Self::Document(_) => Some(WireType::M),
            Self::Custom(c) => Some(c.wire_type()),
        }
    }

    /// Converts a runtime value. `None` means the attribute is omitted: a
    /// null value or an empty set, which the store rejects.
    pub fn convert(
        &self,
        value: Value,
        engine: &ConversionEngine,
    ) -> Result<Option<AttributeValue>, ValueError> {
        if value.is_null() {
            return Ok(None);
        }
        let converted = match self {
            Self::Native => match value {
                Value::Native(av) => av,
                other => return Err(ValueError::unexpected("attribute value", &other)),
            },
            Self::BoolAsNumber => {
                let b = bool::from_value(value)?;
                AttributeValue::N(if b { "1" } else { "0" }.to_owned())
            }
            Self::NativeBool => AttributeValue::Bool(bool::from_value(value)?),
            Self::String => AttributeValue::S(string_text(&value)?),
            Self::Number => AttributeValue::N(number_text(&value)?),
            Self::Binary => AttributeValue::B(binary(&value)?),
            Self::StringSet => {
                let items = elements(value)?
                    .iter()
                    .map(string_text)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(non_empty(dedup(items), AttributeValue::Ss));
            }
            Self::NumberSet => {
                let items = elements(value)?
                    .iter()
                    .map(number_text)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(non_empty(dedup(items), AttributeValue::Ns));
            }
            Self::BinarySet => {
                let items = elements(value)?
                    .iter()
                    .map(binary)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(non_empty(dedup(items), AttributeValue::Bs));
            }
            Self::List(element) | Self::ListSet(element) => {
                let items = elements(value)?
                    .into_iter()
                    .map(|v| Ok(element.convert(v, engine)?.unwrap_or(AttributeValue::Null(true))))
                    .collect::<Result<Vec<_>, ValueError>>()?;
                if matches!(self, Self::ListSet(_)) && items.is_empty() {
                    return Ok(None);
                }
                AttributeValue::L(items)
            }
            Self::Map(element) => match value {
                Value::Map(entries) => AttributeValue::M(
                    entries
                        .into_iter()
                        .map(|(k, v)| {
                            Ok((k, element.convert(v, engine)?.unwrap_or(AttributeValue::Null(true))))
                        })
                        .collect::<Result<HashMap<_, _>, ValueError>>()?,
                ),
                other => return Err(ValueError::unexpected("map", &other)),
            },
            Self::Document(doc) => match value {
                Value::Document(entries) => {
                    AttributeValue::M(engine.document_model(doc)?.convert(entries, engine)?)
                }
                other => return Err(ValueError::unexpected("document", &other)),
            },
            Self::Custom(c) => c.convert(&value)?,
        };
        Ok(Some(converted))
    }

    /// Converts a wire value back. A `NULL` marker becomes [`Value::Null`].
    pub fn unconvert(
        &self,
        value: &AttributeValue,
        engine: &ConversionEngine,
    ) -> Result<Value, ValueError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (Self::Native, av) => Ok(Value::Native(av.clone())),
            (Self::BoolAsNumber | Self::NativeBool, av) => decode_bool(av),
            (Self::String, AttributeValue::S(s)) => Ok(Value::String(s.clone())),
            (Self::Number, AttributeValue::N(n)) => Ok(Value::Number(Number::parse(n)?)),
            (Self::Binary, AttributeValue::B(b)) => Ok(Value::Binary(b.clone())),
            (Self::StringSet, AttributeValue::Ss(items)) => {
                Ok(Value::Set(items.iter().cloned().map(Value::String).collect()))
            }
            (Self::NumberSet, AttributeValue::Ns(items)) => items
                .iter()
                .map(|n| Number::parse(n).map(Value::Number))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Set),
            (Self::BinarySet, AttributeValue::Bs(items)) => {
                Ok(Value::Set(items.iter().cloned().map(Value::Binary).collect()))
            }
            (Self::List(element), AttributeValue::L(items)) => items
                .iter()
                .map(|v| element.unconvert(v, engine))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (Self::ListSet(element), AttributeValue::L(items)) => items
                .iter()
                .map(|v| element.unconvert(v, engine))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Set),
            // Boolean sets written by the number-set representation.
            (Self::ListSet(element), AttributeValue::Ns(items))
                if matches!(**element, Self::NativeBool) =>
            {
                items
                    .iter()
                    .map(|n| decode_bool(&AttributeValue::N(n.clone())))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Set)
            }
            (Self::Map(element), AttributeValue::M(entries)) => {
                let mut out = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), element.unconvert(v, engine)?)))
                    .collect::<Result<Vec<_>, ValueError>>()?;
                out.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(Value::Map(out))
            }
            (Self::Document(doc), AttributeValue::M(entries)) => Ok(Value::Document(
                engine.document_model(doc)?.unconvert(entries, engine)?,
            )),
            (Self::Custom(c), av) => c.unconvert(av),
            (conv, av) => Err(ValueError::Unexpected {
                expected: conv.wire_type().map_or("attribute value", |w| w.as_str()),
                found: av.to_string(),
            }),
        }
    }
}
