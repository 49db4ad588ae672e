//! The `AttributeValue` tagged union and its JSON encoding.
//!
//! Every value on the wire carries exactly one type tag, e.g. `{"S": "abc"}`
//! or `{"N": "12.5"}`. Numbers travel as decimal text so no precision is lost
//! between languages, and binary payloads are base64 encoded.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One stored record: attribute name to tagged value.
pub type Item = HashMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Wire type tags
// ---------------------------------------------------------------------------

/// The type tag of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// String.
    S,
    /// Number carried as decimal text.
    N,
    /// Binary.
    B,
    /// String set.
    Ss,
    /// Number set.
    Ns,
    /// Binary set.
    Bs,
    /// Native boolean.
    Bool,
    /// Null marker.
    Null,
    /// List of values.
    L,
    /// Map of values.
    M,
}

impl WireType {
    /// Returns the tag as it appears in the JSON encoding.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
            Self::B => "B",
            Self::Ss => "SS",
            Self::Ns => "NS",
            Self::Bs => "BS",
            Self::Bool => "BOOL",
            Self::Null => "NULL",
            Self::L => "L",
            Self::M => "M",
        }
    }

    /// Parses a JSON tag such as `"SS"`.
    pub(crate) fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "S" => Self::S,
            "N" => Self::N,
            "B" => Self::B,
            "SS" => Self::Ss,
            "NS" => Self::Ns,
            "BS" => Self::Bs,
            "BOOL" => Self::Bool,
            "NULL" => Self::Null,
            "L" => Self::L,
            "M" => Self::M,
            _ => return None,
        })
    }

    /// Returns `true` for the three set tags.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Ss | Self::Ns | Self::Bs)
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AttributeValue
// ---------------------------------------------------------------------------

/// A single DynamoDB attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String value.
    S(String),
    /// Number value as decimal text.
    N(String),
    /// Binary value.
    B(bytes::Bytes),
    /// String set.
    Ss(Vec<String>),
    /// Number set as decimal text.
    Ns(Vec<String>),
    /// Binary set.
    Bs(Vec<bytes::Bytes>),
    /// Native boolean.
    Bool(bool),
    /// Null marker.
    Null(bool),
    /// List of values.
    L(Vec<AttributeValue>),
    /// Map of values.
    M(HashMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Returns the type tag of this value.
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::S(_) => WireType::S,
            Self::N(_) => WireType::N,
            Self::B(_) => WireType::B,
            Self::Ss(_) => WireType::Ss,
            Self::Ns(_) => WireType::Ns,
            Self::Bs(_) => WireType::Bs,
            Self::Bool(_) => WireType::Bool,
            Self::Null(_) => WireType::Null,
            Self::L(_) => WireType::L,
            Self::M(_) => WireType::M,
        }
    }

    /// Returns `true` for the `{"NULL": true}` marker.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(true))
    }

    /// Returns the string if this is an `S` value.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }
}

impl Eq for AttributeValue {}

impl std::hash::Hash for AttributeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.wire_type().hash(state);
        match self {
            Self::S(s) | Self::N(s) => s.hash(state),
            Self::B(b) => b.hash(state),
            Self::Bool(b) | Self::Null(b) => b.hash(state),
            Self::Ss(v) | Self::Ns(v) => v.hash(state),
            Self::Bs(v) => v.iter().for_each(|b| b.hash(state)),
            Self::L(v) => v.hash(state),
            Self::M(m) => {
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);
                pairs.hash(state);
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(s) => write!(f, "{{S: {s}}}"),
            Self::N(n) => write!(f, "{{N: {n}}}"),
            Self::B(b) => write!(f, "{{B: {} bytes}}", b.len()),
            Self::Ss(v) => write!(f, "{{SS: {v:?}}}"),
            Self::Ns(v) => write!(f, "{{NS: {v:?}}}"),
            Self::Bs(v) => write!(f, "{{BS: {} items}}", v.len()),
            Self::Bool(b) => write!(f, "{{BOOL: {b}}}"),
            Self::Null(b) => write!(f, "{{NULL: {b}}}"),
            Self::L(v) => write!(f, "{{L: {} items}}", v.len()),
            Self::M(m) => write!(f, "{{M: {} keys}}", m.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON encoding
// ---------------------------------------------------------------------------

fn encode_binary(b: &bytes::Bytes) -> String {
    BASE64_STANDARD.encode(b)
}

fn decode_binary<E: de::Error>(encoded: &str) -> Result<bytes::Bytes, E> {
    BASE64_STANDARD
        .decode(encoded)
        .map(bytes::Bytes::from)
        .map_err(E::custom)
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        let tag = self.wire_type().as_str();
        match self {
            Self::S(s) | Self::N(s) => map.serialize_entry(tag, s)?,
            Self::B(b) => map.serialize_entry(tag, &encode_binary(b))?,
            Self::Ss(v) | Self::Ns(v) => map.serialize_entry(tag, v)?,
            Self::Bs(v) => {
                let encoded: Vec<String> = v.iter().map(encode_binary).collect();
                map.serialize_entry(tag, &encoded)?;
            }
            Self::Bool(b) | Self::Null(b) => map.serialize_entry(tag, b)?,
            Self::L(list) => map.serialize_entry(tag, list)?,
            Self::M(m) => map.serialize_entry(tag, m)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AttributeValueVisitor)
    }
}

struct AttributeValueVisitor;

impl<'de> Visitor<'de> for AttributeValueVisitor {
    type Value = AttributeValue;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an AttributeValue object with exactly one type tag")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<Self::Value, M::Error> {
        let Some(tag) = map.next_key::<String>()? else {
            return Err(de::Error::custom("AttributeValue must have exactly one tag"));
        };
        let Some(wire_type) = WireType::from_tag(&tag) else {
            return Err(de::Error::unknown_field(
                &tag,
                &["S", "N", "B", "SS", "NS", "BS", "BOOL", "NULL", "L", "M"],
            ));
        };

        let value = match wire_type {
            WireType::S => AttributeValue::S(map.next_value()?),
            WireType::N => AttributeValue::N(map.next_value()?),
            WireType::B => AttributeValue::B(decode_binary::<M::Error>(
                &map.next_value::<String>()?,
            )?),
            WireType::Ss => AttributeValue::Ss(map.next_value()?),
            WireType::Ns => AttributeValue::Ns(map.next_value()?),
            WireType::Bs => {
                let encoded: Vec<String> = map.next_value()?;
                AttributeValue::Bs(
                    encoded
                        .iter()
                        .map(|e| decode_binary::<M::Error>(e))
                        .collect::<Result<_, _>>()?,
                )
            }
            WireType::Bool => AttributeValue::Bool(map.next_value()?),
            WireType::Null => AttributeValue::Null(map.next_value()?),
            WireType::L => AttributeValue::L(map.next_value()?),
            WireType::M => AttributeValue::M(map.next_value()?),
        };

        if map.next_key::<String>()?.is_some() {
            return Err(de::Error::custom("AttributeValue must have exactly one tag"));
        }
        Ok(value)
    }
}
