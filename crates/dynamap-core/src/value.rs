//! Runtime values exchanged between records and the conversion engine.
//!
//! A record field never touches the wire format directly. Its getter produces
//! a [`Value`], the conversion engine turns that into an
//! [`AttributeValue`](dynamap_model::AttributeValue), and the reverse path hands
//! a [`Value`] back to the setter. The [`Attribute`] trait ties a Rust type to
//! its [`TypeDescriptor`] so the engine can pick a converter before any value
//! exists.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use dynamap_model::AttributeValue;

use crate::field::DocumentType;

/// Maximum number of significant digits a stored number may carry.
const MAX_SIGNIFICANT_DIGITS: usize = 38;

/// Largest decimal exponent accepted for a non-zero number.
const MAX_MAGNITUDE: i64 = 125;

/// Smallest decimal exponent accepted for a non-zero number.
const MIN_MAGNITUDE: i64 = -130;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to move a value between its runtime and wire shapes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// Text that is not an acceptable decimal number.
    #[error("invalid number `{text}`: {reason}")]
    InvalidNumber {
        /// The rejected text.
        text: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A value of the wrong shape.
    #[error("expected {expected}, found {found}")]
    Unexpected {
        /// The shape the caller wanted.
        expected: &'static str,
        /// The value that was supplied.
        found: String,
    },
    /// Any other conversion failure.
    #[error("{0}")]
    Message(String),
}

impl ValueError {
    /// Builds an [`ValueError::Unexpected`] from the offending value.
    pub fn unexpected(expected: &'static str, found: &impl fmt::Display) -> Self {
        Self::Unexpected {
            expected,
            found: found.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Number
// ---------------------------------------------------------------------------

/// A validated decimal number kept as text.
///
/// Integers, floats and arbitrary-precision decimals all travel as the same
/// text the store accepts, so nothing is lost between the two ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Number(String);

impl Number {
    /// Validates `text` as a store number.
    ///
    /// Accepts an optional sign, digits with at most one decimal point and an
    /// optional exponent. At most 38 significant digits are allowed and the
    /// magnitude must fall within `1e-130..1e126`.
    pub fn parse(text: &str) -> Result<Self, ValueError> {
        let invalid = |reason| ValueError::InvalidNumber {
            text: text.to_owned(),
            reason,
        };

        if text.is_empty() || text != text.trim() {
            return Err(invalid("not a numeric value"));
        }

        let rest = text.strip_prefix(['+', '-']).unwrap_or(text);
        let (mantissa, explicit_exp) = match rest.find(['e', 'E']) {
            Some(pos) => {
                let exp: i64 = rest[pos + 1..]
                    .parse()
                    .map_err(|_| invalid("malformed exponent"))?;
                (&rest[..pos], exp)
            }
            None => (rest, 0),
        };

        let mut has_dot = false;
        let mut has_digit = false;
        for ch in mantissa.chars() {
            match ch {
                '.' if has_dot => return Err(invalid("more than one decimal point")),
                '.' => has_dot = true,
                c if c.is_ascii_digit() => has_digit = true,
                _ => return Err(invalid("not a numeric value")),
            }
        }
        if !has_digit {
            return Err(invalid("not a numeric value"));
        }

        let all_digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
        let without_leading = all_digits.trim_start_matches('0');
        let significant = without_leading.trim_end_matches('0');
        if significant.is_empty() {
            return Ok(Self(text.to_owned()));
        }
        if significant.len() > MAX_SIGNIFICANT_DIGITS {
            return Err(invalid("more than 38 significant digits"));
        }

        #[allow(clippy::cast_possible_wrap)]
        let frac_digits = mantissa.find('.').map_or(0, |pos| (mantissa.len() - pos - 1) as i64);
        #[allow(clippy::cast_possible_wrap)]
        let leading_zeros = (all_digits.len() - without_leading.len()) as i64;
        #[allow(clippy::cast_possible_wrap)]
        let magnitude = explicit_exp - frac_digits + all_digits.len() as i64 - leading_zeros - 1;

        if magnitude > MAX_MAGNITUDE {
            return Err(invalid("magnitude larger than supported range"));
        }
        if magnitude < MIN_MAGNITUDE {
            return Err(invalid("magnitude smaller than supported range"));
        }
        Ok(Self(text.to_owned()))
    }

    /// Converts a float using its shortest round-trip representation.
    pub fn from_f64(value: f64) -> Result<Self, ValueError> {
        if !value.is_finite() {
            return Err(ValueError::InvalidNumber {
                text: value.to_string(),
                reason: "not a finite number",
            });
        }
        Self::parse(&value.to_string())
    }

    /// Parses the text into any numeric Rust type.
    pub fn to<T: FromStr>(&self) -> Result<T, ValueError> {
        self.0.parse().map_err(|_| ValueError::InvalidNumber {
            text: self.0.clone(),
            reason: "out of range for the target type",
        })
    }

    /// Returns the decimal text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the number and returns its decimal text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl FromStr for Number {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! number_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Number {
                fn from(value: $t) -> Self {
                    Self(value.to_string())
                }
            }
        )+
    };
}

number_from_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A field value in its runtime shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(Number),
    /// String.
    String(String),
    /// Binary.
    Binary(Bytes),
    /// Unordered collection of unique scalars.
    Set(Vec<Value>),
    /// Ordered collection.
    List(Vec<Value>),
    /// String-keyed map.
    Map(Vec<(String, Value)>),
    /// Nested document, keyed by attribute name.
    Document(Vec<(String, Value)>),
    /// An attribute value passed through untouched.
    Native(AttributeValue),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's shape.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::Set(_) => "set",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Document(_) => "document",
            Self::Native(_) => "attribute value",
        }
    }

    /// Renders a scalar as text, used for map keys and string coercion.
    #[must_use]
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "bool {b}"),
            Self::Number(n) => write!(f, "number {n}"),
            Self::String(s) => write!(f, "string {s:?}"),
            Self::Binary(b) => write!(f, "binary ({} bytes)", b.len()),
            Self::Set(v) => write!(f, "set ({} elements)", v.len()),
            Self::List(v) => write!(f, "list ({} elements)", v.len()),
            Self::Map(v) => write!(f, "map ({} entries)", v.len()),
            Self::Document(v) => write!(f, "document ({} attributes)", v.len()),
            Self::Native(av) => write!(f, "{av}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Type descriptors
// ---------------------------------------------------------------------------

/// Static description of a field's Rust type.
///
/// Collections carry their element descriptors so nested types such as a list
/// of maps of documents resolve without inspecting any value. `None` element
/// slots model collections whose element type is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    /// The Rust type name, used in error messages.
    pub name: &'static str,
    /// Identity of the described type.
    pub type_id: TypeId,
    /// Structural kind.
    pub kind: TypeKind,
}

/// Structural kind of a [`TypeDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// `bool`.
    Bool,
    /// Integers, floats and [`Number`].
    Number,
    /// Text, including UUIDs and timestamps.
    String,
    /// Raw bytes.
    Binary,
    /// A raw attribute value.
    Native,
    /// Set with its element type.
    Set(Option<Box<TypeDescriptor>>),
    /// List with its element type.
    List(Option<Box<TypeDescriptor>>),
    /// Map with its key and value types.
    Map {
        /// Key type.
        key: Option<Box<TypeDescriptor>>,
        /// Value type.
        value: Option<Box<TypeDescriptor>>,
    },
    /// A nested document.
    Document(DocumentType),
    /// A type with no known mapping.
    Opaque,
}

impl TypeDescriptor {
    /// Describes `T` with the given kind.
    #[must_use]
    pub fn of<T: 'static>(kind: TypeKind) -> Self {
        Self {
            name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            kind,
        }
    }

    /// Returns `true` for bool, number, string and binary types.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Bool | TypeKind::Number | TypeKind::String | TypeKind::Binary
        )
    }

    /// Returns `true` when the type is a set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self.kind, TypeKind::Set(_))
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// A Rust type that can be stored in a record field.
pub trait Attribute: Sized + 'static {
    /// Describes the type for converter resolution.
    fn descriptor() -> TypeDescriptor;

    /// Produces the runtime value.
    fn to_value(&self) -> Value;

    /// Rebuilds the type from a runtime value.
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl Attribute for bool {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::Bool)
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match &value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => match n.as_str() {
                "1" => Ok(true),
                "0" => Ok(false),
                _ => Err(ValueError::unexpected("bool", &value)),
            },
            Value::String(s) => match s.as_str() {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                _ => Err(ValueError::unexpected("bool", &value)),
            },
            _ => Err(ValueError::unexpected("bool", &value)),
        }
    }
}

macro_rules! integer_attribute {
    ($($t:ty),+) => {
        $(
            impl Attribute for $t {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::of::<Self>(TypeKind::Number)
                }

                fn to_value(&self) -> Value {
                    Value::Number(Number::from(*self))
                }

                fn from_value(value: Value) -> Result<Self, ValueError> {
                    number_from_value(value)?.to()
                }
            }
        )+
    };
}

integer_attribute!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// The store keeps 38 significant digits. 128-bit values beyond that map to a
// `Value` but fail number validation when converted.
integer_attribute!(i128, u128);

macro_rules! float_attribute {
    ($($t:ty),+) => {
        $(
            impl Attribute for $t {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::of::<Self>(TypeKind::Number)
                }

                // Non-finite floats surface as text and fail number validation
                // in the converter.
                fn to_value(&self) -> Value {
                    let text = self.to_string();
                    Number::parse(&text).map_or(Value::String(text), Value::Number)
                }

                fn from_value(value: Value) -> Result<Self, ValueError> {
                    number_from_value(value)?.to()
                }
            }
        )+
    };
}

float_attribute!(f32, f64);

impl Attribute for Number {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::Number)
    }

    fn to_value(&self) -> Value {
        Value::Number(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        number_from_value(value)
    }
}

fn number_from_value(value: Value) -> Result<Number, ValueError> {
    match value {
        Value::Number(n) => Ok(n),
        Value::String(s) => Number::parse(&s),
        other => Err(ValueError::unexpected("number", &other)),
    }
}

impl Attribute for String {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::String)
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.into_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(ValueError::unexpected("string", &other)),
        }
    }
}

impl Attribute for Bytes {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::Binary)
    }

    fn to_value(&self) -> Value {
        Value::Binary(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Binary(b) => Ok(b),
            other => Err(ValueError::unexpected("binary", &other)),
        }
    }
}

impl Attribute for uuid::Uuid {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::String)
    }

    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match &value {
            Value::String(s) => {
                uuid::Uuid::parse_str(s).map_err(|e| ValueError::Message(format!("invalid uuid {s:?}: {e}")))
            }
            _ => Err(ValueError::unexpected("uuid string", &value)),
        }
    }
}

/// Timestamps are stored as ISO-8601 text with millisecond precision. Epoch
/// milliseconds are accepted on read.
impl Attribute for DateTime<Utc> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::String)
    }

    fn to_value(&self) -> Value {
        Value::String(self.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match &value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ValueError::Message(format!("invalid timestamp {s:?}: {e}"))),
            Value::Number(n) => {
                let millis: i64 = n.to()?;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| ValueError::unexpected("epoch milliseconds", &value))
            }
            _ => Err(ValueError::unexpected("timestamp", &value)),
        }
    }
}

impl Attribute for AttributeValue {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::Native)
    }

    fn to_value(&self) -> Value {
        Value::Native(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Native(av) => Ok(av),
            other => Err(ValueError::unexpected("attribute value", &other)),
        }
    }
}

/// `Option` is transparent: `None` is the absent value.
impl<T: Attribute> Attribute for Option<T> {
    fn descriptor() -> TypeDescriptor {
        T::descriptor()
    }

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, Attribute::to_value)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: Attribute> Attribute for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::List(Some(Box::new(T::descriptor()))))
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Attribute::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::List(items) | Value::Set(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(ValueError::unexpected("list", &other)),
        }
    }
}

impl<T: Attribute + Eq + Hash> Attribute for HashSet<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::Set(Some(Box::new(T::descriptor()))))
    }

    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(Attribute::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Set(items) | Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(ValueError::unexpected("set", &other)),
        }
    }
}

impl<T: Attribute + Ord> Attribute for BTreeSet<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>(TypeKind::Set(Some(Box::new(T::descriptor()))))
    }

    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(Attribute::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Set(items) | Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(ValueError::unexpected("set", &other)),
        }
    }
}

fn map_entries<'a, K, V>(entries: impl Iterator<Item = (&'a K, &'a V)>) -> Value
where
    K: Attribute + 'a,
    V: Attribute + 'a,
{
    Value::Map(
        entries
            .map(|(k, v)| {
                let key = k.to_value();
                (key.scalar_text().unwrap_or_else(|| key.to_string()), v.to_value())
            })
            .collect(),
    )
}

fn map_descriptor<M: 'static, K: Attribute, V: Attribute>() -> TypeDescriptor {
    TypeDescriptor::of::<M>(TypeKind::Map {
        key: Some(Box::new(K::descriptor())),
        value: Some(Box::new(V::descriptor())),
    })
}

impl<K: Attribute + Eq + Hash, V: Attribute> Attribute for HashMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        map_descriptor::<Self, K, V>()
    }

    fn to_value(&self) -> Value {
        map_entries(self.iter())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(Value::String(k))?, V::from_value(v)?)))
                .collect(),
            other => Err(ValueError::unexpected("map", &other)),
        }
    }
}

impl<K: Attribute + Ord, V: Attribute> Attribute for BTreeMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        map_descriptor::<Self, K, V>()
    }

    fn to_value(&self) -> Value {
        map_entries(self.iter())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(Value::String(k))?, V::from_value(v)?)))
                .collect(),
            other => Err(ValueError::unexpected("map", &other)),
        }
    }
}
