//! Error types for mapper operations.

use std::collections::HashMap;
use std::fmt;

use dynamap_model::error::DynamoDBError;
use dynamap_model::types::KeysAndAttributes;
use dynamap_model::{AttributeValue, Item};

use crate::value::ValueError;

/// A schema or declaration problem: unresolvable conversion, bad key
/// annotations, or a key condition that cannot be resolved.
///
/// Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingError {
    /// The mapped type involved.
    pub owner: String,
    /// The field involved, when known.
    pub property: Option<String>,
    /// What went wrong.
    pub reason: String,
    /// The wire value that failed to decode, if any.
    pub value: Option<String>,
}

impl MappingError {
    /// Creates an error for `owner`.
    pub fn new(owner: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            property: None,
            reason: reason.into(),
            value: None,
        }
    }

    /// Names the offending field.
    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Records the wire value that failed to decode.
    #[must_use]
    pub fn with_value(mut self, value: &AttributeValue) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Wraps a field-level value error.
    pub fn from_value_error(owner: impl Into<String>, property: &str, err: &ValueError) -> Self {
        Self::new(owner, err.to_string()).with_property(property)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.owner)?;
        if let Some(property) = &self.property {
            write!(f, "[{property}]")?;
        }
        write!(f, "; {}", self.reason)?;
        if let Some(value) = &self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

impl std::error::Error for MappingError {}

/// A batch read that gave up with keys still unprocessed.
///
/// Carries everything read so far so callers can keep the partial results.
#[derive(Debug, Clone, Default)]
pub struct BatchGetError {
    /// Keys the store never returned, by table.
    pub unprocessed_keys: HashMap<String, KeysAndAttributes>,
    /// Items successfully read before giving up, by table.
    pub responses: HashMap<String, Vec<Item>>,
}

impl BatchGetError {
    /// Number of keys still unprocessed.
    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed_keys.values().map(|k| k.keys.len()).sum()
    }
}

impl fmt::Display for BatchGetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch load gave up with {} unprocessed keys across {} tables",
            self.unprocessed_count(),
            self.unprocessed_keys.len()
        )
    }
}

impl std::error::Error for BatchGetError {}

/// Errors returned by mapper operations.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// Conversion or declaration problem.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),
    /// The store rejected a conditional write.
    #[error("conditional check failed: {0}")]
    ConditionalCheckFailed(DynamoDBError),
    /// Any other failure reported by the client.
    #[error("transport error: {0}")]
    Transport(DynamoDBError),
    /// A batch load ran out of retries.
    #[error(transparent)]
    BatchGet(#[from] BatchGetError),
    /// The caller supplied an inconsistent request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Unexpected internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<DynamoDBError> for MapperError {
    fn from(err: DynamoDBError) -> Self {
        if err.is_conditional_check_failed() {
            Self::ConditionalCheckFailed(err)
        } else {
            Self::Transport(err)
        }
    }
}

impl MapperError {
    /// Returns the wire error for client failures.
    #[must_use]
    pub fn as_dynamodb_error(&self) -> Option<&DynamoDBError> {
        match self {
            Self::ConditionalCheckFailed(e) | Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;
