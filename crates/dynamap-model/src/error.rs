//! DynamoDB service errors.
//!
//! The JSON protocol reports failures as `{"__type": "...#Code", "message": ...}`.
//! `DynamoDBError` is what a client hands back to the mapper; the helper
//! predicates let the batch engine recognize throttling and oversized requests.

use std::fmt;

/// Well-known DynamoDB error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum DynamoDBErrorCode {
    /// Table not found.
    ResourceNotFoundException,
    /// Table is being created or deleted.
    ResourceInUseException,
    /// Condition check failed.
    ConditionalCheckFailedException,
    /// Item collection size limit exceeded.
    ItemCollectionSizeLimitExceededException,
    /// Provisioned throughput exceeded.
    ProvisionedThroughputExceededException,
    /// Account-level request limit exceeded.
    RequestLimitExceeded,
    /// Request rate throttled.
    ThrottlingException,
    /// Request payload too large.
    RequestEntityTooLarge,
    /// Validation error.
    #[default]
    ValidationException,
    /// Serialization error.
    SerializationException,
    /// Internal server error.
    InternalServerError,
    /// Service temporarily unavailable.
    ServiceUnavailable,
    /// Access denied.
    AccessDeniedException,
    /// Unknown operation.
    UnrecognizedClientException,
}

const ALL_CODES: &[DynamoDBErrorCode] = &[
    DynamoDBErrorCode::ResourceNotFoundException,
    DynamoDBErrorCode::ResourceInUseException,
    DynamoDBErrorCode::ConditionalCheckFailedException,
    DynamoDBErrorCode::ItemCollectionSizeLimitExceededException,
    DynamoDBErrorCode::ProvisionedThroughputExceededException,
    DynamoDBErrorCode::RequestLimitExceeded,
    DynamoDBErrorCode::ThrottlingException,
    DynamoDBErrorCode::RequestEntityTooLarge,
    DynamoDBErrorCode::ValidationException,
    DynamoDBErrorCode::SerializationException,
    DynamoDBErrorCode::InternalServerError,
    DynamoDBErrorCode::ServiceUnavailable,
    DynamoDBErrorCode::AccessDeniedException,
    DynamoDBErrorCode::UnrecognizedClientException,
];

impl DynamoDBErrorCode {
    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ResourceInUseException => "ResourceInUseException",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::ItemCollectionSizeLimitExceededException => {
                "ItemCollectionSizeLimitExceededException"
            }
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::RequestLimitExceeded => "RequestLimitExceeded",
            Self::ThrottlingException => "ThrottlingException",
            Self::RequestEntityTooLarge => "RequestEntityTooLarge",
            Self::ValidationException => "ValidationException",
            Self::SerializationException => "SerializationException",
            Self::InternalServerError => "InternalServerError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::AccessDeniedException => "AccessDeniedException",
            Self::UnrecognizedClientException => "UnrecognizedClientException",
        }
    }

    /// Parses a `__type` value, with or without its namespace prefix.
    ///
    /// Unknown codes map to `None` so callers can pick a fallback.
    #[must_use]
    pub fn from_error_type(error_type: &str) -> Option<Self> {
        let short = error_type.rsplit('#').next().unwrap_or(error_type);
        ALL_CODES.iter().copied().find(|c| c.as_str() == short)
    }

    fn default_status_code(self) -> http::StatusCode {
        match self {
            Self::InternalServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => http::StatusCode::SERVICE_UNAVAILABLE,
            Self::RequestEntityTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
            _ => http::StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for DynamoDBErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by (or on the way to) the DynamoDB service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDBError {
    /// The error code.
    pub code: DynamoDBErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The HTTP status code.
    pub status_code: http::StatusCode,
}

impl fmt::Display for DynamoDBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamoDBError({}): {}", self.code, self.message)
    }
}

impl std::error::Error for DynamoDBError {}

impl DynamoDBError {
    /// Create a new `DynamoDBError` from an error code.
    #[must_use]
    pub fn new(code: DynamoDBErrorCode) -> Self {
        Self::with_message(code, code.as_str())
    }

    /// Create a new `DynamoDBError` with a custom message.
    #[must_use]
    pub fn with_message(code: DynamoDBErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code: code.default_status_code(),
            message: message.into(),
            code,
        }
    }

    /// Override the HTTP status code.
    #[must_use]
    pub fn with_status(mut self, status_code: http::StatusCode) -> Self {
        self.status_code = status_code;
        self
    }

    /// Returns `true` when the service asked the caller to slow down.
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        matches!(
            self.code,
            DynamoDBErrorCode::ProvisionedThroughputExceededException
                | DynamoDBErrorCode::RequestLimitExceeded
                | DynamoDBErrorCode::ThrottlingException
        ) || self.status_code == http::StatusCode::TOO_MANY_REQUESTS
    }

    /// Returns `true` when the request payload exceeded the service limit.
    #[must_use]
    pub fn is_request_entity_too_large(&self) -> bool {
        self.code == DynamoDBErrorCode::RequestEntityTooLarge
            || self.status_code == http::StatusCode::PAYLOAD_TOO_LARGE
    }

    /// Returns `true` for an optimistic-concurrency or expected-value mismatch.
    #[must_use]
    pub fn is_conditional_check_failed(&self) -> bool {
        self.code == DynamoDBErrorCode::ConditionalCheckFailedException
    }

    // -- Convenience constructors --

    /// Condition expression evaluated to false.
    #[must_use]
    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ConditionalCheckFailedException, message)
    }

    /// Validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ValidationException, message)
    }

    /// Table or resource not found.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::ResourceNotFoundException, message)
    }

    /// Serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::SerializationException, message)
    }

    /// Internal server error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(DynamoDBErrorCode::InternalServerError, message)
    }

    /// Provisioned throughput exceeded.
    #[must_use]
    pub fn throughput_exceeded(message: impl Into<String>) -> Self {
        Self::with_message(
            DynamoDBErrorCode::ProvisionedThroughputExceededException,
            message,
        )
    }
}

/// Create a `DynamoDBError` from an error code.
///
/// # Examples
///
/// ```
/// use dynamap_model::dynamodb_error;
/// use dynamap_model::error::DynamoDBErrorCode;
///
/// let err = dynamodb_error!(ValidationException);
/// assert_eq!(err.code, DynamoDBErrorCode::ValidationException);
///
/// let err = dynamodb_error!(ThrottlingException, "slow down");
/// assert!(err.is_throttling());
/// ```
#[macro_export]
macro_rules! dynamodb_error {
    ($code:ident) => {
        $crate::error::DynamoDBError::new($crate::error::DynamoDBErrorCode::$code)
    };
    ($code:ident, $msg:expr) => {
        $crate::error::DynamoDBError::with_message($crate::error::DynamoDBErrorCode::$code, $msg)
    };
}
