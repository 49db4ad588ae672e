//! `awsJson1_0` adapter for [`DynamoDBClient`].
//!
//! Every call is a `POST /` with the operation in `X-Amz-Target`:
//!
//! ```text
//! X-Amz-Target: DynamoDB_20120810.BatchWriteItem
//! Content-Type: application/x-amz-json-1.0
//! ```
//!
//! Errors come back as a non-2xx response whose body names the error type:
//!
//! ```json
//! { "__type": "com.amazonaws.dynamodb.v20120810#ThrottlingException", "message": "..." }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput, ScanInput, UpdateItemInput,
};
use dynamap_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, UpdateItemOutput,
};
use dynamap_model::{DynamoDBError, DynamoDBErrorCode, DynamoDBOperation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::DynamoDBClient;

/// Content type for DynamoDB JSON requests and responses.
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Sends a prepared HTTP request and returns the raw response.
///
/// Signing, endpoints and connection handling live here; the adapter only
/// builds and decodes JSON bodies.
#[async_trait]
pub trait JsonTransport: Send + Sync {
    /// Sends one request.
    async fn send(&self, request: http::Request<Bytes>)
    -> Result<http::Response<Bytes>, DynamoDBError>;
}

/// A [`DynamoDBClient`] speaking the JSON protocol over `T`.
///
/// ```
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use dynamap_core::client::{DynamoDBClient, JsonClient, JsonTransport};
/// use dynamap_model::DynamoDBError;
/// use dynamap_model::input::GetItemInput;
///
/// struct NotFound;
///
/// #[async_trait]
/// impl JsonTransport for NotFound {
///     async fn send(
///         &self,
///         _request: http::Request<Bytes>,
///     ) -> Result<http::Response<Bytes>, DynamoDBError> {
///         Ok(http::Response::new(Bytes::from_static(b"{}")))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let client = JsonClient::new(NotFound);
/// let output = client.get_item(GetItemInput::default()).await.unwrap();
/// assert!(output.item.is_none());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct JsonClient<T> {
    transport: T,
}

impl<T: JsonTransport> JsonClient<T> {
    /// Wraps a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call<I: Serialize + Sync, O: DeserializeOwned>(
        &self,
        operation: DynamoDBOperation,
        input: &I,
    ) -> Result<O, DynamoDBError> {
        let body = serde_json::to_vec(input).map_err(|e| {
            DynamoDBError::serialization(format!("failed to encode {operation} request: {e}"))
        })?;
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri("/")
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", operation.target())
            .body(Bytes::from(body))
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        debug!(%operation, "sending request");
        let response = self.transport.send(request).await?;
        let status = response.status();
        let body = response.into_body();
        if !status.is_success() {
            return Err(decode_error(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| {
            DynamoDBError::serialization(format!("failed to decode {operation} response: {e}"))
        })
    }
}

/// Decodes an error body, falling back to the status code when the body
/// names no known error type.
pub(crate) fn decode_error(status: http::StatusCode, body: &[u8]) -> DynamoDBError {
    let parsed: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let code = parsed
        .get("__type")
        .and_then(serde_json::Value::as_str)
        .and_then(DynamoDBErrorCode::from_error_type)
        .unwrap_or(match status {
            http::StatusCode::PAYLOAD_TOO_LARGE => DynamoDBErrorCode::RequestEntityTooLarge,
            http::StatusCode::TOO_MANY_REQUESTS => DynamoDBErrorCode::ThrottlingException,
            http::StatusCode::SERVICE_UNAVAILABLE => DynamoDBErrorCode::ServiceUnavailable,
            s if s.is_server_error() => DynamoDBErrorCode::InternalServerError,
            _ => DynamoDBErrorCode::ValidationException,
        });
    DynamoDBError::with_message(code, message).with_status(status)
}

#[async_trait]
impl<T: JsonTransport> DynamoDBClient for JsonClient<T> {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        self.call(DynamoDBOperation::GetItem, &input).await
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        self.call(DynamoDBOperation::PutItem, &input).await
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, DynamoDBError> {
        self.call(DynamoDBOperation::UpdateItem, &input).await
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, DynamoDBError> {
        self.call(DynamoDBOperation::DeleteItem, &input).await
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, DynamoDBError> {
        self.call(DynamoDBOperation::BatchGetItem, &input).await
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoDBError> {
        self.call(DynamoDBOperation::BatchWriteItem, &input).await
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        self.call(DynamoDBOperation::Query, &input).await
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        self.call(DynamoDBOperation::Scan, &input).await
    }
}
