//! Execution gateway boundary.
//!
//! The engine that parses, validates, and executes an operation lives
//! behind [`ExecutionGateway`]. It classifies each request and returns
//! either a completed result (query/mutation) or named result streams
//! (subscription). Nothing in this crate interprets the query language.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pylon_core::message::{ErrorLocation, ErrorPayload};

/// One completed execution result, serialized verbatim as a `data` payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Resolved data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Errors reported alongside the data.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ExecutionError>,
}

impl ExecutionResult {
    /// A result carrying only data.
    pub fn data(value: Value) -> Self {
        Self {
            data: Some(value),
            errors: Vec::new(),
        }
    }
}

/// An error reported by the execution engine (validation or runtime).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Human-readable description.
    pub message: String,
    /// Positions in the query text, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
}

impl ExecutionError {
    /// Build an error from a bare message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
        }
    }
}

impl From<ExecutionError> for ErrorPayload {
    fn from(err: ExecutionError) -> Self {
        Self {
            message: err.message,
            locations: err.locations,
        }
    }
}

/// Stream of results produced by one subscription operation.
///
/// Once registered with a handle the stream is owned exclusively by that
/// handle's pump task; dropping it is the unsubscribe.
pub type ResultStream =
    Pin<Box<dyn Stream<Item = Result<ExecutionResult, ExecutionError>> + Send>>;

/// What the gateway resolved a request to.
pub enum ExecutionOutcome {
    /// Query or mutation: one completed result.
    Single(ExecutionResult),
    /// Subscription: setup errors and/or named result streams.
    Subscription(SubscriptionOutcome),
}

/// Result of setting up a subscription operation.
pub struct SubscriptionOutcome {
    /// Validation or setup errors; when non-empty, no stream is consumed.
    pub errors: Vec<ExecutionError>,
    /// Result streams keyed by field name. Exactly one is valid; zero or
    /// more than one is a server-side error surfaced to the client.
    pub streams: HashMap<String, ResultStream>,
}

impl SubscriptionOutcome {
    /// A subscription that resolved to a single named stream.
    pub fn stream(field: impl Into<String>, stream: ResultStream) -> Self {
        let mut streams = HashMap::new();
        let _ = streams.insert(field.into(), stream);
        Self {
            errors: Vec::new(),
            streams,
        }
    }

    /// A subscription that failed setup.
    pub fn errors(errors: Vec<ExecutionError>) -> Self {
        Self {
            errors,
            streams: HashMap::new(),
        }
    }
}

/// An operation request handed to the gateway: the `start` payload plus
/// connection-scoped options and the per-request user context.
#[derive(Clone, Debug, Default)]
pub struct ExecutionRequest {
    /// Query text.
    pub query: String,
    /// Operation name, when the document contains more than one.
    pub operation_name: Option<String>,
    /// Operation variables.
    pub variables: Option<Value>,
    /// Names of validation rules to apply, from the connection options.
    pub validation_rules: Vec<String>,
    /// Whether execution exceptions may be exposed to the client.
    pub expose_exceptions: bool,
    /// Opaque per-request context built by the connection's factory.
    pub user_context: Option<Value>,
}

/// Classifies and runs one operation request.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Execute the request, returning a completed result or a stream handle.
    ///
    /// Failures are reported in-band: `Single` results carry an `errors`
    /// array, `Subscription` outcomes carry setup errors. The gateway never
    /// fails the connection itself.
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_serializes_as_data_payload() {
        let result = ExecutionResult::data(json!({"onEvent": {"n": 1}}));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["data"]["onEvent"]["n"], 1);
        assert!(value.get("errors").is_none(), "empty errors are omitted");
    }

    #[test]
    fn result_with_errors_keeps_both() {
        let result = ExecutionResult {
            data: Some(json!(null)),
            errors: vec![ExecutionError::new("partial failure")],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["errors"][0]["message"], "partial failure");
    }

    #[test]
    fn execution_error_converts_to_error_payload() {
        let err = ExecutionError {
            message: "unknown field".into(),
            locations: Some(vec![ErrorLocation { line: 1, column: 3 }]),
        };
        let payload: ErrorPayload = err.into();
        assert_eq!(payload.message, "unknown field");
        assert_eq!(payload.locations.unwrap()[0].column, 3);
    }

    #[test]
    fn subscription_outcome_stream_constructor() {
        let stream: ResultStream = Box::pin(futures::stream::empty());
        let outcome = SubscriptionOutcome::stream("onEvent", stream);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.streams.len(), 1);
        assert!(outcome.streams.contains_key("onEvent"));
    }

    #[test]
    fn subscription_outcome_errors_constructor() {
        let outcome = SubscriptionOutcome::errors(vec![ExecutionError::new("denied")]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.streams.is_empty());
    }

    #[test]
    fn request_default_is_empty() {
        let request = ExecutionRequest::default();
        assert!(request.query.is_empty());
        assert!(request.validation_rules.is_empty());
        assert!(!request.expose_exceptions);
        assert!(request.user_context.is_none());
    }
}
