//! Wire-format operation messages.
//!
//! An [`OperationMessage`] is the unit exchanged in both directions over a
//! message-based transport, typically JSON-encoded. The `id` field scopes a
//! message to one operation within its connection; `connection_init`,
//! `connection_ack`, and `connection_terminate` carry no id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::ProtocolError;
use crate::ids::OperationId;

/// The fixed enumeration of protocol message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Client → server: connection setup (e.g. auth), answered with an ack.
    ConnectionInit,
    /// Server → client: connection accepted.
    ConnectionAck,
    /// Client → server: begin an operation (query, mutation, subscription).
    Start,
    /// Server → client: one execution result for an operation.
    Data,
    /// Server → client: operation-scoped error. Terminal for that operation.
    Error,
    /// Server → client: no further results for an operation. Terminal.
    Complete,
    /// Client → server: cancel a running operation.
    Stop,
    /// Client → server: close every operation on the connection.
    ConnectionTerminate,
}

impl MessageType {
    /// Wire name of this message type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::Start => "start",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Stop => "stop",
            Self::ConnectionTerminate => "connection_terminate",
        }
    }

    /// Whether messages of this type must carry an operation id.
    pub fn requires_id(self) -> bool {
        matches!(
            self,
            Self::Start | Self::Data | Self::Error | Self::Complete | Self::Stop
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message, in either direction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationMessage {
    /// Message type discriminant.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Operation id; required for operation-scoped types, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<OperationId>,
    /// Type-dependent payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationMessage {
    /// Build a `connection_ack` message.
    pub fn ack() -> Self {
        Self {
            message_type: MessageType::ConnectionAck,
            id: None,
            payload: None,
        }
    }

    /// Build a `data` message carrying one execution result.
    pub fn data(id: impl Into<OperationId>, payload: Value) -> Self {
        Self {
            message_type: MessageType::Data,
            id: Some(id.into()),
            payload: Some(payload),
        }
    }

    /// Build an `error` message for one operation.
    pub fn error(id: impl Into<OperationId>, payload: Value) -> Self {
        Self {
            message_type: MessageType::Error,
            id: Some(id.into()),
            payload: Some(payload),
        }
    }

    /// Build a `complete` message for one operation.
    pub fn complete(id: impl Into<OperationId>) -> Self {
        Self {
            message_type: MessageType::Complete,
            id: Some(id.into()),
            payload: None,
        }
    }

    /// Enforce the id-presence invariant.
    ///
    /// Operation-scoped types must carry an id. A stray id on a
    /// connection-scoped message is tolerated and ignored.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.message_type.requires_id() && self.id.is_none() {
            return Err(ProtocolError::MissingOperationId {
                message_type: self.message_type,
            });
        }
        Ok(())
    }
}

/// Payload of a `start` message: the operation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    /// Query text.
    pub query: String,
    /// Operation name, when the document contains more than one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Operation variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl QueryPayload {
    /// Parse a raw `start` payload.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            message_type: MessageType::Start,
            reason: e.to_string(),
        })
    }
}

/// A position within the query text attached to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Payload of an `error` message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description.
    pub message: String,
    /// Positions in the query text, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
}

impl ErrorPayload {
    /// Build a payload from a bare message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
        }
    }

    /// Serialize to a JSON value for embedding in an [`OperationMessage`].
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── MessageType ─────────────────────────────────────────────────

    #[test]
    fn wire_names_are_snake_case() {
        assert_eq!(MessageType::ConnectionInit.as_str(), "connection_init");
        assert_eq!(MessageType::ConnectionAck.as_str(), "connection_ack");
        assert_eq!(MessageType::Start.as_str(), "start");
        assert_eq!(MessageType::Data.as_str(), "data");
        assert_eq!(MessageType::Error.as_str(), "error");
        assert_eq!(MessageType::Complete.as_str(), "complete");
        assert_eq!(MessageType::Stop.as_str(), "stop");
        assert_eq!(
            MessageType::ConnectionTerminate.as_str(),
            "connection_terminate"
        );
    }

    #[test]
    fn serde_matches_as_str() {
        for ty in [
            MessageType::ConnectionInit,
            MessageType::ConnectionAck,
            MessageType::Start,
            MessageType::Data,
            MessageType::Error,
            MessageType::Complete,
            MessageType::Stop,
            MessageType::ConnectionTerminate,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn operation_scoped_types_require_id() {
        assert!(MessageType::Start.requires_id());
        assert!(MessageType::Stop.requires_id());
        assert!(MessageType::Data.requires_id());
        assert!(MessageType::Error.requires_id());
        assert!(MessageType::Complete.requires_id());
    }

    #[test]
    fn connection_scoped_types_do_not_require_id() {
        assert!(!MessageType::ConnectionInit.requires_id());
        assert!(!MessageType::ConnectionAck.requires_id());
        assert!(!MessageType::ConnectionTerminate.requires_id());
    }

    // ── OperationMessage ────────────────────────────────────────────

    #[test]
    fn ack_has_no_id_or_payload() {
        let msg = OperationMessage::ack();
        assert_eq!(msg.message_type, MessageType::ConnectionAck);
        assert!(msg.id.is_none());
        assert!(msg.payload.is_none());
    }

    #[test]
    fn data_message_roundtrip() {
        let msg = OperationMessage::data("op-1", json!({"data": {"x": 1}}));
        let json = serde_json::to_string(&msg).unwrap();
        let back: OperationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_type, MessageType::Data);
        assert_eq!(back.id.unwrap().as_str(), "op-1");
        assert_eq!(back.payload.unwrap()["data"]["x"], 1);
    }

    #[test]
    fn absent_fields_are_omitted_from_wire() {
        let msg = OperationMessage::complete("op-1");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("payload"));
        assert_eq!(json, r#"{"type":"complete","id":"op-1"}"#);
    }

    #[test]
    fn parses_client_start_message() {
        let raw = r#"{"type":"start","id":"1","payload":{"query":"subscription { onEvent }"}}"#;
        let msg: OperationMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.message_type, MessageType::Start);
        assert_eq!(msg.id.as_deref(), Some("1"));
        assert!(msg.payload.is_some());
    }

    #[test]
    fn parses_init_without_id() {
        let msg: OperationMessage =
            serde_json::from_str(r#"{"type":"connection_init"}"#).unwrap();
        assert_eq!(msg.message_type, MessageType::ConnectionInit);
        assert!(msg.id.is_none());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result =
            serde_json::from_str::<OperationMessage>(r#"{"type":"subscribe","id":"1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_start_without_id() {
        let msg: OperationMessage = serde_json::from_str(
            r#"{"type":"start","payload":{"query":"{ me }"}}"#,
        )
        .unwrap();
        assert_matches!(
            msg.validate(),
            Err(ProtocolError::MissingOperationId {
                message_type: MessageType::Start
            })
        );
    }

    #[test]
    fn validate_rejects_stop_without_id() {
        let msg: OperationMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn validate_tolerates_stray_id_on_init() {
        let msg: OperationMessage =
            serde_json::from_str(r#"{"type":"connection_init","id":"1"}"#).unwrap();
        assert!(msg.validate().is_ok());
    }

    // ── QueryPayload ────────────────────────────────────────────────

    #[test]
    fn query_payload_full() {
        let payload = QueryPayload::from_value(json!({
            "query": "query Hero($id: ID!) { hero(id: $id) { name } }",
            "operationName": "Hero",
            "variables": {"id": "42"},
        }))
        .unwrap();
        assert_eq!(payload.operation_name.as_deref(), Some("Hero"));
        assert_eq!(payload.variables.unwrap()["id"], "42");
    }

    #[test]
    fn query_payload_minimal() {
        let payload = QueryPayload::from_value(json!({"query": "{ me }"})).unwrap();
        assert_eq!(payload.query, "{ me }");
        assert!(payload.operation_name.is_none());
        assert!(payload.variables.is_none());
    }

    #[test]
    fn query_payload_missing_query_is_invalid() {
        let result = QueryPayload::from_value(json!({"operationName": "X"}));
        assert_matches!(
            result,
            Err(ProtocolError::InvalidPayload {
                message_type: MessageType::Start,
                ..
            })
        );
    }

    #[test]
    fn query_payload_non_object_is_invalid() {
        assert!(QueryPayload::from_value(json!("just a string")).is_err());
    }

    // ── ErrorPayload ────────────────────────────────────────────────

    #[test]
    fn error_payload_without_locations() {
        let payload = ErrorPayload::new("boom").to_value();
        assert_eq!(payload["message"], "boom");
        assert!(payload.get("locations").is_none());
    }

    #[test]
    fn error_payload_with_locations() {
        let payload = ErrorPayload {
            message: "syntax error".into(),
            locations: Some(vec![ErrorLocation { line: 2, column: 7 }]),
        };
        let value = payload.to_value();
        assert_eq!(value["locations"][0]["line"], 2);
        assert_eq!(value["locations"][0]["column"], 7);
    }
}
