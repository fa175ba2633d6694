//! JSON-RPC 2.0 Message Types
//!
//! MCP uses JSON-RPC 2.0 as its wire protocol. This module implements the
//! four message shapes (request, notification, success response, error
//! response) and the classification of inbound frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::error::{McpError, RpcError};

/// JSON-RPC protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Request ID - can be a string or number.
///
/// The client only ever produces numeric IDs (the tracker allocates them),
/// but servers are allowed to echo string IDs on decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID
    Number(u64),
    /// String ID
    String(String),
}

impl RequestId {
    /// Numeric value, if this is a numeric ID.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => Some(*n),
            RequestId::String(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC 2.0 Request
///
/// A call to a specific method with optional parameters. Each request has a
/// unique ID that the server echoes in its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always "2.0"
    pub jsonrpc: String,

    /// Unique request identifier
    pub id: RequestId,

    /// Method name to invoke
    pub method: String,

    /// Optional parameters for the method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Add parameters to the request.
    ///
    /// An empty object is treated the same as no parameters and is omitted
    /// from the wire encoding.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = normalize_params(params);
        self
    }
}

/// JSON-RPC 2.0 Notification
///
/// Like a request but has no ID and expects no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always "2.0"
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Optional parameters for the method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }

    /// Add parameters to the notification (empty objects are elided).
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = normalize_params(params);
        self
    }
}

/// JSON-RPC 2.0 Response
///
/// Contains either a result or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always "2.0"
    pub jsonrpc: String,

    /// Request ID this is responding to
    pub id: RequestId,

    /// Successful result (mutually exclusive with error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error result (mutually exclusive with result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: impl Into<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response is an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the result, returning the server's error if the response is one.
    pub fn into_result(self) -> Result<Value, RpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// An inbound JSON-RPC message, classified by shape.
///
/// Classification is by key presence: `error`+`id` or `result`+`id` is a
/// response, `method`+`id` is a server-initiated request, `method` without
/// `id` is a notification. Anything else is invalid (which is distinct from
/// a JSON parse failure — the frame decoded, it just isn't JSON-RPC).
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A server-initiated request (has both `method` and `id`)
    Request(JsonRpcRequest),
    /// A server notification (has `method`, no `id`)
    Notification(JsonRpcNotification),
    /// A response to one of our requests
    Response(JsonRpcResponse),
}

/// Classify a decoded JSON value as one of the JSON-RPC message shapes.
pub fn classify(value: Value) -> Result<IncomingMessage, McpError> {
    let obj = match &value {
        Value::Object(map) => map,
        other => {
            return Err(McpError::invalid_message(format!(
                "expected an object, got {}",
                json_type_name(other)
            )));
        }
    };

    let has_id = obj.get("id").map(|v| !v.is_null()).unwrap_or(false);

    if has_id && (obj.contains_key("error") || obj.contains_key("result")) {
        let response: JsonRpcResponse = serde_json::from_value(value)
            .map_err(|e| McpError::invalid_message(format!("malformed response: {}", e)))?;
        if response.is_error() && response.result.is_some() {
            return Err(McpError::invalid_message(
                "response carries both result and error",
            ));
        }
        return Ok(IncomingMessage::Response(response));
    }

    if obj.contains_key("method") {
        if has_id {
            let request: JsonRpcRequest = serde_json::from_value(value)
                .map_err(|e| McpError::invalid_message(format!("malformed request: {}", e)))?;
            return Ok(IncomingMessage::Request(request));
        }
        let notification: JsonRpcNotification = serde_json::from_value(value)
            .map_err(|e| McpError::invalid_message(format!("malformed notification: {}", e)))?;
        return Ok(IncomingMessage::Notification(notification));
    }

    Err(McpError::invalid_message(
        "message is neither a request, notification, nor response",
    ))
}

/// Parse raw bytes and classify in one step.
///
/// A JSON decode failure maps to the parse-error code; a structurally bad
/// message maps to invalid-request.
pub fn decode(bytes: &[u8]) -> Result<IncomingMessage, McpError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| McpError::Parse(e.to_string()))?;
    classify(value)
}

fn normalize_params(params: Value) -> Option<Value> {
    match params {
        Value::Null => None,
        Value::Object(ref map) if map.is_empty() => None,
        other => Some(other),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::codes;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(1u64, "tools/list");
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_request_empty_params_elided() {
        let req = JsonRpcRequest::new(1u64, "ping").with_params(json!({}));
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_request_round_trip() {
        let req = JsonRpcRequest::new(7u64, "tools/call")
            .with_params(json!({"name": "echo", "arguments": {"message": "hi"}}));
        let value = serde_json::to_value(&req).unwrap();
        let back = match classify(value).unwrap() {
            IncomingMessage::Request(r) => r,
            other => panic!("expected request, got {:?}", other),
        };
        assert_eq!(back, req);
    }

    #[test]
    fn test_decode_tolerates_absent_and_empty_params() {
        let absent: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        let empty: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#)
                .unwrap();
        assert_eq!(absent.params, None);
        assert_eq!(empty.params, Some(json!({})));
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = JsonRpcNotification::new("notifications/initialized");
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_classify_success_response() {
        let msg = classify(json!({"jsonrpc":"2.0","id":1,"result":{"tools":[]}})).unwrap();
        match msg {
            IncomingMessage::Response(resp) => {
                assert_eq!(resp.id, RequestId::Number(1));
                assert_eq!(resp.into_result().unwrap(), json!({"tools": []}));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_response() {
        let msg = classify(
            json!({"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}),
        )
        .unwrap();
        match msg {
            IncomingMessage::Response(resp) => {
                let err = resp.into_result().unwrap_err();
                assert_eq!(err.code, codes::METHOD_NOT_FOUND);
                assert_eq!(err.message, "Method not found");
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_request() {
        let msg = classify(json!({"jsonrpc":"2.0","id":"srv-1","method":"ping"})).unwrap();
        match msg {
            IncomingMessage::Request(req) => {
                assert_eq!(req.id, RequestId::String("srv-1".into()));
                assert_eq!(req.method, "ping");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification() {
        let msg = classify(
            json!({"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":0.5}}),
        )
        .unwrap();
        match msg {
            IncomingMessage::Notification(n) => {
                assert_eq!(n.method, "notifications/progress");
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_invalid_message() {
        let err = classify(json!({"jsonrpc":"2.0"})).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_REQUEST);

        let err = classify(json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_REQUEST);
    }

    #[test]
    fn test_decode_distinguishes_parse_failure() {
        let err = decode(b"{not json").unwrap_err();
        assert_eq!(err.code(), codes::PARSE_ERROR);

        let err = decode(br#"{"jsonrpc":"2.0"}"#).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_REQUEST);
    }

    #[test]
    fn test_string_id_accepted_on_decode() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#).unwrap();
        assert_eq!(resp.id, RequestId::String("abc".into()));
        assert_eq!(resp.id.as_u64(), None);
    }

    #[test]
    fn test_response_null_result() {
        let resp = JsonRpcResponse::success(1u64, Value::Null);
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }
}
