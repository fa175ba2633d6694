//! MCP Method Builders
//!
//! Pure builders producing `{method, params}` pairs for every MCP method the
//! client sends. Method strings are exactly the wire names; optional cursors
//! and arguments are elided when absent. No I/O happens here.

use serde_json::{json, Map, Value};

use crate::protocol::capabilities::{ClientCapabilities, ClientInfo};

/// A method name paired with its params object.
///
/// `params` may be an empty object; the codec elides it on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// MCP wire method name
    pub method: &'static str,
    /// Params object (possibly empty)
    pub params: Value,
}

impl MethodCall {
    fn new(method: &'static str) -> Self {
        Self {
            method,
            params: Value::Object(Map::new()),
        }
    }

    fn with(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }
}

/// `initialize` request body.
pub fn initialize(
    protocol_version: &str,
    capabilities: &ClientCapabilities,
    client_info: &ClientInfo,
) -> MethodCall {
    MethodCall::with(
        "initialize",
        json!({
            "protocolVersion": protocol_version,
            "capabilities": capabilities.to_value(),
            "clientInfo": client_info,
        }),
    )
}

/// `ping` request body.
pub fn ping() -> MethodCall {
    MethodCall::new("ping")
}

/// `tools/list` request body.
pub fn tools_list(cursor: Option<&str>) -> MethodCall {
    MethodCall::with("tools/list", paginated(cursor))
}

/// `tools/call` request body.
pub fn tools_call(name: &str, arguments: Option<Value>) -> MethodCall {
    let mut params = Map::new();
    params.insert("name".into(), json!(name));
    if let Some(args) = arguments {
        params.insert("arguments".into(), args);
    }
    MethodCall::with("tools/call", Value::Object(params))
}

/// `resources/list` request body.
pub fn resources_list(cursor: Option<&str>) -> MethodCall {
    MethodCall::with("resources/list", paginated(cursor))
}

/// `resources/templates/list` request body.
pub fn resources_templates_list(cursor: Option<&str>) -> MethodCall {
    MethodCall::with("resources/templates/list", paginated(cursor))
}

/// `resources/read` request body.
pub fn resources_read(uri: &str) -> MethodCall {
    MethodCall::with("resources/read", json!({ "uri": uri }))
}

/// `resources/subscribe` request body.
pub fn resources_subscribe(uri: &str) -> MethodCall {
    MethodCall::with("resources/subscribe", json!({ "uri": uri }))
}

/// `resources/unsubscribe` request body.
pub fn resources_unsubscribe(uri: &str) -> MethodCall {
    MethodCall::with("resources/unsubscribe", json!({ "uri": uri }))
}

/// `prompts/list` request body.
pub fn prompts_list(cursor: Option<&str>) -> MethodCall {
    MethodCall::with("prompts/list", paginated(cursor))
}

/// `prompts/get` request body.
pub fn prompts_get(name: &str, arguments: Option<Value>) -> MethodCall {
    let mut params = Map::new();
    params.insert("name".into(), json!(name));
    if let Some(args) = arguments {
        params.insert("arguments".into(), args);
    }
    MethodCall::with("prompts/get", Value::Object(params))
}

/// `logging/setLevel` request body.
pub fn logging_set_level(level: &str) -> MethodCall {
    MethodCall::with("logging/setLevel", json!({ "level": level }))
}

/// `completion/complete` request body.
///
/// `reference` is the prompt/resource ref object; `argument` is the
/// `{name, value}` pair being completed.
pub fn completion_complete(reference: Value, argument: Value) -> MethodCall {
    MethodCall::with(
        "completion/complete",
        json!({ "ref": reference, "argument": argument }),
    )
}

/// `notifications/initialized` body.
pub fn initialized() -> MethodCall {
    MethodCall::new("notifications/initialized")
}

/// `notifications/cancelled` body.
pub fn cancelled(request_id: u64, reason: Option<&str>) -> MethodCall {
    let mut params = Map::new();
    params.insert("requestId".into(), json!(request_id));
    if let Some(reason) = reason {
        params.insert("reason".into(), json!(reason));
    }
    MethodCall::with("notifications/cancelled", Value::Object(params))
}

/// `notifications/progress` body.
pub fn progress(progress_token: Value, progress: f64, total: Option<f64>) -> MethodCall {
    let mut params = Map::new();
    params.insert("progressToken".into(), progress_token);
    params.insert("progress".into(), json!(progress));
    if let Some(total) = total {
        params.insert("total".into(), json!(total));
    }
    MethodCall::with("notifications/progress", Value::Object(params))
}

/// `notifications/roots/list_changed` body.
pub fn roots_list_changed() -> MethodCall {
    MethodCall::new("notifications/roots/list_changed")
}

fn paginated(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => Value::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_body() {
        let call = initialize(
            "2025-11-25",
            &ClientCapabilities::default(),
            &ClientInfo::new("T", "1"),
        );
        assert_eq!(call.method, "initialize");
        assert_eq!(call.params["protocolVersion"], "2025-11-25");
        assert_eq!(call.params["clientInfo"]["name"], "T");
        assert_eq!(
            call.params["capabilities"]["roots"]["listChanged"],
            json!(true)
        );
    }

    #[test]
    fn test_cursor_elided_when_absent() {
        assert_eq!(tools_list(None).params, json!({}));
        assert_eq!(
            tools_list(Some("page2")).params,
            json!({"cursor": "page2"})
        );
        assert_eq!(resources_list(None).params, json!({}));
        assert_eq!(prompts_list(None).params, json!({}));
        assert_eq!(resources_templates_list(None).params, json!({}));
    }

    #[test]
    fn test_tools_call_arguments_elided() {
        let call = tools_call("echo", None);
        assert_eq!(call.params, json!({"name": "echo"}));

        let call = tools_call("echo", Some(json!({"message": "hi"})));
        assert_eq!(
            call.params,
            json!({"name": "echo", "arguments": {"message": "hi"}})
        );
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(ping().method, "ping");
        assert_eq!(resources_read("file:///x").method, "resources/read");
        assert_eq!(resources_subscribe("u").method, "resources/subscribe");
        assert_eq!(resources_unsubscribe("u").method, "resources/unsubscribe");
        assert_eq!(prompts_get("p", None).method, "prompts/get");
        assert_eq!(logging_set_level("debug").method, "logging/setLevel");
        assert_eq!(
            completion_complete(json!({}), json!({})).method,
            "completion/complete"
        );
        assert_eq!(initialized().method, "notifications/initialized");
        assert_eq!(roots_list_changed().method, "notifications/roots/list_changed");
    }

    #[test]
    fn test_cancelled_body() {
        let call = cancelled(42, None);
        assert_eq!(call.params, json!({"requestId": 42}));

        let call = cancelled(42, Some("caller dropped"));
        assert_eq!(
            call.params,
            json!({"requestId": 42, "reason": "caller dropped"})
        );
    }

    #[test]
    fn test_progress_body() {
        let call = progress(json!("tok"), 0.5, Some(1.0));
        assert_eq!(call.method, "notifications/progress");
        assert_eq!(
            call.params,
            json!({"progressToken": "tok", "progress": 0.5, "total": 1.0})
        );
    }
}
