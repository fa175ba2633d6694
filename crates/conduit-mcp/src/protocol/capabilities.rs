//! Capabilities and Handshake Types
//!
//! Capability maps exchanged during the `initialize` handshake, plus the
//! protocol-version table. Server capabilities are kept as the raw map the
//! server sent (with predicate helpers) so unknown capability keys pass
//! through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Known protocol versions, latest first.
///
/// The client always requests the latest on handshake and accepts whatever
/// version string the server returns; forward compatibility is the server's
/// concern.
pub const PROTOCOL_VERSIONS: [&str; 4] = [
    "2025-11-25",
    "2025-06-18",
    "2025-03-26",
    "2024-11-05",
];

/// The version the client requests during the handshake.
pub const LATEST_PROTOCOL_VERSION: &str = PROTOCOL_VERSIONS[0];

/// Whether a version string appears in the known-version table.
pub fn is_known_version(version: &str) -> bool {
    PROTOCOL_VERSIONS.contains(&version)
}

/// Identity `{name, version}` sent as `clientInfo` in the initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Client version
    pub version: String,
}

impl ClientInfo {
    /// Create a client identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capability map advertised by the client during initialization.
///
/// The default map is `{"roots": {"listChanged": true}}`. Sampling is not
/// advertised unless opted in, and even then the connection refuses incoming
/// `sampling/createMessage` requests - this client does not implement
/// sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCapabilities {
    map: Map<String, Value>,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        let mut map = Map::new();
        map.insert("roots".into(), json!({ "listChanged": true }));
        Self { map }
    }
}

impl ClientCapabilities {
    /// An empty capability map (advertise nothing).
    pub fn none() -> Self {
        Self { map: Map::new() }
    }

    /// Opt in to advertising the sampling capability.
    pub fn with_sampling(mut self) -> Self {
        self.map.insert("sampling".into(), json!({}));
        self
    }

    /// Add or replace an arbitrary capability entry.
    pub fn with_capability(mut self, name: impl Into<String>, value: Value) -> Self {
        self.map.insert(name.into(), value);
        self
    }

    /// Whether a capability is advertised.
    pub fn advertises(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// The map as a JSON value for the initialize params.
    pub fn to_value(&self) -> Value {
        Value::Object(self.map.clone())
    }
}

/// Identity `{name, version}` reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,

    /// Server version
    #[serde(default)]
    pub version: String,
}

/// The raw capability map reported by the server, with predicate helpers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerCapabilities(Map<String, Value>);

impl ServerCapabilities {
    /// Whether the server advertises a capability at all.
    pub fn supports(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Whether a capability advertises `listChanged` notifications.
    pub fn list_changed(&self, name: &str) -> bool {
        self.0
            .get(name)
            .and_then(|v| v.get("listChanged"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether resources support `resources/subscribe`.
    pub fn resource_subscribe(&self) -> bool {
        self.0
            .get("resources")
            .and_then(|v| v.get("subscribe"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The raw map as the server sent it.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Everything extracted from a successful `initialize` response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    /// Version string the server chose
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Server capability map
    #[serde(default)]
    pub capabilities: ServerCapabilities,

    /// Server identity
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,

    /// Optional free-form instructions from the server
    #[serde(default)]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_table_latest_first() {
        assert_eq!(LATEST_PROTOCOL_VERSION, "2025-11-25");
        assert!(is_known_version("2024-11-05"));
        assert!(!is_known_version("1999-01-01"));
    }

    #[test]
    fn test_default_client_capabilities() {
        let caps = ClientCapabilities::default();
        assert!(caps.advertises("roots"));
        assert!(!caps.advertises("sampling"));
        assert_eq!(caps.to_value(), json!({"roots": {"listChanged": true}}));
    }

    #[test]
    fn test_sampling_opt_in() {
        let caps = ClientCapabilities::default().with_sampling();
        assert!(caps.advertises("sampling"));
        assert_eq!(caps.to_value()["sampling"], json!({}));
    }

    #[test]
    fn test_server_capability_predicates() {
        let caps: ServerCapabilities = serde_json::from_value(json!({
            "tools": { "listChanged": true },
            "resources": { "subscribe": true, "listChanged": false },
            "experimental": { "something": 1 }
        }))
        .unwrap();

        assert!(caps.supports("tools"));
        assert!(caps.supports("experimental"));
        assert!(!caps.supports("prompts"));
        assert!(caps.list_changed("tools"));
        assert!(!caps.list_changed("resources"));
        assert!(!caps.list_changed("prompts"));
        assert!(caps.resource_subscribe());
    }

    #[test]
    fn test_initialize_result_extraction() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2025-11-25",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "S", "version": "9" }
        }))
        .unwrap();

        assert_eq!(result.protocol_version, "2025-11-25");
        assert_eq!(result.server_info.name, "S");
        assert_eq!(result.server_info.version, "9");
        assert!(result.capabilities.supports("tools"));
        assert!(result.instructions.is_none());
    }

    #[test]
    fn test_initialize_result_unknown_version_accepted() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2099-01-01",
            "capabilities": {},
            "serverInfo": { "name": "future" }
        }))
        .unwrap();

        assert_eq!(result.protocol_version, "2099-01-01");
        assert!(!is_known_version(&result.protocol_version));
        assert_eq!(result.server_info.version, "");
    }
}
