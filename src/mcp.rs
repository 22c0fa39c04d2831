//! MCP (Model Context Protocol) traffic recognition.
//!
//! A request body is MCP traffic iff it parses as a JSON object with
//! `"jsonrpc": "2.0"` and a recognized MCP method. Detection is deliberately
//! forgiving: anything that does not match simply falls through to the
//! non-MCP path, since arbitrary JSON bodies routinely transit the gateway.
//!
//! # ID Preservation
//!
//! The JSON-RPC `id` (and `params.arguments`) are captured as raw JSON
//! fragments. If the client sends `"id": 1` the provider and any rendered
//! error response see `1`, never `"1"`; the bytes are carried, not the
//! parsed value.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::jsonrpc::JsonRpcErrorBody;

/// Recognized MCP JSON-RPC method names.
pub const MCP_METHODS: &[&str] = &[
    "tools/call",
    "tools/list",
    "resources/read",
    "resources/list",
    "prompts/get",
    "prompts/list",
    "initialize",
];

/// Returns true for a recognized MCP method.
pub fn is_mcp_method(method: &str) -> bool {
    MCP_METHODS.contains(&method)
}

/// Extracted MCP fields attached to sideband payloads.
///
/// Serialized field names are the wire schema; per-method fields are absent
/// for methods that do not define them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContext {
    /// JSON-RPC method (e.g. "tools/call")
    #[serde(rename = "mcp_method")]
    pub method: String,
    /// tools/call: `params.name`
    #[serde(rename = "mcp_tool_name", default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// tools/call: raw `params.arguments`
    #[serde(
        rename = "mcp_tool_arguments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_arguments: Option<Box<RawValue>>,
    /// resources/read: `params.uri`
    #[serde(
        rename = "mcp_resource_uri",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_uri: Option<String>,
    /// prompts/get: `params.name`
    #[serde(
        rename = "mcp_prompt_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub prompt_name: Option<String>,
    /// Raw `id` fragment; absent for notifications
    #[serde(
        rename = "mcp_jsonrpc_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub jsonrpc_id: Option<Box<RawValue>>,
}

/// Minimal JSON-RPC 2.0 request shape used for detection.
#[derive(Debug, Deserialize)]
struct JsonRpcProbe {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    id: Option<Box<RawValue>>,
    #[serde(default)]
    params: Option<Box<RawValue>>,
}

/// Parses a request body as MCP traffic.
///
/// Returns `None` for anything that is not a JSON-RPC 2.0 object with a
/// recognized MCP method: empty input, non-JSON, wrong version, unknown
/// methods. A non-object `params` is tolerated: method and id are still
/// extracted and the per-method fields stay empty.
pub fn parse_mcp_request(body: &[u8]) -> Option<McpContext> {
    if !is_json_object(body) {
        return None;
    }

    let probe: JsonRpcProbe = serde_json::from_slice(body).ok()?;
    if probe.jsonrpc.as_deref() != Some("2.0") {
        return None;
    }
    let method = probe.method?;
    if !is_mcp_method(&method) {
        return None;
    }

    let mut ctx = McpContext {
        method,
        tool_name: None,
        tool_arguments: None,
        resource_uri: None,
        prompt_name: None,
        jsonrpc_id: probe.id,
    };

    if let Some(params) = probe.params {
        extract_params(&mut ctx, params.get());
    }

    Some(ctx)
}

/// A struct probe would also accept a JSON array positionally, so object
/// inputs are screened by their first significant byte.
pub(crate) fn is_json_object(body: &[u8]) -> bool {
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{')
}

/// Per-method field extraction from the raw `params` fragment.
fn extract_params(ctx: &mut McpContext, params: &str) {
    #[derive(Deserialize)]
    struct ToolCallParams {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<Box<RawValue>>,
    }

    #[derive(Deserialize)]
    struct ResourceReadParams {
        #[serde(default)]
        uri: Option<String>,
    }

    #[derive(Deserialize)]
    struct PromptGetParams {
        #[serde(default)]
        name: Option<String>,
    }

    match ctx.method.as_str() {
        "tools/call" => {
            if let Ok(p) = serde_json::from_str::<ToolCallParams>(params) {
                ctx.tool_name = p.name;
                ctx.tool_arguments = p.arguments;
            }
        }
        "resources/read" => {
            if let Ok(p) = serde_json::from_str::<ResourceReadParams>(params) {
                ctx.resource_uri = p.uri;
            }
        }
        "prompts/get" => {
            if let Ok(p) = serde_json::from_str::<PromptGetParams>(params) {
                ctx.prompt_name = p.name;
            }
        }
        _ => {}
    }
}

/// True when the body parses as a JSON-RPC 2.0 object (any method).
///
/// Used to sanity-check provider-supplied body replacements for MCP traffic;
/// failures are logged, never enforced.
pub fn is_jsonrpc_2_0(body: &[u8]) -> bool {
    #[derive(Deserialize)]
    struct VersionProbe {
        #[serde(default)]
        jsonrpc: Option<String>,
        #[serde(default)]
        method: Option<String>,
    }

    if !is_json_object(body) {
        return false;
    }
    match serde_json::from_slice::<VersionProbe>(body) {
        Ok(p) => p.jsonrpc.as_deref() == Some("2.0") && p.method.is_some(),
        Err(_) => false,
    }
}

/// Maps an HTTP status to the JSON-RPC 2.0 error code used in rendered
/// denials.
pub fn http_status_to_jsonrpc_code(status: u16) -> i32 {
    match status {
        400 | 401 | 403 => -32600, // Invalid Request
        404 => -32601,             // Method not found
        429 => -32000,             // Server error (rate limited)
        500 => -32603,             // Internal error
        502 | 503 => -32000,       // Server error (unavailable)
        s if (400..500).contains(&s) => -32600,
        _ => -32603,
    }
}

/// Renders a denial as a JSON-RPC 2.0 error response body.
///
/// The `id` fragment is echoed byte-identically; `None` renders as `null`.
pub fn render_deny_body(status: u16, message: impl Into<String>, id: Option<Box<RawValue>>) -> String {
    let body = JsonRpcErrorBody::new(http_status_to_jsonrpc_code(status), message, id);
    // A struct of a static string, a raw fragment, and a (code, message)
    // pair cannot fail to serialize.
    serde_json::to_string(&body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tools_call() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_weather","arguments":{"city":"London"}}}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        assert_eq!(ctx.method, "tools/call");
        assert_eq!(ctx.tool_name.as_deref(), Some("get_weather"));
        assert_eq!(
            ctx.tool_arguments.as_ref().expect("arguments").get(),
            r#"{"city":"London"}"#
        );
        assert_eq!(ctx.jsonrpc_id.as_ref().expect("id").get(), "1");
        assert!(ctx.resource_uri.is_none());
        assert!(ctx.prompt_name.is_none());
    }

    #[test]
    fn test_parse_resources_read() {
        let body = br#"{"jsonrpc":"2.0","id":"r-1","method":"resources/read","params":{"uri":"file:///etc/motd"}}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        assert_eq!(ctx.method, "resources/read");
        assert_eq!(ctx.resource_uri.as_deref(), Some("file:///etc/motd"));
        assert!(ctx.tool_name.is_none());
    }

    #[test]
    fn test_parse_prompts_get() {
        let body = br#"{"jsonrpc":"2.0","id":2,"method":"prompts/get","params":{"name":"greeting"}}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        assert_eq!(ctx.prompt_name.as_deref(), Some("greeting"));
    }

    #[test]
    fn test_list_methods_carry_no_params_fields() {
        for method in ["tools/list", "resources/list", "prompts/list", "initialize"] {
            let body = format!(r#"{{"jsonrpc":"2.0","id":9,"method":"{method}"}}"#);
            let ctx = parse_mcp_request(body.as_bytes()).expect("should detect MCP");
            assert_eq!(ctx.method, method);
            assert!(ctx.tool_name.is_none());
            assert!(ctx.resource_uri.is_none());
            assert!(ctx.prompt_name.is_none());
        }
    }

    #[test]
    fn test_rejects_empty_body() {
        assert!(parse_mcp_request(b"").is_none());
    }

    #[test]
    fn test_rejects_missing_jsonrpc_version() {
        assert!(parse_mcp_request(br#"{"id":1,"method":"tools/call"}"#).is_none());
        assert!(parse_mcp_request(br#"{"jsonrpc":"1.0","id":1,"method":"tools/call"}"#).is_none());
    }

    #[test]
    fn test_rejects_unrecognized_method() {
        assert!(parse_mcp_request(br#"{"jsonrpc":"2.0","id":1,"method":"tasks/create"}"#).is_none());
        assert!(parse_mcp_request(br#"{"jsonrpc":"2.0","id":1}"#).is_none());
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(parse_mcp_request(b"not json at all").is_none());
        assert!(parse_mcp_request(b"[1,2,3]").is_none());
        // An array must never satisfy the probe positionally.
        assert!(parse_mcp_request(br#"["2.0","tools/call"]"#).is_none());
    }

    #[test]
    fn test_tolerates_non_object_params() {
        let body = br#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":[1,2]}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        assert_eq!(ctx.method, "tools/call");
        assert!(ctx.tool_name.is_none());
        assert!(ctx.tool_arguments.is_none());
        assert_eq!(ctx.jsonrpc_id.as_ref().expect("id").get(), "5");
    }

    #[test]
    fn test_tolerates_non_string_tool_name() {
        let body = br#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":17}}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        assert!(ctx.tool_name.is_none());
    }

    #[test]
    fn test_notification_has_no_id() {
        let body = br#"{"jsonrpc":"2.0","method":"tools/list"}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        assert!(ctx.jsonrpc_id.is_none());
    }

    #[test]
    fn test_id_round_trips_byte_identically() {
        for (body, want) in [
            (br#"{"jsonrpc":"2.0","id":42,"method":"tools/list"}"# as &[u8], "42"),
            (br#"{"jsonrpc":"2.0","id":"abc-123","method":"tools/list"}"#, r#""abc-123""#),
        ] {
            let ctx = parse_mcp_request(body).expect("should detect MCP");
            let id = ctx.jsonrpc_id.expect("id present");
            assert_eq!(id.get(), want);

            let rendered = render_deny_body(403, "denied", Some(id));
            assert!(rendered.contains(&format!(r#""id":{want}"#)));
        }
    }

    #[test]
    fn test_context_serialization_wire_names() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"t","arguments":{"a":1}}}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        let value = serde_json::to_value(&ctx).expect("should serialize");
        assert_eq!(value["mcp_method"], "tools/call");
        assert_eq!(value["mcp_tool_name"], "t");
        assert_eq!(value["mcp_tool_arguments"]["a"], 1);
        assert_eq!(value["mcp_jsonrpc_id"], 1);
        assert!(value.get("mcp_resource_uri").is_none());
        assert!(value.get("mcp_prompt_name").is_none());
    }

    #[test]
    fn test_context_json_round_trip() {
        let body = br#"{"jsonrpc":"2.0","id":"x","method":"resources/read","params":{"uri":"db://a"}}"#;
        let ctx = parse_mcp_request(body).expect("should detect MCP");
        let json = serde_json::to_string(&ctx).expect("should serialize");
        let back: McpContext = serde_json::from_str(&json).expect("should parse");
        assert_eq!(back.method, "resources/read");
        assert_eq!(back.resource_uri.as_deref(), Some("db://a"));
        assert_eq!(back.jsonrpc_id.expect("id").get(), r#""x""#);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(http_status_to_jsonrpc_code(400), -32600);
        assert_eq!(http_status_to_jsonrpc_code(401), -32600);
        assert_eq!(http_status_to_jsonrpc_code(403), -32600);
        assert_eq!(http_status_to_jsonrpc_code(404), -32601);
        assert_eq!(http_status_to_jsonrpc_code(418), -32600);
        assert_eq!(http_status_to_jsonrpc_code(429), -32000);
        assert_eq!(http_status_to_jsonrpc_code(500), -32603);
        assert_eq!(http_status_to_jsonrpc_code(502), -32000);
        assert_eq!(http_status_to_jsonrpc_code(503), -32000);
        assert_eq!(http_status_to_jsonrpc_code(504), -32603);
        assert_eq!(http_status_to_jsonrpc_code(302), -32603);
    }

    #[test]
    fn test_render_deny_body_null_id() {
        let body = render_deny_body(403, "denied by policy", None);
        assert_eq!(
            body,
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"denied by policy"}}"#
        );
    }

    #[test]
    fn test_is_jsonrpc_2_0() {
        assert!(is_jsonrpc_2_0(br#"{"jsonrpc":"2.0","method":"anything"}"#));
        assert!(!is_jsonrpc_2_0(br#"{"jsonrpc":"2.0"}"#));
        assert!(!is_jsonrpc_2_0(br#"{"method":"x"}"#));
        assert!(!is_jsonrpc_2_0(b"plain text"));
    }
}
