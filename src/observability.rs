//! Debug payload logging with redaction and truncation.
//!
//! Sideband payloads carry client credentials and request bodies, so debug
//! logging never emits them raw: header values in the configured redaction
//! set (plus the secret header, always) are replaced with `[REDACTED]`, and
//! the serialized payload is truncated to `debug_body_max_bytes` with a
//! marker noting the original size.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::PluginConfig;
use crate::mcp::McpContext;

/// Replacement for redacted header values.
pub const REDACTED: &str = "[REDACTED]";

/// Truncates a string to at most `max_bytes`, appending a marker with the
/// original length. `0` disables truncation. Cuts land on char boundaries.
pub fn truncate_body(body: &str, max_bytes: usize) -> String {
    if max_bytes == 0 || body.len() <= max_bytes {
        return body.to_string();
    }

    let mut cut = max_bytes;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated, {} bytes]", &body[..cut], body.len())
}

/// Redacts sensitive header values in a serialized payload tree.
///
/// Walks the tree looking for `headers` keys holding the wire array form and
/// replaces matching values in place; nested payloads (the embedded original
/// request in a response payload) are covered by the recursion.
pub fn redact_payload_headers(value: &mut Value, redact: &[String], secret_header: &str) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "headers" {
                    if let Value::Array(entries) = child {
                        for entry in entries {
                            redact_wire_entry(entry, redact, secret_header);
                        }
                        continue;
                    }
                }
                redact_payload_headers(child, redact, secret_header);
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_payload_headers(item, redact, secret_header);
            }
        }
        _ => {}
    }
}

/// Redacts one single-entry wire header object in place.
fn redact_wire_entry(entry: &mut Value, redact: &[String], secret_header: &str) {
    let Value::Object(map) = entry else {
        return;
    };
    for (name, value) in map.iter_mut() {
        let is_sensitive = name.eq_ignore_ascii_case(secret_header)
            || redact.iter().any(|r| r.eq_ignore_ascii_case(name));
        if is_sensitive {
            *value = Value::String(REDACTED.to_string());
        }
    }
}

/// Logs a sideband payload at debug level, redacted and truncated.
///
/// No-op unless `enable_debug_logging` is set.
pub fn debug_log_payload<T: Serialize>(direction: &str, payload: &T, config: &PluginConfig) {
    if !config.enable_debug_logging {
        return;
    }

    let mut value = match serde_json::to_value(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "failed to serialize payload for debug logging");
            return;
        }
    };
    redact_payload_headers(&mut value, &config.redact_headers, &config.secret_header_name);

    let rendered = truncate_body(&value.to_string(), config.debug_body_max_bytes);
    debug!(payload = %rendered, "{direction}");
}

/// Logs the MCP fields of a payload at info level.
///
/// Runs whenever debug logging is enabled and MCP context is attached; tool
/// arguments are truncated like bodies.
pub fn log_mcp_context(direction: &str, mcp: &McpContext, config: &PluginConfig) {
    if !config.enable_debug_logging {
        return;
    }

    let arguments = mcp
        .tool_arguments
        .as_ref()
        .map(|args| truncate_body(args.get(), config.debug_body_max_bytes));

    info!(
        traffic_type = "mcp",
        mcp_method = %mcp.method,
        mcp_tool_name = mcp.tool_name.as_deref().unwrap_or(""),
        mcp_resource_uri = mcp.resource_uri.as_deref().unwrap_or(""),
        mcp_prompt_name = mcp.prompt_name.as_deref().unwrap_or(""),
        mcp_tool_arguments = arguments.as_deref().unwrap_or(""),
        "{direction} [MCP]"
    );
}
