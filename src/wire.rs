//! Sideband wire payloads.
//!
//! These structs mirror the policy provider's JSON schema field for field.
//! Opaque fragments (the provider `state`, JSON-RPC ids, and tool arguments)
//! are carried as [`RawValue`] so their bytes round-trip untouched; they
//! are never re-parsed into a typed tree and re-marshaled.
//!
//! The allow/deny axis of [`AccessResponse`] is discriminated by the
//! presence of the `response` field: present means deny, absent means allow
//! (possibly with modifications). "Allow with zero modifications" and "deny"
//! are therefore never conflated.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::headers::WireHeaders;
use crate::mcp::McpContext;

/// Traffic type marker attached to payloads carrying MCP context.
pub const TRAFFIC_TYPE_MCP: &str = "mcp";

/// Payload sent to `POST {base}/sideband/request` during the access phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Client source IP
    pub source_ip: String,
    /// Client source port, as a string per the wire schema
    pub source_port: String,
    /// HTTP method
    pub method: String,
    /// Full forwarded URL: `scheme://host:port/path[?query]`
    pub url: String,
    /// Raw request body (may be empty)
    pub body: String,
    /// Request headers in wire-array form
    pub headers: WireHeaders,
    /// HTTP version string: "1.1", "2", …
    pub http_version: String,
    /// Client certificate public key, when one was presented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<Jwk>,
    /// `"mcp"` when MCP traffic was detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_type: Option<String>,
    /// Extracted MCP context, when detected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpContext>,
    /// Configured header extractions for MCP traffic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_headers: Option<std::collections::HashMap<String, String>>,
}

/// Reply from `POST {base}/sideband/request`.
///
/// `response` present ⇔ the request is denied. Otherwise the request is
/// allowed and the echoed fields may carry modifications; `state` is an
/// opaque fragment echoed back verbatim in the response phase.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    /// Echoed (possibly modified) source IP; modifications here are ignored
    #[serde(default)]
    pub source_ip: String,
    /// Echoed source port; modifications here are ignored
    #[serde(default)]
    pub source_port: String,
    /// Possibly modified method
    #[serde(default)]
    pub method: String,
    /// Possibly modified URL
    #[serde(default)]
    pub url: String,
    /// Possibly modified body; absent means "leave the body alone"
    #[serde(default)]
    pub body: Option<String>,
    /// Possibly modified headers in wire-array form
    #[serde(default)]
    pub headers: WireHeaders,
    /// Opaque provider state, echoed back during the response phase
    #[serde(default)]
    pub state: Option<Box<RawValue>>,
    /// Deny decision; absence means allow
    #[serde(default)]
    pub response: Option<DenyResponse>,
}

/// A denial decision from the policy provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyResponse {
    /// HTTP status to return, as a string
    pub response_code: String,
    /// Status text, informational only
    #[serde(default)]
    pub response_status: String,
    /// Response body to return
    #[serde(default)]
    pub body: String,
    /// Response headers in wire-array form
    #[serde(default)]
    pub headers: WireHeaders,
}

/// Payload sent to `POST {base}/sideband/response` during the response phase.
///
/// Exactly one of `state` and `request` is attached: the provider either gets
/// its own opaque state back, or the original access-phase request.
#[derive(Debug, Serialize)]
pub struct ResponsePayload {
    /// HTTP method of the original request
    pub method: String,
    /// Forwarded URL of the original request
    pub url: String,
    /// Upstream response body (after SSE reduction for MCP traffic)
    pub body: String,
    /// Upstream status code, as a string per the wire schema
    pub response_code: String,
    /// Upstream status text (fixed mapping, empty when unknown)
    pub response_status: String,
    /// Upstream response headers in wire-array form
    pub headers: WireHeaders,
    /// HTTP version string
    pub http_version: String,
    /// Opaque state from the access phase, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<RawValue>>,
    /// Original access request, when no state was issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AccessRequest>,
    /// `"mcp"` when MCP context is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_type: Option<String>,
    /// MCP context, fresh-parsed or carried from the access phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpContext>,
}

/// Reply from `POST {base}/sideband/response`.
///
/// Replaces the client-facing response wholesale when accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseResult {
    /// HTTP status to return, as a string
    pub response_code: String,
    /// Response body to return
    #[serde(default)]
    pub body: String,
    /// Response headers in wire-array form
    #[serde(default)]
    pub headers: WireHeaders,
    /// Diagnostic message, tolerated on the wire
    #[serde(default)]
    pub message: String,
    /// Diagnostic id, tolerated on the wire
    #[serde(default)]
    pub id: String,
}

/// Error body shape on non-2xx provider replies: `{message, id}`.
#[derive(Debug, Default, Deserialize)]
pub struct ProviderErrorBody {
    /// Human-readable provider message
    #[serde(default)]
    pub message: String,
    /// Provider-side correlation id
    #[serde(default)]
    pub id: String,
}

/// JSON Web Key for the client certificate public key.
///
/// Produced by the external PEM→JWK collaborator; AuthGate only relays it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type: "RSA", "EC", or "OKP"
    pub kty: String,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve name / "Ed25519"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x-coordinate / Ed25519 public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y-coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Certificate chain as base64 DER (standard alphabet per RFC 7517 §4.7)
    pub x5c: Vec<String>,
}
