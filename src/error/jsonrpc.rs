//! JSON-RPC 2.0 error body structures.
//!
//! These are the wire shapes used when a policy denial (or a reliability
//! failure) is rendered to an MCP client as a JSON-RPC error response
//! instead of a bare HTTP error.

use serde::Serialize;
use serde_json::value::RawValue;

/// JSON-RPC 2.0 error response body.
///
/// The `id` is the raw fragment captured from the originating request so
/// integer and string forms are echoed byte-identically; `None` serializes
/// as `null`, which is what a client that never got an id assigned expects.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorBody {
    /// Always "2.0"
    pub jsonrpc: &'static str,
    /// Raw request id, or `null` when the request had none
    pub id: Option<Box<RawValue>>,
    /// The error object
    pub error: JsonRpcErrorDetail,
}

/// Code and message of a JSON-RPC error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorDetail {
    /// JSON-RPC error code (standard or implementation-defined)
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl JsonRpcErrorBody {
    /// Builds an error body echoing the given raw id.
    pub fn new(code: i32, message: impl Into<String>, id: Option<Box<RawValue>>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error: JsonRpcErrorDetail {
                code,
                message: message.into(),
            },
        }
    }
}
