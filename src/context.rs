//! Phase-spanning per-request context.
//!
//! The access phase records what the response phase needs (the composed
//! access request, the provider's opaque state, and any MCP context) in the
//! host's per-request key-value store. Values are strings; the provider
//! `state` is stored and reloaded as raw JSON text so it is echoed back
//! byte-identically, never round-tripped through typed fields.

use serde_json::value::RawValue;
use tracing::warn;

use crate::gateway::RequestContext;
use crate::mcp::McpContext;
use crate::wire::AccessRequest;

/// Context slot holding the serialized access-phase payload.
pub const KEY_ORIGINAL_REQUEST: &str = "authgate_original_request";
/// Context slot holding the provider's opaque state as raw JSON.
pub const KEY_STATE: &str = "authgate_state";
/// Context slot holding the serialized MCP context.
pub const KEY_MCP_CONTEXT: &str = "authgate_mcp_context";

/// Writes the access-phase results into the per-request context.
///
/// Serialization failures are logged and the slot skipped; the response
/// phase tolerates missing slots.
pub fn store<G: RequestContext + ?Sized>(
    gateway: &mut G,
    original_request: &AccessRequest,
    state: Option<&RawValue>,
) {
    match serde_json::to_string(original_request) {
        Ok(json) => gateway.ctx_set(KEY_ORIGINAL_REQUEST, json),
        Err(e) => warn!(error = %e, "failed to serialize original request for context"),
    }

    if let Some(state) = state {
        gateway.ctx_set(KEY_STATE, state.get().to_string());
    }

    if let Some(mcp) = &original_request.mcp {
        match serde_json::to_string(mcp) {
            Ok(json) => gateway.ctx_set(KEY_MCP_CONTEXT, json),
            Err(e) => warn!(error = %e, "failed to serialize MCP context"),
        }
    }
}

/// Access-phase state reloaded during the response phase.
#[derive(Debug, Default)]
pub struct LoadedContext {
    /// The composed access request, when the slot deserializes
    pub original_request: Option<AccessRequest>,
    /// Raw provider state text, when present
    pub state: Option<String>,
    /// MCP context carried over from access, when present
    pub mcp: Option<McpContext>,
}

/// Reads the access-phase slots back.
///
/// Slots that are absent or fail to deserialize come back as `None`; a
/// request the plugin never saw in access simply yields an empty context.
pub fn load<G: RequestContext + ?Sized>(gateway: &G) -> LoadedContext {
    let original_request = gateway
        .ctx_get(KEY_ORIGINAL_REQUEST)
        .filter(|s| !s.is_empty())
        .and_then(|json| match serde_json::from_str(&json) {
            Ok(req) => Some(req),
            Err(e) => {
                warn!(error = %e, "failed to deserialize original request from context");
                None
            }
        });

    let state = gateway.ctx_get(KEY_STATE).filter(|s| !s.is_empty());

    let mcp = gateway
        .ctx_get(KEY_MCP_CONTEXT)
        .filter(|s| !s.is_empty())
        .and_then(|json| match serde_json::from_str(&json) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(error = %e, "failed to deserialize MCP context from context");
                None
            }
        });

    LoadedContext {
        original_request,
        state,
        mcp,
    }
}
