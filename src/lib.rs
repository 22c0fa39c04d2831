//! AuthGate - gateway-embedded authorization sidecar.
//!
//! AuthGate is an interception plugin for API gateways. For every client
//! request the host gateway calls two entry points:
//!
//! - **Access phase** ([`AuthGatePlugin::on_access`]): before the request
//!   reaches the upstream, the client request is relayed to an external
//!   policy provider which may allow it (optionally mutating headers, method,
//!   URL, or body) or deny it outright.
//! - **Response phase** ([`AuthGatePlugin::on_response`]): after the upstream
//!   replies, the upstream response is relayed for a final decision; the
//!   provider's result replaces the client-facing response wholesale.
//!
//! The host gateway is abstracted behind the façade traits in [`gateway`];
//! AuthGate never owns a listener or touches the wire itself.
//!
//! # MCP Traffic
//!
//! When enabled, JSON-RPC 2.0 bodies carrying recognized MCP methods
//! (`tools/call`, `resources/read`, …) are detected and the sideband payload
//! is enriched with the extracted context. Denials can be rendered as
//! JSON-RPC error responses, and `text/event-stream` upstream bodies are
//! reduced to their terminal JSON-RPC message before evaluation.
//!
//! # Reliability
//!
//! Every sideband call goes through a retry loop with MCP-method-aware
//! idempotency and a per-instance circuit breaker. Provider unreachability
//! follows the configured fail-open/fail-closed policy; rate limiting by the
//! provider is propagated to clients as `429` with `Retry-After`.

pub mod access;
pub mod breaker;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod mcp;
pub mod metrics;
pub mod observability;
pub mod plugin;
pub mod provider;
pub mod response;
pub mod sse;
pub mod wire;

pub use config::PluginConfig;
pub use error::AuthGateError;
pub use gateway::{
    AccessDecision, ClientCertDecoder, ClientExit, ClientRequest, GatewayError, RequestContext,
    RequestEditor, ResponseDecision, ServiceResponse,
};
pub use plugin::AuthGatePlugin;
pub use provider::PolicyProvider;

/// Plugin version reported in the sideband `User-Agent` header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
