//! Response phase orchestration.
//!
//! Drives the post-upstream decision: reload the access-phase context,
//! compose the response payload from the buffered upstream reply (reducing
//! SSE bodies to their terminal JSON-RPC message for MCP traffic), call the
//! provider, and replace the client-facing response wholesale with the
//! result. Provider failures follow the same passthrough / fail-open policy
//! as the access phase, except that "fail open" here means forwarding the
//! upstream response unchanged.

use std::time::Instant;

use bytes::Bytes;
use serde_json::value::RawValue;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::{build_forwarded_url, http_version_string, rate_limit_exit};
use crate::breaker::Trigger;
use crate::config::PluginConfig;
use crate::context::{self, LoadedContext};
use crate::error::AuthGateError;
use crate::gateway::{
    ClientExit, ClientRequest, RequestContext, ResponseDecision, ServiceResponse,
};
use crate::headers;
use crate::mcp::{self, McpContext};
use crate::observability;
use crate::plugin::AuthGatePlugin;
use crate::sse;
use crate::wire::{ResponsePayload, ResponseResult, TRAFFIC_TYPE_MCP};

/// Upstream headers kept on the client response even when the provider's
/// header set omits them.
const PRESERVED_RESPONSE_HEADERS: [&str; 4] = ["content-length", "date", "connection", "vary"];

/// Fixed status text mapping for the `response_status` wire field.
pub(crate) fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "BAD REQUEST",
        401 => "UNAUTHORIZED",
        404 => "NOT FOUND",
        413 => "PAYLOAD TOO LARGE",
        429 => "TOO MANY REQUESTS",
        500 => "INTERNAL SERVER ERROR",
        503 => "SERVICE UNAVAILABLE",
        _ => "",
    }
}

/// Runs the response phase. Called by [`AuthGatePlugin::on_response`] inside
/// the panic guard; the skip flag is checked before we get here.
pub(crate) async fn execute<G>(plugin: &AuthGatePlugin, gateway: &mut G) -> ResponseDecision
where
    G: ClientRequest + ServiceResponse + RequestContext + Send,
{
    let correlation_id = Uuid::new_v4();
    let config = &plugin.config;

    let loaded = context::load(gateway);
    let payload = match compose_response_payload(gateway, config, &loaded) {
        Ok(payload) => payload,
        Err(err) => {
            error!(%correlation_id, error = %err, "failed to compose response payload");
            return ResponseDecision::Replace(ClientExit::empty(500));
        }
    };

    observability::debug_log_payload("sending sideband response", &payload, config);
    if let Some(mcp_ctx) = &payload.mcp {
        observability::log_mcp_context("sending sideband response", mcp_ctx, config);
    }

    let started = Instant::now();
    let result = plugin.provider.evaluate_response(&payload).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(result) => {
            observability::debug_log_payload("received sideband response result", &result, config);
            if let Some(metrics) = &plugin.metrics {
                metrics.record_sideband_call("response", "replace", elapsed_ms);
                metrics.record_decision("response", "replace");
            }
            apply_response_result(gateway, &result, correlation_id)
        }
        Err(err) => {
            if let Some(metrics) = &plugin.metrics {
                metrics.record_sideband_call("response", "error", elapsed_ms);
            }
            handle_response_error(plugin, err, &loaded, correlation_id)
        }
    }
}

/// Builds the response-phase sideband payload.
fn compose_response_payload<G>(
    gateway: &G,
    config: &PluginConfig,
    loaded: &LoadedContext,
) -> Result<ResponsePayload, AuthGateError>
where
    G: ClientRequest + ServiceResponse + ?Sized,
{
    let method = gateway.method()?;
    let url = build_forwarded_url(gateway)?;
    let status = gateway.upstream_status()?;
    let upstream_headers = headers::from_table(&gateway.upstream_headers()?)?;
    let body_bytes = gateway.upstream_body()?;

    // MCP: an SSE stream collapses to its final JSON-RPC response event.
    let mut body_slice: &[u8] = &body_bytes;
    if config.enable_mcp {
        if let Some(content_type) = headers::first_value(&upstream_headers, "content-type") {
            body_slice = sse::final_message(&body_bytes, content_type);
        }
    }
    let body = String::from_utf8_lossy(body_slice).into_owned();

    let mut payload = ResponsePayload {
        method,
        url,
        body,
        response_code: status.to_string(),
        response_status: status_text(status).to_string(),
        headers: headers::encode(&upstream_headers),
        http_version: http_version_string(gateway.http_version()?).to_string(),
        state: None,
        request: None,
        traffic_type: None,
        mcp: None,
    };

    // state and request are mutually exclusive; state wins when present.
    match &loaded.state {
        Some(state) => match RawValue::from_string(state.clone()) {
            Ok(raw) => payload.state = Some(raw),
            Err(err) => {
                warn!(error = %err, "stored provider state is not valid JSON, sending original request");
                payload.request = loaded.original_request.clone();
            }
        },
        None => payload.request = loaded.original_request.clone(),
    }

    if config.enable_mcp {
        // A fresh parse of the (possibly SSE-reduced) body wins; otherwise
        // the context carried over from the access phase.
        if let Some(mcp_ctx) = mcp::parse_mcp_request(payload.body.as_bytes()) {
            payload.traffic_type = Some(TRAFFIC_TYPE_MCP.to_string());
            payload.mcp = Some(mcp_ctx);
        } else if let Some(mcp_ctx) = carried_mcp(loaded) {
            payload.traffic_type = Some(TRAFFIC_TYPE_MCP.to_string());
            payload.mcp = Some(mcp_ctx.clone());
        }
    }

    Ok(payload)
}

/// MCP context carried from the access phase, from either context slot.
fn carried_mcp(loaded: &LoadedContext) -> Option<&McpContext> {
    loaded.mcp.as_ref().or_else(|| {
        loaded
            .original_request
            .as_ref()
            .and_then(|request| request.mcp.as_ref())
    })
}

/// Replaces the client-facing response with the provider's result,
/// preserving the exempt upstream headers when the provider omits them.
fn apply_response_result<G>(
    gateway: &G,
    result: &ResponseResult,
    correlation_id: Uuid,
) -> ResponseDecision
where
    G: ServiceResponse + ?Sized,
{
    let status: u16 = result.response_code.parse().unwrap_or(200);
    let mut headers_out = headers::decode(&result.headers);

    if let Ok(table) = gateway.upstream_headers() {
        if let Ok(upstream) = headers::from_table(&table) {
            for name in PRESERVED_RESPONSE_HEADERS {
                if !headers_out.contains_key(name) {
                    if let Some(values) = upstream.get(name) {
                        headers_out.insert(name.to_string(), values.clone());
                    }
                }
            }
        }
    }

    info!(%correlation_id, status, "response phase complete");
    ResponseDecision::Replace(ClientExit {
        status,
        body: Bytes::from(result.body.clone()),
        headers: headers_out,
    })
}

/// Error policy for the response phase.
fn handle_response_error(
    plugin: &AuthGatePlugin,
    err: AuthGateError,
    loaded: &LoadedContext,
    correlation_id: Uuid,
) -> ResponseDecision {
    let config = &plugin.config;

    match err {
        AuthGateError::CircuitOpen(snapshot) => {
            if let Some(metrics) = &plugin.metrics {
                metrics.record_breaker_open(snapshot.trigger);
            }
            debug!(
                %correlation_id,
                trigger = %snapshot.trigger,
                remaining_ms = snapshot.remaining_ms,
                "circuit breaker open during response phase"
            );
            if snapshot.trigger == Trigger::RateLimit {
                return ResponseDecision::Replace(rate_limited_response(
                    config,
                    loaded,
                    &snapshot,
                ));
            }
            if config.fail_open {
                warn!(%correlation_id, "circuit open, fail-open, passing upstream response through");
                return ResponseDecision::Forward;
            }
            ResponseDecision::Replace(unavailable_response(config, loaded))
        }

        AuthGateError::ProviderHttp {
            status,
            body,
            message,
            id,
        } => {
            if config.is_passthrough_code(status) {
                return ResponseDecision::Replace(ClientExit::with_content_type(
                    status,
                    body,
                    "application/json",
                ));
            }
            warn!(%correlation_id, status, %message, %id, "sideband response failed");
            fail_open_or_502(config, correlation_id)
        }

        err if err.is_local() => {
            error!(%correlation_id, error = %err, "local failure in response phase");
            ResponseDecision::Replace(ClientExit::empty(500))
        }

        err => {
            error!(%correlation_id, error = %err, "policy provider unreachable during response phase");
            fail_open_or_502(config, correlation_id)
        }
    }
}

fn fail_open_or_502(config: &PluginConfig, correlation_id: Uuid) -> ResponseDecision {
    if config.fail_open {
        warn!(%correlation_id, "provider unavailable, fail-open, passing upstream response through");
        return ResponseDecision::Forward;
    }
    ResponseDecision::Replace(ClientExit::empty(502))
}

/// The 429 sent while rate limited, JSON-RPC-shaped for MCP traffic when
/// configured.
fn rate_limited_response(
    config: &PluginConfig,
    loaded: &LoadedContext,
    snapshot: &crate::breaker::CircuitOpenSnapshot,
) -> ClientExit {
    if config.mcp_jsonrpc_errors {
        if let Some(mcp_ctx) = carried_mcp(loaded) {
            let secs = snapshot.remaining_secs_ceil();
            let body = mcp::render_deny_body(
                429,
                format!("Service temporarily unavailable. Retry after {secs} seconds."),
                mcp_ctx.jsonrpc_id.clone(),
            );
            let mut exit = ClientExit::with_content_type(429, body, "application/json");
            exit.headers
                .insert("retry-after".to_string(), vec![secs.to_string()]);
            return exit;
        }
    }
    rate_limit_exit(snapshot)
}

/// The fail-closed 502 for breaker trips, JSON-RPC-shaped for MCP traffic
/// when configured.
fn unavailable_response(config: &PluginConfig, loaded: &LoadedContext) -> ClientExit {
    if config.mcp_jsonrpc_errors {
        if let Some(mcp_ctx) = carried_mcp(loaded) {
            let body = mcp::render_deny_body(
                502,
                "Service temporarily unavailable.",
                mcp_ctx.jsonrpc_id.clone(),
            );
            return ClientExit::with_content_type(502, body, "application/json");
        }
    }
    ClientExit::empty(502)
}
