//! Access phase orchestration.
//!
//! Drives the pre-upstream decision: compose the sideband payload from the
//! client request, call the policy provider through the reliability layer,
//! then either apply the allow decision's modifications to the outgoing
//! request or short-circuit with the denial. The composed payload and the
//! provider's opaque state are persisted into the per-request context for
//! the response phase.
//!
//! Error policy: composition failures answer 400 and never fail open;
//! provider failures consult the passthrough set, then `fail_open`; a
//! rate-limit circuit trip always answers 429 so clients back off.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::breaker::Trigger;
use crate::config::PluginConfig;
use crate::context;
use crate::error::AuthGateError;
use crate::gateway::{
    AccessDecision, ClientCertDecoder, ClientExit, ClientRequest, RequestContext, RequestEditor,
};
use crate::headers;
use crate::mcp;
use crate::observability;
use crate::plugin::AuthGatePlugin;
use crate::wire::{AccessRequest, AccessResponse, DenyResponse, TRAFFIC_TYPE_MCP};

/// Query reconstruction stops after this many argument slots.
pub(crate) const MAX_QUERY_ARGS: usize = 100;

/// Runs the access phase. Called by [`AuthGatePlugin::on_access`] inside the
/// panic guard.
pub(crate) async fn execute<G>(plugin: &AuthGatePlugin, gateway: &mut G) -> AccessDecision
where
    G: ClientRequest + RequestEditor + RequestContext + Send,
{
    let correlation_id = Uuid::new_v4();
    let config = &plugin.config;

    let payload = match compose_access_payload(gateway, config, plugin.cert_decoder.as_deref()) {
        Ok(payload) => payload,
        Err(err) => {
            error!(%correlation_id, error = %err, "failed to compose access payload");
            return AccessDecision::ShortCircuit(ClientExit::empty(400));
        }
    };

    observability::debug_log_payload("sending sideband request", &payload, config);
    if let Some(mcp_ctx) = &payload.mcp {
        observability::log_mcp_context("sending sideband request", mcp_ctx, config);
        if let Some(metrics) = &plugin.metrics {
            metrics.record_mcp_request(&mcp_ctx.method, mcp_ctx.tool_name.as_deref());
        }
    }

    let started = Instant::now();
    let result = plugin.provider.evaluate_request(&payload).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            if let Some(metrics) = &plugin.metrics {
                metrics.record_sideband_call("access", "error", elapsed_ms);
            }
            return handle_access_error(plugin, gateway, err, &payload, correlation_id);
        }
    };

    observability::debug_log_payload("received sideband response", &response, config);

    if let Some(deny) = &response.response {
        if let Some(metrics) = &plugin.metrics {
            metrics.record_sideband_call("access", "deny", elapsed_ms);
            metrics.record_decision("access", "deny");
            if let Some(mcp_ctx) = &payload.mcp {
                metrics.record_mcp_denied(&mcp_ctx.method);
            }
        }
        return AccessDecision::ShortCircuit(deny_exit(config, &payload, deny, correlation_id));
    }

    if let Some(metrics) = &plugin.metrics {
        metrics.record_sideband_call("access", "allow", elapsed_ms);
        metrics.record_decision("access", "allow");
    }

    apply_allow_decision(gateway, config, &payload, &response);
    context::store(gateway, &payload, response.state.as_deref());
    AccessDecision::Continue
}

/// Builds the access-phase sideband payload from the gateway state.
pub(crate) fn compose_access_payload<G: ClientRequest + ?Sized>(
    gateway: &G,
    config: &PluginConfig,
    cert_decoder: Option<&dyn ClientCertDecoder>,
) -> Result<AccessRequest, AuthGateError> {
    let source_ip = gateway.client_ip()?;
    let source_port = gateway.client_port()?.to_string();
    let method = gateway.method()?;
    let url = build_forwarded_url(gateway)?;
    let body = gateway.raw_body()?;
    let header_multimap = headers::from_table(&gateway.headers()?)?;
    let http_version = http_version_string(gateway.http_version()?).to_string();

    let mut request = AccessRequest {
        source_ip,
        source_port,
        method,
        url,
        body: String::from_utf8_lossy(&body).into_owned(),
        headers: headers::encode(&header_multimap),
        http_version,
        client_certificate: None,
        traffic_type: None,
        mcp: None,
        extracted_headers: None,
    };

    // Client certificate is best-effort: no decoder or no PEM skips
    // silently, but a PEM that fails to decode is a hard 400.
    if let Some(decoder) = cert_decoder {
        if let Some(pem) = gateway.client_cert_pem().filter(|p| !p.is_empty()) {
            let jwk = decoder
                .decode(&pem, config.include_full_cert_chain)
                .map_err(|e| AuthGateError::Composition {
                    details: e.to_string(),
                })?;
            request.client_certificate = Some(jwk);
        }
    }

    if config.enable_mcp {
        if let Some(mcp_ctx) = mcp::parse_mcp_request(&body) {
            request.traffic_type = Some(TRAFFIC_TYPE_MCP.to_string());
            if !config.mcp_extract_headers.is_empty() {
                let mut extracted = HashMap::new();
                for name in &config.mcp_extract_headers {
                    let lower = name.to_ascii_lowercase();
                    if let Some(value) = headers::first_value(&header_multimap, &lower) {
                        extracted.insert(lower, value.to_string());
                    }
                }
                if !extracted.is_empty() {
                    request.extracted_headers = Some(extracted);
                }
            }
            request.mcp = Some(mcp_ctx);
        }
    }

    enforce_sideband_size_limit(&mut request, config)?;
    Ok(request)
}

/// Truncates the `body` field when the serialized payload exceeds the
/// configured limit. MCP context and headers are never dropped.
fn enforce_sideband_size_limit(
    request: &mut AccessRequest,
    config: &PluginConfig,
) -> Result<(), AuthGateError> {
    if config.max_sideband_body_bytes == 0 {
        return Ok(());
    }
    let serialized = serde_json::to_vec(request).map_err(|e| AuthGateError::Composition {
        details: format!("failed to size access payload: {e}"),
    })?;
    if serialized.len() > config.max_sideband_body_bytes {
        let keep = config.max_sideband_body_bytes / 2;
        info!(
            payload_bytes = serialized.len(),
            limit = config.max_sideband_body_bytes,
            "sideband payload over limit, truncating body field"
        );
        request.body = observability::truncate_body(&request.body, keep);
    }
    Ok(())
}

/// Reconstructs the full forwarded URL: `scheme://host:port/path[?query]`.
pub(crate) fn build_forwarded_url<G: ClientRequest + ?Sized>(
    gateway: &G,
) -> Result<String, AuthGateError> {
    let scheme = gateway.forwarded_scheme()?;
    let host = gateway.forwarded_host()?;
    let port = gateway.forwarded_port()?;
    let path = gateway.path()?;
    let mut url = format!("{scheme}://{host}:{port}{path}");

    let raw_query = gateway.raw_query()?;
    if !raw_query.is_empty() {
        let query = rebuild_query(&raw_query);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
    }
    Ok(url)
}

/// Decodes and re-encodes a query string, keeping at most
/// [`MAX_QUERY_ARGS`] argument slots in encounter order. An unparseable
/// query (invalid percent escape) is passed through verbatim.
pub(crate) fn rebuild_query(raw: &str) -> String {
    if !query_is_parseable(raw) {
        return raw.to_string();
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (slot, (key, value)) in url::form_urlencoded::parse(raw.as_bytes()).enumerate() {
        if slot >= MAX_QUERY_ARGS {
            break;
        }
        serializer.append_pair(&key, &value);
    }
    serializer.finish()
}

/// A query parses iff every `%` begins a valid two-hex-digit escape.
fn query_is_parseable(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// Maps the negotiated HTTP version to its wire string.
pub(crate) fn http_version_string(version: http::Version) -> &'static str {
    if version == http::Version::HTTP_09 {
        "0.9"
    } else if version == http::Version::HTTP_10 {
        "1.0"
    } else if version == http::Version::HTTP_2 {
        "2"
    } else if version == http::Version::HTTP_3 {
        "3"
    } else {
        "1.1"
    }
}

/// Applies an allow decision's modifications to the outgoing request.
fn apply_allow_decision<G: ClientRequest + RequestEditor + ?Sized>(
    gateway: &mut G,
    config: &PluginConfig,
    payload: &AccessRequest,
    response: &AccessResponse,
) {
    // Header diff: both sides lowercased, value lists compared in order.
    let current = match gateway
        .headers()
        .map_err(AuthGateError::from)
        .and_then(|table| headers::from_table(&table))
    {
        Ok(current) => current,
        Err(err) => {
            warn!(error = %err, "failed to read current headers for diffing");
            return;
        }
    };
    let replacement = headers::decode(&response.headers);

    for name in current.keys() {
        if !replacement.contains_key(name) {
            gateway.clear_header(name);
        }
    }
    for (name, values) in &replacement {
        if current.get(name) != Some(values) {
            gateway.set_header(name, &values[0]);
            for value in &values[1..] {
                gateway.add_header(name, value);
            }
        }
    }

    if config.strip_accept_encoding {
        gateway.clear_header("accept-encoding");
    }

    if !response.method.is_empty() && response.method != payload.method {
        gateway.set_method(&response.method);
    }

    if !response.url.is_empty() && response.url != payload.url {
        apply_url_change(gateway, &response.url, &payload.url);
    }

    if let Some(new_body) = &response.body {
        if *new_body != payload.body {
            if config.enable_mcp
                && payload.mcp.is_some()
                && !mcp::is_jsonrpc_2_0(new_body.as_bytes())
            {
                warn!("provider body replacement for MCP traffic is not JSON-RPC 2.0, installing anyway");
            }
            gateway.set_raw_body(new_body);
        }
    }
}

/// Applies a provider URL change: host/port move to the `Host` header, path
/// and query are rewritten, a scheme change is logged and ignored.
fn apply_url_change<G: RequestEditor + ?Sized>(gateway: &mut G, new_url: &str, current_url: &str) {
    let new_parsed = match Url::parse(new_url) {
        Ok(url) => url,
        Err(err) => {
            warn!(url = new_url, error = %err, "failed to parse provider URL");
            return;
        }
    };
    let current_parsed = match Url::parse(current_url) {
        Ok(url) => url,
        Err(err) => {
            warn!(url = current_url, error = %err, "failed to parse current URL");
            return;
        }
    };

    if new_parsed.scheme() != current_parsed.scheme() {
        warn!(
            from = current_parsed.scheme(),
            to = new_parsed.scheme(),
            "scheme change not supported, ignoring"
        );
    }

    let new_authority = authority(&new_parsed);
    if new_authority != authority(&current_parsed) {
        gateway.set_header("host", &new_authority);
    }

    if new_parsed.path() != current_parsed.path() {
        gateway.set_path(new_parsed.path());
    }

    if new_parsed.query() != current_parsed.query() {
        gateway.set_raw_query(new_parsed.query().unwrap_or(""));
    }
}

/// `host[:port]` with default ports normalized away.
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Builds the short-circuit exit for a denial, JSON-RPC-shaped for MCP
/// traffic when configured.
fn deny_exit(
    config: &PluginConfig,
    payload: &AccessRequest,
    deny: &DenyResponse,
    correlation_id: Uuid,
) -> ClientExit {
    let status: u16 = deny.response_code.parse().unwrap_or(403);
    info!(%correlation_id, status, "request denied by policy provider");

    if config.mcp_jsonrpc_errors {
        if let Some(mcp_ctx) = &payload.mcp {
            let body =
                mcp::render_deny_body(status, deny.body.clone(), mcp_ctx.jsonrpc_id.clone());
            return ClientExit::with_content_type(status, body, "application/json");
        }
    }

    ClientExit {
        status,
        body: Bytes::from(deny.body.clone()),
        headers: headers::decode(&deny.headers),
    }
}

/// The 429 answered to clients while the breaker is open on a rate-limit
/// trigger. `Retry-After` is the remaining open time, rounded up.
pub(crate) fn rate_limit_exit(snapshot: &crate::breaker::CircuitOpenSnapshot) -> ClientExit {
    let secs = snapshot.remaining_secs_ceil();
    let body = format!(
        "{{\"code\":\"LIMIT_EXCEEDED\",\"message\":\"The request exceeded the allowed rate limit. Please try after {secs} second.\"}}"
    );
    let mut exit = ClientExit::with_content_type(429, body, "application/json");
    exit.headers
        .insert("retry-after".to_string(), vec![secs.to_string()]);
    exit
}

/// Error policy for the access phase.
fn handle_access_error<G>(
    plugin: &AuthGatePlugin,
    gateway: &mut G,
    err: AuthGateError,
    payload: &AccessRequest,
    correlation_id: Uuid,
) -> AccessDecision
where
    G: ClientRequest + RequestEditor + RequestContext + Send,
{
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
                "circuit breaker open"
            );
            if snapshot.trigger == Trigger::RateLimit {
                return AccessDecision::ShortCircuit(rate_limit_exit(&snapshot));
            }
            if config.fail_open {
                warn!(%correlation_id, "circuit open, fail-open enabled, allowing request");
                context::store(gateway, payload, None);
                return AccessDecision::Continue;
            }
            AccessDecision::ShortCircuit(ClientExit::empty(502))
        }

        AuthGateError::ProviderHttp {
            status,
            body,
            message,
            id,
        } => {
            if config.is_passthrough_code(status) {
                return AccessDecision::ShortCircuit(ClientExit::with_content_type(
                    status,
                    body,
                    "application/json",
                ));
            }
            warn!(%correlation_id, status, %message, %id, "sideband request failed");
            fail_open_or_502(plugin, gateway, payload, correlation_id)
        }

        err if err.is_local() => {
            error!(%correlation_id, error = %err, "local failure in access phase");
            AccessDecision::ShortCircuit(ClientExit::empty(500))
        }

        err => {
            error!(%correlation_id, error = %err, "policy provider unreachable");
            fail_open_or_502(plugin, gateway, payload, correlation_id)
        }
    }
}

/// The fail-open/fail-closed fork shared by reliability failures.
fn fail_open_or_502<G>(
    plugin: &AuthGatePlugin,
    gateway: &mut G,
    payload: &AccessRequest,
    correlation_id: Uuid,
) -> AccessDecision
where
    G: ClientRequest + RequestEditor + RequestContext + Send,
{
    if plugin.config.fail_open {
        warn!(%correlation_id, "provider unavailable, fail-open enabled, allowing request");
        context::store(gateway, payload, None);
        return AccessDecision::Continue;
    }
    AccessDecision::ShortCircuit(ClientExit::empty(502))
}
