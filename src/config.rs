//! Plugin configuration.
//!
//! The host gateway creates one [`PluginConfig`] per plugin instance,
//! typically by deserializing the operator-supplied JSON. The struct is
//! immutable after [`PluginConfig::validate`] passes; everything derived from
//! it (HTTP client, circuit breaker, parsed provider URL) is built once at
//! plugin construction.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::mcp;

/// Configuration validation failure.
///
/// Produced by [`PluginConfig::validate`] before a plugin instance is built;
/// none of these can occur at request time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required string field is empty.
    #[error("{field} is required")]
    MissingField {
        /// Name of the missing field
        field: &'static str,
    },

    /// `service_url` failed to parse or has an unusable shape.
    #[error("service_url is invalid: {details}")]
    InvalidServiceUrl {
        /// What made the URL unusable
        details: String,
    },

    /// A numeric field is outside its allowed range.
    #[error("{field} {constraint}, got {value}")]
    OutOfRange {
        /// Name of the offending field
        field: &'static str,
        /// Human-readable constraint (e.g. "must be > 0")
        constraint: &'static str,
        /// The rejected value
        value: i64,
    },

    /// An entry of `mcp_retry_methods` is not a recognized MCP method.
    #[error("mcp_retry_methods contains unrecognized method {method:?}")]
    UnknownMcpMethod {
        /// The rejected method name
        method: String,
    },

    /// The outbound HTTP client could not be constructed.
    #[error("failed to build sideband HTTP client: {details}")]
    HttpClient {
        /// Builder error text
        details: String,
    },
}

/// Immutable per-instance plugin configuration.
///
/// Field names match the operator-facing JSON schema. Defaults mirror the
/// values the gateway's schema layer would apply, so a config deserialized
/// from a partial document is immediately usable.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    /// Base URL of the policy provider (http or https).
    pub service_url: String,
    /// Shared secret sent on every sideband call.
    pub shared_secret: String,
    /// Header name carrying the shared secret.
    pub secret_header_name: String,

    /// Combined connect+read+write deadline per sideband attempt.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Idle keep-alive duration for pooled provider connections.
    #[serde(default = "default_connection_keepalive_ms")]
    pub connection_keepalive_ms: u64,
    /// Verify the provider's TLS certificate.
    #[serde(default = "default_true")]
    pub verify_service_cert: bool,

    /// Skip the response phase entirely.
    #[serde(default)]
    pub skip_response_phase: bool,

    /// Allow traffic through when the provider is unreachable.
    #[serde(default)]
    pub fail_open: bool,
    /// Provider HTTP statuses forwarded verbatim to the client.
    #[serde(default = "default_passthrough_status_codes")]
    pub passthrough_status_codes: Vec<u16>,

    /// Additional attempts after the first failed sideband call.
    #[serde(default)]
    pub max_retries: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Enable the per-instance circuit breaker.
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,

    /// Unconditionally drop `Accept-Encoding` from the upstream request.
    #[serde(default = "default_true")]
    pub strip_accept_encoding: bool,

    /// Include the full certificate chain in the JWK `x5c`, not just the leaf.
    #[serde(default)]
    pub include_full_cert_chain: bool,

    /// Recognize MCP JSON-RPC traffic and enrich sideband payloads.
    #[serde(default = "default_true")]
    pub enable_mcp: bool,
    /// Render denials of MCP traffic as JSON-RPC error responses.
    #[serde(default = "default_true")]
    pub mcp_jsonrpc_errors: bool,
    /// Maximum serialized sideband payload size before the `body` field is
    /// truncated. 0 = unlimited.
    #[serde(default)]
    pub max_sideband_body_bytes: usize,
    /// Header names copied into `extracted_headers` for MCP traffic.
    #[serde(default)]
    pub mcp_extract_headers: Vec<String>,
    /// MCP methods safe to retry. Anything else gets exactly one attempt.
    #[serde(default = "default_mcp_retry_methods")]
    pub mcp_retry_methods: Vec<String>,

    /// Log sideband payloads (redacted, truncated) at debug level.
    #[serde(default)]
    pub enable_debug_logging: bool,
    /// Header names whose values are redacted from debug logs. The secret
    /// header is always redacted.
    #[serde(default = "default_redact_headers")]
    pub redact_headers: Vec<String>,
    /// Truncation limit for bodies in debug logs. 0 = unlimited.
    #[serde(default = "default_debug_body_max_bytes")]
    pub debug_body_max_bytes: usize,
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_connection_keepalive_ms() -> u64 {
    60_000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_passthrough_status_codes() -> Vec<u16> {
    vec![413]
}

fn default_mcp_retry_methods() -> Vec<String> {
    // Read-style methods are idempotent against the provider; tools/call is
    // deliberately absent because replaying it can double-execute a tool.
    [
        "initialize",
        "tools/list",
        "resources/list",
        "resources/read",
        "prompts/list",
        "prompts/get",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_redact_headers() -> Vec<String> {
    vec!["authorization".to_string(), "cookie".to_string()]
}

fn default_debug_body_max_bytes() -> usize {
    8192
}

fn default_true() -> bool {
    true
}

impl PluginConfig {
    /// Minimal config for a provider at `service_url`, defaults elsewhere.
    ///
    /// Primarily a test convenience; production configs come from the host's
    /// deserialization path.
    pub fn for_service_url(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            shared_secret: "secret".to_string(),
            secret_header_name: "x-sideband-secret".to_string(),
            connection_timeout_ms: default_connection_timeout_ms(),
            connection_keepalive_ms: default_connection_keepalive_ms(),
            verify_service_cert: true,
            skip_response_phase: false,
            fail_open: false,
            passthrough_status_codes: default_passthrough_status_codes(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            circuit_breaker_enabled: true,
            strip_accept_encoding: true,
            include_full_cert_chain: false,
            enable_mcp: true,
            mcp_jsonrpc_errors: true,
            max_sideband_body_bytes: 0,
            mcp_extract_headers: Vec::new(),
            mcp_retry_methods: default_mcp_retry_methods(),
            enable_debug_logging: false,
            redact_headers: default_redact_headers(),
            debug_body_max_bytes: default_debug_body_max_bytes(),
        }
    }

    /// Validates constraints the serde layer cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint: URL scheme/host shape, empty
    /// secrets, non-positive timeouts/backoff, passthrough codes outside
    /// 400..=599, or unrecognized MCP retry methods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "service_url",
            });
        }
        let url = Url::parse(&self.service_url).map_err(|e| ConfigError::InvalidServiceUrl {
            details: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::InvalidServiceUrl {
                    details: format!("scheme must be http or https, got {other:?}"),
                });
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidServiceUrl {
                details: "URL must have a host".to_string(),
            });
        }

        if self.shared_secret.is_empty() {
            return Err(ConfigError::MissingField {
                field: "shared_secret",
            });
        }
        if self.secret_header_name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "secret_header_name",
            });
        }

        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "connection_timeout_ms",
                constraint: "must be > 0",
                value: 0,
            });
        }
        if self.connection_keepalive_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "connection_keepalive_ms",
                constraint: "must be > 0",
                value: 0,
            });
        }
        if self.retry_backoff_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "retry_backoff_ms",
                constraint: "must be > 0",
                value: 0,
            });
        }

        for &code in &self.passthrough_status_codes {
            if !(400..=599).contains(&code) {
                return Err(ConfigError::OutOfRange {
                    field: "passthrough_status_codes",
                    constraint: "must be in range 400-599",
                    value: i64::from(code),
                });
            }
        }

        for method in &self.mcp_retry_methods {
            if !mcp::is_mcp_method(method) {
                return Err(ConfigError::UnknownMcpMethod {
                    method: method.clone(),
                });
            }
        }

        Ok(())
    }

    /// Whether a provider HTTP status is forwarded verbatim to the client.
    pub fn is_passthrough_code(&self, status: u16) -> bool {
        self.passthrough_status_codes.contains(&status)
    }

    /// Whether a sideband call for this MCP method may be retried.
    pub fn is_mcp_method_retryable(&self, method: &str) -> bool {
        self.mcp_retry_methods.iter().any(|m| m == method)
    }
}
