//! Sideband HTTP client: pooled transport, retry loop, breaker gating.
//!
//! One client is built per plugin instance and shared by both phases. Every
//! call runs through [`SidebandHttpClient::execute`], which owns the
//! reliability semantics:
//!
//! - attempts = `1 + max_retries`, capped at 1 for MCP methods outside the
//!   configured retryable set;
//! - fixed backoff between attempts;
//! - retry on transport failures and 5xx, never on 4xx;
//! - HTTP 429 is never retried: it trips the breaker immediately with the
//!   provider's `Retry-After`;
//! - retry exhaustion trips the breaker (`server_error` for a final 5xx,
//!   `timeout` for a final transport failure).
//!
//! # Connection Reuse
//!
//! The pool keeps up to 10 idle connections per provider host with the
//! configured keep-alive as idle timeout. HTTP/2 upgrade is disabled; the
//! sideband protocol is HTTP/1.1 regardless of the client's own protocol.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use tracing::{debug, warn};
use url::Url;

use crate::breaker::{CircuitBreaker, CircuitOpenSnapshot, Trigger, DEFAULT_RETRY_AFTER_SECS};
use crate::config::{ConfigError, PluginConfig};
use crate::error::AuthGateError;

/// Idle connections kept per provider host.
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// The two sideband endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandEndpoint {
    /// `POST {base}/sideband/request` (access phase)
    Request,
    /// `POST {base}/sideband/response` (response phase)
    Response,
}

impl SidebandEndpoint {
    fn path(self) -> &'static str {
        match self {
            SidebandEndpoint::Request => "/sideband/request",
            SidebandEndpoint::Response => "/sideband/response",
        }
    }
}

/// A raw provider reply: status, headers, body.
#[derive(Debug)]
pub struct ProviderReply {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body bytes
    pub body: Bytes,
}

/// Resolved provider address, parsed once at plugin construction.
#[derive(Debug, Clone)]
pub struct ProviderUrl {
    scheme: String,
    host: String,
    port: u16,
    base_path: String,
}

impl ProviderUrl {
    /// Parses and normalizes the configured `service_url`.
    ///
    /// Default ports are filled in (80/443) and an empty path becomes `/`,
    /// so endpoint URLs and the `Host` header are always well formed.
    pub fn parse(service_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(service_url).map_err(|e| ConfigError::InvalidServiceUrl {
            details: e.to_string(),
        })?;
        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::InvalidServiceUrl {
                details: format!("scheme must be http or https, got {:?}", url.scheme()),
            });
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidServiceUrl {
                details: "URL must have a host".to_string(),
            })?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        let base_path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            scheme,
            host,
            port,
            base_path,
        })
    }

    /// `host:port` value for the `Host` header.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full URL for a sideband endpoint, with a single `/` between the base
    /// path and the endpoint path.
    pub fn endpoint_url(&self, endpoint: SidebandEndpoint) -> String {
        let base = self.base_path.trim_end_matches('/');
        format!(
            "{}://{}:{}{}{}",
            self.scheme,
            self.host,
            self.port,
            base,
            endpoint.path()
        )
    }
}

/// Pooled HTTP client wrapping retry and circuit-breaker behavior.
#[derive(Debug)]
pub struct SidebandHttpClient {
    client: reqwest::Client,
    breaker: CircuitBreaker,
    provider_url: ProviderUrl,
    config: Arc<PluginConfig>,
}

impl SidebandHttpClient {
    /// Builds the client from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unparseable `service_url` or a
    /// transport stack that fails to initialize.
    pub fn new(config: Arc<PluginConfig>) -> Result<Self, ConfigError> {
        let provider_url = ProviderUrl::parse(&config.service_url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.connection_timeout_ms))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_millis(config.connection_keepalive_ms))
            .tcp_nodelay(true)
            .http1_only()
            .danger_accept_invalid_certs(!config.verify_service_cert)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            breaker: CircuitBreaker::new(config.circuit_breaker_enabled),
            provider_url,
            config,
        })
    }

    /// The breaker, for observability.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// POSTs a JSON body to a sideband endpoint with retries and breaker
    /// gating.
    ///
    /// `mcp_method` caps the attempt count at 1 when the method is outside
    /// the configured retryable set.
    ///
    /// # Errors
    ///
    /// - [`AuthGateError::CircuitOpen`] without a network call while the
    ///   breaker is open, or on an HTTP 429 that just tripped it;
    /// - [`AuthGateError::Transport`] when every attempt failed on the wire;
    /// - otherwise the last reply is returned, including 4xx/5xx statuses
    ///   (typed-error classification is the provider layer's concern).
    pub async fn execute(
        &self,
        endpoint: SidebandEndpoint,
        body: Vec<u8>,
        mcp_method: Option<&str>,
    ) -> Result<ProviderReply, AuthGateError> {
        self.breaker.allow().map_err(AuthGateError::CircuitOpen)?;

        let url = self.provider_url.endpoint_url(endpoint);
        let max_attempts = match mcp_method {
            Some(method) if !self.config.is_mcp_method_retryable(method) => 1,
            _ => 1 + self.config.max_retries as usize,
        };
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        let mut last_transport: Option<AuthGateError> = None;
        let mut last_reply: Option<ProviderReply> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
            }

            match self.do_request(&url, &body).await {
                Err(err) => {
                    debug!(attempt, error = %err, "sideband attempt failed on transport");
                    last_transport = Some(err);
                    last_reply = None;
                }
                Ok(reply) if reply.status == 429 => {
                    let retry_after = parse_retry_after(&reply.headers);
                    warn!(retry_after_secs = retry_after, "provider rate limited the sideband");
                    self.breaker.trip(Trigger::RateLimit, retry_after);
                    if self.breaker.is_enabled() {
                        return Err(AuthGateError::CircuitOpen(CircuitOpenSnapshot {
                            trigger: Trigger::RateLimit,
                            retry_after_secs: retry_after,
                            remaining_ms: retry_after * 1000,
                        }));
                    }
                    return Ok(reply);
                }
                Ok(reply) if reply.status >= 500 => {
                    debug!(attempt, status = reply.status, "sideband attempt got server error");
                    last_transport = None;
                    last_reply = Some(reply);
                }
                Ok(reply) => return Ok(reply),
            }
        }

        // Retries exhausted: trip the breaker and surface the last failure.
        if let Some(reply) = last_reply {
            self.breaker
                .trip(Trigger::ServerError, DEFAULT_RETRY_AFTER_SECS);
            return Ok(reply);
        }

        self.breaker.trip(Trigger::Timeout, DEFAULT_RETRY_AFTER_SECS);
        Err(last_transport.unwrap_or(AuthGateError::Transport {
            reason: "no attempt was made".to_string(),
            timed_out: false,
        }))
    }

    /// One HTTP POST with the sideband protocol headers.
    async fn do_request(&self, url: &str, body: &[u8]) -> Result<ProviderReply, AuthGateError> {
        let response = self
            .client
            .post(url)
            .header(HOST, self.provider_url.host_header())
            .header(CONNECTION, "Keep-Alive")
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .header(USER_AGENT, format!("Kong/{}", crate::VERSION))
            .header(
                self.config.secret_header_name.as_str(),
                self.config.shared_secret.as_str(),
            )
            .body(body.to_vec())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify_transport_error)?;

        Ok(ProviderReply {
            status,
            headers,
            body,
        })
    }
}

/// Classifies a reqwest failure as a transport error, noting timeouts.
fn classify_transport_error(error: reqwest::Error) -> AuthGateError {
    AuthGateError::Transport {
        timed_out: error.is_timeout(),
        reason: error.to_string(),
    }
}

/// Parses `Retry-After` as positive integer seconds, defaulting to 30.
fn parse_retry_after(headers: &HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|&secs| secs > 0)
        .map(|secs| secs as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}
