//! Host gateway façade.
//!
//! AuthGate is embedded in a gateway runtime it does not own. Everything the
//! plugin needs from the host (request state, request mutation, the
//! buffered upstream response, and the per-request key-value context) is
//! expressed as the traits in this module, and everything the plugin decides
//! comes back as an [`AccessDecision`] or [`ResponseDecision`] for the host
//! to apply.
//!
//! The traits are synchronous: gateways hand plugins fully buffered request
//! and response state, so there is nothing to await here. The only
//! suspension points in the plugin are the outbound sideband call and its
//! retry backoff.

use bytes::Bytes;
use thiserror::Error;

use crate::headers::{HeaderMultiMap, HeaderTable};
use crate::wire::Jwk;

/// A host façade call failed.
///
/// Getter failures are treated as composition failures: the payload cannot
/// be built, so the phase fails closed regardless of `fail_open`.
#[derive(Debug, Error)]
#[error("gateway facade error: {0}")]
pub struct GatewayError(pub String);

impl GatewayError {
    /// Convenience constructor from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Read access to the buffered client request.
///
/// Implemented by the host for both phases; the response phase reuses the
/// request's method and URL in its payload.
pub trait ClientRequest {
    /// Client source IP.
    fn client_ip(&self) -> Result<String, GatewayError>;
    /// Client source port.
    fn client_port(&self) -> Result<u16, GatewayError>;
    /// HTTP method.
    fn method(&self) -> Result<String, GatewayError>;
    /// Forwarded scheme (`X-Forwarded-Proto` resolved by the host).
    fn forwarded_scheme(&self) -> Result<String, GatewayError>;
    /// Forwarded host.
    fn forwarded_host(&self) -> Result<String, GatewayError>;
    /// Forwarded port.
    fn forwarded_port(&self) -> Result<u16, GatewayError>;
    /// Request path (no query string).
    fn path(&self) -> Result<String, GatewayError>;
    /// Raw query string (no leading `?`), empty when absent.
    fn raw_query(&self) -> Result<String, GatewayError>;
    /// Buffered request body, empty when absent.
    fn raw_body(&self) -> Result<Bytes, GatewayError>;
    /// Request headers as the host exposes them: string or array-of-string
    /// values per name.
    fn headers(&self) -> Result<HeaderTable, GatewayError>;
    /// Negotiated HTTP version.
    fn http_version(&self) -> Result<http::Version, GatewayError>;
    /// PEM of the client certificate chain, when one was presented.
    ///
    /// `None` both when no certificate was presented and when the host
    /// cannot expose it; extraction is strictly best-effort.
    fn client_cert_pem(&self) -> Option<String>;
}

/// Mutation of the request about to be sent upstream.
///
/// Mutations are fire-and-forget, matching gateway PDKs: a host that cannot
/// apply one logs it on its side.
pub trait RequestEditor {
    /// Replaces a header with a single value.
    fn set_header(&mut self, name: &str, value: &str);
    /// Appends an additional value to a header.
    fn add_header(&mut self, name: &str, value: &str);
    /// Removes a header entirely.
    fn clear_header(&mut self, name: &str);
    /// Replaces the HTTP method.
    fn set_method(&mut self, method: &str);
    /// Replaces the request path.
    fn set_path(&mut self, path: &str);
    /// Replaces the raw query string (no leading `?`).
    fn set_raw_query(&mut self, query: &str);
    /// Replaces the request body.
    fn set_raw_body(&mut self, body: &str);
}

/// Read access to the buffered upstream response (response phase only).
pub trait ServiceResponse {
    /// Upstream status code.
    fn upstream_status(&self) -> Result<u16, GatewayError>;
    /// Upstream response headers.
    fn upstream_headers(&self) -> Result<HeaderTable, GatewayError>;
    /// Buffered upstream response body.
    fn upstream_body(&self) -> Result<Bytes, GatewayError>;
}

/// Per-request key-value context spanning both phases.
///
/// Values written during access must be readable during response for the
/// same request; no durability beyond the request is required.
pub trait RequestContext {
    /// Stores a string value under a key.
    fn ctx_set(&mut self, key: &str, value: String);
    /// Reads a previously stored value.
    fn ctx_get(&self, key: &str) -> Option<String>;
}

/// External PEM→JWK collaborator for client certificates.
///
/// Certificate chain parsing is outside the plugin; hosts that want
/// `client_certificate` on the wire install a decoder.
pub trait ClientCertDecoder: Send + Sync {
    /// Converts a PEM chain into the leaf public key JWK.
    ///
    /// `include_full_chain` selects whether `x5c` carries the whole chain or
    /// only the leaf.
    ///
    /// # Errors
    ///
    /// A decode failure is a composition failure; the access phase answers
    /// 400.
    fn decode(&self, pem: &str, include_full_chain: bool) -> Result<Jwk, CertDecodeError>;
}

/// A certificate chain failed to decode.
#[derive(Debug, Error)]
#[error("failed to extract client certificate JWK: {0}")]
pub struct CertDecodeError(pub String);

/// Immediate client-facing response, bypassing (or replacing) the upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientExit {
    /// HTTP status
    pub status: u16,
    /// Response body
    pub body: Bytes,
    /// Response headers
    pub headers: HeaderMultiMap,
}

impl ClientExit {
    /// An exit with no body and no headers.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Bytes::new(),
            headers: HeaderMultiMap::new(),
        }
    }

    /// An exit with a body and a single `Content-Type` header.
    pub fn with_content_type(status: u16, body: impl Into<Bytes>, content_type: &str) -> Self {
        let mut headers = HeaderMultiMap::new();
        headers.insert("content-type".to_string(), vec![content_type.to_string()]);
        Self {
            status,
            body: body.into(),
            headers,
        }
    }
}

/// Outcome of the access phase.
#[derive(Debug)]
pub enum AccessDecision {
    /// Forward the (possibly mutated) request to the upstream.
    Continue,
    /// Answer the client immediately; the upstream is never called.
    ShortCircuit(ClientExit),
}

/// Outcome of the response phase.
#[derive(Debug)]
pub enum ResponseDecision {
    /// Forward the upstream response unchanged.
    Forward,
    /// Replace the client-facing response wholesale.
    Replace(ClientExit),
}
