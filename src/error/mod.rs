//! Error handling for AuthGate.
//!
//! All failures on the sideband path collapse into [`AuthGateError`]; the
//! orchestrators translate variants into client-facing responses according to
//! the passthrough set and the fail-open/fail-closed policy. A policy *deny*
//! is not an error: it is a regular provider decision, discriminated by the
//! presence of the `response` field on the wire.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - JSON-RPC 2.0 error body structures (MCP-shaped denials)
//! - [`AuthGateError`] - sideband and composition error taxonomy

pub mod jsonrpc;

use bytes::Bytes;
use thiserror::Error;

use crate::breaker::CircuitOpenSnapshot;
use crate::gateway::GatewayError;

/// All failure modes on the sideband path.
///
/// The variant determines the client-facing outcome:
///
/// | Variant | Outcome |
/// |---|---|
/// | `Composition` / `Gateway` | 400 (payload build) or 500, always fail-closed |
/// | `Transport` / `ProviderDecode` | fail-open allow/pass-through, else 502 |
/// | `ProviderHttp` | passthrough code → forwarded; else fail-open policy |
/// | `CircuitOpen` | 429 with `Retry-After` (rate-limit trigger) or fail-open policy |
#[derive(Debug, Error)]
pub enum AuthGateError {
    /// The sideband payload could not be built from the gateway state.
    #[error("failed to compose sideband payload: {details}")]
    Composition {
        /// What went wrong while composing
        details: String,
    },

    /// The host façade failed to produce request or response state.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The provider could not be reached: connect, read, write, or timeout.
    #[error("policy provider unreachable: {reason}")]
    Transport {
        /// Underlying transport error text
        reason: String,
        /// True when the failure was the I/O deadline expiring
        timed_out: bool,
    },

    /// The provider answered with a non-2xx status.
    #[error("sideband request failed with status {status}: {message}")]
    ProviderHttp {
        /// HTTP status returned by the provider
        status: u16,
        /// Raw response body
        body: Bytes,
        /// `message` field parsed from the body, if JSON-decodable
        message: String,
        /// `id` field parsed from the body, if JSON-decodable
        id: String,
    },

    /// The provider answered 2xx but the body did not parse as the expected
    /// response shape.
    #[error("failed to decode provider response: {details}")]
    ProviderDecode {
        /// Parse error text
        details: String,
    },

    /// The circuit breaker is open; no network call was made.
    #[error("circuit breaker open ({}), retry after {} seconds", .0.trigger, .0.retry_after_secs)]
    CircuitOpen(CircuitOpenSnapshot),
}

impl AuthGateError {
    /// Short machine-readable name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Composition { .. } => "composition",
            Self::Gateway(_) => "gateway",
            Self::Transport { .. } => "transport",
            Self::ProviderHttp { .. } => "provider_http",
            Self::ProviderDecode { .. } => "provider_decode",
            Self::CircuitOpen(_) => "circuit_open",
        }
    }

    /// True for failures that must never fail open (local bugs and payload
    /// composition problems, as opposed to provider unavailability).
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Composition { .. } | Self::Gateway(_))
    }
}
