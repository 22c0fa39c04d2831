//! Policy provider abstraction and the sideband implementation.
//!
//! [`PolicyProvider`] is the seam between the orchestrators and the wire:
//! tests substitute a mock, production uses [`SidebandProvider`] which
//! marshals payloads, POSTs them through the reliability layer, and parses
//! replies into typed results or typed errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::client::{ProviderReply, SidebandEndpoint, SidebandHttpClient};
use crate::config::{ConfigError, PluginConfig};
use crate::error::AuthGateError;
use crate::wire::{AccessRequest, AccessResponse, ProviderErrorBody, ResponsePayload, ResponseResult};

/// Synchronous policy evaluation over the sideband protocol.
///
/// Implementations must be shareable across concurrent requests.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Sends the client request for the access-phase decision.
    async fn evaluate_request(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessResponse, AuthGateError>;

    /// Sends the upstream response for the response-phase decision.
    async fn evaluate_response(
        &self,
        payload: &ResponsePayload,
    ) -> Result<ResponseResult, AuthGateError>;
}

/// The HTTP sideband provider implementation.
#[derive(Debug)]
pub struct SidebandProvider {
    client: SidebandHttpClient,
}

impl SidebandProvider {
    /// Builds the provider and its pooled HTTP client.
    pub fn new(config: Arc<PluginConfig>) -> Result<Self, ConfigError> {
        Ok(Self {
            client: SidebandHttpClient::new(config)?,
        })
    }

    /// The underlying client, for breaker observability.
    pub fn client(&self) -> &SidebandHttpClient {
        &self.client
    }

    /// Splits a reply into 2xx body bytes or a typed HTTP error.
    fn check_status(reply: ProviderReply) -> Result<ProviderReply, AuthGateError> {
        if (200..300).contains(&reply.status) {
            return Ok(reply);
        }
        // Non-2xx: pull {message, id} out of the body when it is JSON.
        let parsed: ProviderErrorBody =
            serde_json::from_slice(&reply.body).unwrap_or_default();
        Err(AuthGateError::ProviderHttp {
            status: reply.status,
            body: reply.body,
            message: parsed.message,
            id: parsed.id,
        })
    }
}

#[async_trait]
impl PolicyProvider for SidebandProvider {
    async fn evaluate_request(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessResponse, AuthGateError> {
        let body = serde_json::to_vec(request).map_err(|e| AuthGateError::Composition {
            details: format!("failed to encode access request: {e}"),
        })?;
        let mcp_method = request.mcp.as_ref().map(|m| m.method.as_str());

        let reply = self
            .client
            .execute(SidebandEndpoint::Request, body, mcp_method)
            .await?;
        let reply = Self::check_status(reply)?;

        debug!(status = reply.status, "access-phase sideband reply received");
        serde_json::from_slice(&reply.body).map_err(|e| AuthGateError::ProviderDecode {
            details: format!("failed to decode access response: {e}"),
        })
    }

    async fn evaluate_response(
        &self,
        payload: &ResponsePayload,
    ) -> Result<ResponseResult, AuthGateError> {
        let body = serde_json::to_vec(payload).map_err(|e| AuthGateError::Composition {
            details: format!("failed to encode response payload: {e}"),
        })?;
        let mcp_method = payload.mcp.as_ref().map(|m| m.method.as_str());

        let reply = self
            .client
            .execute(SidebandEndpoint::Response, body, mcp_method)
            .await?;
        let reply = Self::check_status(reply)?;

        debug!(status = reply.status, "response-phase sideband reply received");
        serde_json::from_slice(&reply.body).map_err(|e| AuthGateError::ProviderDecode {
            details: format!("failed to decode response result: {e}"),
        })
    }
}
