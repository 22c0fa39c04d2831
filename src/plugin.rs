//! Plugin instance wiring and phase entry points.
//!
//! One [`AuthGatePlugin`] exists per plugin configuration. It owns the
//! validated config, the sideband provider (with its pooled HTTP client and
//! circuit breaker), optional metrics, and the optional client-certificate
//! decoder. The instance is immutable and shared across every concurrent
//! request the host drives through it.
//!
//! # Panic Safety
//!
//! Both entry points wrap the phase logic in a panic guard: any panic is
//! logged and answered with an empty 500, regardless of `fail_open`. A local
//! bug must never let traffic through unevaluated.

use std::sync::Arc;

use futures_util::FutureExt;
use opentelemetry::metrics::Meter;
use tracing::error;

use crate::access;
use crate::config::{ConfigError, PluginConfig};
use crate::gateway::{
    AccessDecision, ClientCertDecoder, ClientExit, ClientRequest, RequestContext, RequestEditor,
    ResponseDecision, ServiceResponse,
};
use crate::metrics::SidebandMetrics;
use crate::provider::{PolicyProvider, SidebandProvider};
use crate::response;

/// A configured plugin instance.
pub struct AuthGatePlugin {
    pub(crate) config: Arc<PluginConfig>,
    pub(crate) provider: Arc<dyn PolicyProvider>,
    pub(crate) metrics: Option<SidebandMetrics>,
    pub(crate) cert_decoder: Option<Arc<dyn ClientCertDecoder>>,
}

impl AuthGatePlugin {
    /// Validates the config and builds the sideband provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid config or a transport stack
    /// that fails to initialize.
    pub fn new(config: PluginConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let provider = Arc::new(SidebandProvider::new(Arc::clone(&config))?);
        Ok(Self {
            config,
            provider,
            metrics: None,
            cert_decoder: None,
        })
    }

    /// Attaches an OpenTelemetry meter; the instrument set is created once.
    #[must_use]
    pub fn with_meter(mut self, meter: &Meter) -> Self {
        self.metrics = Some(SidebandMetrics::new(meter));
        self
    }

    /// Installs the external PEM→JWK collaborator for client certificates.
    #[must_use]
    pub fn with_cert_decoder(mut self, decoder: Arc<dyn ClientCertDecoder>) -> Self {
        self.cert_decoder = Some(decoder);
        self
    }

    /// Replaces the policy provider. A seam for tests and for alternative
    /// provider protocols.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn PolicyProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Access phase entry point: evaluate the client request before it
    /// reaches the upstream.
    ///
    /// Never panics outward; never returns an error. Every failure mode is
    /// folded into the returned decision.
    pub async fn on_access<G>(&self, gateway: &mut G) -> AccessDecision
    where
        G: ClientRequest + RequestEditor + RequestContext + Send,
    {
        match std::panic::AssertUnwindSafe(access::execute(self, gateway))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(_) => {
                error!(phase = "access", "unexpected panic in access phase, failing closed");
                AccessDecision::ShortCircuit(ClientExit::empty(500))
            }
        }
    }

    /// Response phase entry point: evaluate the upstream response before the
    /// client sees it.
    ///
    /// Honors `skip_response_phase`. Never panics outward.
    pub async fn on_response<G>(&self, gateway: &mut G) -> ResponseDecision
    where
        G: ClientRequest + ServiceResponse + RequestContext + Send,
    {
        if self.config.skip_response_phase {
            return ResponseDecision::Forward;
        }

        match std::panic::AssertUnwindSafe(response::execute(self, gateway))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(_) => {
                error!(phase = "response", "unexpected panic in response phase, failing closed");
                ResponseDecision::Replace(ClientExit::empty(500))
            }
        }
    }
}
