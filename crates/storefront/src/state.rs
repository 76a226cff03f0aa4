//! Application state shared across handlers.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::chain::ChainClient;
use crate::config::StorefrontConfig;
use crate::identity::IdentityClient;
use crate::services::InFlight;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// upstream clients and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    api: ApiClient,
    identity: IdentityClient,
    chain: ChainClient,
    inflight: InFlight,
}

impl AppState {
    /// Create a new application state, building one client per upstream.
    #[must_use]
    pub fn new(config: StorefrontConfig) -> Self {
        let api = ApiClient::new(&config);
        let identity = IdentityClient::new(&config.identity);
        let chain = ChainClient::new(&config.chain);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                api,
                identity,
                chain,
                inflight: InFlight::new(),
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the backend API client.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Get a reference to the identity provider client.
    #[must_use]
    pub fn identity(&self) -> &IdentityClient {
        &self.inner.identity
    }

    /// Get a reference to the chain RPC client.
    #[must_use]
    pub fn chain(&self) -> &ChainClient {
        &self.inner.chain
    }

    /// Registry of order operations in progress.
    #[must_use]
    pub fn inflight(&self) -> &InFlight {
        &self.inner.inflight
    }
}
