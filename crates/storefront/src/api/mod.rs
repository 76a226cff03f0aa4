//! Backend REST API client.
//!
//! Every call carries the signed-in user's bearer token and the current
//! request id. Responses arrive wrapped in a `{code, msg, data}` envelope;
//! anything but code 200 is an error. Miner and pool lists are cached with
//! `moka` because every visitor sees the same catalog.

mod cache;
pub mod types;

use std::sync::Arc;

use moka::future::Cache;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use epochmine_core::{
    MinerId, OrderId, OrderStatus, PoolId, UserId, WalletAddress, checkout::PaymentConfirmation,
};

use crate::config::StorefrontConfig;
use cache::{CacheKey, CacheValue};
use types::{
    ActivateRequest, AddNodeRequest, BindWalletRequest, CreateOrderRequest,
    CreatedOrder, Envelope, ListPage, Miner, MinerNode, NodeOnlineTime, OnlineTimeRequest, Order,
    OrderRef, Pool, SUCCESS_CODE, TransferNodeRequest, UpdateStatusRequest, UserInfo,
};

/// Page size used when looking a miner up by id in the cached catalog.
const CATALOG_SCAN_LIMIT: u32 = 100;

/// Errors that can occur when calling the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The envelope carried a non-success code.
    #[error("backend error {code}: {message}")]
    Rejected { code: i64, message: String },

    /// The body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Success envelope without the data the call needs.
    #[error("response has no data")]
    MissingData,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Message the backend attached to a rejection, if any.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}

/// Credentials and tracing context for one backend call.
#[derive(Debug, Clone, Copy)]
pub struct Caller<'a> {
    pub access_token: &'a str,
    pub request_id: Option<&'a str>,
}

impl<'a> Caller<'a> {
    #[must_use]
    pub const fn new(access_token: &'a str, request_id: Option<&'a str>) -> Self {
        Self {
            access_token,
            request_id,
        }
    }
}

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    /// `{url}/api/{version}`
    base: String,
    /// `{url}/health`
    health_url: String,
    cache: Cache<CacheKey, CacheValue>,
}

impl ApiClient {
    /// Create a new backend client.
    #[must_use]
    pub fn new(config: &StorefrontConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(config.catalog_cache_ttl)
            .build();

        Self {
            inner: Arc::new(ApiClientInner {
                client: reqwest::Client::new(),
                base: config.backend.api_base(),
                health_url: format!("{}/health", config.backend.url),
                cache,
            }),
        }
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(Url::parse(&format!("{}{path}", self.inner.base))?)
    }

    fn request(&self, caller: Caller<'_>, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .inner
            .client
            .request(method, url)
            .bearer_auth(caller.access_token);
        match caller.request_id {
            Some(id) => builder.header("x-request-id", id),
            None => builder,
        }
    }

    /// Send a request and unwrap the envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        // Get response body as text first for better error diagnostics
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Backend returned non-success status"
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    body = %body.chars().take(500).collect::<String>(),
                    "Failed to parse backend response"
                );
                return Err(ApiError::Parse(e));
            }
        };

        match envelope.code {
            SUCCESS_CODE => Ok(envelope.data),
            401 => Err(ApiError::Unauthorized),
            code => {
                let message = envelope.msg.unwrap_or_default();
                debug!(code, message = %message, "Backend rejected request");
                Err(ApiError::Rejected { code, message })
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        self.send(builder).await?.ok_or(ApiError::MissingData)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.send::<IgnoredAny>(builder).await.map(|_| ())
    }

    async fn post<B: Serialize + Sync>(
        &self,
        caller: Caller<'_>,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let url = self.url(path)?;
        self.execute(self.request(caller, Method::POST, url).json(body))
            .await
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Check the backend's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or unhealthy.
    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<(), ApiError> {
        let response = self.inner.client.get(&self.inner.health_url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            })
        }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// List miners for sale.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    #[instrument(skip(self, caller))]
    pub async fn list_miners(
        &self,
        caller: Caller<'_>,
        page: u32,
        limit: u32,
    ) -> Result<ListPage<Miner>, ApiError> {
        let key = CacheKey::Miners { page, limit };
        if let Some(CacheValue::Miners(list)) = self.inner.cache.get(&key).await {
            debug!("Cache hit for miners");
            return Ok(list);
        }

        let mut url = self.url("/machines/list")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        let list: ListPage<Miner> = self
            .send(self.request(caller, Method::GET, url))
            .await?
            .unwrap_or_default();

        self.inner
            .cache
            .insert(key, CacheValue::Miners(list.clone()))
            .await;
        Ok(list)
    }

    /// Find a miner by id in the first catalog page.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if no listed miner has this id.
    #[instrument(skip(self, caller), fields(miner_id = %id))]
    pub async fn find_miner(&self, caller: Caller<'_>, id: &MinerId) -> Result<Miner, ApiError> {
        self.list_miners(caller, 1, CATALOG_SCAN_LIMIT)
            .await?
            .records
            .into_iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("miner {id}")))
    }

    /// List mining pools.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    #[instrument(skip(self, caller))]
    pub async fn list_pools(&self, caller: Caller<'_>) -> Result<ListPage<Pool>, ApiError> {
        if let Some(CacheValue::Pools(list)) = self.inner.cache.get(&CacheKey::Pools).await {
            debug!("Cache hit for pools");
            return Ok(list);
        }

        let url = self.url("/pools/list")?;
        let list: ListPage<Pool> = self
            .send(self.request(caller, Method::GET, url))
            .await?
            .unwrap_or_default();

        self.inner
            .cache
            .insert(CacheKey::Pools, CacheValue::Pools(list.clone()))
            .await;
        Ok(list)
    }

    /// Find a pool by id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the pool is not listed.
    #[instrument(skip(self, caller), fields(pool_id = %id))]
    pub async fn find_pool(&self, caller: Caller<'_>, id: &PoolId) -> Result<Pool, ApiError> {
        self.list_pools(caller)
            .await?
            .records
            .into_iter()
            .find(|p| &p.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("pool {id}")))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Create an order and get its payment target.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the order.
    #[instrument(skip(self, caller, body), fields(machine_id = %body.machine_id, pool_id = %body.pool_id))]
    pub async fn create_order(
        &self,
        caller: Caller<'_>,
        body: &CreateOrderRequest,
    ) -> Result<CreatedOrder, ApiError> {
        let url = self.url("/orders/create")?;
        self.fetch(self.request(caller, Method::POST, url).json(body))
            .await
    }

    /// List the user's orders, optionally filtered by order code.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    #[instrument(skip(self, caller))]
    pub async fn list_orders(
        &self,
        caller: Caller<'_>,
        page: u32,
        limit: u32,
        order_code: Option<&str>,
    ) -> Result<ListPage<Order>, ApiError> {
        let mut url = self.url("/orders/list")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("page", &page.to_string())
                .append_pair("limit", &limit.to_string());
            if let Some(code) = order_code {
                query.append_pair("order_id", code);
            }
        }
        Ok(self
            .send(self.request(caller, Method::GET, url))
            .await?
            .unwrap_or_default())
    }

    /// Get one order.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the backend has no such order.
    #[instrument(skip(self, caller), fields(order_id = %id))]
    pub async fn order_detail(&self, caller: Caller<'_>, id: &OrderId) -> Result<Order, ApiError> {
        let url = self.url(&format!("/orders/detail/{}", urlencoding::encode(id.as_str())))?;
        self.send(self.request(caller, Method::GET, url))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("order {id}")))
    }

    /// Cancel an unpaid order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the cancellation.
    #[instrument(skip(self, caller), fields(order_id = %id))]
    pub async fn cancel_order(&self, caller: Caller<'_>, id: &OrderId) -> Result<(), ApiError> {
        self.post(caller, "/orders/cancel/", &OrderRef { id }).await
    }

    /// Move an order to a fulfillment status (administrators only).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the update.
    #[instrument(skip(self, caller), fields(order_id = %id, status = status.code()))]
    pub async fn update_order_status(
        &self,
        caller: Caller<'_>,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), ApiError> {
        self.post(
            caller,
            "/orders/update-status",
            &UpdateStatusRequest { id, status },
        )
        .await
    }

    /// Report a payment to the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the confirmation.
    #[instrument(skip(self, caller, confirmation), fields(order_id = %confirmation.id))]
    pub async fn confirm_payment(
        &self,
        caller: Caller<'_>,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), ApiError> {
        self.post(caller, "/orders/confirm-payment", confirmation)
            .await
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Fetch the backend user record and its activation state.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    #[instrument(skip(self, caller), fields(user_id = %id))]
    pub async fn user_info(&self, caller: Caller<'_>, id: &UserId) -> Result<UserInfo, ApiError> {
        let url = self.url(&format!("/user/{}", urlencoding::encode(id.as_str())))?;
        self.fetch(self.request(caller, Method::GET, url)).await
    }

    /// Request account activation. Returns the screen name of the account
    /// the user must follow to complete it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses activation.
    #[instrument(skip(self, caller))]
    pub async fn activate(
        &self,
        caller: Caller<'_>,
        referral_id: Option<String>,
    ) -> Result<String, ApiError> {
        let url = self.url("/user/active")?;
        self.fetch(
            self.request(caller, Method::POST, url)
                .json(&ActivateRequest { referral_id }),
        )
        .await
    }

    /// Bind a wallet address to the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the binding.
    #[instrument(skip(self, caller), fields(wallet = %wallet_address))]
    pub async fn bind_wallet(
        &self,
        caller: Caller<'_>,
        wallet_address: &WalletAddress,
    ) -> Result<(), ApiError> {
        self.post(
            caller,
            "/user/bind-wallet",
            &BindWalletRequest { wallet_address },
        )
        .await
    }

    // =========================================================================
    // Miner nodes
    // =========================================================================

    /// List the user's miner nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    #[instrument(skip(self, caller))]
    pub async fn list_nodes(
        &self,
        caller: Caller<'_>,
        page: u32,
        limit: u32,
        keyword: Option<&str>,
    ) -> Result<ListPage<MinerNode>, ApiError> {
        let mut url = self.url("/miner-nodes/list")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("page", &page.to_string())
                .append_pair("limit", &limit.to_string());
            if let Some(keyword) = keyword {
                query.append_pair("keyword", keyword);
            }
        }
        Ok(self
            .send(self.request(caller, Method::GET, url))
            .await?
            .unwrap_or_default())
    }

    /// Fetch online durations for the given node keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    #[instrument(skip(self, caller, node_keys), fields(count = node_keys.len()))]
    pub async fn online_times(
        &self,
        caller: Caller<'_>,
        node_keys: &[&str],
    ) -> Result<Vec<NodeOnlineTime>, ApiError> {
        if node_keys.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url("/miner-nodes/online-time")?;
        let body = OnlineTimeRequest {
            node_keys: node_keys.to_vec(),
        };
        Ok(self
            .send(self.request(caller, Method::POST, url).json(&body))
            .await?
            .unwrap_or_default())
    }

    /// Register a miner node by MAC address.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the node.
    #[instrument(skip(self, caller))]
    pub async fn add_node(&self, caller: Caller<'_>, mac_addr: &str) -> Result<(), ApiError> {
        self.post(caller, "/miner-nodes/add", &AddNodeRequest { mac_addr })
            .await
    }

    /// Transfer a miner node to another account.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the transfer.
    #[instrument(skip(self, caller))]
    pub async fn transfer_node(
        &self,
        caller: Caller<'_>,
        node_key: &str,
        email: &str,
    ) -> Result<(), ApiError> {
        self.post(
            caller,
            "/miner-nodes/transfer",
            &TransferNodeRequest { node_key, email },
        )
        .await
    }
}
