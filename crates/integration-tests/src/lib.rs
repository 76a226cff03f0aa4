//! End-to-end harness for the EpochMine storefront.
//!
//! Each test spawns its own storefront on an ephemeral port, wired to a
//! single fake upstream that plays the backend REST API, the identity
//! provider and the chain JSON-RPC node. The fake records every mutating
//! call so tests can assert on what the storefront sent.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p epochmine-integration-tests
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use epochmine_core::erc20::{TRANSFER_EVENT, Token};
use epochmine_core::{TxHash, WalletAddress};
use ethers::types::{Address, Bytes, H256, Log, TransactionReceipt, U64, U256};
use ethers::utils::keccak256;
use epochmine_storefront::config::{BackendConfig, ChainConfig, IdentityConfig, StorefrontConfig};
use epochmine_storefront::state::AppState;
use secrecy::SecretString;
use serde_json::{Value, json};

pub const USER_ID: &str = "user-1";
pub const USER_EMAIL: &str = "miner@example.com";
pub const ACCESS_TOKEN: &str = "access-1";
pub const OTP_CODE: &str = "123456";
pub const MINER_ID: &str = "m1";
pub const MINER_TITLE: &str = "EpochMiner X1";
pub const POOL_ID: &str = "p1";
pub const ORDER_ID: &str = "41";
pub const ORDER_CODE: &str = "EM20240501";
pub const PAYMENT_ADDRESS: &str = "0x2222222222222222222222222222222222222222";
pub const TOKEN_CONTRACT: &str = "0x55d398326f99059ff775485246999027b3197955";
pub const PAYER: &str = "0x3333333333333333333333333333333333333333";
/// Token decimals; the fake order amount is 2599 tokens.
pub const TOKEN_DECIMALS: u32 = 18;
pub const NODE_KEY: &str = "node-abc";
pub const SCREEN_NAME: &str = "epochmine";

/// Parse one of the address constants above.
#[must_use]
pub fn address(s: &str) -> Address {
    WalletAddress::parse(s).expect("valid test address").address()
}

/// The order amount in token base units.
#[must_use]
pub fn order_units() -> U256 {
    U256::from(2599) * U256::from(10).pow(U256::from(TOKEN_DECIMALS))
}

/// Mutating calls the fake upstream has seen, plus knobs tests can turn.
#[derive(Debug)]
pub struct Upstream {
    pub created_orders: Vec<Value>,
    pub confirmations: Vec<Value>,
    pub cancellations: Vec<Value>,
    pub bound_wallets: Vec<Value>,
    pub status_updates: Vec<Value>,
    pub activations: Vec<Value>,
    pub added_nodes: Vec<Value>,
    pub node_transfers: Vec<Value>,
    pub code_exchanges: Vec<Value>,
    /// Status code the order list and detail report.
    pub order_status: i32,
    /// Wallet address the user record reports.
    pub user_wallet: Option<String>,
    /// Account status the user record reports, 0 until activated.
    pub user_status: i32,
    pub user_role: i32,
    /// Contract the fake receipt claims the transaction called.
    pub receipt_to: Address,
    /// Receipt status, 1 for success.
    pub receipt_status: u64,
    /// The token transfer the receipt logs.
    pub transfer_from: Address,
    pub transfer_to: Address,
    pub transfer_value: U256,
    /// How long the node takes to answer.
    pub rpc_delay: Duration,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            created_orders: Vec::new(),
            confirmations: Vec::new(),
            cancellations: Vec::new(),
            bound_wallets: Vec::new(),
            status_updates: Vec::new(),
            activations: Vec::new(),
            added_nodes: Vec::new(),
            node_transfers: Vec::new(),
            code_exchanges: Vec::new(),
            order_status: 0,
            user_wallet: None,
            user_status: 1,
            user_role: 1,
            receipt_to: address(TOKEN_CONTRACT),
            receipt_status: 1,
            transfer_from: address(PAYER),
            transfer_to: address(PAYMENT_ADDRESS),
            transfer_value: order_units(),
            rpc_delay: Duration::ZERO,
        }
    }
}

type Shared = Arc<Mutex<Upstream>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Upstream> {
    shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// =============================================================================
// Fake upstream
// =============================================================================

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "code": 200, "msg": "success", "data": data }))
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {ACCESS_TOKEN}"))
}

fn order_json(status: i32) -> Value {
    json!({
        "id": ORDER_ID.parse::<u64>().unwrap_or_default(),
        "order_id": ORDER_CODE,
        "machine_info": { "title": MINER_TITLE, "price": "1299.50" },
        "pool_info": { "name": "Epoch Pool" },
        "quantity": 2,
        "amount": "2599",
        "status": status,
        "payment_address": PAYMENT_ADDRESS,
        "created_at": "2024-05-01T00:00:00Z",
        "expired_at": "2099-01-01T00:00:00Z"
    })
}

async fn backend_health() -> &'static str {
    "ok"
}

async fn list_miners(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ok(json!({
        "records": [{
            "id": MINER_ID,
            "title": MINER_TITLE,
            "description": "Air-cooled, 110 TH/s",
            "price": "1299.50",
            "min_buy": 1
        }],
        "total": 1
    }))
    .into_response()
}

async fn list_pools(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ok(json!({
        "records": [
            { "id": POOL_ID, "name": "Epoch Pool", "description": "PPS+" },
            { "id": "p2", "name": "Backup Pool" }
        ],
        "total": "2"
    }))
    .into_response()
}

async fn create_order(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lock(&shared).created_orders.push(body);
    ok(json!({
        "id": 41,
        "order_id": ORDER_CODE,
        "payment_address": PAYMENT_ADDRESS,
        "amount": "2599",
        "expired_at": "2099-01-01T00:00:00Z"
    }))
}

async fn list_orders(State(shared): State<Shared>) -> Json<Value> {
    let status = lock(&shared).order_status;
    ok(json!({ "records": [order_json(status)], "total": 1 }))
}

async fn order_detail(State(shared): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    if id != ORDER_ID {
        return Json(json!({ "code": 200, "data": null }));
    }
    let status = lock(&shared).order_status;
    ok(order_json(status))
}

async fn cancel_order(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut upstream = lock(&shared);
    upstream.cancellations.push(body);
    upstream.order_status = 2;
    ok(Value::Null)
}

async fn confirm_payment(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut upstream = lock(&shared);
    upstream.order_status = if body.get("transaction_hash").is_some() { 1 } else { 5 };
    upstream.confirmations.push(body);
    ok(Value::Null)
}

async fn update_order_status(
    State(shared): State<Shared>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut upstream = lock(&shared);
    if let Some(status) = body.get("status").and_then(Value::as_i64) {
        upstream.order_status = i32::try_from(status).unwrap_or_default();
    }
    upstream.status_updates.push(body);
    ok(Value::Null)
}

async fn user_info(State(shared): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    let upstream = lock(&shared);
    ok(json!({
        "user": {
            "id": id,
            "name": "Satoshi",
            "email": USER_EMAIL,
            "wallet_address": upstream.user_wallet,
            "status": upstream.user_status,
            "role": upstream.user_role
        }
    }))
}

async fn activate_user(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lock(&shared).activations.push(body);
    ok(json!(SCREEN_NAME))
}

async fn list_nodes() -> Json<Value> {
    ok(json!({
        "records": [{
            "id": 9,
            "node_key": NODE_KEY,
            "mac_addr": "00:1A:2B:3C:4D:5E",
            "last_ip": "10.0.0.7",
            "status": 1,
            "online_time": 0,
            "y_earn": "1500000000000000000",
            "t_earn": "42000000000000000000"
        }],
        "total": 1
    }))
}

async fn node_online_times() -> Json<Value> {
    ok(json!([{ "node_key": NODE_KEY, "online_time": 3725 }]))
}

async fn add_node(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lock(&shared).added_nodes.push(body);
    ok(Value::Null)
}

async fn transfer_node(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lock(&shared).node_transfers.push(body);
    ok(Value::Null)
}

async fn bind_wallet(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut upstream = lock(&shared);
    upstream.user_wallet = body
        .get("wallet_address")
        .and_then(Value::as_str)
        .map(str::to_string);
    upstream.bound_wallets.push(body);
    ok(Value::Null)
}

fn auth_session() -> Value {
    json!({
        "access_token": ACCESS_TOKEN,
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "user": {
            "id": USER_ID,
            "email": USER_EMAIL,
            "user_metadata": { "full_name": "Satoshi" }
        }
    })
}

async fn send_otp() -> Json<Value> {
    Json(json!({}))
}

async fn verify_otp(Json(body): Json<Value>) -> Response {
    if body.get("token").and_then(Value::as_str) == Some(OTP_CODE) {
        Json(auth_session()).into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "msg": "Token has expired or is invalid" })),
        )
            .into_response()
    }
}

async fn exchange_code(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    lock(&shared).code_exchanges.push(body);
    Json(auth_session())
}

async fn identity_logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// A receipt whose only log is the configured token transfer.
fn receipt(upstream: &Upstream, hash: H256) -> TransactionReceipt {
    let mut value = [0_u8; 32];
    upstream.transfer_value.to_big_endian(&mut value);
    let transfer = Log {
        address: address(TOKEN_CONTRACT),
        topics: vec![
            H256::from(keccak256(TRANSFER_EVENT)),
            H256::from(upstream.transfer_from),
            H256::from(upstream.transfer_to),
        ],
        data: Bytes::from(value.to_vec()),
        transaction_hash: Some(hash),
        ..Log::default()
    };
    TransactionReceipt {
        transaction_hash: hash,
        block_number: Some(U64::from(16)),
        from: upstream.transfer_from,
        to: Some(upstream.receipt_to),
        status: Some(U64::from(upstream.receipt_status)),
        logs: vec![transfer],
        ..TransactionReceipt::default()
    }
}

/// `eth_getTransactionReceipt`, the only method the storefront calls.
async fn rpc(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let hash = body
        .pointer("/params/0")
        .and_then(Value::as_str)
        .and_then(|s| TxHash::parse(s).ok())
        .map(|h| h.hash())
        .unwrap_or_default();

    let (delay, receipt) = {
        let upstream = lock(&shared);
        (upstream.rpc_delay, receipt(&upstream, hash))
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": serde_json::to_value(&receipt).expect("receipt serializes"),
    }))
}

fn upstream_router(shared: Shared) -> Router {
    Router::new()
        .route("/health", get(backend_health))
        .route("/api/v1/machines/list", get(list_miners))
        .route("/api/v1/pools/list", get(list_pools))
        .route("/api/v1/orders/create", post(create_order))
        .route("/api/v1/orders/list", get(list_orders))
        .route("/api/v1/orders/detail/{id}", get(order_detail))
        .route("/api/v1/orders/cancel/", post(cancel_order))
        .route("/api/v1/orders/confirm-payment", post(confirm_payment))
        .route("/api/v1/orders/update-status", post(update_order_status))
        .route("/api/v1/user/bind-wallet", post(bind_wallet))
        .route("/api/v1/user/active", post(activate_user))
        .route("/api/v1/user/{id}", get(user_info))
        .route("/api/v1/miner-nodes/list", get(list_nodes))
        .route("/api/v1/miner-nodes/online-time", post(node_online_times))
        .route("/api/v1/miner-nodes/add", post(add_node))
        .route("/api/v1/miner-nodes/transfer", post(transfer_node))
        .route("/auth/v1/otp", post(send_otp))
        .route("/auth/v1/verify", post(verify_otp))
        .route("/auth/v1/token", post(exchange_code))
        .route("/auth/v1/logout", post(identity_logout))
        .route("/rpc", post(rpc))
        .with_state(shared)
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("test server");
    });
    addr
}

// =============================================================================
// Test application
// =============================================================================

/// A running storefront plus a cookie-keeping client pointed at it.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    upstream: Shared,
}

impl TestApp {
    /// Start the fake upstream and a storefront wired to it.
    pub async fn spawn() -> Self {
        let upstream = Shared::default();
        let upstream_url = format!("http://{}", serve(upstream_router(upstream.clone())).await);

        // Bind first so the storefront knows its own base URL
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind storefront listener");
        let addr = listener.local_addr().expect("storefront address");
        let base_url = format!("http://{addr}");

        let config = StorefrontConfig {
            host: addr.ip(),
            port: addr.port(),
            base_url: base_url.clone(),
            backend: BackendConfig {
                url: upstream_url.clone(),
                api_version: "v1".to_string(),
            },
            identity: IdentityConfig {
                url: upstream_url.clone(),
                api_key: SecretString::from("kR8vN2pQ7xL4mW9tZ3bF6hJ1cY5dG0sA"),
                oauth_provider: "twitter".to_string(),
            },
            chain: ChainConfig {
                rpc_url: format!("{upstream_url}/rpc").parse().expect("RPC URL"),
                chain_id: 56,
                token: Token {
                    contract: WalletAddress::parse(TOKEN_CONTRACT).expect("token contract"),
                    decimals: TOKEN_DECIMALS,
                },
                explorer_tx_url: "https://bscscan.com/tx/".to_string(),
                receipt_timeout: Duration::from_secs(5),
                receipt_poll_interval: Duration::from_millis(20),
            },
            catalog_cache_ttl: Duration::from_secs(60),
            list_page_size: 20,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        };

        let app = epochmine_storefront::app(AppState::new(config));
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("storefront server");
        });

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("build HTTP client");

        Self {
            base_url,
            client,
            upstream,
        }
    }

    /// What the fake upstream has recorded so far.
    pub fn upstream(&self) -> MutexGuard<'_, Upstream> {
        lock(&self.upstream)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request")
    }

    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .expect("form POST request")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(header::ACCEPT.as_str(), "application/json")
            .json(body)
            .send()
            .await
            .expect("JSON POST request")
    }

    /// Submit the emailed one-time code; returns where sign-in landed.
    pub async fn sign_in_with_code(&self) -> Option<String> {
        let sent = self.post_form("/auth/otp", &[("email", USER_EMAIL)]).await;
        assert_eq!(location(&sent).as_deref(), Some("/auth/verify?notice=code_sent"));

        let verified = self.post_form("/auth/verify", &[("code", OTP_CODE)]).await;
        location(&verified)
    }

    /// Sign in with the emailed one-time code.
    pub async fn sign_in(&self) {
        assert_eq!(self.sign_in_with_code().await.as_deref(), Some("/"));
    }

    /// Start the OAuth flow; returns the `state` the storefront will expect back.
    pub async fn start_oauth(&self) -> String {
        let started = self.get("/auth/oauth").await;
        let authorize = location(&started).expect("redirect to the identity provider");
        let authorize = reqwest::Url::parse(&authorize).expect("authorize URL");
        assert!(authorize.path().ends_with("/auth/v1/authorize"));

        let redirect_to = query_param(&authorize, "redirect_to").expect("redirect_to");
        let callback = reqwest::Url::parse(&redirect_to).expect("callback URL");
        query_param(&callback, "state").expect("state")
    }

    /// Walk the wizard up to the payment step.
    pub async fn checkout_to_payment(&self) {
        let started = self
            .post_form("/checkout/start", &[("miner_id", MINER_ID), ("quantity", "2")])
            .await;
        assert_eq!(location(&started).as_deref(), Some("/checkout/pool"));

        let pooled = self.post_form("/checkout/pool", &[("pool_id", POOL_ID)]).await;
        assert_eq!(location(&pooled).as_deref(), Some("/checkout/address"));

        let addressed = self
            .post_form(
                "/checkout/address",
                &[
                    ("receiver", "Zhang Wei"),
                    ("country_code", "+86"),
                    ("phone", "13800138000"),
                    ("address", "1 Jianguo Road, Beijing"),
                    ("postcode", ""),
                ],
            )
            .await;
        assert_eq!(location(&addressed).as_deref(), Some("/checkout/payment"));
    }
}

fn query_param(url: &reqwest::Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// The `Location` header of a redirect.
#[must_use]
pub fn location(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
