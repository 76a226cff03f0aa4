//! Checkout wizard, end to end against the fake upstream.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use epochmine_integration_tests::{
    MINER_ID, MINER_TITLE, ORDER_CODE, ORDER_ID, PAYER, PAYMENT_ADDRESS, POOL_ID, TestApp,
    address, location, order_units,
};
use ethers::types::U256;
use reqwest::StatusCode;
use serde_json::{Value, json};

fn tx_hash() -> String {
    format!("0x{}", "ab".repeat(32))
}

/// Sign in, walk to the payment step and prepare a transfer from `PAYER`.
async fn app_at_wallet_payment() -> TestApp {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    app.checkout_to_payment().await;
    let step = app
        .post_json("/checkout/payment/transfer", &json!({ "account": PAYER }))
        .await;
    assert_eq!(step.status(), StatusCode::OK);
    app
}

/// Submit the transaction and expect it to be refused with `message`.
async fn assert_transaction_rejected(app: &TestApp, message: &str) {
    let rejected = app
        .post_json("/checkout/payment/transaction", &json!({ "tx_hash": tx_hash() }))
        .await;
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"], message);
    assert!(app.upstream().confirmations.is_empty());

    // Still on the payment step, so a retry is possible
    let payment = app.get("/checkout/payment").await;
    assert_eq!(payment.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_wallet_payment_completes_checkout() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    let catalog = app.get("/").await;
    assert_eq!(catalog.status(), StatusCode::OK);
    assert!(catalog.text().await.unwrap().contains(MINER_TITLE));

    app.checkout_to_payment().await;

    {
        let upstream = app.upstream();
        let created = upstream.created_orders.first().expect("order created");
        assert_eq!(created["machine_id"], json!(MINER_ID));
        assert_eq!(created["pool_id"], json!(POOL_ID));
        assert_eq!(created["quantity"], json!(2));
        assert_eq!(created["shipping_info"]["phone"], json!("13800138000"));
    }

    let payment = app.get("/checkout/payment").await;
    assert_eq!(payment.status(), StatusCode::OK);
    let body = payment.text().await.unwrap();
    assert!(body.contains(PAYMENT_ADDRESS));
    assert!(body.contains(ORDER_CODE));
    assert!(body.contains("<svg"));

    let step = app
        .post_json("/checkout/payment/transfer", &json!({ "account": PAYER }))
        .await;
    assert_eq!(step.status(), StatusCode::OK);
    let step: Value = step.json().await.unwrap();
    assert_eq!(step["action"], "transfer");
    assert_eq!(step["tx"]["from"], PAYER);
    assert!(
        step["tx"]["data"]
            .as_str()
            .unwrap()
            .starts_with("0xa9059cbb")
    );

    let confirmed = app
        .post_json("/checkout/payment/transaction", &json!({ "tx_hash": tx_hash() }))
        .await;
    assert_eq!(confirmed.status(), StatusCode::OK);
    let confirmed: Value = confirmed.json().await.unwrap();
    assert_eq!(confirmed["redirect"], "/checkout/complete");

    {
        let upstream = app.upstream();
        assert_eq!(upstream.confirmations.len(), 1);
        let confirmation = upstream.confirmations.first().unwrap();
        assert_eq!(confirmation["transaction_hash"], json!(tx_hash()));
    }

    let complete = app.get("/checkout/complete").await;
    assert_eq!(complete.status(), StatusCode::OK);
    assert!(
        complete
            .text()
            .await
            .unwrap()
            .contains(&format!("https://bscscan.com/tx/{}", tx_hash()))
    );
}

#[tokio::test]
async fn test_transfer_waits_for_wallet_connection() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    app.checkout_to_payment().await;

    let step: Value = app
        .post_json("/checkout/payment/transfer", &json!({ "account": null }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(step, json!({ "action": "connect" }));

    let released: Value = app
        .post_json("/wallet/connected", &json!({ "address": PAYER }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(released["action"], "transfer");
    assert_eq!(released["tx"]["from"], PAYER);

    // The parked transfer is released once
    let again: Value = app
        .post_json("/wallet/connected", &json!({ "address": PAYER }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again, json!({ "action": "none" }));
}

#[tokio::test]
async fn test_wrong_token_leaves_order_pending() {
    let app = app_at_wallet_payment().await;
    app.upstream().receipt_to = address("0x1111111111111111111111111111111111111111");

    assert_transaction_rejected(&app, "The transaction did not pay with the expected token").await;
}

#[tokio::test]
async fn test_transfer_to_another_address_is_rejected() {
    let app = app_at_wallet_payment().await;
    app.upstream().transfer_to = address("0x000000000000000000000000000000000000dEaD");

    assert_transaction_rejected(&app, "The transaction did not pay this order's address").await;
}

#[tokio::test]
async fn test_underpayment_is_rejected() {
    let app = app_at_wallet_payment().await;
    app.upstream().transfer_value = order_units() - U256::one();

    assert_transaction_rejected(&app, "The transaction paid less than the order amount").await;
}

#[tokio::test]
async fn test_payment_from_another_wallet_is_rejected() {
    let app = app_at_wallet_payment().await;
    app.upstream().transfer_from = address("0x4444444444444444444444444444444444444444");

    assert_transaction_rejected(&app, "The transaction was sent from a different wallet").await;
}

#[tokio::test]
async fn test_reverted_transaction_is_rejected() {
    let app = app_at_wallet_payment().await;
    app.upstream().receipt_status = 0;

    assert_transaction_rejected(&app, "The transaction failed on chain").await;
}

#[tokio::test]
async fn test_transaction_requires_prepared_transfer() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    app.checkout_to_payment().await;

    let refused = app
        .post_json("/checkout/payment/transaction", &json!({ "tx_hash": tx_hash() }))
        .await;
    assert_eq!(refused.status(), StatusCode::CONFLICT);
    assert!(app.upstream().confirmations.is_empty());
}

#[tokio::test]
async fn test_concurrent_confirmations_settle_once() {
    let app = app_at_wallet_payment().await;
    app.upstream().rpc_delay = Duration::from_millis(300);

    let body = json!({ "tx_hash": tx_hash() });
    let (first, second) = tokio::join!(
        app.post_json("/checkout/payment/transaction", &body),
        app.post_json("/checkout/payment/transaction", &body),
    );

    let mut statuses = [first.status(), second.status()];
    statuses.sort_by_key(StatusCode::as_u16);
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    assert_eq!(app.upstream().confirmations.len(), 1);
}

#[tokio::test]
async fn test_manual_payment_confirmation() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    app.checkout_to_payment().await;

    let confirmed = app.post_form("/checkout/payment/confirm", &[]).await;
    assert_eq!(location(&confirmed).as_deref(), Some("/checkout/complete"));

    let upstream = app.upstream();
    let confirmation = upstream.confirmations.first().expect("payment confirmed");
    assert_eq!(confirmation, &json!({ "id": ORDER_ID }));
}

#[tokio::test]
async fn test_invalid_address_rerenders_with_errors() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    app.post_form("/checkout/start", &[("miner_id", MINER_ID), ("quantity", "1")])
        .await;
    app.post_form("/checkout/pool", &[("pool_id", POOL_ID)])
        .await;

    let response = app
        .post_form(
            "/checkout/address",
            &[
                ("receiver", ""),
                ("country_code", "+86"),
                ("phone", "12345"),
                ("address", "1 Jianguo Road"),
                ("postcode", ""),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("Enter a valid phone number"));
    assert!(app.upstream().created_orders.is_empty());
}

#[tokio::test]
async fn test_skipping_ahead_returns_to_current_step() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    let no_checkout = app.get("/checkout/payment").await;
    assert_eq!(
        location(&no_checkout).as_deref(),
        Some("/?notice=checkout_expired")
    );

    app.post_form("/checkout/start", &[("miner_id", MINER_ID), ("quantity", "1")])
        .await;
    let early = app.get("/checkout/address").await;
    assert_eq!(location(&early).as_deref(), Some("/checkout/pool"));
}
