//! Sign-in, orders and wallet binding against the fake upstream.

#![allow(clippy::unwrap_used)]

use epochmine_integration_tests::{
    NODE_KEY, ORDER_CODE, ORDER_ID, PAYER, SCREEN_NAME, TestApp, USER_EMAIL, location,
};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::spawn().await;

    let live = app.get("/health").await;
    assert_eq!(live.status(), StatusCode::OK);
    assert!(live.headers().contains_key("x-request-id"));

    let ready = app.get("/health/ready").await;
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pages_require_sign_in() {
    let app = TestApp::spawn().await;

    let page = app.get("/orders").await;
    assert_eq!(location(&page).as_deref(), Some("/auth/login"));

    let json = app
        .post_json("/checkout/payment/transfer", &json!({ "account": null }))
        .await;
    assert_eq!(json.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_code_is_rejected() {
    let app = TestApp::spawn().await;

    app.post_form("/auth/otp", &[("email", USER_EMAIL)]).await;
    let rejected = app.post_form("/auth/verify", &[("code", "000000")]).await;
    assert_eq!(
        location(&rejected).as_deref(),
        Some("/auth/verify?notice=invalid_code")
    );

    let still_anonymous = app.get("/").await;
    assert_eq!(location(&still_anonymous).as_deref(), Some("/auth/login"));
}

#[tokio::test]
async fn test_logout_clears_session() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    assert_eq!(app.get("/orders").await.status(), StatusCode::OK);

    let out = app.post_form("/auth/logout", &[]).await;
    assert_eq!(
        location(&out).as_deref(),
        Some("/auth/login?notice=signed_out")
    );
    assert_eq!(
        location(&app.get("/orders").await).as_deref(),
        Some("/auth/login")
    );
}

#[tokio::test]
async fn test_order_list_and_cancel() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    let list = app.get("/orders").await;
    assert_eq!(list.status(), StatusCode::OK);
    let body = list.text().await.unwrap();
    assert!(body.contains(ORDER_CODE));
    assert!(body.contains(&format!("/orders/{ORDER_ID}/pay")));

    let detail = app.get(&format!("/orders/{ORDER_ID}")).await;
    assert_eq!(detail.status(), StatusCode::OK);

    let cancelled = app
        .post_form(&format!("/orders/{ORDER_ID}/cancel"), &[])
        .await;
    assert_eq!(
        location(&cancelled).as_deref(),
        Some("/orders?notice=order_cancelled")
    );
    assert_eq!(
        app.upstream().cancellations.first(),
        Some(&json!({ "id": ORDER_ID }))
    );

    // A cancelled order is no longer payable
    let pay = app.get(&format!("/orders/{ORDER_ID}/pay")).await;
    assert_eq!(
        location(&pay).as_deref(),
        Some("/orders?notice=order_not_payable")
    );
}

#[tokio::test]
async fn test_repay_resumes_payment_step() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    let pay = app.get(&format!("/orders/{ORDER_ID}/pay")).await;
    assert_eq!(location(&pay).as_deref(), Some("/checkout/payment"));

    let payment = app.get("/checkout/payment").await;
    assert_eq!(payment.status(), StatusCode::OK);
    assert!(payment.text().await.unwrap().contains(ORDER_CODE));
}

#[tokio::test]
async fn test_bind_wallet_once() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    let bound = app
        .post_json("/wallet/bind", &json!({ "address": PAYER }))
        .await;
    assert_eq!(bound.status(), StatusCode::OK);
    let bound: Value = bound.json().await.unwrap();
    assert_eq!(bound["wallet_address"], PAYER);

    let again = app
        .post_json("/wallet/bind", &json!({ "address": PAYER }))
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(app.upstream().bound_wallets.len(), 1);

    let invalid = app
        .post_json("/wallet/bind", &json!({ "address": "0x123" }))
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oauth_callback_with_wrong_state_is_rejected() {
    let app = TestApp::spawn().await;
    app.start_oauth().await;

    let callback = app.get("/auth/callback?code=auth-code&state=forged").await;
    assert_eq!(
        location(&callback).as_deref(),
        Some("/auth/login?notice=login_failed")
    );
    assert!(app.upstream().code_exchanges.is_empty());
    assert_eq!(location(&app.get("/orders").await).as_deref(), Some("/auth/login"));
}

#[tokio::test]
async fn test_oauth_callback_without_state_is_rejected() {
    let app = TestApp::spawn().await;
    app.start_oauth().await;

    let callback = app.get("/auth/callback?code=auth-code").await;
    assert_eq!(
        location(&callback).as_deref(),
        Some("/auth/login?notice=login_failed")
    );
    assert!(app.upstream().code_exchanges.is_empty());
}

#[tokio::test]
async fn test_oauth_callback_signs_in_once() {
    let app = TestApp::spawn().await;
    let state = app.start_oauth().await;

    let callback = app
        .get(&format!("/auth/callback?code=auth-code&state={state}"))
        .await;
    assert_eq!(location(&callback).as_deref(), Some("/"));
    {
        let upstream = app.upstream();
        let exchange = upstream.code_exchanges.first().expect("code exchanged");
        assert_eq!(exchange["auth_code"], "auth-code");
        assert_eq!(exchange["code_verifier"].as_str().map(str::len), Some(64));
    }
    assert_eq!(app.get("/orders").await.status(), StatusCode::OK);

    // The state is single use
    let replay = app
        .get(&format!("/auth/callback?code=auth-code&state={state}"))
        .await;
    assert_eq!(
        location(&replay).as_deref(),
        Some("/auth/login?notice=login_failed")
    );
}

#[tokio::test]
async fn test_inactive_account_lands_on_activation() {
    let app = TestApp::spawn().await;
    app.upstream().user_status = 0;

    assert_eq!(app.sign_in_with_code().await.as_deref(), Some("/auth/activate"));

    let page = app.get("/auth/activate").await;
    assert_eq!(page.status(), StatusCode::OK);
    assert!(page.text().await.unwrap().contains("Follow Official Account"));

    let activated = app.post_form("/auth/activate", &[]).await;
    assert_eq!(
        location(&activated),
        Some(format!("https://x.com/intent/follow?screen_name={SCREEN_NAME}"))
    );
    assert_eq!(app.upstream().activations.len(), 1);
}

#[tokio::test]
async fn test_status_update_requires_admin() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    app.upstream().order_status = 1;

    let refused = app
        .post_form(&format!("/orders/{ORDER_ID}/status"), &[("status", "6")])
        .await;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    assert!(app.upstream().status_updates.is_empty());
}

#[tokio::test]
async fn test_admin_status_update() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    {
        let mut upstream = app.upstream();
        upstream.user_role = 2;
        upstream.order_status = 7;
    }
    let path = format!("/orders/{ORDER_ID}/status");

    let unchanged = app.post_form(&path, &[("status", "7")]).await;
    assert_eq!(
        location(&unchanged),
        Some(format!("/orders/{ORDER_ID}?notice=status_update_failed"))
    );
    assert!(app.upstream().status_updates.is_empty());

    let delivered = app.post_form(&path, &[("status", "8")]).await;
    assert_eq!(
        location(&delivered),
        Some(format!("/orders/{ORDER_ID}?notice=status_updated"))
    );
    assert_eq!(
        app.upstream().status_updates.first(),
        Some(&json!({ "id": ORDER_ID, "status": 8 }))
    );
}

#[tokio::test]
async fn test_add_machine_by_mac() {
    let app = TestApp::spawn().await;
    app.sign_in().await;

    let list = app.get("/machines").await;
    assert_eq!(list.status(), StatusCode::OK);
    assert!(list.text().await.unwrap().contains("72c5977e9f9861ae"));

    let invalid = app.post_form("/machines", &[("mac_addr", "not-a-mac")]).await;
    assert_eq!(invalid.status(), StatusCode::OK);
    let body = invalid.text().await.unwrap();
    assert!(body.contains("Enter a MAC address like 00:1A:2B:3C:4D:5E"));
    assert!(body.contains("value=\"not-a-mac\""));
    assert!(app.upstream().added_nodes.is_empty());

    let added = app
        .post_form("/machines", &[("mac_addr", "00:1A:2B:3C:4D:5F")])
        .await;
    assert_eq!(
        location(&added).as_deref(),
        Some("/machines?notice=node_added")
    );
    assert_eq!(
        app.upstream().added_nodes.first(),
        Some(&json!({ "mac_addr": "00:1A:2B:3C:4D:5F" }))
    );
}

#[tokio::test]
async fn test_transfer_machine_by_email() {
    let app = TestApp::spawn().await;
    app.sign_in().await;
    let path = format!("/machines/{NODE_KEY}/transfer");

    let invalid = app.post_form(&path, &[("email", "friend.example.com")]).await;
    assert_eq!(invalid.status(), StatusCode::OK);
    assert!(
        invalid
            .text()
            .await
            .unwrap()
            .contains("email must contain exactly one @ symbol")
    );
    assert!(app.upstream().node_transfers.is_empty());

    let moved = app.post_form(&path, &[("email", "friend@example.com")]).await;
    assert_eq!(
        location(&moved).as_deref(),
        Some("/machines?notice=node_transferred")
    );
    assert_eq!(
        app.upstream().node_transfers.first(),
        Some(&json!({ "node_key": NODE_KEY, "email": "friend@example.com" }))
    );
}
