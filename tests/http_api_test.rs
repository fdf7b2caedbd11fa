mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::TestApp;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn create_order_body() -> Value {
    json!({
        "amount_minor_units": 135000,
        "currency": "INR",
        "shipping_address": {
            "full_name": "Asha Rao",
            "email": "asha@example.com",
            "phone": "+91 98765 43210",
            "address_line1": "12 MG Road, Camp",
            "city": "Pune",
            "state": "Maharashtra",
            "postal_code": "411001"
        },
        "cart_items": [
            {"id": "ghee-500", "name": "Ghee 500ml", "unit_price": "650.00", "quantity": 1, "total_price": "650.00"},
            {"id": "honey-250", "name": "Honey 250g", "unit_price": "350.00", "quantity": 2, "total_price": "700.00"}
        ]
    })
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::POST, "/api/v1/orders", None, Some(create_order_body()))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(common::order_count(app.db()).await, 0);
}

#[tokio::test]
async fn token_signed_with_another_secret_is_unauthorized() {
    let app = TestApp::new().await;
    let forged = checkout_api::auth::JwtVerifier::new("some_other_secret_that_is_long_enough_too")
        .issue(Uuid::new_v4(), None, chrono::Duration::hours(1))
        .unwrap();

    let (status, body) = app
        .request(Method::GET, "/api/v1/orders", Some(&forged), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn malformed_json_is_a_transport_error() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from("{\"amount_minor_units\": 10"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "malformed_request");
}

#[tokio::test]
async fn validation_failure_lists_every_reason() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4());
    let mut payload = create_order_body();
    payload["shipping_address"]["postal_code"] = json!("011001");
    payload["shipping_address"]["full_name"] = json!("A");
    payload["cart_items"][0]["total_price"] = json!("900.00");

    let (status, body) = app
        .request(Method::POST, "/api/v1/orders", Some(&token), Some(payload))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    let errors = body["errors"].as_array().expect("error list");
    assert_eq!(errors.len(), 3, "{:?}", errors);
    assert_eq!(common::order_count(app.db()).await, 0);
}

#[tokio::test]
async fn create_then_read_back_by_number_and_list() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token_for(owner);

    let (status, created) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(create_order_body()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["success"], true);
    assert_eq!(created["amount_minor_units"], 135000);
    let order_number = created["order_number"].as_str().unwrap().to_string();

    let (status, fetched) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/by-number/{}", order_number),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["success"], true);
    assert_eq!(fetched["data"]["order_number"], order_number.as_str());
    assert_eq!(fetched["data"]["payment_status"], "pending");
    assert_eq!(fetched["data"]["items"].as_array().unwrap().len(), 2);
    assert!(fetched["meta"]["request_id"].is_string());

    let (status, listed) = app
        .request(Method::GET, "/api/v1/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    // Someone else cannot see it
    let stranger = app.token_for(Uuid::new_v4());
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/by-number/{}", order_number),
            Some(&stranger),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "order_not_found");
}

#[tokio::test]
async fn verify_endpoint_settles_and_is_idempotent() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let token = app.token_for(owner);
    let (_, created) = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(&token),
            Some(create_order_body()),
        )
        .await;
    let gateway_ref = created["gateway_order_reference"].as_str().unwrap();
    let payload = json!({
        "remote_order_reference": gateway_ref,
        "remote_payment_reference": "pay_ABC123",
        "signature": app.signer().sign(gateway_ref, "pay_ABC123"),
        "local_order_id": created["local_order_id"],
    });

    let (status, first) = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&token),
            Some(payload.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(first["payment_status"], "paid");
    assert_eq!(first["status"], "confirmed");
    assert_eq!(first["already_verified"], false);

    let (status, second) = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(&token),
            Some(payload),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["already_verified"], true);
}

#[tokio::test]
async fn tampered_signature_is_a_client_error() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4());
    let payload = json!({
        "remote_order_reference": "order_X",
        "remote_payment_reference": "pay_Y",
        "signature": "deadbeef",
        "local_order_id": Uuid::new_v4(),
    });

    let (status, body) = app
        .request(Method::POST, "/api/v1/payments/verify", Some(&token), Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "signature_mismatch");
}

#[tokio::test]
async fn cod_endpoint_creates_cod_pending_order() {
    let app = TestApp::new().await;
    let token = app.token_for(Uuid::new_v4());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/orders/cod",
            Some(&token),
            Some(create_order_body()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert!(body.get("gateway_order_reference").is_none());
    assert_eq!(app.gateway.calls(), 0);
}

#[tokio::test]
async fn renewal_trigger_requires_cron_secret() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request(Method::POST, "/internal/subscriptions/renew", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/internal/subscriptions/renew")
        .header("x-cron-secret", "cron-secret")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let summary: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(summary["processed"], 0);
    assert_eq!(summary["failed"], 0);
}

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/payments/verify"].is_object());
}

#[tokio::test]
async fn request_id_is_echoed_on_responses() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-from-client")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-from-client"
    );

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
