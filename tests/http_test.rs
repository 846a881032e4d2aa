mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{harness, sale_order, Creation, Harness, RecordingQueue, FAKE};
use payment_gateway::domain::{Transaction, TransactionState};
use payment_gateway::middleware::RequestLogSettings;
use payment_gateway::providers::CardErrorCode;
use payment_gateway::services::{GenerateOptions, WebhookDispatcher};
use payment_gateway::{create_app, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(h: &Harness, queue: Arc<RecordingQueue>) -> Router {
    create_app(AppState {
        service: h.service.clone(),
        dispatcher: WebhookDispatcher::new(queue, h.service.clone()),
        origins: h.origins.clone(),
        request_log: RequestLogSettings { log_body: true },
    })
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_lists_providers() {
    let h = harness();
    let response = app(&h, Arc::default())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["providers"], json!(["fake", "other"]));
}

#[tokio::test]
async fn test_http_webhook_enqueues_and_acks_empty() {
    let h = harness();
    let queue = Arc::new(RecordingQueue::default());

    let response = app(&h, queue.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment-gateway-http-webhook/fake/process_event")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("id=fake_1&status=paid"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());

    let jobs = queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].provider_name, FAKE);
    assert_eq!(jobs[0].method_name, "process_event");
    assert_eq!(jobs[0].params, json!({"id": "fake_1", "status": "paid"}));
    assert_eq!(h.fake.webhook_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_json_webhook_acks_true() {
    let h = harness();
    let queue = Arc::new(RecordingQueue::default());

    let response = app(&h, queue.clone())
        .oneshot(post_json(
            "/payment-gateway-json-webhook/fake/anything",
            json!({"id": "fake_1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!(true));
    // Method names are checked by the worker, not at ingress.
    assert_eq!(queue.jobs()[0].method_name, "anything");
}

#[tokio::test]
async fn test_large_json_webhook_is_queued_with_body_logging_on() {
    let h = harness();
    let queue = Arc::new(RecordingQueue::default());
    let items: Vec<Value> = (0..200)
        .map(|n| {
            json!({"NotificationRequestItem": {
                "pspReference": format!("88{:014}", n),
                "merchantReference": format!("SO{:04}", n),
                "eventCode": "AUTHORISATION",
                "success": "true",
                "additionalData": {"hmacSignature": "c2lnbmF0dXJlLXBsYWNlaG9sZGVyLXZhbHVl"}
            }})
        })
        .collect();
    let payload = json!({"live": "false", "notificationItems": items});
    assert!(payload.to_string().len() > 16 * 1024);

    let response = app(&h, queue.clone())
        .oneshot(post_json(
            "/payment-gateway-json-webhook/fake/process_notification",
            payload.clone(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!(true));
    let jobs = queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].params, payload);
}

#[tokio::test]
async fn test_return_redirects_to_success_url() {
    let h = harness();
    h.fake.set_creation(Creation::Pending);
    let options = GenerateOptions {
        redirect_success_url: Some("https://shop.test/done".to_string()),
        redirect_cancel_url: Some("https://shop.test/cancel".to_string()),
        ..GenerateOptions::default()
    };
    let tx = h
        .service
        .generate(FAKE, sale_order("SO200", "12.00").as_ref(), options)
        .await
        .unwrap();

    let response = app(&h, Arc::default())
        .oneshot(
            Request::builder()
                .uri(format!("/payment-gateway-return/fake?id=fake_{}", tx.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "https://shop.test/done");
    assert_eq!(
        h.service.get(tx.id).await.unwrap().state,
        TransactionState::Succeeded
    );
}

#[tokio::test]
async fn test_abandoned_return_redirects_to_cancel_url() {
    let h = harness();
    h.fake.set_creation(Creation::Pending);
    let options = GenerateOptions {
        redirect_success_url: Some("https://shop.test/done".to_string()),
        redirect_cancel_url: Some("https://shop.test/cancel".to_string()),
        ..GenerateOptions::default()
    };
    let tx = h
        .service
        .generate(FAKE, sale_order("SO201", "12.00").as_ref(), options)
        .await
        .unwrap();

    let response = app(&h, Arc::default())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment-gateway-return/fake")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!("id=fake_{}&status=abandoned", tx.id)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "https://shop.test/cancel");
}

#[tokio::test]
async fn test_generate_and_fetch_transaction() {
    let h = harness();
    let app = app(&h, Arc::default());

    let response = app
        .clone()
        .oneshot(post_json(
            "/transactions",
            json!({
                "provider": "fake",
                "origin": {"kind": "sale_order", "name": "SO202", "amount_total": "29.47", "currency": "USD"},
                "payment_token": "tok_visa"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Transaction = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(created.state, TransactionState::Succeeded);
    assert_eq!(created.amount, common::dec("29.47"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/transactions/{}", created.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Captured already: a second capture is a no-op, a cancel is refused.
    let response = app
        .clone()
        .oneshot(post_empty(&format!("/transactions/{}/capture", created.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.fake.captures(), 1);

    let response = app
        .oneshot(post_empty(&format!("/transactions/{}/cancel", created.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_generate_by_payment_mode_is_rejected_when_unmapped() {
    let h = harness();

    let response = app(&h, Arc::default())
        .oneshot(post_json(
            "/transactions",
            json!({
                "payment_mode": "wire",
                "origin": {"kind": "invoice", "number": "INV/1", "residual": "5.00", "currency": "EUR"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_declined_card_is_payment_required() {
    let h = harness();
    h.fake.set_creation(Creation::Declined(CardErrorCode::ExpiredCard));

    let response = app(&h, Arc::default())
        .oneshot(post_json(
            "/transactions",
            json!({
                "provider": "fake",
                "origin": {"kind": "sale_order", "name": "SO203", "amount_total": "10.00", "currency": "USD"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "The card has expired.");
    assert_eq!(body["status"], 402);
}

#[tokio::test]
async fn test_unknown_transaction_is_not_found() {
    let h = harness();

    let response = app(&h, Arc::default())
        .oneshot(
            Request::builder()
                .uri(format!("/transactions/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_capture_origin_route() {
    let h = harness();
    h.fake.set_creation(Creation::Pending);
    let app = app(&h, Arc::default());

    let response = app
        .clone()
        .oneshot(post_json(
            "/transactions",
            json!({
                "provider": "fake",
                "origin": {"kind": "invoice", "number": "INV-9", "residual": "8.00", "currency": "EUR"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(post_empty("/origins/invoice/INV-9/capture"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Still pending, nothing to capture yet.
    assert_eq!(body_json(response).await, json!([]));
}
