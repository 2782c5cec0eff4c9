#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Route tests driving the router with in-memory payment services.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tourdesk_api::{create_router, AppState, Config};
use tourdesk_payments::{
    sign_payload, signature::now_ms, BookingEmailService, InMemoryBookingRepository,
    MockInvoiceProvider, PaymentService, StaticProductCatalog, Tour, SIGNATURE_HEADER,
};
use tourdesk_shared::PaymentStatus;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "route_test_secret";

struct TestApp {
    router: Router,
    repo: Arc<InMemoryBookingRepository>,
    tour_id: Uuid,
    unmapped_tour_id: Uuid,
}

async fn app_with(provider: MockInvoiceProvider) -> TestApp {
    let repo = Arc::new(InMemoryBookingRepository::new());
    let tour_id = Uuid::new_v4();
    let unmapped_tour_id = Uuid::new_v4();
    for (id, title) in [(tour_id, "Gorilla Trek"), (unmapped_tour_id, "City Walk")] {
        repo.insert_tour(Tour {
            id,
            slug: title.to_lowercase().replace(' ', "-"),
            title: title.into(),
            price_cents: 20_000,
            duration_days: 1,
        })
        .await;
    }

    let payments = PaymentService::new(
        repo.clone(),
        Arc::new(StaticProductCatalog::from_entries([(
            tour_id,
            "PC-gorilla".to_string(),
        )])),
        Arc::new(provider),
        Some(SECRET.to_string()),
        Arc::new(BookingEmailService::disabled()),
    );
    let state = AppState::new(Config::new("postgres://unused"), payments);

    TestApp {
        router: create_router(state),
        repo,
        tour_id,
        unmapped_tour_id,
    }
}

async fn app() -> TestApp {
    app_with(MockInvoiceProvider::new()).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook_request(body: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::post("/api/payments/webhook").header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn create_booking(app: &TestApp, tour_id: Uuid) -> String {
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/bookings",
            json!({
                "tourId": tour_id,
                "customerName": "Jane Doe",
                "customerEmail": "jane@example.com",
                "phone": "+250 788 123 456",
                "participants": 1,
                "startDate": "2025-09-01"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

// =============================================================================
// Health and bookings
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_get_booking() {
    let app = app().await;
    let id = create_booking(&app, app.tour_id).await;

    let (status, body) = send(
        &app.router,
        Request::get(format!("/api/bookings/{}", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paymentStatus"], "PENDING");
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["totalAmountCents"], 20_000);
    assert_eq!(body["startDate"], "2025-09-01");
    assert_eq!(body["tourPackage"]["title"], "Gorilla Trek");
}

#[tokio::test]
async fn test_create_booking_validation() {
    let app = app().await;
    let (status, _) = send(
        &app.router,
        post_json(
            "/api/bookings",
            json!({
                "tourId": app.tour_id,
                "customerName": "Jane",
                "customerEmail": "jane@example.com",
                "participants": 0,
                "startDate": "2025-09-01"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_booking() {
    let app = app().await;
    for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
        let (status, body) = send(
            &app.router,
            Request::get(format!("/api/bookings/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Booking not found");
    }
}

// =============================================================================
// Initialize
// =============================================================================

#[tokio::test]
async fn test_initialize_payment() {
    let app = app().await;
    let id = create_booking(&app, app.tour_id).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/payments/initialize", json!({ "bookingId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["invoiceId"].is_string());
    assert!(body["paymentUrl"].is_string());

    let booking = app.repo.booking(id.parse().unwrap()).await.unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Processing);
}

#[tokio::test]
async fn test_initialize_bad_requests() {
    let app = app().await;

    let (status, body) = send(
        &app.router,
        post_json("/api/payments/initialize", json!({ "bookingId": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Booking ID is required");

    let (status, _) = send(
        &app.router,
        Request::post("/api/payments/initialize")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/api/payments/initialize",
            json!({ "bookingId": Uuid::new_v4() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_initialize_missing_product_mapping() {
    let app = app().await;
    let id = create_booking(&app, app.unmapped_tour_id).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/payments/initialize", json!({ "bookingId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to initialize payment");
    assert!(body["details"].as_str().unwrap().contains("City Walk"));

    let booking = app.repo.booking(id.parse().unwrap()).await.unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_initialize_unconfigured_provider() {
    let app = app_with(MockInvoiceProvider::unconfigured()).await;
    let id = create_booking(&app, app.tour_id).await;

    let (status, _) = send(
        &app.router,
        post_json("/api/payments/initialize", json!({ "bookingId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// =============================================================================
// Webhook
// =============================================================================

async fn initialized(app: &TestApp) -> (String, String) {
    let id = create_booking(app, app.tour_id).await;
    let (_, body) = send(
        &app.router,
        post_json("/api/payments/initialize", json!({ "bookingId": id })),
    )
    .await;
    (id, body["invoiceId"].as_str().unwrap().to_string())
}

fn paid_body(invoice: &str) -> String {
    json!({
        "data": {
            "invoiceNumber": invoice,
            "transactionId": "",
            "paymentStatus": "PAID",
            "amount": 100,
            "currency": "USD"
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_webhook_marks_booking_paid() {
    let app = app().await;
    let (id, invoice) = initialized(&app).await;

    let body = paid_body(&invoice);
    let signature = sign_payload(SECRET, now_ms(), &body).unwrap();
    let (status, response) = send(&app.router, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({ "received": true }));

    let (_, booking) = send(
        &app.router,
        Request::get(format!("/api/bookings/{}", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(booking["paymentStatus"], "PAID");
    assert_eq!(booking["status"], "CONFIRMED");
    assert!(booking["paidAt"].is_string());
    assert!(booking["confirmedAt"].is_string());
}

#[tokio::test]
async fn test_webhook_signature_failures_are_generic_401() {
    let app = app().await;
    let (_, invoice) = initialized(&app).await;
    let body = paid_body(&invoice);

    let stale = sign_payload(SECRET, now_ms() - 301_000, &body).unwrap();
    let wrong = sign_payload("other", now_ms(), &body).unwrap();

    for signature in [None, Some("garbage".to_string()), Some(stale), Some(wrong)] {
        let (status, response) = send(&app.router, webhook_request(&body, signature)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response, json!({ "error": "Invalid webhook signature" }));
    }
}

#[tokio::test]
async fn test_webhook_non_utf8_body_is_401() {
    let app = app().await;
    let body: &[u8] = &[0x7b, 0xff, 0xfe, 0x7d];
    let request = Request::post("/api/payments/webhook")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, "t=1,s=00")
        .body(Body::from(body.to_vec()))
        .unwrap();

    let (status, response) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response, json!({ "error": "Invalid webhook signature" }));
}

#[tokio::test]
async fn test_webhook_bad_payloads() {
    let app = app().await;

    let body = "not json";
    let signature = sign_payload(SECRET, now_ms(), body).unwrap();
    let (status, response) = send(&app.router, webhook_request(body, Some(signature))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Invalid JSON payload");

    let body = paid_body("no-such-invoice");
    let signature = sign_payload(SECRET, now_ms(), &body).unwrap();
    let (status, response) = send(&app.router, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Booking not found");
}

// =============================================================================
// Reset
// =============================================================================

#[tokio::test]
async fn test_reset_processing_booking() {
    let app = app().await;
    let (id, _) = initialized(&app).await;

    let (status, body) = send(
        &app.router,
        Request::post(format!("/api/bookings/{}/reset-payment", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["paymentStatus"], "PENDING");

    let booking = app.repo.booking(id.parse().unwrap()).await.unwrap();
    assert!(booking.payment_intent_id.is_none());
}

#[tokio::test]
async fn test_reset_paid_booking_rejected() {
    let app = app().await;
    let (id, invoice) = initialized(&app).await;
    let body = paid_body(&invoice);
    let signature = sign_payload(SECRET, now_ms(), &body).unwrap();
    send(&app.router, webhook_request(&body, Some(signature))).await;

    let (status, body) = send(
        &app.router,
        Request::post(format!("/api/bookings/{}/reset-payment", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["currentStatus"], "PAID");

    let booking = app.repo.booking(id.parse().unwrap()).await.unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_reset_unknown_booking() {
    let app = app().await;
    let (status, _) = send(
        &app.router,
        Request::post(format!("/api/bookings/{}/reset-payment", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
