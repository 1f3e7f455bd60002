use std::sync::Arc;

use actix_web::http::{header, StatusCode};
use actix_web::{test, App};
use coursedesk::application::Application;
use coursedesk::domain::DomainEvent;
use coursedesk::gateway::{sign, ClickPayGateway, Gateways, HyperPayGateway};
use coursedesk::http::{configure, AdminKey};
use coursedesk::storage::InMemoryFileStorage;
use coursedesk_events::InMemoryEventStore;
use serde_json::{json, Value};
use uuid::Uuid;

const ADMIN_KEY: &str = "admin-key";
const CLICKPAY_SECRET: &[u8] = b"clickpay-secret";

fn application() -> Application<InMemoryEventStore<DomainEvent>> {
    let gateways = Gateways::new()
        .with(HyperPayGateway::new(b"hyperpay-secret".as_slice()))
        .with(ClickPayGateway::new(CLICKPAY_SECRET));
    Application::new(
        InMemoryEventStore::new(),
        Arc::new(InMemoryFileStorage::new()),
        gateways,
        "http://localhost:8080",
    )
}

fn bearer() -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}"))
}

#[actix_web::test]
async fn it_requires_the_admin_key() {
    let app = test::init_service(
        App::new().configure(configure(application(), AdminKey(ADMIN_KEY.to_string()))),
    )
    .await;

    let missing = test::TestRequest::get()
        .uri("/api/admin/enrollment-diagnostics")
        .to_request();
    let wrong = test::TestRequest::get()
        .uri("/api/admin/enrollment-diagnostics")
        .insert_header((header::AUTHORIZATION, "Bearer nope"))
        .to_request();
    let valid = test::TestRequest::get()
        .uri("/api/admin/enrollment-diagnostics")
        .insert_header(bearer())
        .to_request();

    assert_eq!(
        test::call_service(&app, missing).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        test::call_service(&app, wrong).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(test::call_service(&app, valid).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn it_rejects_a_webhook_with_a_bad_signature() {
    let app = test::init_service(
        App::new().configure(configure(application(), AdminKey(ADMIN_KEY.to_string()))),
    )
    .await;
    let body = json!({
        "tran_ref": "TST2231",
        "cart_id": Uuid::new_v4().to_string(),
        "cart_amount": "150.00",
        "cart_currency": "SAR",
        "payment_result": { "response_status": "A", "response_message": "Authorised" },
    })
    .to_string();

    let req = test::TestRequest::post()
        .uri("/api/payments/clickpay/webhook")
        .insert_header(("X-Signature", "00ff"))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid webhook signature");
}

#[actix_web::test]
async fn it_reports_unknown_carts_as_not_found() {
    let app = test::init_service(
        App::new().configure(configure(application(), AdminKey(ADMIN_KEY.to_string()))),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/carts/{}", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().starts_with("cart "));
}

#[actix_web::test]
async fn it_rejects_malformed_bodies_as_bad_requests() {
    let app = test::init_service(
        App::new().configure(configure(application(), AdminKey(ADMIN_KEY.to_string()))),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .set_json(json!({ "cart_id": "not-a-uuid" }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].is_string());
}

#[actix_web::test]
async fn it_sells_and_delivers_a_pdf_course() {
    let app = test::init_service(
        App::new().configure(configure(application(), AdminKey(ADMIN_KEY.to_string()))),
    )
    .await;

    let category: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/categories")
            .insert_header(bearer())
            .set_json(json!({ "name": "Finance" }))
            .to_request(),
    )
    .await;
    let course: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/courses")
            .insert_header(bearer())
            .set_json(json!({
                "category_id": category["category_id"],
                "title": "Accounting basics",
                "course_type": "Pdf",
                "price": "150.00",
                "currency": "SAR",
            }))
            .to_request(),
    )
    .await;
    let course_id = course["course_id"].as_str().unwrap().to_string();
    let attachment: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/admin/courses/{course_id}/attachments?file_name=guide.pdf"))
            .insert_header(bearer())
            .set_payload("%PDF-1.7 guide")
            .to_request(),
    )
    .await;

    let user_id = Uuid::new_v4();
    let cart: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/carts")
            .set_json(json!({ "user_id": user_id }))
            .to_request(),
    )
    .await;
    let cart_id = cart["cart_id"].as_str().unwrap().to_string();
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/carts/{cart_id}/items"))
            .set_json(json!({ "course_id": course_id }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let order: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/orders")
            .set_json(json!({ "cart_id": cart_id, "user_id": user_id }))
            .to_request(),
    )
    .await;
    let order_id = order["order_id"].as_str().unwrap().to_string();
    let payment: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/orders/{order_id}/payments"))
            .set_json(json!({ "provider": "clickpay" }))
            .to_request(),
    )
    .await;

    let webhook = json!({
        "tran_ref": "TST2231",
        "cart_id": payment["payment_id"],
        "cart_amount": "150.00",
        "cart_currency": "SAR",
        "payment_result": { "response_status": "A", "response_message": "Authorised" },
    })
    .to_string();
    let signature = sign(CLICKPAY_SECRET, webhook.as_bytes()).unwrap();
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/payments/clickpay/webhook")
            .insert_header(("X-Signature", signature))
            .set_payload(webhook)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let report: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/admin/fix-missing-enrollments")
            .insert_header(bearer())
            .to_request(),
    )
    .await;
    assert_eq!(report["created"], 1);
    let order: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/orders/{order_id}"))
            .to_request(),
    )
    .await;
    let enrollment_id = order["enrollments"][0].as_str().unwrap().to_string();
    let links: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/admin/enrollments/{enrollment_id}/secure-links"))
            .insert_header(bearer())
            .set_json(json!({ "attachment_ids": [attachment["attachment_id"]] }))
            .to_request(),
    )
    .await;
    let token = links["links"][0]["token"].as_str().unwrap().to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/secure-download/{token}"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), b"%PDF-1.7 guide");

    let enrollment: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/admin/enrollments/{enrollment_id}"))
            .insert_header(bearer())
            .to_request(),
    )
    .await;
    assert_eq!(enrollment["status"], "Completed");
    assert_eq!(enrollment["links"][0]["download_count"], 1);
}
