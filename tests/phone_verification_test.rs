//! OTP issuance, lockout and phone-account linking over HTTP.

mod common;

use axum::http::{header, Method, StatusCode};
use common::{json_body, TestApp};
use serde_json::json;

const PHONE: &str = "+201001234567";

fn wrong_code(actual: &str) -> &'static str {
    if actual == "000000" {
        "111111"
    } else {
        "000000"
    }
}

/// App with no resend cooldown so a test can request several codes.
async fn app_without_cooldown() -> TestApp {
    TestApp::with_config(|cfg| cfg.otp.cooldown_secs = 0).await
}

async fn fresh_code(app: &TestApp) -> String {
    let response = app
        .request(Method::POST, "/api/v1/auth/otp", Some(json!({ "phone": PHONE })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    app.stored_otp(PHONE).await.expect("code stored for phone")
}

#[tokio::test]
async fn second_request_inside_cooldown_is_rate_limited() {
    let app = TestApp::new().await;

    let first = app
        .request(Method::POST, "/api/v1/auth/otp", Some(json!({ "phone": PHONE })))
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(json_body(first).await["success"], true);

    let second = app
        .request(Method::POST, "/api/v1/auth/otp", Some(json!({ "phone": PHONE })))
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = second
        .headers()
        .get(header::RETRY_AFTER)
        .expect("retry-after header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
}

#[tokio::test]
async fn malformed_phone_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::POST, "/api/v1/auth/otp", Some(json!({ "phone": "call me" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn correct_code_verifies_once() {
    let app = TestApp::new().await;
    let code = fresh_code(&app).await;

    let verify = json!({ "phone": PHONE, "code": code });
    let response = app
        .request(Method::POST, "/api/v1/auth/otp/verify", Some(verify.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let reused = app
        .request(Method::POST, "/api/v1/auth/otp/verify", Some(verify))
        .await;
    assert_eq!(reused.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn repeated_wrong_codes_lock_the_phone() {
    let app = TestApp::new().await;
    let code = fresh_code(&app).await;
    let wrong = json!({ "phone": PHONE, "code": wrong_code(&code) });

    for _ in 0..4 {
        let response = app
            .request(Method::POST, "/api/v1/auth/otp/verify", Some(wrong.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    let locked = app
        .request(Method::POST, "/api/v1/auth/otp/verify", Some(wrong))
        .await;
    assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);

    // the right code no longer helps while locked
    let response = app
        .request(
            Method::POST,
            "/api/v1/auth/otp/verify",
            Some(json!({ "phone": PHONE, "code": code })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn linking_without_a_code_is_refused() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/auth/link-account",
            Some(json!({
                "phone": PHONE,
                "email": "amira@example.com",
                "password": "correct horse battery",
                "name": "Amira Hassan"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["details"], "otp");
}

#[tokio::test]
async fn phone_account_is_registered_then_linked_to_an_email() {
    let app = app_without_cooldown().await;

    let code = fresh_code(&app).await;
    let registered = app
        .request(
            Method::POST,
            "/api/v1/auth/phone-register",
            Some(json!({ "phone": PHONE, "name": "Amira Hassan", "otp": code })),
        )
        .await;
    assert_eq!(registered.status(), StatusCode::CREATED);
    let registered = json_body(registered).await;
    assert_eq!(
        registered["data"]["email"],
        "201001234567@phone.servicehub.local"
    );

    let link = |otp: String| {
        json!({
            "phone": PHONE,
            "email": "amira@example.com",
            "password": "correct horse battery",
            "name": "Amira Hassan",
            "otp": otp
        })
    };

    let code = fresh_code(&app).await;
    let linked = app
        .request(Method::POST, "/api/v1/auth/link-account", Some(link(code)))
        .await;
    assert_eq!(linked.status(), StatusCode::OK);
    let linked = json_body(linked).await;
    assert_eq!(linked["success"], true);
    assert_eq!(linked["linked"], true);

    let code = fresh_code(&app).await;
    let again = app
        .request(Method::POST, "/api/v1/auth/link-account", Some(link(code)))
        .await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(json_body(again).await["linked"], false);
}
