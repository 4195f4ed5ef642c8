mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn coupon_body(code: &str) -> Value {
    let now = Utc::now();
    json!({
        "code": code,
        "description": "Spring sale",
        "discountType": "percentage",
        "discountValue": 15,
        "minPurchase": 50,
        "maxDiscount": 20,
        "validFrom": (now - Duration::days(1)).to_rfc3339(),
        "validUntil": (now + Duration::days(7)).to_rfc3339(),
        "usageLimit": 2
    })
}

fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        other => other.to_string().parse().expect("decimal number"),
    }
}

async fn create(app: &TestApp, body: Value) -> (StatusCode, Value) {
    let response = app
        .request_as_admin(Method::POST, "/api/v1/coupons", Some(body))
        .await;
    let status = response.status();
    (status, response_json(response).await)
}

async fn validate(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let response = app.request(Method::GET, uri, None, None).await;
    let status = response.status();
    (status, response_json(response).await)
}

#[tokio::test]
async fn validate_accepts_redeemable_coupon_case_insensitively() {
    let app = TestApp::new().await;
    let (status, created) = create(&app, coupon_body("spring15")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["code"], "SPRING15");
    assert_eq!(created["usageCount"], 0);

    let (status, body) = validate(&app, "/api/v1/coupons/validate/Spring15?totalAmount=80").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "SPRING15");
    assert_eq!(decimal_field(&body["discount"]), dec!(12));

    // Validation is read-only
    let (_, again) = validate(&app, "/api/v1/coupons/validate/SPRING15").await;
    assert_eq!(again["usageCount"], 0);
    assert!(again.get("discount").is_none());
}

#[tokio::test]
async fn blank_or_unparseable_total_skips_the_minimum_check() {
    let app = TestApp::new().await;
    create(&app, coupon_body("ok5")).await;

    for uri in [
        "/api/v1/coupons/validate/ok5?totalAmount=",
        "/api/v1/coupons/validate/ok5?totalAmount=abc",
    ] {
        let (status, body) = validate(&app, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}: {body}");
        assert_eq!(body["code"], "OK5");
        assert!(body.get("discount").is_none());
    }
}

#[tokio::test]
async fn validate_reports_each_rejection() {
    let app = TestApp::new().await;

    let (status, body) = validate(&app, "/api/v1/coupons/validate/GHOST").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Invalid coupon code");

    create(&app, coupon_body("MIN50")).await;
    let (status, body) = validate(&app, "/api/v1/coupons/validate/MIN50?totalAmount=20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Minimum purchase of $50 required");
    assert_eq!(body["error"], "coupon_minimum_not_met");

    let now = Utc::now();
    let mut future = coupon_body("LATER");
    future["validFrom"] = json!((now + Duration::days(2)).to_rfc3339());
    future["validUntil"] = json!((now + Duration::days(3)).to_rfc3339());
    create(&app, future).await;
    let (status, body) = validate(&app, "/api/v1/coupons/validate/LATER").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Coupon is not valid at this time");

    let mut inactive = coupon_body("OFF");
    inactive["isActive"] = json!(false);
    create(&app, inactive).await;
    let (status, body) = validate(&app, "/api/v1/coupons/validate/OFF").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Coupon is no longer active");
}

#[tokio::test]
async fn usage_limit_is_enforced_after_uses() {
    let app = TestApp::new().await;
    let (_, created) = create(&app, coupon_body("TWICE")).await;
    let id = created["id"].as_str().unwrap().to_string();

    for expected in 1..=2 {
        let response = app
            .request_authenticated(Method::PUT, &format!("/api/v1/coupons/{}/use", id), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["usageCount"], expected);
    }

    let (status, body) = validate(&app, "/api/v1/coupons/validate/TWICE").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Coupon has reached its usage limit");
}

#[tokio::test]
async fn admin_crud_round() {
    let app = TestApp::new().await;
    let (_, first) = create(&app, coupon_body("FIRST")).await;
    let (_, _second) = create(&app, coupon_body("SECOND")).await;

    let (status, body) = create(&app, coupon_body("first")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let list = response_json(
        app.request_as_admin(Method::GET, "/api/v1/coupons", None)
            .await,
    )
    .await;
    let codes: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["SECOND", "FIRST"]);

    let id = first["id"].as_str().unwrap();
    let response = app
        .request_as_admin(
            Method::PUT,
            &format!("/api/v1/coupons/{}", id),
            Some(json!({ "isActive": false, "description": "retired" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = response_json(response).await;
    assert_eq!(updated["isActive"], false);
    assert_eq!(updated["description"], "retired");

    let response = app
        .request_as_admin(Method::DELETE, &format!("/api/v1/coupons/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["message"], "Coupon deleted");

    let response = app
        .request_as_admin(Method::DELETE, &format!("/api/v1/coupons/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_endpoints_reject_customers() {
    let app = TestApp::new().await;

    let response = app
        .request_authenticated(Method::POST, "/api/v1/coupons", Some(coupon_body("NOPE")))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.request(Method::GET, "/api/v1/coupons", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_coupon_terms_are_rejected() {
    let app = TestApp::new().await;

    let mut over = coupon_body("OVER");
    over["discountValue"] = json!(150);
    let (status, body) = create(&app, over).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let mut backwards = coupon_body("BACKWARDS");
    let now = Utc::now();
    backwards["validFrom"] = json!((now + Duration::days(2)).to_rfc3339());
    backwards["validUntil"] = json!(now.to_rfc3339());
    let (status, _) = create(&app, backwards).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
