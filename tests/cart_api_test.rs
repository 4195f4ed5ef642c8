mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use serde_json::{json, Value};

fn tee(quantity: i64) -> Value {
    json!({
        "productId": "tee-01",
        "name": "Heavyweight Tee",
        "image": "/img/tee.jpg",
        "price": 25,
        "size": "M",
        "color": "black",
        "quantity": quantity
    })
}

fn total_of(cart: &Value) -> f64 {
    match &cart["totalPrice"] {
        Value::String(s) => s.parse().unwrap(),
        other => other.as_f64().unwrap(),
    }
}

#[tokio::test]
async fn identical_lines_merge_quantities() {
    let app = TestApp::new().await;

    app.request_authenticated(Method::POST, "/api/v1/cart/items", Some(tee(1)))
        .await;
    let response = app
        .request_authenticated(Method::POST, "/api/v1/cart/items", Some(tee(2)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;

    let items = cart["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 3);
    assert_eq!(total_of(&cart), 75.0);
}

#[tokio::test]
async fn different_size_is_a_separate_line() {
    let app = TestApp::new().await;

    app.request_authenticated(Method::POST, "/api/v1/cart/items", Some(tee(1)))
        .await;
    let mut large = tee(1);
    large["size"] = json!("L");
    let cart = response_json(
        app.request_authenticated(Method::POST, "/api/v1/cart/items", Some(large))
            .await,
    )
    .await;

    assert_eq!(cart["items"].as_array().unwrap().len(), 2);
    assert_eq!(total_of(&cart), 50.0);
}

#[tokio::test]
async fn guest_cart_merges_into_user_cart() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items?guestId=guest-42",
            Some(tee(2)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.request_authenticated(Method::POST, "/api/v1/cart/items", Some(tee(1)))
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/merge",
            Some(json!({ "guestId": "guest-42" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = response_json(response).await;
    assert_eq!(cart["items"][0]["quantity"], 3);

    // The guest cart is gone after merging
    let guest = response_json(
        app.request(Method::GET, "/api/v1/cart?guestId=guest-42", None, None)
            .await,
    )
    .await;
    assert!(guest["items"].as_array().unwrap().is_empty());
    assert!(guest["id"].is_null());
}

#[tokio::test]
async fn clearing_empties_the_cart() {
    let app = TestApp::new().await;
    app.request_authenticated(Method::POST, "/api/v1/cart/items", Some(tee(1)))
        .await;

    let response = app
        .request_authenticated(Method::DELETE, "/api/v1/cart", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["message"], "Cart cleared");

    let cart = response_json(
        app.request_authenticated(Method::GET, "/api/v1/cart", None)
            .await,
    )
    .await;
    assert!(cart["items"].as_array().unwrap().is_empty());
    assert_eq!(total_of(&cart), 0.0);
}

#[tokio::test]
async fn anonymous_requests_need_a_guest_id() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::POST, "/api/v1/cart/merge", Some(json!({ "guestId": "g" })), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_quantity_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(Method::POST, "/api/v1/cart/items", Some(tee(0)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
