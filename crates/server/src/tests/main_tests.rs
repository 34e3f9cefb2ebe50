use super::*;
use axum::{
    body,
    body::Body,
    http::{header, Request},
};
use rust_decimal_macros::dec;
use shared::protocol::{
    InventoryPayload, MeResponse, OrganizationPayload, ProductPayload, SaleReceipt,
};
use tower::ServiceExt;

async fn test_app() -> Router {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let state = Arc::new(AppState {
        api: ApiContext { storage },
        auth: AuthConfig {
            token_secret: "test-secret".into(),
            token_ttl_seconds: 60,
        },
    });
    build_router(state)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn login_token(app: &Router, email: &str) -> String {
    let request = Request::post("/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "email": email, "name": "Test User" }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let dto: LoginResponse = json_body(response).await;
    dto.token
}

async fn create_test_organization(app: &Router) -> i64 {
    let request = Request::post("/organizations")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "name": "Test Bar", "price_increase_step": "0.50" }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let dto: OrganizationPayload = json_body(response).await;
    dto.organization_id.0
}

/// Logs a user in and walks them through onboarding; returns the cookie value
/// that authenticates later requests.
async fn onboarded_session(app: &Router, email: &str, organization_id: i64) -> String {
    let token = login_token(app, email).await;
    let request = Request::post("/account/onboarding")
        .header("content-type", "application/json")
        .header(header::COOKIE, format!("jwt={token}"))
        .body(Body::from(
            serde_json::json!({ "organization_id": organization_id, "accept_terms": true })
                .to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    format!("jwt={token}")
}

async fn authed_post(
    app: &Router,
    cookie: &str,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .header(header::COOKIE, cookie.to_string())
        .body(Body::from(body.to_string()))
        .expect("request");
    app.clone().oneshot(request).await.expect("response")
}

async fn authed_get(app: &Router, cookie: &str, uri: &str) -> axum::response::Response {
    let request = Request::get(uri)
        .header(header::COOKIE, cookie.to_string())
        .body(Body::empty())
        .expect("request");
    app.clone().oneshot(request).await.expect("response")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn callback_without_token_redirects_to_login_and_sets_no_cookie() {
    let app = test_app().await;
    let request = Request::get("/auth/callback")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).expect("location"),
        "/login?error=missing_token"
    );
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn callback_with_token_sets_cookie_and_defaults_to_dashboard() {
    let app = test_app().await;
    let request = Request::get("/auth/callback?token=opaque-credential-123")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).expect("location"),
        "/dashboard"
    );

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("cookie")
        .to_str()
        .expect("ascii");
    assert!(cookie.starts_with("jwt=opaque-credential-123"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=86400"));
}

#[tokio::test]
async fn callback_honors_the_redirect_parameter() {
    let app = test_app().await;
    let request = Request::get("/auth/callback?token=opaque&redirect=/pos")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).expect("location"),
        "/pos"
    );
    assert!(response.headers().get(header::SET_COOKIE).is_some());
}

#[tokio::test]
async fn login_issues_a_token_the_account_route_accepts() {
    let app = test_app().await;
    let token = login_token(&app, "alice@example.com").await;

    let response = authed_get(&app, &format!("jwt={token}"), "/account").await;
    assert_eq!(response.status(), StatusCode::OK);
    let me: MeResponse = json_body(response).await;
    assert_eq!(me.email, "alice@example.com");
    assert!(me.needs_onboarding);
}

#[tokio::test]
async fn protected_routes_reject_missing_or_garbage_tokens() {
    let app = test_app().await;

    let bare = Request::get("/categories")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(bare).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = authed_get(&app, "jwt=not-a-token", "/categories").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn onboarding_catalog_and_sale_flow_works_end_to_end() {
    let app = test_app().await;
    let organization_id = create_test_organization(&app).await;
    let cookie = onboarded_session(&app, "admin@example.com", organization_id).await;

    let response = authed_post(
        &app,
        &cookie,
        "/categories",
        serde_json::json!({ "name": "Draft", "dynamic_pricing": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let category: shared::protocol::CategorySummary = json_body(response).await;

    let response = authed_post(
        &app,
        &cookie,
        "/products",
        serde_json::json!({
            "name": "House Lager",
            "category_id": category.category_id.0,
            "base_price": "4.00",
            "max_price": "6.00",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let product: ProductPayload = json_body(response).await;

    let response = authed_post(
        &app,
        &cookie,
        "/inventory/add",
        serde_json::json!({ "product_id": product.product_id.0, "quantity": "20" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = authed_post(
        &app,
        &cookie,
        "/sales",
        serde_json::json!({
            "items": [ { "product_id": product.product_id.0, "quantity": "2" } ],
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let receipt: SaleReceipt = json_body(response).await;
    assert_eq!(receipt.total, dec!(8.00));
    assert!(receipt.reference.starts_with("SALE-"));

    let response = authed_get(
        &app,
        &cookie,
        &format!("/inventory/product/{}", product.product_id.0),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let line: InventoryPayload = json_body(response).await;
    assert_eq!(line.quantity, dec!(18));
    // Dynamic pricing stepped the price up by the organization's 0.50.
    assert_eq!(line.price, dec!(4.50));
}

#[tokio::test]
async fn admin_only_routes_reject_staff_members() {
    let app = test_app().await;
    let organization_id = create_test_organization(&app).await;
    let admin_cookie = onboarded_session(&app, "admin@example.com", organization_id).await;
    let staff_cookie = onboarded_session(&app, "staff@example.com", organization_id).await;

    let response = authed_get(&app, &staff_cookie, "/users").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = authed_get(&app, &admin_cookie, "/users").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = authed_post(
        &app,
        &staff_cookie,
        "/stations",
        serde_json::json!({ "name": "Back Bar" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_expires_the_session_cookie() {
    let app = test_app().await;
    let request = Request::post("/auth/logout")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("cookie")
        .to_str()
        .expect("ascii");
    assert!(cookie.starts_with("jwt="));
    assert!(cookie.contains("Max-Age=0"));
    assert!(cookie.contains("SameSite=None"));
}

#[tokio::test]
async fn inventory_listing_is_public_when_an_organization_is_named() {
    let app = test_app().await;
    let organization_id = create_test_organization(&app).await;

    let request = Request::get(format!("/inventory?organization_id={organization_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let lines: Vec<InventoryPayload> = json_body(response).await;
    assert!(lines.is_empty());
}
