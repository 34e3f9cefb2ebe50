use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{accounts, catalog, inventory, require_admin, sales, stations, ApiContext};
use shared::{
    domain::{CategoryId, OrganizationId, ProductId, StationId},
    error::{ApiError, ErrorCode},
    protocol::{
        CategoryRequest, LoginRequest, LoginResponse, LogoutResponse, OnboardingRequest,
        OrganizationRequest, ProductRequest, SaleRequest, StationRequest, StockRequest,
    },
};
use storage::{Storage, StoredUser};
use tower_cookies::{CookieManagerLayer, Cookies};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info};

mod auth;
mod config;

use auth::{clear_session_cookie, mint_token, session_cookie, verify_token, AuthConfig};
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    auth: AuthConfig,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct AuthCallbackQuery {
    token: Option<String>,
    redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryQuery {
    category_id: Option<i64>,
    organization_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };
    let auth = AuthConfig {
        token_secret: settings.auth_token_secret,
        token_ttl_seconds: settings.auth_token_ttl_seconds,
    };

    let state = AppState { api, auth };
    let mut app = build_router(Arc::new(state));

    if let Some(frontend_url) = settings.frontend_url.as_deref() {
        let origin: HeaderValue = frontend_url.parse()?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([axum::http::header::CONTENT_TYPE])
                .allow_credentials(true),
        );
    }

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/login", post(auth_login))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/logout", post(auth_logout))
        .route("/account", get(account_me))
        .route("/account/onboarding", post(account_onboarding))
        .route(
            "/organizations",
            post(create_organization).get(list_organizations),
        )
        .route(
            "/organizations/:organization_id",
            get(get_organization).put(update_organization),
        )
        .route("/categories", post(create_category).get(list_categories))
        .route(
            "/categories/:category_id",
            get(get_category).delete(delete_category),
        )
        .route("/products", post(create_product).get(list_products))
        .route(
            "/products/:product_id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/inventory", get(list_inventory))
        .route("/inventory/product/:product_id", get(product_inventory))
        .route("/inventory/add", post(add_stock))
        .route("/inventory/remove", post(remove_stock))
        .route("/inventory/adjust", post(adjust_stock))
        .route(
            "/inventory/product/:product_id/history",
            get(transaction_history),
        )
        .route("/inventory/sales-stats", get(user_sales_stats))
        .route("/inventory/station-sales-stats", get(station_sales_stats))
        .route("/sales", post(process_sale))
        .route("/stations", get(list_stations).post(create_station))
        .route("/stations/user", get(list_user_stations))
        .route(
            "/stations/:station_id",
            get(get_station).put(update_station).delete(delete_station),
        )
        .route("/users", get(list_users))
        .layer(CookieManagerLayer::new())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Copies the opaque token into the session cookie and bounces the browser to
/// its destination. Without a token nothing is set and the browser lands on
/// the login page with an error marker.
async fn auth_callback(cookies: Cookies, Query(query): Query<AuthCallbackQuery>) -> Redirect {
    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        return Redirect::temporary("/login?error=missing_token");
    };

    let redirect = query
        .redirect
        .filter(|target| !target.is_empty())
        .unwrap_or_else(|| "/dashboard".to_string());

    cookies.add(session_cookie(token));
    Redirect::temporary(&redirect)
}

async fn auth_login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let (user, redirect) = accounts::login(&state.api, &request.email, &request.name)
        .await
        .map_err(error_response)?;
    let token = mint_token(&state.auth, &user.email).map_err(|e| {
        error_response(ApiError::new(
            ErrorCode::Internal,
            format!("token mint failed: {e}"),
        ))
    })?;
    Ok(Json(LoginResponse { token, redirect }))
}

async fn auth_logout(cookies: Cookies) -> Json<LogoutResponse> {
    cookies.add(clear_session_cookie());
    Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
    })
}

async fn account_me(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<shared::protocol::MeResponse>> {
    let user = authenticate(&state, &cookies).await?;
    Ok(Json(accounts::me_response(&user)))
}

async fn account_onboarding(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<OnboardingRequest>,
) -> ApiResult<StatusCode> {
    let user = authenticate(&state, &cookies).await?;
    accounts::finish_onboarding(&state.api, &user, &request)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_organization(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OrganizationRequest>,
) -> ApiResult<(StatusCode, Json<shared::protocol::OrganizationPayload>)> {
    let organization = accounts::create_organization(&state.api, &request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(organization)))
}

async fn list_organizations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<shared::protocol::OrganizationPayload>>> {
    let organizations = accounts::list_organizations(&state.api)
        .await
        .map_err(error_response)?;
    Ok(Json(organizations))
}

async fn get_organization(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<i64>,
) -> ApiResult<Json<shared::protocol::OrganizationPayload>> {
    let organization = accounts::get_organization(&state.api, OrganizationId(organization_id))
        .await
        .map_err(error_response)?;
    Ok(Json(organization))
}

async fn update_organization(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<i64>,
    Json(request): Json<OrganizationRequest>,
) -> ApiResult<Json<shared::protocol::OrganizationPayload>> {
    let organization =
        accounts::update_organization(&state.api, OrganizationId(organization_id), &request)
            .await
            .map_err(error_response)?;
    Ok(Json(organization))
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<CategoryRequest>,
) -> ApiResult<(StatusCode, Json<shared::protocol::CategorySummary>)> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let category = catalog::create_category(&state.api, organization_id, &request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn list_categories(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::CategorySummary>>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let categories = catalog::list_categories(&state.api, organization_id)
        .await
        .map_err(error_response)?;
    Ok(Json(categories))
}

async fn get_category(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(category_id): Path<i64>,
) -> ApiResult<Json<shared::protocol::CategorySummary>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let category = catalog::get_category(&state.api, organization_id, CategoryId(category_id))
        .await
        .map_err(error_response)?;
    Ok(Json(category))
}

async fn delete_category(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(category_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    catalog::delete_category(&state.api, organization_id, CategoryId(category_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<ProductRequest>,
) -> ApiResult<(StatusCode, Json<shared::protocol::ProductPayload>)> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let product = catalog::create_product(&state.api, organization_id, &request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::ProductPayload>>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let products = catalog::list_products(&state.api, organization_id)
        .await
        .map_err(error_response)?;
    Ok(Json(products))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(product_id): Path<i64>,
) -> ApiResult<Json<shared::protocol::ProductPayload>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let product = catalog::get_product(&state.api, organization_id, ProductId(product_id))
        .await
        .map_err(error_response)?;
    Ok(Json(product))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(product_id): Path<i64>,
    Json(request): Json<ProductRequest>,
) -> ApiResult<Json<shared::protocol::ProductPayload>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let product =
        catalog::update_product(&state.api, organization_id, ProductId(product_id), &request)
            .await
            .map_err(error_response)?;
    Ok(Json(product))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(product_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    catalog::delete_product(&state.api, organization_id, ProductId(product_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Menu boards pass an explicit organization id and read without a session;
/// everyone else sees their own organization.
async fn list_inventory(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Query(query): Query<InventoryQuery>,
) -> ApiResult<Json<Vec<shared::protocol::InventoryPayload>>> {
    let organization_id = match query.organization_id {
        Some(id) => OrganizationId(id),
        None => authenticate_member(&state, &cookies).await?.1,
    };
    let lines = inventory::list_inventory(
        &state.api,
        organization_id,
        query.category_id.map(CategoryId),
    )
    .await
    .map_err(error_response)?;
    Ok(Json(lines))
}

async fn product_inventory(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(product_id): Path<i64>,
) -> ApiResult<Json<shared::protocol::InventoryPayload>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let line = inventory::product_inventory(&state.api, organization_id, ProductId(product_id))
        .await
        .map_err(error_response)?;
    Ok(Json(line))
}

async fn add_stock(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<StockRequest>,
) -> ApiResult<(StatusCode, Json<shared::protocol::InventoryPayload>)> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    let line = inventory::add_stock(&state.api, organization_id, user.user_id, &request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(line)))
}

async fn remove_stock(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<StockRequest>,
) -> ApiResult<Json<shared::protocol::InventoryPayload>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    let line = inventory::remove_stock(&state.api, organization_id, user.user_id, &request)
        .await
        .map_err(error_response)?;
    Ok(Json(line))
}

async fn adjust_stock(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<StockRequest>,
) -> ApiResult<Json<shared::protocol::InventoryPayload>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    let line = inventory::adjust_stock(&state.api, organization_id, user.user_id, &request)
        .await
        .map_err(error_response)?;
    Ok(Json(line))
}

async fn transaction_history(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(product_id): Path<i64>,
) -> ApiResult<Json<Vec<shared::protocol::TransactionPayload>>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let history =
        inventory::transaction_history(&state.api, organization_id, ProductId(product_id))
            .await
            .map_err(error_response)?;
    Ok(Json(history))
}

async fn user_sales_stats(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::UserSalesStats>>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let stats = inventory::user_sales_stats(&state.api, organization_id)
        .await
        .map_err(error_response)?;
    Ok(Json(stats))
}

async fn station_sales_stats(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::StationSalesStats>>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let stats = inventory::station_sales_stats(&state.api, organization_id)
        .await
        .map_err(error_response)?;
    Ok(Json(stats))
}

async fn process_sale(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<SaleRequest>,
) -> ApiResult<Json<shared::protocol::SaleReceipt>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    let receipt = sales::process_sale(&state.api, &user, organization_id, &request)
        .await
        .map_err(error_response)?;
    Ok(Json(receipt))
}

async fn list_stations(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::StationPayload>>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    require_admin(&user).map_err(error_response)?;
    let all = stations::list_stations(&state.api, organization_id)
        .await
        .map_err(error_response)?;
    Ok(Json(all))
}

async fn list_user_stations(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::StationPayload>>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    let mine = stations::list_user_stations(&state.api, organization_id, user.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(mine))
}

async fn get_station(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(station_id): Path<i64>,
) -> ApiResult<Json<shared::protocol::StationPayload>> {
    let (_user, organization_id) = authenticate_member(&state, &cookies).await?;
    let station = stations::get_station(&state.api, organization_id, StationId(station_id))
        .await
        .map_err(error_response)?;
    Ok(Json(station))
}

async fn create_station(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(request): Json<StationRequest>,
) -> ApiResult<(StatusCode, Json<shared::protocol::StationPayload>)> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    require_admin(&user).map_err(error_response)?;
    let station = stations::create_station(&state.api, organization_id, &request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(station)))
}

async fn update_station(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(station_id): Path<i64>,
    Json(request): Json<StationRequest>,
) -> ApiResult<Json<shared::protocol::StationPayload>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    require_admin(&user).map_err(error_response)?;
    let station =
        stations::update_station(&state.api, organization_id, StationId(station_id), &request)
            .await
            .map_err(error_response)?;
    Ok(Json(station))
}

async fn delete_station(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Path(station_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    require_admin(&user).map_err(error_response)?;
    stations::delete_station(&state.api, organization_id, StationId(station_id))
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> ApiResult<Json<Vec<shared::protocol::UserSummary>>> {
    let (user, organization_id) = authenticate_member(&state, &cookies).await?;
    require_admin(&user).map_err(error_response)?;
    let users = accounts::list_organization_users(&state.api, organization_id)
        .await
        .map_err(error_response)?;
    Ok(Json(users))
}

async fn authenticate(state: &AppState, cookies: &Cookies) -> ApiResult<StoredUser> {
    let Some(cookie) = cookies.get(auth::SESSION_COOKIE) else {
        return Err(error_response(ApiError::new(
            ErrorCode::Unauthorized,
            "not authenticated",
        )));
    };
    let email = verify_token(&state.auth, cookie.value()).map_err(|_| {
        error_response(ApiError::new(
            ErrorCode::Unauthorized,
            "invalid or expired token",
        ))
    })?;
    state
        .api
        .storage
        .user_by_email(&email)
        .await
        .map_err(|e| error_response(ApiError::new(ErrorCode::Internal, e.to_string())))?
        .ok_or_else(|| error_response(ApiError::new(ErrorCode::Unauthorized, "unknown user")))
}

async fn authenticate_member(
    state: &AppState,
    cookies: &Cookies,
) -> ApiResult<(StoredUser, OrganizationId)> {
    let user = authenticate(state, cookies).await?;
    let Some(organization_id) = user.organization_id else {
        return Err(error_response(ApiError::new(
            ErrorCode::Validation,
            "user has no organization",
        )));
    };
    Ok((user, organization_id))
}

fn error_response(error: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Gone => StatusCode::GONE,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
