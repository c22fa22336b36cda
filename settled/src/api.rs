//! HTTP API.
//!
//! Success envelope `{"data": ...}`, failure envelope
//! `{"error": {code, message, request_id, details?}}`. Every response
//! carries `X-Request-ID` (echoed from the request or generated). Mutating
//! payment routes honor `X-Idempotency-Key`: a replay with the same body
//! returns the stored response verbatim, a different body conflicts.

use crate::error::{AppError, AppResult};
use crate::services::{
    FundingService, OrderService, PaymentService, SettlementService, UserService, WalletService,
};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header::HeaderName, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_domain::entities::{KycStatus, Payment, Settlement, User, UserRole, Wallet};
use settle_ledger::accounts::fetch_account_by_external_id;
use settle_ledger::poster::entries_for_account;
use settle_store::idempotency::PAYMENT_TTL;
use settle_store::{request_hash, IdempotencyLookup, IdempotencyStore, StoredResponse};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

// =============================================================================
// State
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub redis: Option<ConnectionManager>,
    pub users: Arc<UserService>,
    pub wallets: Arc<WalletService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub settlements: Arc<SettlementService>,
    pub funding: Arc<FundingService>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/api/v1/users", get(list_users_handler).post(create_user_handler))
        .route(
            "/api/v1/users/:userExtId",
            get(get_user_handler).put(update_user_handler).delete(delete_user_handler),
        )
        .route("/api/v1/users/:userExtId/role", put(update_role_handler))
        .route("/api/v1/users/:userExtId/suspend", post(suspend_user_handler))
        .route("/api/v1/users/:userExtId/activate", post(activate_user_handler))
        .route("/api/v1/users/:userExtId/kyc/request", post(kyc_request_handler))
        .route("/api/v1/users/:userExtId/kyc/approve", post(kyc_approve_handler))
        .route("/api/v1/users/:userExtId/kyc/reject", post(kyc_reject_handler))
        .route(
            "/api/v1/users/:userExtId/wallets",
            get(list_wallets_handler).post(register_wallet_handler),
        )
        .route(
            "/api/v1/users/:userExtId/wallets/:walletExtId",
            get(get_wallet_handler).delete(delete_wallet_handler),
        )
        .route(
            "/api/v1/users/:userExtId/wallets/:walletExtId/label",
            put(update_wallet_label_handler),
        )
        .route(
            "/api/v1/users/:userExtId/wallets/:walletExtId/set-primary",
            post(set_primary_wallet_handler),
        )
        .route(
            "/api/v1/users/:userExtId/wallets/:walletExtId/verify",
            post(verify_wallet_handler),
        )
        .route("/api/v1/payments/authorize", post(authorize_handler))
        .route("/api/v1/payments/capture", post(capture_handler))
        .route("/api/v1/payments/void", post(void_handler))
        .route("/api/v1/payments/refund", post(refund_handler))
        .route("/api/v1/payments/:extId", get(get_payment_handler))
        .route("/api/v1/settlements/execute", post(execute_settlement_handler))
        .route("/api/v1/settlements/:extId", get(get_settlement_handler))
        .route("/api/v1/accounts/:extId/balance", get(balance_handler))
        .route("/api/v1/accounts/:extId/ledger", get(ledger_handler))
        .with_state(state)
}

// =============================================================================
// Envelope helpers
// =============================================================================

fn request_id_of(headers: &HeaderMap) -> String {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn success_body<T: Serialize>(data: &T) -> serde_json::Value {
    serde_json::json!({ "data": data })
}

fn error_body(err: &AppError, request_id: &str) -> serde_json::Value {
    let mut error = serde_json::json!({
        "code": err.code(),
        "message": err.to_string(),
        "request_id": request_id,
    });
    if let Some(details) = err.details() {
        error["details"] = details;
    }
    serde_json::json!({ "error": error })
}

fn render(status: StatusCode, body: serde_json::Value, request_id: &str) -> Response {
    (
        status,
        AppendHeaders([(X_REQUEST_ID, request_id.to_string())]),
        Json(body),
    )
        .into_response()
}

fn render_result<T: Serialize>(
    result: AppResult<T>,
    success_status: StatusCode,
    request_id: &str,
) -> Response {
    match result {
        Ok(data) => render(success_status, success_body(&data), request_id),
        Err(err) => {
            if err.http_status().is_server_error() {
                error!(request_id, error = %err, "Request failed");
            }
            render(err.http_status(), error_body(&err, request_id), request_id)
        }
    }
}

/// 204 on success, error envelope otherwise (delete endpoints).
fn render_empty(result: AppResult<()>, request_id: &str) -> Response {
    match result {
        Ok(()) => (
            StatusCode::NO_CONTENT,
            AppendHeaders([(X_REQUEST_ID, request_id.to_string())]),
        )
            .into_response(),
        Err(err) => {
            if err.http_status().is_server_error() {
                error!(request_id, error = %err, "Request failed");
            }
            render(err.http_status(), error_body(&err, request_id), request_id)
        }
    }
}

// =============================================================================
// Idempotency wrapper
// =============================================================================

/// Check the idempotency cache before running a mutating payment handler and
/// store the produced response afterwards.
async fn with_idempotency<T, F>(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    body: &[u8],
    request_id: &str,
    success_status: StatusCode,
    run: F,
) -> Response
where
    T: Serialize,
    F: std::future::Future<Output = AppResult<T>>,
{
    let key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let hash = request_hash(body);

    if let Some(ref key) = key {
        match state.idempotency.lookup(key, &hash).await {
            Ok(IdempotencyLookup::Hit(stored)) => {
                let status = StatusCode::from_u16(stored.status as u16)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                return render(status, stored.body, request_id);
            }
            Ok(IdempotencyLookup::Conflict) => {
                let err = AppError::IdempotencyConflict { key: key.clone() };
                return render(err.http_status(), error_body(&err, request_id), request_id);
            }
            Ok(IdempotencyLookup::Miss) => {}
            Err(err) => {
                let err: AppError = err.into();
                return render(err.http_status(), error_body(&err, request_id), request_id);
            }
        }
    }

    let (status, body_json) = match run.await {
        Ok(data) => (success_status, success_body(&data)),
        Err(err) => {
            if err.http_status().is_server_error() {
                error!(request_id, error = %err, "Request failed");
            }
            (err.http_status(), error_body(&err, request_id))
        }
    };

    // Server errors are not memoized; the client may retry them.
    if let Some(key) = key {
        if !status.is_server_error() {
            let stored = StoredResponse { status: status.as_u16() as i32, body: body_json.clone() };
            if let Err(err) = state.idempotency.store(&key, path, &hash, &stored, PAYMENT_TTL).await
            {
                error!(request_id, error = %err, "Failed to store idempotency record");
            }
        }
    }

    render(status, body_json, request_id)
}

// =============================================================================
// Health / readiness
// =============================================================================

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = tokio::time::timeout(
        READY_PROBE_TIMEOUT,
        sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false);

    let redis_ok = match &state.redis {
        Some(conn) => tokio::time::timeout(READY_PROBE_TIMEOUT, settle_kv::ping(conn))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false),
        None => false,
    };

    let body = serde_json::json!({
        "database": if db_ok { "up" } else { "down" },
        "redis": if redis_ok { "up" } else { "down" },
    });

    let status =
        if db_ok && redis_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    email: String,
    name: String,
    /// Defaults to "buyer" when omitted
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateUserRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRoleRequest {
    role: String,
}

#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    role: Option<String>,
    kyc_status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    user_id: Uuid,
    email: String,
    name: String,
    role: String,
    kyc_status: String,
    kyc_verified_at: Option<chrono::DateTime<chrono::Utc>>,
    status: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.external_id,
            email: user.email,
            name: user.name,
            role: user.role.as_str().to_string(),
            kyc_status: user.kyc_status.as_str().to_string(),
            kyc_verified_at: user.kyc_verified_at,
            status: user.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListUsersResponse {
    users: Vec<UserResponse>,
    total: i64,
}

fn parse_role(raw: &str) -> AppResult<UserRole> {
    UserRole::parse(raw)
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid role: {}", raw)))
}

fn parse_kyc_status(raw: &str) -> AppResult<KycStatus> {
    KycStatus::parse(raw)
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid kyc status: {}", raw)))
}

async fn create_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<UserResponse> = async {
        let req: CreateUserRequest = parse_body(&body)?;
        let role = match req.role.as_deref() {
            Some(raw) => parse_role(raw)?,
            None => UserRole::Buyer,
        };
        let user = state.users.create(&req.email, &req.name, role).await?;
        Ok(user.into())
    }
    .await;

    render_result(result, StatusCode::CREATED, &request_id)
}

async fn list_users_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListUsersQuery>,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<ListUsersResponse> = async {
        let role = query.role.as_deref().map(parse_role).transpose()?;
        let kyc_status = query.kyc_status.as_deref().map(parse_kyc_status).transpose()?;

        let users = state
            .users
            .list(role, kyc_status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
            .await?;

        let users: Vec<UserResponse> = users.into_iter().map(Into::into).collect();
        Ok(ListUsersResponse { total: users.len() as i64, users })
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

async fn get_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.users.get(user_external_id).await.map(UserResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

async fn update_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<UserResponse> = async {
        let req: UpdateUserRequest = parse_body(&body)?;
        let user = state.users.update_name(user_external_id, &req.name).await?;
        Ok(user.into())
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

async fn update_role_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<UserResponse> = async {
        let req: UpdateRoleRequest = parse_body(&body)?;
        let role = parse_role(&req.role)?;
        let user = state.users.update_role(user_external_id, role).await?;
        Ok(user.into())
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

async fn suspend_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.users.suspend(user_external_id).await.map(UserResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

async fn activate_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.users.activate(user_external_id).await.map(UserResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

async fn delete_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    render_empty(state.users.delete(user_external_id).await, &request_id)
}

async fn kyc_request_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.users.kyc_request(user_external_id).await.map(UserResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

async fn kyc_approve_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.users.kyc_approve(user_external_id).await.map(UserResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

async fn kyc_reject_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.users.kyc_reject(user_external_id).await.map(UserResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

// =============================================================================
// Wallets
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegisterWalletRequest {
    address: String,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateLabelRequest {
    label: String,
}

#[derive(Debug, Serialize)]
struct ListWalletsResponse {
    wallets: Vec<WalletResponse>,
    total: i64,
}

async fn register_wallet_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<WalletResponse> = async {
        let req: RegisterWalletRequest = parse_body(&body)?;
        let wallet = state
            .wallets
            .register(user_external_id, &req.address, req.label.as_deref())
            .await?;
        Ok(wallet.into())
    }
    .await;

    render_result(result, StatusCode::CREATED, &request_id)
}

async fn list_wallets_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<ListWalletsResponse> = async {
        let wallets = state.wallets.list(user_external_id).await?;
        let wallets: Vec<WalletResponse> = wallets.into_iter().map(Into::into).collect();
        Ok(ListWalletsResponse { total: wallets.len() as i64, wallets })
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

async fn get_wallet_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_external_id, wallet_external_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state
        .wallets
        .get(user_external_id, wallet_external_id)
        .await
        .map(WalletResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

async fn delete_wallet_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_external_id, wallet_external_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let request_id = request_id_of(&headers);
    render_empty(
        state.wallets.delete(user_external_id, wallet_external_id).await,
        &request_id,
    )
}

async fn update_wallet_label_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_external_id, wallet_external_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<WalletResponse> = async {
        let req: UpdateLabelRequest = parse_body(&body)?;
        let wallet = state
            .wallets
            .update_label(user_external_id, wallet_external_id, &req.label)
            .await?;
        Ok(wallet.into())
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

async fn set_primary_wallet_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_external_id, wallet_external_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state
        .wallets
        .set_primary(user_external_id, wallet_external_id)
        .await
        .map(WalletResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

// =============================================================================
// Payments
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    payer_account_id: Uuid,
    payee_account_id: Uuid,
    /// Decimal string, e.g. "100.00000000"
    amount: String,
    order_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PaymentActionRequest {
    payment_id: Uuid,
}

#[derive(Debug, Serialize)]
struct PaymentResponse {
    payment_id: Uuid,
    status: String,
    amount: String,
    fee_amount: String,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.external_id,
            status: payment.status.to_string(),
            amount: payment.amount.to_string(),
            fee_amount: payment.fee_amount.to_string(),
            expires_at: payment.expires_at,
        }
    }
}

fn parse_amount(raw: &str) -> AppResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|_| AppError::InvalidInput(format!("Invalid amount: {}", raw)))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| AppError::InvalidInput(format!("Malformed request body: {}", err)))
}

async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);
    with_idempotency(
        &state,
        &headers,
        "/api/v1/payments/authorize",
        &body,
        &request_id,
        StatusCode::CREATED,
        async {
            let req: AuthorizeRequest = parse_body(&body)?;
            let amount = parse_amount(&req.amount)?;
            let payment = state
                .payments
                .authorize(req.payer_account_id, req.payee_account_id, amount, req.order_id)
                .await?;
            Ok(PaymentResponse::from(payment))
        },
    )
    .await
}

async fn capture_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);
    with_idempotency(
        &state,
        &headers,
        "/api/v1/payments/capture",
        &body,
        &request_id,
        StatusCode::OK,
        async {
            let req: PaymentActionRequest = parse_body(&body)?;
            let payment = state.payments.capture(req.payment_id).await?;
            Ok(PaymentResponse::from(payment))
        },
    )
    .await
}

async fn void_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);
    with_idempotency(
        &state,
        &headers,
        "/api/v1/payments/void",
        &body,
        &request_id,
        StatusCode::OK,
        async {
            let req: PaymentActionRequest = parse_body(&body)?;
            let payment = state.payments.void(req.payment_id).await?;
            Ok(PaymentResponse::from(payment))
        },
    )
    .await
}

async fn refund_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);
    with_idempotency(
        &state,
        &headers,
        "/api/v1/payments/refund",
        &body,
        &request_id,
        StatusCode::OK,
        async {
            let req: PaymentActionRequest = parse_body(&body)?;
            let payment = state.payments.refund(req.payment_id).await?;
            Ok(PaymentResponse::from(payment))
        },
    )
    .await
}

async fn get_payment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.payments.get(external_id).await.map(PaymentResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

// =============================================================================
// Settlements
// =============================================================================

#[derive(Debug, Deserialize)]
struct ExecuteSettlementRequest {
    merchant_account_id: Uuid,
    amount: String,
    payment_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SettlementResponse {
    settlement_id: Uuid,
    status: String,
    amount: String,
    tx_hash: Option<String>,
}

impl From<Settlement> for SettlementResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            settlement_id: settlement.external_id,
            status: settlement.status.to_string(),
            amount: settlement.amount.to_string(),
            tx_hash: settlement.tx_hash,
        }
    }
}

async fn execute_settlement_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);
    with_idempotency(
        &state,
        &headers,
        "/api/v1/settlements/execute",
        &body,
        &request_id,
        StatusCode::CREATED,
        async {
            let req: ExecuteSettlementRequest = parse_body(&body)?;
            let amount = parse_amount(&req.amount)?;
            let settlement = state
                .settlements
                .execute(req.merchant_account_id, amount, req.payment_id)
                .await?;
            Ok(SettlementResponse::from(settlement))
        },
    )
    .await
}

async fn get_settlement_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);
    let result = state.settlements.get(external_id).await.map(SettlementResponse::from);
    render_result(result, StatusCode::OK, &request_id)
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug, Serialize)]
struct BalanceResponse {
    account_id: Uuid,
    available_balance: String,
    held_balance: String,
    version: i64,
}

async fn balance_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(external_id): Path<Uuid>,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<BalanceResponse> = async {
        let account = fetch_account_by_external_id(&state.pool, external_id)
            .await?
            .ok_or_else(|| AppError::not_found("account", external_id))?;
        Ok(BalanceResponse {
            account_id: account.external_id,
            available_balance: account.available_balance.to_string(),
            held_balance: account.held_balance.to_string(),
            version: account.version,
        })
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<i64>,
}

async fn ledger_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(external_id): Path<Uuid>,
    Query(query): Query<LedgerQuery>,
) -> Response {
    let request_id = request_id_of(&headers);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let result: AppResult<_> = async {
        let account = fetch_account_by_external_id(&state.pool, external_id)
            .await?
            .ok_or_else(|| AppError::not_found("account", external_id))?;
        let entries = entries_for_account(&state.pool, account.id, limit).await?;
        Ok(entries)
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

// =============================================================================
// Wallet verification
// =============================================================================

#[derive(Debug, Deserialize)]
struct VerifyWalletRequest {
    /// "0x" + 130 hex chars
    signature: String,
    message: VerifyWalletMessage,
}

#[derive(Debug, Deserialize)]
struct VerifyWalletMessage {
    nonce: String,
    /// Unix seconds
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct WalletResponse {
    wallet_id: Uuid,
    address: String,
    label: Option<String>,
    is_primary: bool,
    is_verified: bool,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            wallet_id: wallet.external_id,
            address: wallet.address,
            label: wallet.label,
            is_primary: wallet.is_primary,
            is_verified: wallet.is_verified,
        }
    }
}

async fn verify_wallet_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_external_id, wallet_external_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> Response {
    let request_id = request_id_of(&headers);

    let result: AppResult<WalletResponse> = async {
        let req: VerifyWalletRequest = parse_body(&body)?;
        let wallet = state
            .wallets
            .verify(
                user_external_id,
                wallet_external_id,
                &req.signature,
                &req.message.nonce,
                req.message.timestamp,
                &request_id,
            )
            .await?;
        Ok(WalletResponse::from(wallet))
    }
    .await;

    render_result(result, StatusCode::OK, &request_id)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let err = AppError::NonceReused;
        let body = error_body(&err, "req-1");

        assert_eq!(body["error"]["code"], "NONCE_REUSED");
        assert_eq!(body["error"]["request_id"], "req-1");
        assert!(body["error"]["details"].is_null());
    }

    #[test]
    fn test_error_body_with_details() {
        let err = AppError::LockNotAcquired { resource: "inventory:1".to_string() };
        let body = error_body(&err, "req-2");

        assert_eq!(body["error"]["code"], "LOCK_ACQUISITION_FAILED");
        assert_eq!(body["error"]["details"]["resource"], "inventory:1");
    }

    #[test]
    fn test_success_body_shape() {
        let body = success_body(&serde_json::json!({"payment_id": 1}));
        assert_eq!(body["data"]["payment_id"], 1);
    }

    #[test]
    fn test_parse_amount() {
        assert!(parse_amount("100.5").is_ok());
        assert!(parse_amount("not-a-number").is_err());
    }
}
