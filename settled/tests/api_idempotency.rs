//! HTTP-level tests: health endpoint, response envelope, and idempotent
//! replay semantics. Runs against a lazily-connected pool so no database is
//! required; the exercised paths never reach it.

use settle_kv::{MemoryLockManager, MemoryNonceStore};
use settle_store::{
    request_hash, IdempotencyStore, MemoryIdempotencyStore, StoredResponse, TxRunner,
};
use settle_verify::{VerifyConfig, WalletVerifier};
use settled::api::{create_router, AppState};
use settled::config::{Config, PaymentConfig};
use settled::services::payments::SystemAccounts;
use settled::services::{
    FundingService, OrderService, PaymentService, SettlementService, UserService, WalletService,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_api(idempotency: Arc<MemoryIdempotencyStore>) -> SocketAddr {
    let config = Config::test();

    // Lazy pool: no connection is attempted until a query runs.
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.database.url())
        .expect("lazy pool");

    let runner = TxRunner::new(pool.clone());
    let verifier = Arc::new(WalletVerifier::new(
        VerifyConfig::default(),
        Arc::new(MemoryNonceStore::new()),
    ));

    let state = AppState {
        pool,
        redis: None,
        users: Arc::new(UserService::new(runner.clone())),
        wallets: Arc::new(WalletService::new(runner.clone(), verifier)),
        orders: Arc::new(OrderService::new(runner.clone(), Arc::new(MemoryLockManager::new()))),
        payments: Arc::new(PaymentService::new(
            runner.clone(),
            SystemAccounts { escrow_account_id: 1, fee_account_id: 2 },
            PaymentConfig {
                fee_rate: rust_decimal_macros::dec!(0.03),
                auth_ttl: Duration::from_secs(1800),
            },
        )),
        settlements: Arc::new(SettlementService::new(runner.clone(), 2)),
        funding: Arc::new(FundingService::new(runner, 2, 3)),
        idempotency,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    addr
}

#[tokio::test]
async fn health_endpoint_is_up() {
    let addr = spawn_api(Arc::new(MemoryIdempotencyStore::new())).await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn idempotent_replay_returns_stored_response() {
    let idempotency = Arc::new(MemoryIdempotencyStore::new());

    let body = r#"{"payment_id":"5f0c1a4e-0000-0000-0000-000000000001"}"#;
    let stored = StoredResponse {
        status: 200,
        body: serde_json::json!({"data": {"payment_id": "stored", "status": "captured"}}),
    };
    idempotency
        .store(
            "idem-1",
            "/api/v1/payments/capture",
            &request_hash(body.as_bytes()),
            &stored,
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let addr = spawn_api(idempotency).await;
    let client = reqwest::Client::new();

    // Same key, same body: the handler is short-circuited with the exact
    // stored response (the database is never touched).
    let response = client
        .post(format!("http://{}/api/v1/payments/capture", addr))
        .header("X-Idempotency-Key", "idem-1")
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let replayed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(replayed["data"]["payment_id"], "stored");
}

#[tokio::test]
async fn idempotency_key_with_different_body_conflicts() {
    let idempotency = Arc::new(MemoryIdempotencyStore::new());

    idempotency
        .store(
            "idem-2",
            "/api/v1/payments/capture",
            &request_hash(b"original body"),
            &StoredResponse { status: 200, body: serde_json::json!({"data": {}}) },
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let addr = spawn_api(idempotency).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/v1/payments/capture", addr))
        .header("X-Idempotency-Key", "idem-2")
        .header("X-Request-ID", "req-42")
        .header("Content-Type", "application/json")
        .body(r#"{"payment_id":"different"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "IDEMPOTENCY_CONFLICT");
    assert_eq!(body["error"]["request_id"], "req-42");
}

#[tokio::test]
async fn create_user_with_unknown_role_is_rejected() {
    let addr = spawn_api(Arc::new(MemoryIdempotencyStore::new())).await;
    let client = reqwest::Client::new();

    // Role validation happens before any storage access.
    let response = client
        .post(format!("http://{}/api/v1/users", addr))
        .header("Content-Type", "application/json")
        .body(r#"{"email":"x@example.com","name":"X","role":"superuser"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn assigning_admin_role_is_forbidden() {
    let addr = spawn_api(Arc::new(MemoryIdempotencyStore::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!(
            "http://{}/api/v1/users/{}/role",
            addr,
            uuid::Uuid::new_v4()
        ))
        .header("Content-Type", "application/json")
        .body(r#"{"role":"admin"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn malformed_body_renders_error_envelope() {
    let addr = spawn_api(Arc::new(MemoryIdempotencyStore::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/v1/payments/capture", addr))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert!(body["error"]["request_id"].is_string());
}
