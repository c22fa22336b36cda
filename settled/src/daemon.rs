//! Daemon: main runtime orchestrator.
//!
//! Lifecycle:
//! 1. Connect PostgreSQL (pool sized from config) and Redis, ping both
//! 2. Seed system accounts (idempotent)
//! 3. Wire services, outbox processors, and workers
//! 4. Serve the API
//! 5. On SIGINT/SIGTERM: stop accepting work, drain in-flight requests and
//!    workers for up to 10 seconds, then exit

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::maintenance::MaintenanceWorker;
use crate::outbox_worker::OutboxWorker;
use crate::processors::{
    DepositCreditedProcessor, NotificationProcessor, SettlementPayoutProcessor,
    WithdrawalSubmitProcessor,
};
use crate::services::payments::SystemAccounts;
use crate::services::{
    FundingService, OrderService, PaymentService, SettlementService, UserService, WalletService,
};
use anyhow::Context;
use settle_exec::{StubChainClient, StubNotifier};
use settle_kv::{RedisConfig, RedisLockManager, RedisNonceStore};
use settle_store::{PgIdempotencyStore, PgOutboxQueue, TxRunner};
use settle_verify::{VerifyConfig, WalletVerifier};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drain window after shutdown is requested.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);
/// Maintenance sweep cadence.
const MAINTENANCE_TICK: Duration = Duration::from_secs(60);

pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until shutdown is requested.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %config.environment,
            "Starting settlement daemon"
        );

        // 1. Dependencies
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_open_conns)
            .min_connections(config.database.max_idle_conns)
            .max_lifetime(config.database.conn_max_lifetime)
            .connect(&config.database.url())
            .await
            .context("connect postgres")?;

        let redis = settle_kv::connect(&RedisConfig {
            host: config.redis.host.clone(),
            port: config.redis.port,
            password: config.redis.password.clone(),
            db: config.redis.db,
        })
        .await
        .map_err(|err| anyhow::anyhow!("connect redis: {}", err))?;
        settle_kv::ping(&redis).await.map_err(|err| anyhow::anyhow!("ping redis: {}", err))?;

        // 2. System accounts (idempotent seed)
        let (escrow_account_id, fee_account_id) =
            settle_db::init_system_data(&pool).await.context("seed system data")?;

        // 3. Services
        let runner = TxRunner::new(pool.clone());

        let nonce_store = Arc::new(RedisNonceStore::with_ttl(
            redis.clone(),
            Duration::from_secs(300),
        ));
        let verifier = Arc::new(WalletVerifier::new(
            VerifyConfig {
                chain_id: config.eip712.chain_id,
                verifying_contract: config.eip712.verifying_contract.clone(),
                timestamp_tolerance: config.eip712.timestamp_tolerance,
            },
            nonce_store,
        ));
        let locks = Arc::new(RedisLockManager::new(redis.clone()));

        let users = Arc::new(UserService::new(runner.clone()));
        let wallets = Arc::new(WalletService::new(runner.clone(), verifier));
        let orders = Arc::new(OrderService::new(runner.clone(), locks));
        let payments = Arc::new(PaymentService::new(
            runner.clone(),
            SystemAccounts { escrow_account_id, fee_account_id },
            config.payment.clone(),
        ));
        // The fee/system account doubles as the treasury float mirror.
        let settlements = Arc::new(SettlementService::new(runner.clone(), fee_account_id));
        let funding = Arc::new(FundingService::new(
            runner.clone(),
            fee_account_id,
            config.chain.required_confirms as i32,
        ));

        let idempotency = Arc::new(PgIdempotencyStore::new(pool.clone()));

        // 4. Outbox worker and processors
        // TODO: swap the stub for the JSON-RPC adapter once the token
        // contract ABI is frozen.
        let chain = Arc::new(StubChainClient::new());
        let notifier = Arc::new(StubNotifier::new());

        let queue = Arc::new(PgOutboxQueue::new(pool.clone()));
        let mut worker = OutboxWorker::new(queue, config.worker.clone());
        worker.register(
            "settlement_executed",
            Arc::new(SettlementPayoutProcessor {
                pool: pool.clone(),
                chain: chain.clone(),
                settlements: settlements.clone(),
            }),
        );
        worker.register(
            "withdrawal_approved",
            Arc::new(WithdrawalSubmitProcessor { chain, funding: funding.clone() }),
        );
        worker.register(
            "deposit_credited",
            Arc::new(DepositCreditedProcessor {
                notifier: notifier.clone(),
                funding: funding.clone(),
            }),
        );
        for event_type in [
            "wallet_verified",
            "order_confirmed",
            "order_cancelled",
            "order_completed",
            "payment_authorized",
            "payment_captured",
            "payment_voided",
            "payment_refunded",
            "withdrawal_completed",
            "withdrawal_reversed",
        ] {
            worker.register(
                event_type,
                Arc::new(NotificationProcessor { notifier: notifier.clone() }),
            );
        }

        let shutdown = CancellationToken::new();

        let worker_handle = tokio::spawn(worker.run(shutdown.clone()));
        let maintenance_handle = tokio::spawn(
            MaintenanceWorker::new(idempotency.clone(), payments.clone(), MAINTENANCE_TICK)
                .run(shutdown.clone()),
        );

        // 5. API server
        let state = AppState {
            pool,
            redis: Some(redis),
            users,
            wallets,
            orders,
            payments,
            settlements,
            funding,
            idempotency,
        };
        let router = create_router(state);

        let listener = TcpListener::bind(config.server.addr())
            .await
            .with_context(|| format!("bind {}", config.server.addr()))?;
        let local_addr = listener.local_addr().context("local addr")?;
        info!(%local_addr, "API server listening");

        let server_shutdown = shutdown.clone();
        let server_handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(err) = result {
                error!(error = %err, "API server error");
            }
        });

        // 6. Wait for ctrl-c
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to install ctrl+c handler");
        }
        info!("Shutdown requested, draining");
        shutdown.cancel();

        // 7. Drain with a deadline
        let drain = async {
            let _ = server_handle.await;
            let _ = worker_handle.await;
            let _ = maintenance_handle.await;
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
            warn!("Drain deadline exceeded, terminating");
        }

        info!("Shutdown complete");
        Ok(())
    }
}
