//! Postgres-bound ledger tests.
//!
//! Run with: `cargo test -p settle-ledger --features pg-tests`
//! (requires DATABASE_URL pointing at a Postgres instance).

#![cfg(feature = "pg-tests")]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settle_domain::value_objects::Amount;
use settle_ledger::accounts::{capture, fetch_account};
use settle_ledger::batch::BatchBuilder;
use settle_ledger::poster::{entries_for_group, post_batch};
use settle_ledger::types::LedgerError;
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_account(pool: &PgPool, account_type: &str, available: Decimal) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO accounts (external_id, account_type, available_balance) \
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(account_type)
    .bind(available)
    .fetch_one(pool)
    .await
    .expect("seed account")
}

fn amt(d: Decimal) -> Amount {
    Amount::new(d).unwrap()
}

#[sqlx::test(migrations = "../migrations")]
async fn authorize_capture_flow_balances(pool: PgPool) {
    let payer = seed_account(&pool, "user", dec!(100)).await;
    let escrow = seed_account(&pool, "escrow", dec!(0)).await;
    let merchant = seed_account(&pool, "merchant", dec!(0)).await;
    let fees = seed_account(&pool, "system", dec!(0)).await;

    // Authorize: payer hold + escrow credit.
    let auth_group = Uuid::new_v4();
    let auth = BatchBuilder::new()
        .debit_hold(payer, amt(dec!(100)), "payment_authorize", 1, "authorize")
        .credit(escrow, amt(dec!(100)), "payment_authorize", 1, "escrow in")
        .build()
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    post_batch(&mut tx, auth_group, &auth).await.unwrap();
    tx.commit().await.unwrap();

    let payer_acc = fetch_account(&pool, payer).await.unwrap();
    assert_eq!(payer_acc.available_balance, dec!(0));
    assert_eq!(payer_acc.held_balance, dec!(100));
    assert_eq!(payer_acc.version, 1);

    // Capture with 3% fee: escrow out, merchant and fee account in, and the
    // payer hold is consumed through the engine (no payer entry).
    let cap_group = Uuid::new_v4();
    let cap = BatchBuilder::new()
        .debit(escrow, amt(dec!(100)), "payment_capture", 1, "escrow out")
        .credit(merchant, amt(dec!(97)), "payment_capture", 1, "merchant payout")
        .credit(fees, amt(dec!(3)), "payment_capture", 1, "platform fee")
        .build()
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    post_batch(&mut tx, cap_group, &cap).await.unwrap();
    tx.commit().await.unwrap();
    capture(&pool, payer, dec!(100)).await.unwrap();

    let payer_acc = fetch_account(&pool, payer).await.unwrap();
    assert_eq!(payer_acc.available_balance, dec!(0));
    assert_eq!(payer_acc.held_balance, dec!(0));
    assert_eq!(fetch_account(&pool, merchant).await.unwrap().available_balance, dec!(97));
    assert_eq!(fetch_account(&pool, fees).await.unwrap().available_balance, dec!(3));
    assert_eq!(fetch_account(&pool, escrow).await.unwrap().available_balance, dec!(0));

    // Sum(debit) == Sum(credit) per group.
    for group in [auth_group, cap_group] {
        let rows = entries_for_group(&pool, group).await.unwrap();
        let debit: Decimal =
            rows.iter().filter(|r| r.side == "debit").map(|r| r.amount).sum();
        let credit: Decimal =
            rows.iter().filter(|r| r.side == "credit").map(|r| r.amount).sum();
        assert_eq!(debit, credit);
        assert_eq!(debit, dec!(100));
    }
}

#[sqlx::test(migrations = "../migrations")]
async fn insufficient_balance_rolls_back_whole_batch(pool: PgPool) {
    let payer = seed_account(&pool, "user", dec!(50)).await;
    let escrow = seed_account(&pool, "escrow", dec!(0)).await;

    let batch = BatchBuilder::new()
        .debit_hold(payer, amt(dec!(100)), "payment_authorize", 2, "authorize")
        .credit(escrow, amt(dec!(100)), "payment_authorize", 2, "escrow in")
        .build()
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let err = post_batch(&mut tx, Uuid::new_v4(), &batch).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    tx.rollback().await.unwrap();

    // Nothing was written.
    let payer_acc = fetch_account(&pool, payer).await.unwrap();
    assert_eq!(payer_acc.available_balance, dec!(50));
    assert_eq!(payer_acc.version, 0);
}
