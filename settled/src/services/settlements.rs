//! Settlement service.
//!
//! Execute holds the merchant funds and hands the payout to the outbox;
//! the chain processor reports back through `complete` or `fail`, which
//! capture or release the hold. The treasury account mirrors the on-chain
//! hot-wallet float.

use crate::error::{AppError, AppResult};
use chrono::Utc;
use rust_decimal::Decimal;
use settle_domain::entities::Settlement;
use settle_domain::events::{new_transaction_group_id, DomainEvent};
use settle_domain::states::{settlement_transition, SettlementEvent};
use settle_domain::value_objects::Amount;
use settle_ledger::accounts::{apply_effect_tx, fetch_account_by_external_id};
use settle_ledger::batch::BatchBuilder;
use settle_ledger::poster::post_batch;
use settle_ledger::types::BalanceEffect;
use settle_store::{outbox, settlements, TxRunner};
use tracing::info;
use uuid::Uuid;

pub struct SettlementService {
    runner: TxRunner,
    treasury_account_id: i64,
}

impl SettlementService {
    pub fn new(runner: TxRunner, treasury_account_id: i64) -> Self {
        Self { runner, treasury_account_id }
    }

    pub async fn get(&self, settlement_external_id: Uuid) -> AppResult<Settlement> {
        settlements::get_settlement_by_external_id(self.runner.pool(), settlement_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("settlement", settlement_external_id))
    }

    /// Execute: create the settlement, hold the merchant funds, enqueue the
    /// chain payout. Pending → Processing in the same unit of work.
    pub async fn execute(
        &self,
        merchant_account_external_id: Uuid,
        amount: Decimal,
        payment_id: Option<i64>,
    ) -> AppResult<Settlement> {
        let amount = Amount::new(amount)
            .map_err(|err| AppError::InvalidInput(err.to_string()))?;

        let merchant =
            fetch_account_by_external_id(self.runner.pool(), merchant_account_external_id)
                .await?
                .ok_or_else(|| AppError::not_found("account", merchant_account_external_id))?;

        let settlement = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let settlement = settlements::create_settlement(
                        &mut **tx,
                        Uuid::new_v4(),
                        payment_id,
                        merchant.id,
                        amount.as_decimal(),
                    )
                    .await?;

                    let next =
                        settlement_transition(settlement.status, SettlementEvent::Start)?;

                    // Funds leave available and wait in hold until the chain
                    // payout resolves.
                    apply_effect_tx(tx, merchant.id, BalanceEffect::Hold, amount.as_decimal())
                        .await?;

                    settlements::update_settlement_status(&mut **tx, settlement.id, next, None)
                        .await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::SettlementExecuted {
                            settlement_id: settlement.id,
                            merchant_account_id: merchant.id,
                            amount: amount.as_decimal(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(settlement)
                })
            })
            .await?;

        info!(settlement_id = settlement.id, amount = %amount, "Settlement executing");
        self.get(settlement.external_id).await
    }

    /// Chain payout confirmed: capture the hold and book the outflow
    /// against the treasury float.
    pub async fn complete(&self, settlement_id: i64, tx_hash: &str) -> AppResult<Settlement> {
        let treasury_id = self.treasury_account_id;
        let tx_hash = tx_hash.to_string();

        let settlement = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = settlements::get_settlement_for_update(&mut **tx, settlement_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("settlement", settlement_id))?;

                    let next = settlement_transition(current.status, SettlementEvent::Complete)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    let amount = Amount::new(current.amount)
                        .map_err(|err| AppError::internal(err.to_string()))?;

                    let batch = BatchBuilder::new()
                        .debit_capture(
                            current.merchant_account_id,
                            amount,
                            "settlement",
                            current.id,
                            "Chain payout",
                        )
                        .credit(
                            treasury_id,
                            amount,
                            "settlement",
                            current.id,
                            "Treasury float",
                        )
                        .build()?;
                    post_batch(tx, new_transaction_group_id(), &batch).await?;

                    settlements::update_settlement_status(
                        &mut **tx,
                        current.id,
                        next,
                        Some(&tx_hash),
                    )
                    .await?;

                    Ok::<_, AppError>(Settlement { status: next, ..current })
                })
            })
            .await?;

        info!(settlement_id = settlement.id, "Settlement completed");
        Ok(settlement)
    }

    /// Chain payout failed for good: release the hold.
    pub async fn fail(&self, settlement_id: i64, reason: &str) -> AppResult<Settlement> {
        let reason = reason.to_string();

        let settlement = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = settlements::get_settlement_for_update(&mut **tx, settlement_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("settlement", settlement_id))?;

                    let next = settlement_transition(current.status, SettlementEvent::Fail)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    apply_effect_tx(
                        tx,
                        current.merchant_account_id,
                        BalanceEffect::Release,
                        current.amount,
                    )
                    .await?;

                    settlements::update_settlement_status(&mut **tx, current.id, next, None)
                        .await?;

                    Ok::<_, AppError>(Settlement { status: next, ..current })
                })
            })
            .await?;

        info!(settlement_id = settlement.id, reason, "Settlement failed");
        Ok(settlement)
    }
}
