//! Funding service: deposits and withdrawals.
//!
//! Deposits ride Detected → Confirming → Credited → Completed, crediting
//! the account against the treasury float when confirmations suffice.
//! Withdrawals hold the funds at Pending and resolve the hold in their
//! terminal state: captured on Completed, released on Rejected/Failed.

use crate::error::{AppError, AppResult};
use chrono::Utc;
use rust_decimal::Decimal;
use settle_domain::entities::{Deposit, Withdrawal};
use settle_domain::events::{new_transaction_group_id, DomainEvent};
use settle_domain::states::{
    deposit_transition, withdrawal_transition, DepositEvent, DepositStatus, WithdrawalEvent,
};
use settle_domain::value_objects::{Amount, WalletAddress};
use settle_ledger::accounts::{apply_effect_tx, fetch_account_by_external_id};
use settle_ledger::batch::BatchBuilder;
use settle_ledger::poster::post_batch;
use settle_ledger::types::BalanceEffect;
use settle_store::{funding, outbox, TxRunner};
use tracing::info;
use uuid::Uuid;

pub struct FundingService {
    runner: TxRunner,
    treasury_account_id: i64,
    required_confirms: i32,
}

impl FundingService {
    pub fn new(runner: TxRunner, treasury_account_id: i64, required_confirms: i32) -> Self {
        Self { runner, treasury_account_id, required_confirms }
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    /// Record a transfer seen on chain. Re-detection of the same tx_hash
    /// returns the existing row.
    pub async fn record_deposit(
        &self,
        account_external_id: Uuid,
        from_address: &str,
        tx_hash: &str,
        amount: Decimal,
    ) -> AppResult<Deposit> {
        let from_address = WalletAddress::parse(from_address)
            .map_err(|_| AppError::InvalidInput("Invalid source address".to_string()))?;
        let amount =
            Amount::new(amount).map_err(|err| AppError::InvalidInput(err.to_string()))?;

        let account = fetch_account_by_external_id(self.runner.pool(), account_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("account", account_external_id))?;

        match funding::create_deposit(
            self.runner.pool(),
            Uuid::new_v4(),
            account.id,
            from_address.as_str(),
            tx_hash,
            amount.as_decimal(),
        )
        .await
        {
            Ok(deposit) => {
                info!(deposit_id = deposit.id, tx_hash, "Deposit detected");
                Ok(deposit)
            }
            Err(settle_store::StoreError::Duplicate { .. }) => {
                // Same chain transaction observed again.
                let existing = sqlx::query_scalar::<_, Uuid>(
                    "SELECT external_id FROM deposits WHERE tx_hash = $1",
                )
                .bind(tx_hash)
                .fetch_one(self.runner.pool())
                .await?;
                self.get_deposit(existing).await
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_deposit(&self, deposit_external_id: Uuid) -> AppResult<Deposit> {
        funding::get_deposit_by_external_id(self.runner.pool(), deposit_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("deposit", deposit_external_id))
    }

    /// Update confirmations; credits the account when the threshold is met.
    pub async fn observe_deposit_confirmations(
        &self,
        deposit_external_id: Uuid,
        confirmations: i32,
    ) -> AppResult<Deposit> {
        let deposit = self.get_deposit(deposit_external_id).await?;
        let treasury_id = self.treasury_account_id;
        let enough = confirmations >= self.required_confirms;

        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = funding::get_deposit_for_update(&mut **tx, deposit.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("deposit", deposit.external_id))?;

                    // First sighting moves Detected → Confirming.
                    let mut status = current.status;
                    if status == DepositStatus::Detected {
                        status = deposit_transition(status, DepositEvent::Confirm)?;
                    }

                    if status == DepositStatus::Confirming && enough {
                        status = deposit_transition(status, DepositEvent::Credit)?;

                        let amount = Amount::new(current.amount)
                            .map_err(|err| AppError::internal(err.to_string()))?;

                        // Treasury float funds the credit; the tokens landed
                        // in the hot wallet on chain.
                        let batch = BatchBuilder::new()
                            .debit(treasury_id, amount, "deposit", current.id, "Treasury float out")
                            .credit(
                                current.account_id,
                                amount,
                                "deposit",
                                current.id,
                                "Deposit credited",
                            )
                            .build()?;
                        post_batch(tx, new_transaction_group_id(), &batch).await?;

                        outbox::enqueue_tx(
                            tx,
                            &DomainEvent::DepositCredited {
                                deposit_id: current.id,
                                account_id: current.account_id,
                                amount: current.amount,
                                tx_hash: current.tx_hash.clone(),
                                timestamp: Utc::now(),
                            },
                        )
                        .await?;
                    }

                    funding::update_deposit_status(&mut **tx, current.id, status, confirmations)
                        .await?;

                    Ok::<_, AppError>(Deposit { status, confirmations, ..current })
                })
            })
            .await?;

        Ok(updated)
    }

    /// Credited → Completed once the notification side-effects ran.
    pub async fn complete_deposit(&self, deposit_id: i64) -> AppResult<()> {
        self.runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = funding::get_deposit_for_update(&mut **tx, deposit_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("deposit", deposit_id))?;

                    let next = deposit_transition(current.status, DepositEvent::Complete)?;
                    if next != current.status {
                        funding::update_deposit_status(
                            &mut **tx,
                            current.id,
                            next,
                            current.confirmations,
                        )
                        .await?;
                    }

                    Ok::<_, AppError>(())
                })
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Withdrawals
    // =========================================================================

    /// Request a withdrawal: the amount moves available → held immediately.
    pub async fn request_withdrawal(
        &self,
        account_external_id: Uuid,
        to_address: &str,
        amount: Decimal,
    ) -> AppResult<Withdrawal> {
        let to_address = WalletAddress::parse(to_address)
            .map_err(|_| AppError::InvalidInput("Invalid destination address".to_string()))?;
        let amount =
            Amount::new(amount).map_err(|err| AppError::InvalidInput(err.to_string()))?;

        let account = fetch_account_by_external_id(self.runner.pool(), account_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("account", account_external_id))?;

        let withdrawal = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let withdrawal = funding::create_withdrawal(
                        &mut **tx,
                        Uuid::new_v4(),
                        account.id,
                        to_address.as_str(),
                        amount.as_decimal(),
                    )
                    .await?;

                    apply_effect_tx(tx, account.id, BalanceEffect::Hold, amount.as_decimal())
                        .await?;

                    Ok::<_, AppError>(withdrawal)
                })
            })
            .await?;

        info!(withdrawal_id = withdrawal.id, amount = %amount, "Withdrawal requested");
        Ok(withdrawal)
    }

    pub async fn get_withdrawal(&self, withdrawal_external_id: Uuid) -> AppResult<Withdrawal> {
        funding::get_withdrawal_by_external_id(self.runner.pool(), withdrawal_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("withdrawal", withdrawal_external_id))
    }

    /// Approve: hands the payout to the outbox for chain submission.
    pub async fn approve_withdrawal(&self, withdrawal_external_id: Uuid) -> AppResult<Withdrawal> {
        let withdrawal = self.get_withdrawal(withdrawal_external_id).await?;

        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = funding::get_withdrawal_for_update(&mut **tx, withdrawal.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("withdrawal", withdrawal.external_id))?;

                    let next = withdrawal_transition(current.status, WithdrawalEvent::Approve)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    funding::update_withdrawal_status(&mut **tx, current.id, next, None).await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::WithdrawalApproved {
                            withdrawal_id: current.id,
                            account_id: current.account_id,
                            to_address: current.to_address.clone(),
                            amount: current.amount,
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(Withdrawal { status: next, ..current })
                })
            })
            .await?;

        info!(withdrawal_id = updated.id, "Withdrawal approved");
        Ok(updated)
    }

    /// Reject a pending withdrawal; the hold returns to available.
    pub async fn reject_withdrawal(
        &self,
        withdrawal_external_id: Uuid,
        reason: &str,
    ) -> AppResult<Withdrawal> {
        let withdrawal = self.get_withdrawal(withdrawal_external_id).await?;
        self.reverse(withdrawal.id, WithdrawalEvent::Reject, reason).await
    }

    /// Worker path: Approved → Submitted → Confirmed as the chain reports.
    pub async fn mark_withdrawal_submitted(
        &self,
        withdrawal_id: i64,
        tx_hash: &str,
    ) -> AppResult<()> {
        let tx_hash = tx_hash.to_string();
        self.runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = funding::get_withdrawal_for_update(&mut **tx, withdrawal_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("withdrawal", withdrawal_id))?;

                    let next = withdrawal_transition(current.status, WithdrawalEvent::Submit)?;
                    if next != current.status {
                        funding::update_withdrawal_status(
                            &mut **tx,
                            current.id,
                            next,
                            Some(&tx_hash),
                        )
                        .await?;
                    }
                    Ok::<_, AppError>(())
                })
            })
            .await?;
        Ok(())
    }

    /// Worker path: confirmed on chain, then complete captures the hold.
    pub async fn complete_withdrawal(&self, withdrawal_id: i64) -> AppResult<Withdrawal> {
        let treasury_id = self.treasury_account_id;

        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = funding::get_withdrawal_for_update(&mut **tx, withdrawal_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("withdrawal", withdrawal_id))?;

                    let mut status = current.status;
                    if status == settle_domain::states::WithdrawalStatus::Submitted {
                        status = withdrawal_transition(status, WithdrawalEvent::Confirm)?;
                    }

                    let next = withdrawal_transition(status, WithdrawalEvent::Complete)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    let amount = Amount::new(current.amount)
                        .map_err(|err| AppError::internal(err.to_string()))?;

                    let batch = BatchBuilder::new()
                        .debit_capture(
                            current.account_id,
                            amount,
                            "withdrawal",
                            current.id,
                            "Withdrawal paid out",
                        )
                        .credit(treasury_id, amount, "withdrawal", current.id, "Treasury float")
                        .build()?;
                    post_batch(tx, new_transaction_group_id(), &batch).await?;

                    funding::update_withdrawal_status(&mut **tx, current.id, next, None).await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::WithdrawalCompleted {
                            withdrawal_id: current.id,
                            tx_hash: current.tx_hash.clone(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(Withdrawal { status: next, ..current })
                })
            })
            .await?;

        info!(withdrawal_id = updated.id, "Withdrawal completed");
        Ok(updated)
    }

    /// Worker path: chain submission failed for good.
    pub async fn fail_withdrawal(&self, withdrawal_id: i64, reason: &str) -> AppResult<Withdrawal> {
        self.reverse(withdrawal_id, WithdrawalEvent::Fail, reason).await
    }

    /// Shared Reject/Fail path: transition and release the hold.
    async fn reverse(
        &self,
        withdrawal_id: i64,
        event: WithdrawalEvent,
        reason: &str,
    ) -> AppResult<Withdrawal> {
        let reason = reason.to_string();

        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = funding::get_withdrawal_for_update(&mut **tx, withdrawal_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("withdrawal", withdrawal_id))?;

                    let next = withdrawal_transition(current.status, event)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    apply_effect_tx(
                        tx,
                        current.account_id,
                        BalanceEffect::Release,
                        current.amount,
                    )
                    .await?;

                    funding::update_withdrawal_status(&mut **tx, current.id, next, None).await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::WithdrawalReversed {
                            withdrawal_id: current.id,
                            reason: reason.clone(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(Withdrawal { status: next, ..current })
                })
            })
            .await?;

        info!(withdrawal_id = updated.id, status = %updated.status, "Withdrawal reversed");
        Ok(updated)
    }
}
