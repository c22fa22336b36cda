//! Payment service.
//!
//! Authorize holds payer funds and credits the escrow account; capture pays
//! the payee minus the fee split; void releases the hold; refund reverses a
//! captured payment. Every transition is one unit of work containing the
//! status change, the ledger batch, and the outbox event.

use crate::config::PaymentConfig;
use crate::error::{AppError, AppResult};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use settle_domain::entities::Payment;
use settle_domain::events::{new_transaction_group_id, DomainEvent};
use settle_domain::states::{payment_transition, PaymentEvent, PaymentStatus};
use settle_domain::value_objects::Amount;
use settle_ledger::accounts::{apply_effect_tx, fetch_account_by_external_id};
use settle_ledger::batch::BatchBuilder;
use settle_ledger::poster::post_batch;
use settle_ledger::types::BalanceEffect;
use settle_store::{outbox, payments, TxRunner};
use tracing::info;
use uuid::Uuid;

/// Accounts the payment flows settle against.
#[derive(Debug, Clone, Copy)]
pub struct SystemAccounts {
    pub escrow_account_id: i64,
    pub fee_account_id: i64,
}

pub struct PaymentService {
    runner: TxRunner,
    system: SystemAccounts,
    policy: PaymentConfig,
}

impl PaymentService {
    pub fn new(runner: TxRunner, system: SystemAccounts, policy: PaymentConfig) -> Self {
        Self { runner, system, policy }
    }

    async fn load(&self, payment_external_id: Uuid) -> AppResult<Payment> {
        payments::get_payment_by_external_id(self.runner.pool(), payment_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("payment", payment_external_id))
    }

    pub async fn get(&self, payment_external_id: Uuid) -> AppResult<Payment> {
        self.load(payment_external_id).await
    }

    /// Authorize: create the payment and hold the payer funds in escrow.
    ///
    /// Ledger group: payer debit (hold effect), escrow credit.
    pub async fn authorize(
        &self,
        payer_account_external_id: Uuid,
        payee_account_external_id: Uuid,
        amount: Decimal,
        order_id: Option<i64>,
    ) -> AppResult<Payment> {
        let amount = Amount::new(amount)
            .map_err(|err| AppError::InvalidInput(err.to_string()))?;

        let payer = fetch_account_by_external_id(self.runner.pool(), payer_account_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("account", payer_account_external_id))?;
        let payee = fetch_account_by_external_id(self.runner.pool(), payee_account_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("account", payee_account_external_id))?;

        let escrow_id = self.system.escrow_account_id;
        let expires_at = Utc::now()
            + ChronoDuration::from_std(self.policy.auth_ttl)
                .map_err(|e| AppError::internal(format!("Bad auth ttl: {}", e)))?;

        let payment = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let payment = payments::create_payment(
                        &mut **tx,
                        Uuid::new_v4(),
                        order_id,
                        payer.id,
                        payee.id,
                        amount.as_decimal(),
                        Decimal::ZERO,
                    )
                    .await?;

                    // Admissibility check before any balance effect.
                    payment_transition(payment.status, PaymentEvent::Authorize)?;

                    let batch = BatchBuilder::new()
                        .debit_hold(
                            payer.id,
                            amount,
                            "payment_authorize",
                            payment.id,
                            "Authorization hold",
                        )
                        .credit(
                            escrow_id,
                            amount,
                            "payment_authorize",
                            payment.id,
                            "Escrow for authorization",
                        )
                        .build()?;
                    post_batch(tx, new_transaction_group_id(), &batch).await?;

                    payments::mark_authorized(&mut **tx, payment.id, expires_at).await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::PaymentAuthorized {
                            payment_id: payment.id,
                            payer_account_id: payer.id,
                            amount: amount.as_decimal(),
                            expires_at: Some(expires_at),
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(payment)
                })
            })
            .await?;

        info!(payment_id = payment.id, amount = %amount, "Payment authorized");
        self.load(payment.external_id).await
    }

    /// Capture: pay out escrow to the payee and the fee account, consume the
    /// payer's hold. Fails with `PaymentExpired` past the authorization
    /// window.
    pub async fn capture(&self, payment_external_id: Uuid) -> AppResult<Payment> {
        let system = self.system;
        let fee_rate = self.policy.fee_rate;

        let payment = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current =
                        payments::get_payment_by_external_id(&mut **tx, payment_external_id)
                            .await?
                            .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;
                    let current = payments::get_payment_for_update(&mut **tx, current.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;

                    if current.is_expired(Utc::now()) {
                        return Err(AppError::PaymentExpired { payment_id: current.id });
                    }

                    let next = payment_transition(current.status, PaymentEvent::Capture)?;
                    if next == current.status {
                        // Idempotent retry into the state we already hold.
                        return Ok(current);
                    }

                    let gross = Amount::new(current.amount)
                        .map_err(|err| AppError::internal(err.to_string()))?;
                    let fee_raw = (current.amount * fee_rate).round_dp(8);
                    let net_raw = current.amount - fee_raw;
                    let net = Amount::new(net_raw)
                        .map_err(|err| AppError::internal(err.to_string()))?;

                    let mut builder = BatchBuilder::new()
                        .debit(
                            system.escrow_account_id,
                            gross,
                            "payment_capture",
                            current.id,
                            "Escrow payout",
                        )
                        .credit(
                            current.payee_account_id,
                            net,
                            "payment_capture",
                            current.id,
                            "Merchant payout",
                        );
                    if fee_raw > Decimal::ZERO {
                        let fee = Amount::new(fee_raw)
                            .map_err(|err| AppError::internal(err.to_string()))?;
                        builder = builder.credit(
                            system.fee_account_id,
                            fee,
                            "payment_capture",
                            current.id,
                            "Platform fee",
                        );
                    }
                    post_batch(tx, new_transaction_group_id(), &builder.build()?).await?;

                    // Consume the payer hold; no payer entry in this group.
                    apply_effect_tx(
                        tx,
                        current.payer_account_id,
                        BalanceEffect::Capture,
                        current.amount,
                    )
                    .await?;

                    payments::mark_captured(&mut **tx, current.id, fee_raw).await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::PaymentCaptured {
                            payment_id: current.id,
                            payee_account_id: current.payee_account_id,
                            amount: current.amount,
                            fee_amount: fee_raw,
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(current)
                })
            })
            .await?;

        info!(payment_id = payment.id, "Payment captured");
        self.load(payment_external_id).await
    }

    /// Void: release the authorization hold back to the payer.
    ///
    /// Ledger group: escrow debit, payer credit (release effect).
    pub async fn void(&self, payment_external_id: Uuid) -> AppResult<Payment> {
        let escrow_id = self.system.escrow_account_id;

        let payment = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current =
                        payments::get_payment_by_external_id(&mut **tx, payment_external_id)
                            .await?
                            .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;
                    let current = payments::get_payment_for_update(&mut **tx, current.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;

                    let next = payment_transition(current.status, PaymentEvent::Void)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    let amount = Amount::new(current.amount)
                        .map_err(|err| AppError::internal(err.to_string()))?;

                    let batch = BatchBuilder::new()
                        .debit(escrow_id, amount, "payment_void", current.id, "Escrow return")
                        .credit_release(
                            current.payer_account_id,
                            amount,
                            "payment_void",
                            current.id,
                            "Authorization released",
                        )
                        .build()?;
                    post_batch(tx, new_transaction_group_id(), &batch).await?;

                    payments::update_payment_status(&mut **tx, current.id, PaymentStatus::Voided)
                        .await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::PaymentVoided {
                            payment_id: current.id,
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(current)
                })
            })
            .await?;

        info!(payment_id = payment.id, "Payment voided");
        self.load(payment_external_id).await
    }

    /// Refund a captured payment by reversing the capture entries.
    pub async fn refund(&self, payment_external_id: Uuid) -> AppResult<Payment> {
        let fee_account_id = self.system.fee_account_id;

        let payment = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current =
                        payments::get_payment_by_external_id(&mut **tx, payment_external_id)
                            .await?
                            .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;
                    let current = payments::get_payment_for_update(&mut **tx, current.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;

                    let next = payment_transition(current.status, PaymentEvent::Refund)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    let gross = Amount::new(current.amount)
                        .map_err(|err| AppError::internal(err.to_string()))?;
                    let net_raw = current.net_amount();
                    let net = Amount::new(net_raw)
                        .map_err(|err| AppError::internal(err.to_string()))?;

                    let mut builder = BatchBuilder::new()
                        .debit(
                            current.payee_account_id,
                            net,
                            "payment_refund",
                            current.id,
                            "Merchant payout reversal",
                        )
                        .credit(
                            current.payer_account_id,
                            gross,
                            "payment_refund",
                            current.id,
                            "Refund",
                        );
                    if current.fee_amount > Decimal::ZERO {
                        let fee = Amount::new(current.fee_amount)
                            .map_err(|err| AppError::internal(err.to_string()))?;
                        builder = builder.debit(
                            fee_account_id,
                            fee,
                            "payment_refund",
                            current.id,
                            "Platform fee reversal",
                        );
                    }
                    post_batch(tx, new_transaction_group_id(), &builder.build()?).await?;

                    payments::update_payment_status(&mut **tx, current.id, PaymentStatus::Refunded)
                        .await?;

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::PaymentRefunded {
                            payment_id: current.id,
                            amount: current.amount,
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                    Ok::<_, AppError>(current)
                })
            })
            .await?;

        info!(payment_id = payment.id, "Payment refunded");
        self.load(payment_external_id).await
    }

    /// Void every expired authorization, up to `limit`. Used by the
    /// maintenance worker; errors per payment are logged and skipped.
    pub async fn auto_void_expired(&self, limit: i64) -> AppResult<usize> {
        let expired =
            payments::list_expired_authorized(self.runner.pool(), Utc::now(), limit).await?;

        let mut voided = 0;
        for payment in expired {
            match self.void(payment.external_id).await {
                Ok(_) => {
                    info!(payment_id = payment.id, "Auto-voided expired authorization");
                    voided += 1;
                }
                Err(err) => {
                    tracing::warn!(payment_id = payment.id, error = %err,
                                   "Auto-void failed, will retry next pass");
                }
            }
        }

        Ok(voided)
    }
}
