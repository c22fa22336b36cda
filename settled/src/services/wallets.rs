//! Wallet service.
//!
//! Registration, EIP-712 ownership verification, primary designation, and
//! soft deletion. Verification details are logged but never returned to the
//! client beyond the generic failure and the nonce-reuse signal.

use crate::error::{AppError, AppResult};
use settle_domain::entities::{User, Wallet};
use settle_domain::events::DomainEvent;
use settle_domain::value_objects::WalletAddress;
use settle_store::{audit, outbox, users, wallets, TxRunner};
use settle_verify::{parse_signature, VerificationMessage, WalletVerifier};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct WalletService {
    runner: TxRunner,
    verifier: Arc<WalletVerifier>,
}

impl WalletService {
    pub fn new(runner: TxRunner, verifier: Arc<WalletVerifier>) -> Self {
        Self { runner, verifier }
    }

    async fn owner(&self, user_external_id: Uuid) -> AppResult<User> {
        users::get_user_by_external_id(self.runner.pool(), user_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", user_external_id))
    }

    async fn owned_wallet(
        &self,
        user: &User,
        wallet_external_id: Uuid,
        include_deleted: bool,
    ) -> AppResult<Wallet> {
        wallets::get_wallet_by_external_id_and_user(
            self.runner.pool(),
            wallet_external_id,
            user.id,
            include_deleted,
        )
        .await?
        .ok_or_else(|| AppError::not_found("wallet", wallet_external_id))
    }

    /// Register a new wallet for a user.
    pub async fn register(
        &self,
        user_external_id: Uuid,
        address: &str,
        label: Option<&str>,
    ) -> AppResult<Wallet> {
        let address = WalletAddress::parse(address)
            .map_err(|_| AppError::InvalidInput("Invalid wallet address format".to_string()))?;

        let user = self.owner(user_external_id).await?;

        let wallet = wallets::create_wallet(
            self.runner.pool(),
            Uuid::new_v4(),
            user.id,
            address.as_str(),
            label,
        )
        .await
        .map_err(|err| match err {
            settle_store::StoreError::Duplicate { .. } => {
                AppError::Conflict("Wallet address already registered".to_string())
            }
            other => other.into(),
        })?;

        info!(
            wallet_external_id = %wallet.external_id,
            address = %wallet.address,
            user_external_id = %user_external_id,
            "Wallet registered"
        );

        Ok(wallet)
    }

    pub async fn get(&self, user_external_id: Uuid, wallet_external_id: Uuid) -> AppResult<Wallet> {
        let user = self.owner(user_external_id).await?;
        self.owned_wallet(&user, wallet_external_id, false).await
    }

    pub async fn list(&self, user_external_id: Uuid) -> AppResult<Vec<Wallet>> {
        let user = self.owner(user_external_id).await?;
        Ok(wallets::list_wallets_by_user(self.runner.pool(), user.id).await?)
    }

    pub async fn update_label(
        &self,
        user_external_id: Uuid,
        wallet_external_id: Uuid,
        label: &str,
    ) -> AppResult<Wallet> {
        let user = self.owner(user_external_id).await?;
        let wallet = self.owned_wallet(&user, wallet_external_id, false).await?;

        let affected =
            wallets::update_wallet_label(self.runner.pool(), wallet.id, user.id, label).await?;
        if affected == 0 {
            return Err(AppError::not_found("wallet", wallet_external_id));
        }

        self.owned_wallet(&user, wallet_external_id, false).await
    }

    /// Verify wallet ownership with an EIP-712 signature.
    ///
    /// Already-verified wallets short-circuit to success without touching
    /// the nonce store. The first verified wallet of a user is auto-set
    /// primary, and the owner's account pointer follows, in the same unit of
    /// work as the verification flag.
    pub async fn verify(
        &self,
        user_external_id: Uuid,
        wallet_external_id: Uuid,
        signature_hex: &str,
        nonce: &str,
        timestamp: i64,
        request_id: &str,
    ) -> AppResult<Wallet> {
        let signature = parse_signature(signature_hex).map_err(|err| {
            warn!(%wallet_external_id, request_id, error = %err, "Malformed signature");
            AppError::InvalidInput("Invalid signature format".to_string())
        })?;

        let user = self.owner(user_external_id).await?;
        let wallet = self.owned_wallet(&user, wallet_external_id, false).await?;

        // Already verified: idempotent success, nonce untouched.
        if wallet.is_verified {
            return Ok(wallet);
        }

        let message = VerificationMessage {
            wallet: wallet.address.clone(),
            nonce: nonce.to_string(),
            timestamp,
        };

        if let Err(err) =
            self.verifier.verify_ownership(&wallet.address, &message, &signature).await
        {
            // Precise reason to the log only.
            warn!(
                %wallet_external_id,
                address = %wallet.address,
                request_id,
                error = %err,
                "Wallet verification failed"
            );
            return Err(err.into());
        }

        self.mark_verified(user, wallet, request_id).await
    }

    /// Flag the wallet verified and auto-set it primary when it is the
    /// user's first verified wallet.
    async fn mark_verified(
        &self,
        user: User,
        wallet: Wallet,
        request_id: &str,
    ) -> AppResult<Wallet> {
        let request_id = request_id.to_string();

        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let affected =
                        wallets::mark_wallet_verified(&mut **tx, wallet.id, user.id).await?;

                    if affected == 0 {
                        // Lost a race with another verify call; current row wins.
                        let current = wallets::get_wallet_by_id(&mut **tx, wallet.id)
                            .await?
                            .ok_or_else(|| AppError::not_found("wallet", wallet.external_id))?;
                        return Ok(current);
                    }

                    // First verified wallet becomes primary.
                    if wallets::get_primary_wallet(&mut **tx, user.id).await?.is_none() {
                        info!(wallet_id = wallet.id, user_id = user.id,
                              "Auto-setting first verified wallet as primary");

                        wallets::clear_primary_wallet(&mut **tx, user.id).await?;
                        let set = wallets::set_wallet_primary(&mut **tx, wallet.id, user.id).await?;
                        if set == 0 {
                            return Err(AppError::internal("Failed to set wallet as primary"));
                        }

                        // Pointer update is best-effort: verification holds
                        // even if the account row is missing.
                        if let Err(err) = wallets::update_account_primary_wallet(
                            &mut **tx, user.id, wallet.id,
                        )
                        .await
                        {
                            warn!(error = %err, "Failed to update account primary wallet");
                        }
                    }

                    outbox::enqueue_tx(
                        tx,
                        &DomainEvent::WalletVerified {
                            wallet_id: wallet.id,
                            user_id: user.id,
                            address: wallet.address.clone(),
                            timestamp: chrono::Utc::now(),
                        },
                    )
                    .await?;

                    audit::append(
                        &mut **tx,
                        &user.external_id.to_string(),
                        "wallet.verify",
                        "wallet",
                        &wallet.external_id.to_string(),
                        None,
                        Some(&serde_json::json!({ "is_verified": true })),
                        Some(&request_id),
                    )
                    .await?;

                    let updated = wallets::get_wallet_by_id(&mut **tx, wallet.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("wallet", wallet.external_id))?;

                    Ok::<_, AppError>(updated)
                })
            })
            .await?;

        info!(wallet_id = updated.id, address = %updated.address, "Wallet verified");
        Ok(updated)
    }

    /// Designate a verified wallet as primary.
    pub async fn set_primary(
        &self,
        user_external_id: Uuid,
        wallet_external_id: Uuid,
    ) -> AppResult<Wallet> {
        let user = self.owner(user_external_id).await?;
        let wallet = self.owned_wallet(&user, wallet_external_id, false).await?;

        if !wallet.is_verified {
            return Err(AppError::InvalidInput(
                "Wallet must be verified before setting as primary".to_string(),
            ));
        }

        // Already primary: idempotent success.
        if wallet.is_primary {
            return Ok(wallet);
        }

        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    // Lock user then wallet, stable order.
                    users::get_user_for_update(&mut **tx, user.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("user", user.external_id))?;
                    wallets::get_wallet_for_update(&mut **tx, wallet.id, user.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("wallet", wallet.external_id))?;

                    wallets::clear_primary_wallet(&mut **tx, user.id).await?;

                    let set = wallets::set_wallet_primary(&mut **tx, wallet.id, user.id).await?;
                    if set == 0 {
                        return Err(AppError::InvalidInput(
                            "Failed to set primary - wallet may not be verified".to_string(),
                        ));
                    }

                    if let Err(err) =
                        wallets::update_account_primary_wallet(&mut **tx, user.id, wallet.id).await
                    {
                        warn!(error = %err, "Failed to update account primary wallet");
                    }

                    let updated = wallets::get_wallet_by_id(&mut **tx, wallet.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("wallet", wallet.external_id))?;

                    Ok::<_, AppError>(updated)
                })
            })
            .await?;

        info!(wallet_external_id = %wallet_external_id, "Wallet set as primary");
        Ok(updated)
    }

    /// Soft delete. Idempotent for already-deleted wallets; primary wallets
    /// cannot be deleted.
    pub async fn delete(
        &self,
        user_external_id: Uuid,
        wallet_external_id: Uuid,
    ) -> AppResult<()> {
        let user = self.owner(user_external_id).await?;
        let wallet = self.owned_wallet(&user, wallet_external_id, true).await?;

        if wallet.is_deleted() {
            return Ok(());
        }

        if wallet.is_primary {
            return Err(AppError::InvalidInput(
                "Cannot delete primary wallet. Set another wallet as primary first.".to_string(),
            ));
        }

        let affected =
            wallets::soft_delete_wallet(self.runner.pool(), wallet.id, user.id).await?;

        if affected == 0 {
            // Raced with a primary change or a concurrent delete; re-check.
            let current = self.owned_wallet(&user, wallet_external_id, true).await?;
            if current.is_deleted() {
                return Ok(());
            }
            if current.is_primary {
                return Err(AppError::InvalidInput(
                    "Cannot delete wallet - it is now the primary wallet".to_string(),
                ));
            }
            return Err(AppError::internal("Failed to delete wallet"));
        }

        info!(wallet_external_id = %wallet_external_id, "Wallet deleted");
        Ok(())
    }
}
