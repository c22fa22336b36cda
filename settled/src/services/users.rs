//! User service.
//!
//! Thin driver over the user repository: creation, profile updates, role
//! changes, suspension, soft deletion (terminal), and the KYC status flow.

use crate::error::{AppError, AppResult};
use settle_domain::entities::{KycStatus, User, UserRole, UserStatus};
use settle_domain::value_objects::validate_email;
use settle_store::{audit, users, TxRunner};
use tracing::info;
use uuid::Uuid;

pub struct UserService {
    runner: TxRunner,
}

impl UserService {
    pub fn new(runner: TxRunner) -> Self {
        Self { runner }
    }

    async fn load(&self, user_external_id: Uuid) -> AppResult<User> {
        users::get_user_by_external_id(self.runner.pool(), user_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", user_external_id))
    }

    pub async fn create(&self, email: &str, name: &str, role: UserRole) -> AppResult<User> {
        validate_email(email).map_err(|err| AppError::InvalidInput(err.to_string()))?;

        let user = users::create_user(self.runner.pool(), Uuid::new_v4(), email, name, role)
            .await
            .map_err(|err| match err {
                settle_store::StoreError::Duplicate { .. } => {
                    AppError::Conflict("Email already registered".to_string())
                }
                other => other.into(),
            })?;

        info!(user_external_id = %user.external_id, "User created");
        Ok(user)
    }

    pub async fn get(&self, user_external_id: Uuid) -> AppResult<User> {
        self.load(user_external_id).await
    }

    pub async fn list(
        &self,
        role: Option<UserRole>,
        kyc_status: Option<KycStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<User>> {
        let limit = limit.clamp(1, 100);
        Ok(users::list_users(self.runner.pool(), role, kyc_status, limit, offset).await?)
    }

    pub async fn update_name(&self, user_external_id: Uuid, name: &str) -> AppResult<User> {
        let user = self.load(user_external_id).await?;

        let affected = users::update_user_name(self.runner.pool(), user.id, name).await?;
        if affected == 0 {
            return Err(AppError::not_found("user", user_external_id));
        }

        self.load(user_external_id).await
    }

    pub async fn update_role(&self, user_external_id: Uuid, role: UserRole) -> AppResult<User> {
        // ADMIN is granted out of band, never through the API.
        if role == UserRole::Admin {
            return Err(AppError::Forbidden("Cannot assign ADMIN role via API".to_string()));
        }

        let user = self.load(user_external_id).await?;

        let affected = users::update_user_role(self.runner.pool(), user.id, role).await?;
        if affected == 0 {
            return Err(AppError::not_found("user", user_external_id));
        }

        self.load(user_external_id).await
    }

    pub async fn suspend(&self, user_external_id: Uuid) -> AppResult<User> {
        self.set_status(user_external_id, UserStatus::Suspended, "user.suspend").await
    }

    pub async fn activate(&self, user_external_id: Uuid) -> AppResult<User> {
        let user = self.load(user_external_id).await?;
        if user.status == UserStatus::Deleted {
            return Err(AppError::Conflict("Deleted users cannot be reactivated".to_string()));
        }
        self.set_status(user_external_id, UserStatus::Active, "user.activate").await
    }

    /// Soft delete; terminal.
    pub async fn delete(&self, user_external_id: Uuid) -> AppResult<()> {
        let user = self.load(user_external_id).await?;

        let affected = users::soft_delete_user(self.runner.pool(), user.id).await?;
        if affected == 0 {
            // Already deleted concurrently: idempotent success.
            return Ok(());
        }

        info!(user_external_id = %user_external_id, "User deleted");
        Ok(())
    }

    async fn set_status(
        &self,
        user_external_id: Uuid,
        status: UserStatus,
        action: &'static str,
    ) -> AppResult<User> {
        let user = self.load(user_external_id).await?;

        self.runner
            .run(move |tx| {
                Box::pin(async move {
                    let affected = users::set_user_status(&mut **tx, user.id, status).await?;
                    if affected == 0 {
                        return Err(AppError::not_found("user", user.external_id));
                    }

                    audit::append(
                        &mut **tx,
                        "admin",
                        action,
                        "user",
                        &user.external_id.to_string(),
                        Some(&serde_json::json!({ "status": user.status.as_str() })),
                        Some(&serde_json::json!({ "status": status.as_str() })),
                        None,
                    )
                    .await?;

                    Ok::<_, AppError>(())
                })
            })
            .await?;

        self.load(user_external_id).await
    }

    // =========================================================================
    // KYC
    // =========================================================================

    /// User requests review: None/Rejected → Pending.
    pub async fn kyc_request(&self, user_external_id: Uuid) -> AppResult<User> {
        let user = self.load(user_external_id).await?;

        match user.kyc_status {
            KycStatus::None | KycStatus::Rejected => {
                self.apply_kyc(user, KycStatus::Pending).await
            }
            KycStatus::Pending => Ok(user),
            KycStatus::Verified => {
                Err(AppError::Conflict("User is already KYC verified".to_string()))
            }
        }
    }

    /// Admin approval: Pending → Verified. The first approval pins
    /// `kyc_verified_at` for good.
    pub async fn kyc_approve(&self, user_external_id: Uuid) -> AppResult<User> {
        let user = self.load(user_external_id).await?;

        match user.kyc_status {
            KycStatus::Pending => self.apply_kyc(user, KycStatus::Verified).await,
            KycStatus::Verified => Ok(user),
            other => Err(AppError::InvalidStateTransition {
                current: other.as_str().to_string(),
                event: "kyc_approve".to_string(),
            }),
        }
    }

    /// Admin rejection: Pending → Rejected.
    pub async fn kyc_reject(&self, user_external_id: Uuid) -> AppResult<User> {
        let user = self.load(user_external_id).await?;

        match user.kyc_status {
            KycStatus::Pending => self.apply_kyc(user, KycStatus::Rejected).await,
            KycStatus::Rejected => Ok(user),
            other => Err(AppError::InvalidStateTransition {
                current: other.as_str().to_string(),
                event: "kyc_reject".to_string(),
            }),
        }
    }

    async fn apply_kyc(&self, user: User, next: KycStatus) -> AppResult<User> {
        let affected = users::update_kyc_status(self.runner.pool(), user.id, next).await?;
        if affected == 0 {
            return Err(AppError::not_found("user", user.external_id));
        }

        info!(user_external_id = %user.external_id, kyc = next.as_str(), "KYC status updated");
        self.load(user.external_id).await
    }
}
