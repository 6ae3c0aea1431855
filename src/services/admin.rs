//! Claim type, group and balance administration

use super::audit::{entity, log_audit, AuditAction, AuditContext, AuditRecord};
use super::balance::BalanceEngine;
use crate::db::ClaimStore;
use crate::error::{CoreError, CoreResult};
use crate::handlers::auth::hash_password;
use crate::models::*;
use crate::validation::{validate_limit, ValidationError};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub struct AdminService<'a> {
    store: &'a dyn ClaimStore,
}

impl<'a> AdminService<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store }
    }

    // ===== Claim types =====

    pub async fn list_claim_types(&self) -> CoreResult<Vec<ClaimType>> {
        self.store.list_claim_types().await
    }

    pub async fn create_claim_type(
        &self,
        actor: &User,
        input: CreateClaimType,
        ctx: &AuditContext,
    ) -> CoreResult<ClaimType> {
        input.validate().map_err(ValidationError::from)?;
        validate_limit("limit_amount", input.limit_amount)?;

        let now = Utc::now();
        let claim_type = self
            .store
            .insert_claim_type(ClaimType {
                id: Uuid::new_v4(),
                name: input.name.trim().to_string(),
                description: input.description,
                limit_amount: input.limit_amount,
                limit_timespan: input.limit_timespan,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!("Claim type '{}' created", claim_type.name);

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Create, entity::CLAIM_TYPE, Some(claim_type.id))
                .by(actor.id)
                .new_values(serde_json::to_value(&claim_type).unwrap_or_default()),
        )
        .await;

        Ok(claim_type)
    }

    /// Change the default limit of a type. Existing balances keep their limit.
    pub async fn update_claim_type_limit(
        &self,
        actor: &User,
        claim_type_id: Uuid,
        input: UpdateClaimTypeLimit,
        ctx: &AuditContext,
    ) -> CoreResult<ClaimType> {
        validate_limit("limit_amount", input.limit_amount)?;
        let before = self
            .store
            .get_claim_type(claim_type_id)
            .await?
            .ok_or(CoreError::NotFound("Claim type"))?;

        let updated = self
            .store
            .update_claim_type_limit(claim_type_id, input.limit_amount, input.limit_timespan)
            .await?
            .ok_or(CoreError::NotFound("Claim type"))?;

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::CLAIM_TYPE, Some(claim_type_id))
                .by(actor.id)
                .old(json!({
                    "limit_amount": before.limit_amount,
                    "limit_timespan": before.limit_timespan,
                }))
                .new_values(json!({
                    "limit_amount": updated.limit_amount,
                    "limit_timespan": updated.limit_timespan,
                })),
        )
        .await;

        Ok(updated)
    }

    // ===== Users =====

    /// Register an account. Duplicate emails are a conflict.
    pub async fn create_user(
        &self,
        actor: &User,
        input: CreateUser,
        ctx: &AuditContext,
    ) -> CoreResult<User> {
        input.validate().map_err(ValidationError::from)?;
        if let Some(group_id) = input.user_group_id {
            if self.store.get_user_group(group_id).await?.is_none() {
                return Err(CoreError::NotFound("User group"));
            }
        }

        let password_hash = hash_password(&input.password)
            .map_err(|e| CoreError::Persistence(format!("Password hashing failed: {}", e)))?;

        let now = Utc::now();
        let user = self
            .store
            .insert_user(User {
                id: Uuid::new_v4(),
                email: input.email.trim().to_lowercase(),
                password_hash,
                first_name: input.first_name.trim().to_string(),
                last_name: input.last_name.trim().to_string(),
                role: input.role.unwrap_or(UserRole::Normal),
                user_group_id: input.user_group_id,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!("User {} created by {}", user.email, actor.email);

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Create, entity::USER, Some(user.id))
                .by(actor.id)
                .new_values(serde_json::to_value(UserResponse::from(user.clone())).unwrap_or_default()),
        )
        .await;

        Ok(user)
    }

    // ===== Groups =====

    pub async fn list_groups(&self) -> CoreResult<Vec<UserGroup>> {
        self.store.list_user_groups().await
    }

    pub async fn create_group(
        &self,
        actor: &User,
        input: CreateUserGroup,
        ctx: &AuditContext,
    ) -> CoreResult<UserGroup> {
        input.validate().map_err(ValidationError::from)?;

        let now = Utc::now();
        let group = self
            .store
            .insert_user_group(UserGroup {
                id: Uuid::new_v4(),
                name: input.name.trim().to_string(),
                description: input.description,
                created_at: now,
                updated_at: now,
            })
            .await?;

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Create, entity::USER_GROUP, Some(group.id))
                .by(actor.id)
                .new_values(serde_json::to_value(&group).unwrap_or_default()),
        )
        .await;

        Ok(group)
    }

    /// Put a user into a group, or take them out with `None`
    pub async fn assign_group(
        &self,
        actor: &User,
        user_id: Uuid,
        group_id: Option<Uuid>,
        ctx: &AuditContext,
    ) -> CoreResult<User> {
        let before = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(CoreError::NotFound("User"))?;
        if let Some(group_id) = group_id {
            if self.store.get_user_group(group_id).await?.is_none() {
                return Err(CoreError::NotFound("User group"));
            }
        }

        let user = self.store.set_user_group(user_id, group_id).await?;

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::USER, Some(user_id))
                .by(actor.id)
                .old(json!({ "user_group_id": before.user_group_id }))
                .new_values(json!({ "user_group_id": user.user_group_id })),
        )
        .await;

        Ok(user)
    }

    // ===== Balances =====

    pub async fn list_user_balances(&self, user_id: Uuid) -> CoreResult<Vec<UserClaimBalance>> {
        if self.store.get_user(user_id).await?.is_none() {
            return Err(CoreError::NotFound("User"));
        }
        BalanceEngine::new(self.store).list_balances(user_id).await
    }

    /// Overwrite a user's limit for one claim type
    pub async fn adjust_balance(
        &self,
        actor: &User,
        input: AdjustBalanceRequest,
        ctx: &AuditContext,
    ) -> CoreResult<UserClaimBalance> {
        let engine = BalanceEngine::new(self.store);
        let before = engine
            .get_or_create_balance(input.user_id, input.claim_type_id)
            .await?;
        let after = engine
            .admin_set_limit(input.user_id, input.claim_type_id, input.new_limit)
            .await?;

        tracing::info!(
            "Balance limit for user {} / claim type {} set to {} by {}",
            input.user_id,
            input.claim_type_id,
            after.total_limit,
            actor.email
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::USER_CLAIM_BALANCE, Some(after.id))
                .by(actor.id)
                .old(json!({
                    "total_limit": before.total_limit,
                    "remaining_balance": before.remaining_balance,
                }))
                .new_values(json!({
                    "total_limit": after.total_limit,
                    "remaining_balance": after.remaining_balance,
                })),
        )
        .await;

        Ok(after)
    }
}
