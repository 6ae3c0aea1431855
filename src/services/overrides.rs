//! Bulk replacement of claim type permission overrides

use super::audit::{entity, log_audit, AuditAction, AuditContext, AuditRecord};
use crate::db::ClaimStore;
use crate::error::{CoreError, CoreResult};
use crate::models::*;
use crate::validation::validate_override_entries;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub struct OverrideAdmin<'a> {
    store: &'a dyn ClaimStore,
}

impl<'a> OverrideAdmin<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store }
    }

    async fn check_entries(&self, entries: &[OverrideEntry]) -> CoreResult<()> {
        validate_override_entries(entries)?;
        for entry in entries {
            if self.store.get_claim_type(entry.claim_type_id).await?.is_none() {
                return Err(CoreError::NotFound("Claim type"));
            }
        }
        Ok(())
    }

    /// Replace every override of the group with `entries`
    pub async fn set_group_permissions(
        &self,
        actor: &User,
        group_id: Uuid,
        entries: Vec<OverrideEntry>,
        ctx: &AuditContext,
    ) -> CoreResult<Vec<UserGroupClaimType>> {
        if self.store.get_user_group(group_id).await?.is_none() {
            return Err(CoreError::NotFound("User group"));
        }
        self.check_entries(&entries).await?;

        let now = Utc::now();
        let rows = entries
            .iter()
            .map(|e| UserGroupClaimType {
                id: Uuid::new_v4(),
                user_group_id: group_id,
                claim_type_id: e.claim_type_id,
                is_allowed: e.is_allowed,
                custom_limit_amount: e.custom_limit_amount,
                created_at: now,
            })
            .collect();
        let stored = self.store.replace_group_overrides(group_id, rows).await?;

        tracing::info!(
            "Replaced claim type permissions for group {} ({} entries)",
            group_id,
            stored.len()
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::USER_GROUP, Some(group_id))
                .by(actor.id)
                .new_values(json!({ "claim_type_permissions": entries })),
        )
        .await;

        Ok(stored)
    }

    /// Replace every override of the user with `entries`
    pub async fn set_user_overrides(
        &self,
        actor: &User,
        user_id: Uuid,
        entries: Vec<OverrideEntry>,
        ctx: &AuditContext,
    ) -> CoreResult<Vec<UserClaimType>> {
        if self.store.get_user(user_id).await?.is_none() {
            return Err(CoreError::NotFound("User"));
        }
        self.check_entries(&entries).await?;

        let now = Utc::now();
        let rows = entries
            .iter()
            .map(|e| UserClaimType {
                id: Uuid::new_v4(),
                user_id,
                claim_type_id: e.claim_type_id,
                is_allowed: e.is_allowed,
                custom_limit_amount: e.custom_limit_amount,
                created_at: now,
            })
            .collect();
        let stored = self.store.replace_user_overrides(user_id, rows).await?;

        tracing::info!(
            "Replaced claim type overrides for user {} ({} entries)",
            user_id,
            stored.len()
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::USER, Some(user_id))
                .by(actor.id)
                .new_values(json!({ "claim_type_overrides": entries })),
        )
        .await;

        Ok(stored)
    }
}
