//! Approval chain administration
//!
//! Levels inside a group are always numbered `1..=n`. New levels go to the
//! end, deletions close the gap, and a reorder must hand out every number
//! exactly once.

use super::audit::{entity, log_audit, AuditAction, AuditContext, AuditRecord};
use crate::db::ClaimStore;
use crate::error::{CoreError, CoreResult};
use crate::models::*;
use crate::validation::validate_level_order;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub struct ApprovalLevelAdmin<'a> {
    store: &'a dyn ClaimStore,
}

impl<'a> ApprovalLevelAdmin<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store }
    }

    async fn require_group(&self, group_id: Uuid) -> CoreResult<UserGroup> {
        self.store
            .get_user_group(group_id)
            .await?
            .ok_or(CoreError::NotFound("User group"))
    }

    async fn require_user(&self, user_id: Uuid) -> CoreResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(CoreError::NotFound("User"))
    }

    pub async fn list(&self, group_id: Uuid) -> CoreResult<Vec<ApprovalLevel>> {
        self.require_group(group_id).await?;
        self.store.list_approval_levels(group_id).await
    }

    pub async fn create(
        &self,
        actor: &User,
        group_id: Uuid,
        input: CreateApprovalLevel,
        ctx: &AuditContext,
    ) -> CoreResult<ApprovalLevel> {
        self.require_group(group_id).await?;
        self.require_user(input.approver_id).await?;

        let now = Utc::now();
        let mut level = ApprovalLevel {
            id: Uuid::new_v4(),
            user_group_id: group_id,
            level: 0,
            approver_id: input.approver_id,
            can_draft: false,
            can_submit: false,
            can_approve: false,
            can_reject: false,
            can_set_payment_in_progress: false,
            can_set_paid: false,
            created_at: now,
            updated_at: now,
        };
        level.apply_capabilities(input.capabilities);

        let level = self.store.append_approval_level(level).await?;
        tracing::info!(
            "Approval level {} added to group {} (approver {})",
            level.level,
            group_id,
            level.approver_id
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Create, entity::APPROVAL_LEVEL, Some(level.id))
                .by(actor.id)
                .new_values(serde_json::to_value(&level).unwrap_or_default()),
        )
        .await;

        Ok(level)
    }

    /// Replace the approver (when given) and all six capability flags
    pub async fn update(
        &self,
        actor: &User,
        level_id: Uuid,
        input: UpdateApprovalLevel,
        ctx: &AuditContext,
    ) -> CoreResult<ApprovalLevel> {
        let existing = self
            .store
            .get_approval_level(level_id)
            .await?
            .ok_or(CoreError::NotFound("Approval level"))?;
        if let Some(approver_id) = input.approver_id {
            self.require_user(approver_id).await?;
        }

        let mut changed = existing.clone();
        if let Some(approver_id) = input.approver_id {
            changed.approver_id = approver_id;
        }
        changed.apply_capabilities(input.capabilities);
        changed.updated_at = Utc::now();

        let updated = self.store.update_approval_level(changed).await?;

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::APPROVAL_LEVEL, Some(level_id))
                .by(actor.id)
                .old(serde_json::to_value(&existing).unwrap_or_default())
                .new_values(serde_json::to_value(&updated).unwrap_or_default()),
        )
        .await;

        Ok(updated)
    }

    pub async fn delete(&self, actor: &User, level_id: Uuid, ctx: &AuditContext) -> CoreResult<()> {
        let removed = self
            .store
            .delete_approval_level(level_id)
            .await?
            .ok_or(CoreError::NotFound("Approval level"))?;

        tracing::info!(
            "Approval level {} removed from group {}",
            removed.level,
            removed.user_group_id
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Delete, entity::APPROVAL_LEVEL, Some(level_id))
                .by(actor.id)
                .old(serde_json::to_value(&removed).unwrap_or_default()),
        )
        .await;

        Ok(())
    }

    pub async fn reorder(
        &self,
        actor: &User,
        group_id: Uuid,
        orders: Vec<LevelOrder>,
        ctx: &AuditContext,
    ) -> CoreResult<Vec<ApprovalLevel>> {
        let current = self.list(group_id).await?;
        let ids: Vec<Uuid> = current.iter().map(|l| l.id).collect();
        validate_level_order(&orders, &ids)?;

        self.store.reorder_approval_levels(group_id, &orders).await?;
        let reordered = self.store.list_approval_levels(group_id).await?;

        let before: Vec<_> = current.iter().map(|l| json!({"id": l.id, "level": l.level})).collect();
        let after: Vec<_> = reordered.iter().map(|l| json!({"id": l.id, "level": l.level})).collect();
        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::USER_GROUP, Some(group_id))
                .by(actor.id)
                .old(json!({ "approval_levels": before }))
                .new_values(json!({ "approval_levels": after })),
        )
        .await;

        Ok(reordered)
    }
}
