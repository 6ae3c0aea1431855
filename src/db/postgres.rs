//! PostgreSQL implementation of the persistence gateway

use super::{BalanceChange, ClaimStore, TransitionCommit};
use crate::error::{CoreError, CoreResult};
use crate::models::*;
use crate::services::balance::apply_change;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgExecutor, PgPool};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Report unique-key collisions as conflicts instead of faults
fn unique_or_db(e: sqlx::Error, message: &str) -> CoreError {
    let is_unique = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false);
    if is_unique {
        CoreError::conflict(message)
    } else {
        CoreError::Database(e)
    }
}

async fn write_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    balance: &UserClaimBalance,
) -> Result<UserClaimBalance, sqlx::Error> {
    sqlx::query_as::<_, UserClaimBalance>(
        r#"
        UPDATE user_claim_balances
        SET total_limit = $1, current_spent = $2, remaining_balance = $3,
            last_reset_date = $4, reset_period = $5, updated_at = $6
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(balance.total_limit)
    .bind(balance.current_spent)
    .bind(balance.remaining_balance)
    .bind(balance.last_reset_date)
    .bind(balance.reset_period)
    .bind(balance.updated_at)
    .bind(balance.id)
    .fetch_one(executor)
    .await
}

async fn lock_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    claim_type_id: Uuid,
) -> CoreResult<UserClaimBalance> {
    sqlx::query_as::<_, UserClaimBalance>(
        r#"
        SELECT * FROM user_claim_balances
        WHERE user_id = $1 AND claim_type_id = $2
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .bind(claim_type_id)
    .fetch_optional(executor)
    .await?
    .ok_or(CoreError::NotFound("Balance"))
}

/// Serializes level renumbering within one group
async fn lock_group<'e, E: PgExecutor<'e>>(executor: E, group_id: Uuid) -> CoreResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM user_groups WHERE id = $1 FOR UPDATE")
        .bind(group_id)
        .fetch_optional(executor)
        .await?
        .map(|_| ())
        .ok_or(CoreError::NotFound("User group"))
}

#[async_trait]
impl ClaimStore for PgStore {
    // ===== Users, groups, sessions =====

    async fn get_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn insert_user(&self, user: User) -> CoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                               user_group_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role)
        .bind(user.user_group_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_db(e, "Email already registered"))
    }

    async fn set_user_group(&self, user_id: Uuid, group_id: Option<Uuid>) -> CoreResult<User> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET user_group_id = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::NotFound("User"))
    }

    async fn get_user_group(&self, id: Uuid) -> CoreResult<Option<UserGroup>> {
        Ok(
            sqlx::query_as::<_, UserGroup>("SELECT * FROM user_groups WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_user_groups(&self) -> CoreResult<Vec<UserGroup>> {
        Ok(
            sqlx::query_as::<_, UserGroup>("SELECT * FROM user_groups ORDER BY name")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn insert_user_group(&self, group: UserGroup) -> CoreResult<UserGroup> {
        sqlx::query_as::<_, UserGroup>(
            r#"
            INSERT INTO user_groups (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_at)
        .bind(group.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_db(e, "A group with this name already exists"))
    }

    async fn insert_session(&self, session: Session) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, token_hash: &str, now: DateTime<Utc>) -> CoreResult<Option<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE token_hash = $1 AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_session(&self, token_hash: &str) -> CoreResult<Option<Session>> {
        Ok(
            sqlx::query_as::<_, Session>("DELETE FROM sessions WHERE token_hash = $1 RETURNING *")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn record_login_attempt(&self, ip: &str, at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("INSERT INTO login_attempts (ip_address, attempted_at) VALUES ($1, $2)")
            .bind(ip)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_login_attempts(&self, ip: &str, since: DateTime<Utc>) -> CoreResult<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM login_attempts
            WHERE ip_address = $1 AND attempted_at > $2
            "#,
        )
        .bind(ip)
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    // ===== Claim types =====

    async fn get_claim_type(&self, id: Uuid) -> CoreResult<Option<ClaimType>> {
        Ok(
            sqlx::query_as::<_, ClaimType>("SELECT * FROM claim_types WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_claim_types(&self) -> CoreResult<Vec<ClaimType>> {
        Ok(
            sqlx::query_as::<_, ClaimType>("SELECT * FROM claim_types ORDER BY name")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn insert_claim_type(&self, claim_type: ClaimType) -> CoreResult<ClaimType> {
        sqlx::query_as::<_, ClaimType>(
            r#"
            INSERT INTO claim_types (id, name, description, limit_amount, limit_timespan,
                                     created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(claim_type.id)
        .bind(&claim_type.name)
        .bind(&claim_type.description)
        .bind(claim_type.limit_amount)
        .bind(claim_type.limit_timespan)
        .bind(claim_type.created_at)
        .bind(claim_type.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_or_db(e, "A claim type with this name already exists"))
    }

    async fn update_claim_type_limit(
        &self,
        id: Uuid,
        limit_amount: Decimal,
        limit_timespan: LimitTimespan,
    ) -> CoreResult<Option<ClaimType>> {
        Ok(sqlx::query_as::<_, ClaimType>(
            r#"
            UPDATE claim_types
            SET limit_amount = $1, limit_timespan = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(limit_amount)
        .bind(limit_timespan)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ===== Claims =====

    async fn get_claim(&self, id: Uuid) -> CoreResult<Option<Claim>> {
        Ok(sqlx::query_as::<_, Claim>("SELECT * FROM claims WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_claims(&self, owner: Option<Uuid>) -> CoreResult<Vec<Claim>> {
        let claims = match owner {
            Some(user_id) => {
                sqlx::query_as::<_, Claim>(
                    "SELECT * FROM claims WHERE user_id = $1 ORDER BY created_at DESC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Claim>("SELECT * FROM claims ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(claims)
    }

    async fn insert_claim(&self, claim: Claim) -> CoreResult<Claim> {
        Ok(sqlx::query_as::<_, Claim>(
            r#"
            INSERT INTO claims (id, user_id, claim_type_id, title, description, amount, status,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(claim.id)
        .bind(claim.user_id)
        .bind(claim.claim_type_id)
        .bind(&claim.title)
        .bind(&claim.description)
        .bind(claim.amount)
        .bind(claim.status)
        .bind(claim.created_at)
        .bind(claim.updated_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_draft_claim(&self, claim: Claim) -> CoreResult<Option<Claim>> {
        Ok(sqlx::query_as::<_, Claim>(
            r#"
            UPDATE claims
            SET claim_type_id = $1, title = $2, description = $3, amount = $4, updated_at = $5
            WHERE id = $6 AND status = $7
            RETURNING *
            "#,
        )
        .bind(claim.claim_type_id)
        .bind(&claim.title)
        .bind(&claim.description)
        .bind(claim.amount)
        .bind(claim.updated_at)
        .bind(claim.id)
        .bind(ClaimStatus::Draft)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_claim(&self, id: Uuid, allowed: &[ClaimStatus]) -> CoreResult<bool> {
        let allowed: Vec<String> = allowed.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query("DELETE FROM claims WHERE id = $1 AND status::text = ANY($2)")
            .bind(id)
            .bind(&allowed)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_claim_approvals(&self, claim_id: Uuid) -> CoreResult<Vec<ClaimApproval>> {
        Ok(sqlx::query_as::<_, ClaimApproval>(
            "SELECT * FROM claim_approvals WHERE claim_id = $1 ORDER BY created_at, id",
        )
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> CoreResult<Claim> {
        let mut tx = self.pool.begin().await?;

        let claim = sqlx::query_as::<_, Claim>(
            r#"
            UPDATE claims SET status = $1, updated_at = $2
            WHERE id = $3 AND status = $4
            RETURNING *
            "#,
        )
        .bind(commit.to)
        .bind(commit.now)
        .bind(commit.claim_id)
        .bind(commit.from)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            CoreError::conflict(format!("Claim is no longer in status {}", commit.from))
        })?;

        let approval = &commit.approval;
        sqlx::query(
            r#"
            INSERT INTO claim_approvals (id, claim_id, approval_level_id, approver_id, status,
                                         comments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(approval.id)
        .bind(approval.claim_id)
        .bind(approval.approval_level_id)
        .bind(approval.approver_id)
        .bind(approval.status)
        .bind(&approval.comments)
        .bind(approval.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(deduction) = commit.deduction {
            let balance =
                lock_balance(&mut *tx, deduction.user_id, deduction.claim_type_id).await?;
            let (balance, _) =
                apply_change(balance, BalanceChange::Deduct(deduction.amount), commit.now);
            write_balance(&mut *tx, &balance).await?;
        }

        tx.commit().await?;
        Ok(claim)
    }

    // ===== Approval levels =====

    async fn get_approval_level(&self, id: Uuid) -> CoreResult<Option<ApprovalLevel>> {
        Ok(
            sqlx::query_as::<_, ApprovalLevel>("SELECT * FROM approval_levels WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_approval_levels(&self, group_id: Uuid) -> CoreResult<Vec<ApprovalLevel>> {
        Ok(sqlx::query_as::<_, ApprovalLevel>(
            "SELECT * FROM approval_levels WHERE user_group_id = $1 ORDER BY level",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_levels_for_approver(&self, approver_id: Uuid) -> CoreResult<Vec<ApprovalLevel>> {
        Ok(sqlx::query_as::<_, ApprovalLevel>(
            "SELECT * FROM approval_levels WHERE approver_id = $1 ORDER BY level",
        )
        .bind(approver_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_approval_level(&self, level: ApprovalLevel) -> CoreResult<ApprovalLevel> {
        let mut tx = self.pool.begin().await?;
        lock_group(&mut *tx, level.user_group_id).await?;

        let max: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(level), 0) FROM approval_levels WHERE user_group_id = $1",
        )
        .bind(level.user_group_id)
        .fetch_one(&mut *tx)
        .await?;

        let created = sqlx::query_as::<_, ApprovalLevel>(
            r#"
            INSERT INTO approval_levels (id, user_group_id, level, approver_id, can_draft,
                can_submit, can_approve, can_reject, can_set_payment_in_progress, can_set_paid,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(level.id)
        .bind(level.user_group_id)
        .bind(max + 1)
        .bind(level.approver_id)
        .bind(level.can_draft)
        .bind(level.can_submit)
        .bind(level.can_approve)
        .bind(level.can_reject)
        .bind(level.can_set_payment_in_progress)
        .bind(level.can_set_paid)
        .bind(level.created_at)
        .bind(level.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn update_approval_level(&self, level: ApprovalLevel) -> CoreResult<ApprovalLevel> {
        sqlx::query_as::<_, ApprovalLevel>(
            r#"
            UPDATE approval_levels
            SET approver_id = $1, can_draft = $2, can_submit = $3, can_approve = $4,
                can_reject = $5, can_set_payment_in_progress = $6, can_set_paid = $7,
                updated_at = $8
            WHERE id = $9
            RETURNING *
            "#,
        )
        .bind(level.approver_id)
        .bind(level.can_draft)
        .bind(level.can_submit)
        .bind(level.can_approve)
        .bind(level.can_reject)
        .bind(level.can_set_payment_in_progress)
        .bind(level.can_set_paid)
        .bind(level.updated_at)
        .bind(level.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::NotFound("Approval level"))
    }

    async fn delete_approval_level(&self, id: Uuid) -> CoreResult<Option<ApprovalLevel>> {
        let Some(existing) = self.get_approval_level(id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        lock_group(&mut *tx, existing.user_group_id).await?;

        let deleted = sqlx::query_as::<_, ApprovalLevel>(
            "DELETE FROM approval_levels WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(deleted) = deleted else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE approval_levels SET level = level - 1, updated_at = NOW()
            WHERE user_group_id = $1 AND level > $2
            "#,
        )
        .bind(deleted.user_group_id)
        .bind(deleted.level)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(deleted))
    }

    async fn reorder_approval_levels(&self, group_id: Uuid, orders: &[LevelOrder]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_group(&mut *tx, group_id).await?;

        for order in orders {
            let result = sqlx::query(
                r#"
                UPDATE approval_levels SET level = $1, updated_at = NOW()
                WHERE id = $2 AND user_group_id = $3
                "#,
            )
            .bind(order.level)
            .bind(order.id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                return Err(CoreError::NotFound("Approval level"));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // ===== Overrides =====

    async fn find_user_override(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserClaimType>> {
        Ok(sqlx::query_as::<_, UserClaimType>(
            "SELECT * FROM user_claim_types WHERE user_id = $1 AND claim_type_id = $2",
        )
        .bind(user_id)
        .bind(claim_type_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_group_override(&self, group_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserGroupClaimType>> {
        Ok(sqlx::query_as::<_, UserGroupClaimType>(
            "SELECT * FROM user_group_claim_types WHERE user_group_id = $1 AND claim_type_id = $2",
        )
        .bind(group_id)
        .bind(claim_type_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn replace_group_overrides(
        &self,
        group_id: Uuid,
        rows: Vec<UserGroupClaimType>,
    ) -> CoreResult<Vec<UserGroupClaimType>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_group_claim_types WHERE user_group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let inserted = sqlx::query_as::<_, UserGroupClaimType>(
                r#"
                INSERT INTO user_group_claim_types (id, user_group_id, claim_type_id, is_allowed,
                                                    custom_limit_amount, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(row.id)
            .bind(group_id)
            .bind(row.claim_type_id)
            .bind(row.is_allowed)
            .bind(row.custom_limit_amount)
            .bind(row.created_at)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(inserted);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn replace_user_overrides(
        &self,
        user_id: Uuid,
        rows: Vec<UserClaimType>,
    ) -> CoreResult<Vec<UserClaimType>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_claim_types WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let inserted = sqlx::query_as::<_, UserClaimType>(
                r#"
                INSERT INTO user_claim_types (id, user_id, claim_type_id, is_allowed,
                                              custom_limit_amount, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(row.id)
            .bind(user_id)
            .bind(row.claim_type_id)
            .bind(row.is_allowed)
            .bind(row.custom_limit_amount)
            .bind(row.created_at)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(inserted);
        }

        tx.commit().await?;
        Ok(stored)
    }

    // ===== Balances =====

    async fn find_balance(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserClaimBalance>> {
        Ok(sqlx::query_as::<_, UserClaimBalance>(
            "SELECT * FROM user_claim_balances WHERE user_id = $1 AND claim_type_id = $2",
        )
        .bind(user_id)
        .bind(claim_type_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_balances(&self, user_id: Uuid) -> CoreResult<Vec<UserClaimBalance>> {
        Ok(sqlx::query_as::<_, UserClaimBalance>(
            "SELECT * FROM user_claim_balances WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_balance(&self, balance: UserClaimBalance) -> CoreResult<UserClaimBalance> {
        let inserted = sqlx::query_as::<_, UserClaimBalance>(
            r#"
            INSERT INTO user_claim_balances (id, user_id, claim_type_id, total_limit, current_spent,
                remaining_balance, last_reset_date, reset_period, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id, claim_type_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(balance.id)
        .bind(balance.user_id)
        .bind(balance.claim_type_id)
        .bind(balance.total_limit)
        .bind(balance.current_spent)
        .bind(balance.remaining_balance)
        .bind(balance.last_reset_date)
        .bind(balance.reset_period)
        .bind(balance.created_at)
        .bind(balance.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(row),
            None => self
                .find_balance(balance.user_id, balance.claim_type_id)
                .await?
                .ok_or_else(|| CoreError::Persistence("balance vanished after insert".to_string())),
        }
    }

    async fn update_balance(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        change: BalanceChange,
        now: DateTime<Utc>,
    ) -> CoreResult<UserClaimBalance> {
        let mut tx = self.pool.begin().await?;
        let current = lock_balance(&mut *tx, user_id, claim_type_id).await?;
        let (updated, changed) = apply_change(current, change, now);
        let stored = if changed {
            write_balance(&mut *tx, &updated).await?
        } else {
            updated
        };
        tx.commit().await?;
        Ok(stored)
    }

    // ===== Audit =====

    async fn insert_audit_log(&self, entry: AuditLog) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, user_id, action, entity_type, entity_id, old_values,
                                   new_values, ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
