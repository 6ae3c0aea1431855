//! Persistence gateway
//!
//! The core talks to storage only through [`ClaimStore`]. Multi-step writes
//! that must be all-or-nothing are expressed as single trait methods so each
//! backend can run them inside one transaction.

mod memory;
mod pool;
mod postgres;

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations};
pub use postgres::PgStore;

use crate::error::CoreResult;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Balance change applied inside a transition commit
#[derive(Debug, Clone, Copy)]
pub struct Deduction {
    pub user_id: Uuid,
    pub claim_type_id: Uuid,
    pub amount: Decimal,
}

/// Change applied to a balance row after it has been locked and brought
/// into the current period
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceChange {
    /// Only start a new period if one is due
    Reconcile,
    Deduct(Decimal),
    SetLimit(Decimal),
}

/// Everything a status transition writes, committed as one unit
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub claim_id: Uuid,
    pub from: ClaimStatus,
    pub to: ClaimStatus,
    pub approval: ClaimApproval,
    pub deduction: Option<Deduction>,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    // Users, groups, sessions
    async fn get_user(&self, id: Uuid) -> CoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>>;
    async fn insert_user(&self, user: User) -> CoreResult<User>;
    async fn set_user_group(&self, user_id: Uuid, group_id: Option<Uuid>) -> CoreResult<User>;
    async fn get_user_group(&self, id: Uuid) -> CoreResult<Option<UserGroup>>;
    async fn list_user_groups(&self) -> CoreResult<Vec<UserGroup>>;
    async fn insert_user_group(&self, group: UserGroup) -> CoreResult<UserGroup>;
    async fn insert_session(&self, session: Session) -> CoreResult<()>;
    async fn find_session(&self, token_hash: &str, now: DateTime<Utc>) -> CoreResult<Option<Session>>;
    async fn delete_session(&self, token_hash: &str) -> CoreResult<Option<Session>>;
    async fn record_login_attempt(&self, ip: &str, at: DateTime<Utc>) -> CoreResult<()>;
    /// Attempts from `ip` strictly after `since`
    async fn count_login_attempts(&self, ip: &str, since: DateTime<Utc>) -> CoreResult<i64>;

    // Claim types
    async fn get_claim_type(&self, id: Uuid) -> CoreResult<Option<ClaimType>>;
    async fn list_claim_types(&self) -> CoreResult<Vec<ClaimType>>;
    async fn insert_claim_type(&self, claim_type: ClaimType) -> CoreResult<ClaimType>;
    async fn update_claim_type_limit(
        &self,
        id: Uuid,
        limit_amount: Decimal,
        limit_timespan: LimitTimespan,
    ) -> CoreResult<Option<ClaimType>>;

    // Claims
    async fn get_claim(&self, id: Uuid) -> CoreResult<Option<Claim>>;
    async fn list_claims(&self, owner: Option<Uuid>) -> CoreResult<Vec<Claim>>;
    async fn insert_claim(&self, claim: Claim) -> CoreResult<Claim>;
    /// Overwrites editable fields, only while the claim is still a draft
    async fn update_draft_claim(&self, claim: Claim) -> CoreResult<Option<Claim>>;
    /// Deletes the claim if its status is one of `allowed`
    async fn delete_claim(&self, id: Uuid, allowed: &[ClaimStatus]) -> CoreResult<bool>;
    async fn list_claim_approvals(&self, claim_id: Uuid) -> CoreResult<Vec<ClaimApproval>>;
    /// Status update, approval append and optional deduction in one transaction
    async fn commit_transition(&self, commit: TransitionCommit) -> CoreResult<Claim>;

    // Approval levels
    async fn get_approval_level(&self, id: Uuid) -> CoreResult<Option<ApprovalLevel>>;
    async fn list_approval_levels(&self, group_id: Uuid) -> CoreResult<Vec<ApprovalLevel>>;
    async fn list_levels_for_approver(&self, approver_id: Uuid) -> CoreResult<Vec<ApprovalLevel>>;
    /// Appends a level numbered one past the group's current maximum
    async fn append_approval_level(&self, level: ApprovalLevel) -> CoreResult<ApprovalLevel>;
    async fn update_approval_level(&self, level: ApprovalLevel) -> CoreResult<ApprovalLevel>;
    /// Removes a level and closes the gap it leaves
    async fn delete_approval_level(&self, id: Uuid) -> CoreResult<Option<ApprovalLevel>>;
    async fn reorder_approval_levels(&self, group_id: Uuid, orders: &[LevelOrder]) -> CoreResult<()>;

    // Overrides
    async fn find_user_override(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserClaimType>>;
    async fn find_group_override(&self, group_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserGroupClaimType>>;
    async fn replace_group_overrides(
        &self,
        group_id: Uuid,
        rows: Vec<UserGroupClaimType>,
    ) -> CoreResult<Vec<UserGroupClaimType>>;
    async fn replace_user_overrides(
        &self,
        user_id: Uuid,
        rows: Vec<UserClaimType>,
    ) -> CoreResult<Vec<UserClaimType>>;

    // Balances
    async fn find_balance(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserClaimBalance>>;
    async fn list_balances(&self, user_id: Uuid) -> CoreResult<Vec<UserClaimBalance>>;
    /// Inserts unless a balance for the pair already exists; returns the stored row
    async fn insert_balance(&self, balance: UserClaimBalance) -> CoreResult<UserClaimBalance>;
    /// Lock the pair's row, reconcile it and apply `change`, as one unit
    async fn update_balance(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        change: BalanceChange,
        now: DateTime<Utc>,
    ) -> CoreResult<UserClaimBalance>;

    // Audit
    async fn insert_audit_log(&self, entry: AuditLog) -> CoreResult<()>;
}
