//! In-memory persistence gateway
//!
//! All state sits behind one async mutex, so every trait method, including
//! the unit-of-work ones, observes and applies its writes atomically.

use super::{BalanceChange, ClaimStore, TransitionCommit};
use crate::error::{CoreError, CoreResult};
use crate::models::*;
use crate::services::balance::apply_change;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    groups: HashMap<Uuid, UserGroup>,
    sessions: HashMap<String, Session>,
    login_attempts: Vec<(String, DateTime<Utc>)>,
    claim_types: HashMap<Uuid, ClaimType>,
    claims: HashMap<Uuid, Claim>,
    approvals: Vec<ClaimApproval>,
    levels: HashMap<Uuid, ApprovalLevel>,
    group_overrides: Vec<UserGroupClaimType>,
    user_overrides: Vec<UserClaimType>,
    balances: HashMap<(Uuid, Uuid), UserClaimBalance>,
    audit: Vec<AuditLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_balance_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every balance write fail until switched off again
    pub fn fail_balance_writes(&self, on: bool) {
        self.fail_balance_writes.store(on, Ordering::SeqCst);
    }

    /// Audit rows written so far, oldest first
    pub async fn audit_entries(&self) -> Vec<AuditLog> {
        self.tables.lock().await.audit.clone()
    }

    fn check_balance_writes(&self) -> CoreResult<()> {
        if self.fail_balance_writes.load(Ordering::SeqCst) {
            return Err(CoreError::Persistence("balance write rejected".to_string()));
        }
        Ok(())
    }
}

fn sorted_levels<'a>(levels: impl Iterator<Item = &'a ApprovalLevel>) -> Vec<ApprovalLevel> {
    let mut levels: Vec<ApprovalLevel> = levels.cloned().collect();
    levels.sort_by_key(|l| (l.level, l.created_at));
    levels
}

#[async_trait]
impl ClaimStore for MemoryStore {
    // ===== Users, groups, sessions =====

    async fn get_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_user(&self, user: User) -> CoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(CoreError::conflict("Email already registered"));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_user_group(&self, user_id: Uuid, group_id: Option<Uuid>) -> CoreResult<User> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(CoreError::NotFound("User"))?;
        user.user_group_id = group_id;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn get_user_group(&self, id: Uuid) -> CoreResult<Option<UserGroup>> {
        Ok(self.tables.lock().await.groups.get(&id).cloned())
    }

    async fn list_user_groups(&self) -> CoreResult<Vec<UserGroup>> {
        let tables = self.tables.lock().await;
        let mut groups: Vec<UserGroup> = tables.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn insert_user_group(&self, group: UserGroup) -> CoreResult<UserGroup> {
        let mut tables = self.tables.lock().await;
        if tables.groups.values().any(|g| g.name == group.name) {
            return Err(CoreError::conflict("A group with this name already exists"));
        }
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn insert_session(&self, session: Session) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn find_session(&self, token_hash: &str, now: DateTime<Utc>) -> CoreResult<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .get(token_hash)
            .filter(|s| s.expires_at > now)
            .cloned())
    }

    async fn delete_session(&self, token_hash: &str) -> CoreResult<Option<Session>> {
        Ok(self.tables.lock().await.sessions.remove(token_hash))
    }

    async fn record_login_attempt(&self, ip: &str, at: DateTime<Utc>) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.login_attempts.push((ip.to_string(), at));
        Ok(())
    }

    async fn count_login_attempts(&self, ip: &str, since: DateTime<Utc>) -> CoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .login_attempts
            .iter()
            .filter(|(addr, at)| addr == ip && *at > since)
            .count() as i64)
    }

    // ===== Claim types =====

    async fn get_claim_type(&self, id: Uuid) -> CoreResult<Option<ClaimType>> {
        Ok(self.tables.lock().await.claim_types.get(&id).cloned())
    }

    async fn list_claim_types(&self) -> CoreResult<Vec<ClaimType>> {
        let tables = self.tables.lock().await;
        let mut types: Vec<ClaimType> = tables.claim_types.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn insert_claim_type(&self, claim_type: ClaimType) -> CoreResult<ClaimType> {
        let mut tables = self.tables.lock().await;
        if tables.claim_types.values().any(|c| c.name == claim_type.name) {
            return Err(CoreError::conflict(
                "A claim type with this name already exists",
            ));
        }
        tables.claim_types.insert(claim_type.id, claim_type.clone());
        Ok(claim_type)
    }

    async fn update_claim_type_limit(
        &self,
        id: Uuid,
        limit_amount: Decimal,
        limit_timespan: LimitTimespan,
    ) -> CoreResult<Option<ClaimType>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.claim_types.get_mut(&id).map(|ct| {
            ct.limit_amount = limit_amount;
            ct.limit_timespan = limit_timespan;
            ct.updated_at = Utc::now();
            ct.clone()
        }))
    }

    // ===== Claims =====

    async fn get_claim(&self, id: Uuid) -> CoreResult<Option<Claim>> {
        Ok(self.tables.lock().await.claims.get(&id).cloned())
    }

    async fn list_claims(&self, owner: Option<Uuid>) -> CoreResult<Vec<Claim>> {
        let tables = self.tables.lock().await;
        let mut claims: Vec<Claim> = tables
            .claims
            .values()
            .filter(|c| owner.map_or(true, |id| c.user_id == id))
            .cloned()
            .collect();
        claims.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(claims)
    }

    async fn insert_claim(&self, claim: Claim) -> CoreResult<Claim> {
        let mut tables = self.tables.lock().await;
        tables.claims.insert(claim.id, claim.clone());
        Ok(claim)
    }

    async fn update_draft_claim(&self, claim: Claim) -> CoreResult<Option<Claim>> {
        let mut tables = self.tables.lock().await;
        match tables.claims.get_mut(&claim.id) {
            Some(stored) if stored.status == ClaimStatus::Draft => {
                stored.claim_type_id = claim.claim_type_id;
                stored.title = claim.title;
                stored.description = claim.description;
                stored.amount = claim.amount;
                stored.updated_at = claim.updated_at;
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_claim(&self, id: Uuid, allowed: &[ClaimStatus]) -> CoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let deletable = tables
            .claims
            .get(&id)
            .map_or(false, |c| allowed.contains(&c.status));
        if !deletable {
            return Ok(false);
        }
        tables.claims.remove(&id);
        tables.approvals.retain(|a| a.claim_id != id);
        Ok(true)
    }

    async fn list_claim_approvals(&self, claim_id: Uuid) -> CoreResult<Vec<ClaimApproval>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .approvals
            .iter()
            .filter(|a| a.claim_id == claim_id)
            .cloned()
            .collect())
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> CoreResult<Claim> {
        let mut tables = self.tables.lock().await;

        // Validate every part before touching anything
        match tables.claims.get(&commit.claim_id) {
            Some(claim) if claim.status == commit.from => {}
            Some(_) => {
                return Err(CoreError::conflict(format!(
                    "Claim is no longer in status {}",
                    commit.from
                )))
            }
            None => return Err(CoreError::NotFound("Claim")),
        }

        let balance = match commit.deduction {
            Some(deduction) => {
                let key = (deduction.user_id, deduction.claim_type_id);
                let current = tables
                    .balances
                    .get(&key)
                    .cloned()
                    .ok_or(CoreError::NotFound("Balance"))?;
                self.check_balance_writes()?;
                let (current, _) =
                    apply_change(current, BalanceChange::Deduct(deduction.amount), commit.now);
                Some(current)
            }
            None => None,
        };

        if let Some(balance) = balance {
            tables
                .balances
                .insert((balance.user_id, balance.claim_type_id), balance);
        }
        tables.approvals.push(commit.approval);

        let claim = tables
            .claims
            .get_mut(&commit.claim_id)
            .ok_or(CoreError::NotFound("Claim"))?;
        claim.status = commit.to;
        claim.updated_at = commit.now;
        Ok(claim.clone())
    }

    // ===== Approval levels =====

    async fn get_approval_level(&self, id: Uuid) -> CoreResult<Option<ApprovalLevel>> {
        Ok(self.tables.lock().await.levels.get(&id).cloned())
    }

    async fn list_approval_levels(&self, group_id: Uuid) -> CoreResult<Vec<ApprovalLevel>> {
        let tables = self.tables.lock().await;
        Ok(sorted_levels(
            tables.levels.values().filter(|l| l.user_group_id == group_id),
        ))
    }

    async fn list_levels_for_approver(&self, approver_id: Uuid) -> CoreResult<Vec<ApprovalLevel>> {
        let tables = self.tables.lock().await;
        Ok(sorted_levels(
            tables.levels.values().filter(|l| l.approver_id == approver_id),
        ))
    }

    async fn append_approval_level(&self, mut level: ApprovalLevel) -> CoreResult<ApprovalLevel> {
        let mut tables = self.tables.lock().await;
        if !tables.groups.contains_key(&level.user_group_id) {
            return Err(CoreError::NotFound("User group"));
        }
        let max = tables
            .levels
            .values()
            .filter(|l| l.user_group_id == level.user_group_id)
            .map(|l| l.level)
            .max()
            .unwrap_or(0);
        level.level = max + 1;
        tables.levels.insert(level.id, level.clone());
        Ok(level)
    }

    async fn update_approval_level(&self, level: ApprovalLevel) -> CoreResult<ApprovalLevel> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .levels
            .get_mut(&level.id)
            .ok_or(CoreError::NotFound("Approval level"))?;
        stored.approver_id = level.approver_id;
        stored.apply_capabilities(level.capabilities());
        stored.updated_at = level.updated_at;
        Ok(stored.clone())
    }

    async fn delete_approval_level(&self, id: Uuid) -> CoreResult<Option<ApprovalLevel>> {
        let mut tables = self.tables.lock().await;
        let Some(removed) = tables.levels.remove(&id) else {
            return Ok(None);
        };
        let now = Utc::now();
        for level in tables.levels.values_mut() {
            if level.user_group_id == removed.user_group_id && level.level > removed.level {
                level.level -= 1;
                level.updated_at = now;
            }
        }
        Ok(Some(removed))
    }

    async fn reorder_approval_levels(&self, group_id: Uuid, orders: &[LevelOrder]) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        let all_present = orders.iter().all(|o| {
            tables
                .levels
                .get(&o.id)
                .map_or(false, |l| l.user_group_id == group_id)
        });
        if !all_present {
            return Err(CoreError::NotFound("Approval level"));
        }
        let now = Utc::now();
        for order in orders {
            if let Some(level) = tables.levels.get_mut(&order.id) {
                level.level = order.level;
                level.updated_at = now;
            }
        }
        Ok(())
    }

    // ===== Overrides =====

    async fn find_user_override(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserClaimType>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .user_overrides
            .iter()
            .find(|o| o.user_id == user_id && o.claim_type_id == claim_type_id)
            .cloned())
    }

    async fn find_group_override(&self, group_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserGroupClaimType>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .group_overrides
            .iter()
            .find(|o| o.user_group_id == group_id && o.claim_type_id == claim_type_id)
            .cloned())
    }

    async fn replace_group_overrides(
        &self,
        group_id: Uuid,
        rows: Vec<UserGroupClaimType>,
    ) -> CoreResult<Vec<UserGroupClaimType>> {
        let mut tables = self.tables.lock().await;
        tables.group_overrides.retain(|o| o.user_group_id != group_id);
        tables.group_overrides.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn replace_user_overrides(
        &self,
        user_id: Uuid,
        rows: Vec<UserClaimType>,
    ) -> CoreResult<Vec<UserClaimType>> {
        let mut tables = self.tables.lock().await;
        tables.user_overrides.retain(|o| o.user_id != user_id);
        tables.user_overrides.extend(rows.iter().cloned());
        Ok(rows)
    }

    // ===== Balances =====

    async fn find_balance(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Option<UserClaimBalance>> {
        let tables = self.tables.lock().await;
        Ok(tables.balances.get(&(user_id, claim_type_id)).cloned())
    }

    async fn list_balances(&self, user_id: Uuid) -> CoreResult<Vec<UserClaimBalance>> {
        let tables = self.tables.lock().await;
        let mut balances: Vec<UserClaimBalance> = tables
            .balances
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        balances.sort_by_key(|b| b.created_at);
        Ok(balances)
    }

    async fn insert_balance(&self, balance: UserClaimBalance) -> CoreResult<UserClaimBalance> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .balances
            .entry((balance.user_id, balance.claim_type_id))
            .or_insert(balance);
        Ok(stored.clone())
    }

    async fn update_balance(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        change: BalanceChange,
        now: DateTime<Utc>,
    ) -> CoreResult<UserClaimBalance> {
        let mut tables = self.tables.lock().await;
        let key = (user_id, claim_type_id);
        let current = tables
            .balances
            .get(&key)
            .cloned()
            .ok_or(CoreError::NotFound("Balance"))?;

        let (updated, changed) = apply_change(current, change, now);
        if changed {
            self.check_balance_writes()?;
            tables.balances.insert(key, updated.clone());
        }
        Ok(updated)
    }

    // ===== Audit =====

    async fn insert_audit_log(&self, entry: AuditLog) -> CoreResult<()> {
        self.tables.lock().await.audit.push(entry);
        Ok(())
    }
}
