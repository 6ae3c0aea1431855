//! Spending balance ledger
//!
//! A balance row is created the first time it is needed and reset lazily:
//! every read or write first runs [`reconcile`], which starts a new period
//! when the calendar bucket of `last_reset_date` differs from today's.

use super::permissions::PermissionResolver;
use crate::db::{BalanceChange, ClaimStore};
use crate::error::{CoreError, CoreResult};
use crate::models::{ClaimCheck, ClaimType, LimitTimespan, UserClaimBalance};
use crate::validation::{validate_amount, validate_limit};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// True when `now` falls in a different period bucket than `last_reset`
pub fn needs_reset(period: LimitTimespan, last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match period {
        LimitTimespan::Daily => last_reset.date_naive() != now.date_naive(),
        LimitTimespan::Weekly => {
            let (a, b) = (last_reset.iso_week(), now.iso_week());
            a.year() != b.year() || a.week() != b.week()
        }
        LimitTimespan::Monthly => {
            last_reset.year() != now.year() || last_reset.month() != now.month()
        }
        LimitTimespan::Annual => last_reset.year() != now.year(),
    }
}

/// Remaining allowance, never shown below zero
pub fn remaining(total_limit: Decimal, current_spent: Decimal) -> Decimal {
    (total_limit - current_spent).max(Decimal::ZERO)
}

/// Start a new period if one is due. Returns the balance and whether it changed.
pub fn reconcile(mut balance: UserClaimBalance, now: DateTime<Utc>) -> (UserClaimBalance, bool) {
    if !needs_reset(balance.reset_period, balance.last_reset_date, now) {
        return (balance, false);
    }
    balance.current_spent = Decimal::ZERO;
    balance.remaining_balance = balance.total_limit;
    balance.last_reset_date = now;
    balance.updated_at = now;
    (balance, true)
}

/// Record spending. Overspend is allowed, the remaining figure floors at zero.
pub fn apply_deduction(
    mut balance: UserClaimBalance,
    amount: Decimal,
    now: DateTime<Utc>,
) -> UserClaimBalance {
    balance.current_spent += amount;
    balance.remaining_balance = remaining(balance.total_limit, balance.current_spent);
    balance.updated_at = now;
    balance
}

/// Overwrite the limit while keeping what was already spent
pub fn apply_limit(
    mut balance: UserClaimBalance,
    new_limit: Decimal,
    now: DateTime<Utc>,
) -> UserClaimBalance {
    balance.total_limit = new_limit;
    balance.remaining_balance = remaining(balance.total_limit, balance.current_spent);
    balance.updated_at = now;
    balance
}

/// Reconcile, then apply `change`. The flag is false when nothing needs writing.
pub fn apply_change(
    balance: UserClaimBalance,
    change: BalanceChange,
    now: DateTime<Utc>,
) -> (UserClaimBalance, bool) {
    let (balance, was_reset) = reconcile(balance, now);
    match change {
        BalanceChange::Reconcile => (balance, was_reset),
        BalanceChange::Deduct(amount) => (apply_deduction(balance, amount, now), true),
        BalanceChange::SetLimit(limit) => (apply_limit(balance, limit, now), true),
    }
}

pub fn new_balance(
    user_id: Uuid,
    claim_type: &ClaimType,
    limit: Decimal,
    now: DateTime<Utc>,
) -> UserClaimBalance {
    UserClaimBalance {
        id: Uuid::new_v4(),
        user_id,
        claim_type_id: claim_type.id,
        total_limit: limit,
        current_spent: Decimal::ZERO,
        remaining_balance: remaining(limit, Decimal::ZERO),
        last_reset_date: now,
        reset_period: claim_type.limit_timespan,
        created_at: now,
        updated_at: now,
    }
}

pub struct BalanceEngine<'a> {
    store: &'a dyn ClaimStore,
    now: Option<DateTime<Utc>>,
}

impl<'a> BalanceEngine<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store, now: None }
    }

    /// Engine with a pinned clock
    pub fn at(store: &'a dyn ClaimStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now: Some(now),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Fetch the balance for the pair, creating or resetting it as needed
    pub async fn get_or_create_balance(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
    ) -> CoreResult<UserClaimBalance> {
        let now = self.now();

        if let Some(existing) = self.store.find_balance(user_id, claim_type_id).await? {
            return self.reconciled(existing, now).await;
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(CoreError::NotFound("User"))?;
        let claim_type = self
            .store
            .get_claim_type(claim_type_id)
            .await?
            .ok_or(CoreError::NotFound("Claim type"))?;

        let permission = PermissionResolver::new(self.store)
            .effective_for(&user, &claim_type)
            .await?;

        let created = self
            .store
            .insert_balance(new_balance(user_id, &claim_type, permission.limit, now))
            .await?;

        tracing::debug!(
            "Created balance for user {} / claim type {} with limit {}",
            user_id,
            claim_type_id,
            created.total_limit
        );

        // Another request may have created the row first
        self.reconciled(created, now).await
    }

    /// Fail with a typed error unless the user may claim `amount` right now
    pub async fn ensure_claimable(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        amount: Decimal,
    ) -> CoreResult<UserClaimBalance> {
        let allowed = PermissionResolver::new(self.store)
            .can_access(user_id, claim_type_id)
            .await?;
        if !allowed {
            return Err(CoreError::permission_denied(
                "You do not have permission to claim this type",
            ));
        }

        let balance = self.get_or_create_balance(user_id, claim_type_id).await?;
        if amount > balance.remaining_balance {
            return Err(CoreError::BalanceExceeded {
                requested: amount,
                remaining: balance.remaining_balance,
            });
        }
        Ok(balance)
    }

    /// Dry run of [`ensure_claimable`](Self::ensure_claimable) reported as data
    pub async fn check_claim(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        amount: Decimal,
    ) -> CoreResult<ClaimCheck> {
        validate_amount("amount", amount)?;
        match self.ensure_claimable(user_id, claim_type_id, amount).await {
            Ok(_) => Ok(ClaimCheck {
                can_claim: true,
                message: None,
            }),
            Err(e @ (CoreError::PermissionDenied(_) | CoreError::BalanceExceeded { .. })) => {
                Ok(ClaimCheck {
                    can_claim: false,
                    message: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Record spending outside of a claim transition
    pub async fn deduct(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        amount: Decimal,
    ) -> CoreResult<UserClaimBalance> {
        validate_amount("amount", amount)?;
        self.get_or_create_balance(user_id, claim_type_id).await?;
        self.store
            .update_balance(user_id, claim_type_id, BalanceChange::Deduct(amount), self.now())
            .await
    }

    /// Unconditional administrative limit overwrite
    pub async fn admin_set_limit(
        &self,
        user_id: Uuid,
        claim_type_id: Uuid,
        new_limit: Decimal,
    ) -> CoreResult<UserClaimBalance> {
        validate_limit("new_limit", new_limit)?;
        self.get_or_create_balance(user_id, claim_type_id).await?;
        self.store
            .update_balance(
                user_id,
                claim_type_id,
                BalanceChange::SetLimit(new_limit),
                self.now(),
            )
            .await
    }

    /// All balances the user has, each brought into the current period
    pub async fn list_balances(&self, user_id: Uuid) -> CoreResult<Vec<UserClaimBalance>> {
        let now = self.now();
        let mut balances = Vec::new();
        for balance in self.store.list_balances(user_id).await? {
            balances.push(self.reconciled(balance, now).await?);
        }
        Ok(balances)
    }

    async fn reconciled(
        &self,
        balance: UserClaimBalance,
        now: DateTime<Utc>,
    ) -> CoreResult<UserClaimBalance> {
        if !needs_reset(balance.reset_period, balance.last_reset_date, now) {
            return Ok(balance);
        }
        tracing::info!(
            "Balance period reset for user {} / claim type {}",
            balance.user_id,
            balance.claim_type_id
        );
        // The row is re-read under lock, so a reset already written elsewhere is not repeated
        self.store
            .update_balance(
                balance.user_id,
                balance.claim_type_id,
                BalanceChange::Reconcile,
                now,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{OverrideEntry, User, UserClaimType, UserRole};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn balance(period: LimitTimespan, total: Decimal, spent: Decimal) -> UserClaimBalance {
        let then = at(2024, 3, 13, 9);
        UserClaimBalance {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            claim_type_id: Uuid::new_v4(),
            total_limit: total,
            current_spent: spent,
            remaining_balance: remaining(total, spent),
            last_reset_date: then,
            reset_period: period,
            created_at: then,
            updated_at: then,
        }
    }

    #[test]
    fn test_daily_reset_buckets() {
        let t0 = at(2024, 3, 13, 9);
        assert!(!needs_reset(LimitTimespan::Daily, t0, at(2024, 3, 13, 23)));
        assert!(needs_reset(LimitTimespan::Daily, t0, at(2024, 3, 14, 0)));
        assert!(needs_reset(LimitTimespan::Daily, t0, at(2025, 3, 13, 9)));
    }

    #[test]
    fn test_weekly_reset_uses_iso_weeks() {
        // Wednesday 2024-03-13 is in ISO week 11, which runs Monday 11th to Sunday 17th
        let t0 = at(2024, 3, 13, 9);
        assert!(!needs_reset(LimitTimespan::Weekly, t0, at(2024, 3, 11, 0)));
        assert!(!needs_reset(LimitTimespan::Weekly, t0, at(2024, 3, 17, 23)));
        assert!(needs_reset(LimitTimespan::Weekly, t0, at(2024, 3, 18, 0)));

        // 2024-12-30 belongs to ISO week 1 of 2025, as does 2025-01-02
        let year_edge = at(2024, 12, 30, 12);
        assert!(!needs_reset(LimitTimespan::Weekly, year_edge, at(2025, 1, 2, 12)));
        // Same ISO week number one year apart is still a different week
        assert!(needs_reset(LimitTimespan::Weekly, t0, at(2025, 3, 12, 9)));
    }

    #[test]
    fn test_monthly_and_annual_reset_buckets() {
        let t0 = at(2024, 3, 13, 9);
        assert!(!needs_reset(LimitTimespan::Monthly, t0, at(2024, 3, 31, 23)));
        assert!(needs_reset(LimitTimespan::Monthly, t0, at(2024, 4, 1, 0)));
        assert!(needs_reset(LimitTimespan::Monthly, t0, at(2025, 3, 13, 9)));

        assert!(!needs_reset(LimitTimespan::Annual, t0, at(2024, 12, 31, 23)));
        assert!(needs_reset(LimitTimespan::Annual, t0, at(2025, 1, 1, 0)));
    }

    #[test]
    fn test_reconcile_resets_spent_and_advances_date() {
        let b = balance(LimitTimespan::Monthly, dec!(1000), dec!(800));
        let now = at(2024, 4, 2, 8);

        let (same, changed) = reconcile(b.clone(), at(2024, 3, 20, 8));
        assert!(!changed);
        assert_eq!(same, b);

        let (fresh, changed) = reconcile(b, now);
        assert!(changed);
        assert_eq!(fresh.current_spent, Decimal::ZERO);
        assert_eq!(fresh.remaining_balance, dec!(1000));
        assert_eq!(fresh.last_reset_date, now);
    }

    #[test]
    fn test_deduction_floors_remaining_at_zero() {
        let now = at(2024, 3, 13, 10);
        let b = balance(LimitTimespan::Monthly, dec!(1000), dec!(0));

        let b = apply_deduction(b, dec!(800), now);
        assert_eq!(b.current_spent, dec!(800));
        assert_eq!(b.remaining_balance, dec!(200));

        let b = apply_deduction(b, dec!(450.75), now);
        assert_eq!(b.current_spent, dec!(1250.75));
        assert_eq!(b.remaining_balance, Decimal::ZERO);
        assert_eq!(b.remaining_balance, remaining(b.total_limit, b.current_spent));
    }

    #[test]
    fn test_limit_overwrite_recomputes_from_spent() {
        let now = at(2024, 3, 13, 10);
        let b = balance(LimitTimespan::Annual, dec!(1000), dec!(600));

        let raised = apply_limit(b.clone(), dec!(1500), now);
        assert_eq!(raised.remaining_balance, dec!(900));
        assert_eq!(raised.current_spent, dec!(600));

        let lowered = apply_limit(b, dec!(400), now);
        assert_eq!(lowered.remaining_balance, Decimal::ZERO);
    }

    async fn seeded() -> (MemoryStore, User, ClaimType) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user = store
            .insert_user(User {
                id: Uuid::new_v4(),
                email: "emma@example.com".to_string(),
                password_hash: String::new(),
                first_name: "Emma".to_string(),
                last_name: "Bakker".to_string(),
                role: UserRole::Normal,
                user_group_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let claim_type = store
            .insert_claim_type(ClaimType {
                id: Uuid::new_v4(),
                name: "Travel".to_string(),
                description: None,
                limit_amount: dec!(1000),
                limit_timespan: LimitTimespan::Monthly,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        (store, user, claim_type)
    }

    #[tokio::test]
    async fn test_lazy_creation_uses_effective_limit() {
        let (store, user, claim_type) = seeded().await;
        store
            .replace_user_overrides(
                user.id,
                vec![UserClaimType {
                    id: Uuid::new_v4(),
                    user_id: user.id,
                    claim_type_id: claim_type.id,
                    is_allowed: true,
                    custom_limit_amount: Some(dec!(300)),
                    created_at: Utc::now(),
                }],
            )
            .await
            .unwrap();

        let engine = BalanceEngine::new(&store);
        assert!(store.find_balance(user.id, claim_type.id).await.unwrap().is_none());

        let b = engine.get_or_create_balance(user.id, claim_type.id).await.unwrap();
        assert_eq!(b.total_limit, dec!(300));
        assert_eq!(b.remaining_balance, dec!(300));
        assert_eq!(b.reset_period, LimitTimespan::Monthly);

        let again = engine.get_or_create_balance(user.id, claim_type.id).await.unwrap();
        assert_eq!(again.id, b.id);
    }

    #[tokio::test]
    async fn test_check_claim_is_a_dry_run() {
        let (store, user, claim_type) = seeded().await;
        let engine = BalanceEngine::new(&store);

        let over = engine.check_claim(user.id, claim_type.id, dec!(1200)).await.unwrap();
        assert!(!over.can_claim);
        assert!(over.message.unwrap().contains("exceeds remaining balance"));

        let ok = engine.check_claim(user.id, claim_type.id, dec!(1000)).await.unwrap();
        assert!(ok.can_claim);

        let b = store.find_balance(user.id, claim_type.id).await.unwrap().unwrap();
        assert_eq!(b.current_spent, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_check_claim_respects_denial() {
        let (store, user, claim_type) = seeded().await;
        let entry = OverrideEntry {
            claim_type_id: claim_type.id,
            is_allowed: false,
            custom_limit_amount: None,
        };
        store
            .replace_user_overrides(
                user.id,
                vec![UserClaimType {
                    id: Uuid::new_v4(),
                    user_id: user.id,
                    claim_type_id: entry.claim_type_id,
                    is_allowed: entry.is_allowed,
                    custom_limit_amount: entry.custom_limit_amount,
                    created_at: Utc::now(),
                }],
            )
            .await
            .unwrap();

        let check = BalanceEngine::new(&store)
            .check_claim(user.id, claim_type.id, dec!(1))
            .await
            .unwrap();
        assert!(!check.can_claim);
        assert_eq!(
            check.message.as_deref(),
            Some("You do not have permission to claim this type")
        );
    }

    #[tokio::test]
    async fn test_deduct_and_admin_limit_keep_invariant() {
        let (store, user, claim_type) = seeded().await;
        let engine = BalanceEngine::new(&store);

        let b = engine.deduct(user.id, claim_type.id, dec!(1200)).await.unwrap();
        assert_eq!(b.current_spent, dec!(1200));
        assert_eq!(b.remaining_balance, Decimal::ZERO);

        let b = engine.admin_set_limit(user.id, claim_type.id, dec!(2000)).await.unwrap();
        assert_eq!(b.total_limit, dec!(2000));
        assert_eq!(b.remaining_balance, dec!(800));

        assert!(engine.deduct(user.id, claim_type.id, dec!(-5)).await.is_err());
        assert!(engine.admin_set_limit(user.id, claim_type.id, dec!(-5)).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_balance_is_reset_on_access() {
        let (store, user, claim_type) = seeded().await;
        let march = at(2024, 3, 13, 9);
        BalanceEngine::at(&store, march)
            .deduct(user.id, claim_type.id, dec!(700))
            .await
            .unwrap();

        let april = BalanceEngine::at(&store, at(2024, 4, 1, 8));
        let listed = april.list_balances(user.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].current_spent, Decimal::ZERO);
        assert_eq!(listed[0].remaining_balance, dec!(1000));

        let stored = store.find_balance(user.id, claim_type.id).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_date, at(2024, 4, 1, 8));
    }

    #[test]
    fn test_apply_change_works_on_the_current_period() {
        let b = balance(LimitTimespan::Monthly, dec!(1000), dec!(800));
        let same_month = at(2024, 3, 20, 8);

        let (unchanged, write) = apply_change(b.clone(), BalanceChange::Reconcile, same_month);
        assert!(!write);
        assert_eq!(unchanged, b);

        let (raised, write) = apply_change(b.clone(), BalanceChange::SetLimit(dec!(2000)), same_month);
        assert!(write);
        assert_eq!(raised.current_spent, dec!(800));
        assert_eq!(raised.remaining_balance, dec!(1200));

        // A stale row is reset before the deduction lands
        let (next_month, write) = apply_change(b, BalanceChange::Deduct(dec!(50)), at(2024, 4, 2, 8));
        assert!(write);
        assert_eq!(next_month.current_spent, dec!(50));
        assert_eq!(next_month.remaining_balance, dec!(950));
    }

    #[tokio::test]
    async fn test_limit_change_keeps_spending_recorded_after_a_read() {
        let (store, user, claim_type) = seeded().await;
        let engine = BalanceEngine::new(&store);
        let before = engine.get_or_create_balance(user.id, claim_type.id).await.unwrap();
        assert_eq!(before.current_spent, Decimal::ZERO);

        // Spending lands after the caller's last read
        store
            .update_balance(user.id, claim_type.id, BalanceChange::Deduct(dec!(800)), Utc::now())
            .await
            .unwrap();

        let after = engine.admin_set_limit(user.id, claim_type.id, dec!(2000)).await.unwrap();
        assert_eq!(after.current_spent, dec!(800));
        assert_eq!(after.remaining_balance, dec!(1200));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deductions_and_limit_changes_lose_nothing() {
        let (store, user, claim_type) = seeded().await;
        let store = std::sync::Arc::new(store);
        BalanceEngine::new(store.as_ref())
            .get_or_create_balance(user.id, claim_type.id)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..40 {
            let store = store.clone();
            let (user_id, claim_type_id) = (user.id, claim_type.id);
            tasks.push(tokio::spawn(async move {
                let engine = BalanceEngine::new(store.as_ref());
                if i % 2 == 0 {
                    engine.deduct(user_id, claim_type_id, dec!(10)).await.map(|_| ())
                } else {
                    engine.admin_set_limit(user_id, claim_type_id, dec!(5000)).await.map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = store.find_balance(user.id, claim_type.id).await.unwrap().unwrap();
        assert_eq!(stored.current_spent, dec!(200));
        assert_eq!(stored.total_limit, dec!(5000));
        assert_eq!(stored.remaining_balance, dec!(4800));
    }

    #[tokio::test]
    async fn test_unknown_claim_type_is_not_found() {
        let (store, user, _) = seeded().await;
        let err = BalanceEngine::new(&store)
            .get_or_create_balance(user.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound("Claim type")));
    }
}
