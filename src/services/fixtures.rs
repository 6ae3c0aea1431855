//! Shared seed data for service tests

use crate::db::{ClaimStore, MemoryStore};
use crate::models::*;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

pub fn user(email: &str, role: UserRole, group: Option<Uuid>) -> User {
    let now = Utc::now();
    let (first, last) = email.split_once('@').unwrap_or((email, "example.com"));
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: String::new(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        role,
        user_group_id: group,
        created_at: now,
        updated_at: now,
    }
}

pub fn group(name: &str) -> UserGroup {
    let now = Utc::now();
    UserGroup {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn claim_type(name: &str, limit: Decimal, timespan: LimitTimespan) -> ClaimType {
    let now = Utc::now();
    ClaimType {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        limit_amount: limit,
        limit_timespan: timespan,
        created_at: now,
        updated_at: now,
    }
}

pub fn level(group_id: Uuid, approver_id: Uuid, caps: LevelCapabilities) -> ApprovalLevel {
    let now = Utc::now();
    let mut level = ApprovalLevel {
        id: Uuid::new_v4(),
        user_group_id: group_id,
        level: 0,
        approver_id,
        can_draft: false,
        can_submit: false,
        can_approve: false,
        can_reject: false,
        can_set_payment_in_progress: false,
        can_set_paid: false,
        created_at: now,
        updated_at: now,
    };
    level.apply_capabilities(caps);
    level
}

pub fn reviewer() -> LevelCapabilities {
    LevelCapabilities {
        can_approve: true,
        can_reject: true,
        ..Default::default()
    }
}

pub fn payer() -> LevelCapabilities {
    LevelCapabilities {
        can_set_payment_in_progress: true,
        can_set_paid: true,
        ..Default::default()
    }
}

/// An "Engineering" group where `manager` reviews at level 1 and `finance`
/// handles payment at level 2, plus a monthly Travel type limited to 1000.
pub struct Office {
    pub store: MemoryStore,
    pub group: UserGroup,
    pub owner: User,
    pub manager: User,
    pub finance: User,
    pub outsider: User,
    pub admin: User,
    pub travel: ClaimType,
    pub review_level: ApprovalLevel,
    pub payment_level: ApprovalLevel,
}

impl Office {
    pub async fn seed() -> Self {
        let store = MemoryStore::new();
        let group = store.insert_user_group(group("Engineering")).await.unwrap();
        let sales = store.insert_user_group(self::group("Sales")).await.unwrap();

        let owner = store
            .insert_user(user("emma@example.com", UserRole::Normal, Some(group.id)))
            .await
            .unwrap();
        let manager = store
            .insert_user(user("marco@example.com", UserRole::Normal, Some(group.id)))
            .await
            .unwrap();
        let finance = store
            .insert_user(user("fatima@example.com", UserRole::Normal, None))
            .await
            .unwrap();
        let outsider = store
            .insert_user(user("otto@example.com", UserRole::Normal, Some(sales.id)))
            .await
            .unwrap();
        let admin = store
            .insert_user(user("ada@example.com", UserRole::Admin, None))
            .await
            .unwrap();

        let travel = store
            .insert_claim_type(claim_type("Travel", dec!(1000), LimitTimespan::Monthly))
            .await
            .unwrap();

        let review_level = store
            .append_approval_level(level(group.id, manager.id, reviewer()))
            .await
            .unwrap();
        let payment_level = store
            .append_approval_level(level(group.id, finance.id, payer()))
            .await
            .unwrap();

        Self {
            store,
            group,
            owner,
            manager,
            finance,
            outsider,
            admin,
            travel,
            review_level,
            payment_level,
        }
    }

    pub fn travel_claim(&self, title: &str, amount: Decimal) -> CreateClaim {
        CreateClaim {
            title: title.to_string(),
            description: None,
            amount,
            claim_type_id: self.travel.id,
        }
    }
}
