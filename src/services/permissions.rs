//! Permission resolution for (user, claim type) pairs
//!
//! Overrides are looked up in a fixed order: a user-level override is
//! authoritative, then the user's group override, then the claim type's own
//! defaults. A missing override is not an error, it only means "ask the next
//! tier".

use crate::db::ClaimStore;
use crate::error::{CoreError, CoreResult};
use crate::models::{ClaimType, User, UserClaimType, UserGroupClaimType};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Which tier decided the outcome
#[derive(Debug, Clone)]
pub enum OverrideSource {
    User(UserClaimType),
    Group(UserGroupClaimType),
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    User,
    Group,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectivePermission {
    pub tier: PermissionTier,
    pub is_allowed: bool,
    pub limit: Decimal,
}

/// Pick the deciding override. The group override is only consulted when no
/// user override exists for the pair.
pub fn resolve_override(
    user_override: Option<UserClaimType>,
    group_override: Option<UserGroupClaimType>,
) -> OverrideSource {
    match (user_override, group_override) {
        (Some(user), _) => OverrideSource::User(user),
        (None, Some(group)) => OverrideSource::Group(group),
        (None, None) => OverrideSource::Default,
    }
}

/// Turn the deciding override into an access flag and limit
pub fn effective_permission(claim_type: &ClaimType, source: &OverrideSource) -> EffectivePermission {
    match source {
        OverrideSource::User(row) => EffectivePermission {
            tier: PermissionTier::User,
            is_allowed: row.is_allowed,
            limit: row.custom_limit_amount.unwrap_or(claim_type.limit_amount),
        },
        OverrideSource::Group(row) => EffectivePermission {
            tier: PermissionTier::Group,
            is_allowed: row.is_allowed,
            limit: row.custom_limit_amount.unwrap_or(claim_type.limit_amount),
        },
        OverrideSource::Default => EffectivePermission {
            tier: PermissionTier::Default,
            is_allowed: true,
            limit: claim_type.limit_amount,
        },
    }
}

pub struct PermissionResolver<'a> {
    store: &'a dyn ClaimStore,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store }
    }

    /// Whether the user may claim against this type at all
    pub async fn can_access(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<bool> {
        Ok(self.effective(user_id, claim_type_id).await?.is_allowed)
    }

    /// The spending limit that applies to the user for this type
    pub async fn effective_limit(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<Decimal> {
        Ok(self.effective(user_id, claim_type_id).await?.limit)
    }

    pub async fn effective(&self, user_id: Uuid, claim_type_id: Uuid) -> CoreResult<EffectivePermission> {
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
        self.effective_for(&user, &claim_type).await
    }

    pub async fn effective_for(
        &self,
        user: &User,
        claim_type: &ClaimType,
    ) -> CoreResult<EffectivePermission> {
        let user_override = self
            .store
            .find_user_override(user.id, claim_type.id)
            .await?;

        let group_override = match (&user_override, user.user_group_id) {
            (None, Some(group_id)) => {
                self.store
                    .find_group_override(group_id, claim_type.id)
                    .await?
            }
            _ => None,
        };

        let source = resolve_override(user_override, group_override);
        Ok(effective_permission(claim_type, &source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LimitTimespan;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn travel() -> ClaimType {
        let now = Utc::now();
        ClaimType {
            id: Uuid::new_v4(),
            name: "Travel".to_string(),
            description: None,
            limit_amount: dec!(1000),
            limit_timespan: LimitTimespan::Monthly,
            created_at: now,
            updated_at: now,
        }
    }

    fn user_row(claim_type: &ClaimType, allowed: bool, limit: Option<Decimal>) -> UserClaimType {
        UserClaimType {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            claim_type_id: claim_type.id,
            is_allowed: allowed,
            custom_limit_amount: limit,
            created_at: Utc::now(),
        }
    }

    fn group_row(claim_type: &ClaimType, allowed: bool, limit: Option<Decimal>) -> UserGroupClaimType {
        UserGroupClaimType {
            id: Uuid::new_v4(),
            user_group_id: Uuid::new_v4(),
            claim_type_id: claim_type.id,
            is_allowed: allowed,
            custom_limit_amount: limit,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_tier_when_no_overrides() {
        let ct = travel();
        let perm = effective_permission(&ct, &resolve_override(None, None));
        assert_eq!(perm.tier, PermissionTier::Default);
        assert!(perm.is_allowed);
        assert_eq!(perm.limit, dec!(1000));
    }

    #[test]
    fn test_user_denial_beats_group_allowance() {
        let ct = travel();
        let source = resolve_override(
            Some(user_row(&ct, false, None)),
            Some(group_row(&ct, true, Some(dec!(5000)))),
        );
        let perm = effective_permission(&ct, &source);
        assert_eq!(perm.tier, PermissionTier::User);
        assert!(!perm.is_allowed);
    }

    #[test]
    fn test_user_override_without_limit_falls_back_to_type_default() {
        let ct = travel();
        let source = resolve_override(
            Some(user_row(&ct, true, None)),
            Some(group_row(&ct, true, Some(dec!(250)))),
        );
        let perm = effective_permission(&ct, &source);
        assert_eq!(perm.limit, dec!(1000));
    }

    #[test]
    fn test_group_override_applies_without_user_override() {
        let ct = travel();
        let source = resolve_override(None, Some(group_row(&ct, true, Some(dec!(250)))));
        let perm = effective_permission(&ct, &source);
        assert_eq!(perm.tier, PermissionTier::Group);
        assert_eq!(perm.limit, dec!(250));

        let denied = resolve_override(None, Some(group_row(&ct, false, None)));
        assert!(!effective_permission(&ct, &denied).is_allowed);
    }

    #[test]
    fn test_user_custom_limit_wins() {
        let ct = travel();
        let source = resolve_override(Some(user_row(&ct, true, Some(dec!(3000)))), None);
        assert_eq!(effective_permission(&ct, &source).limit, dec!(3000));
    }
}
