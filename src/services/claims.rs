//! Claim lifecycle
//!
//! Status changes follow a fixed edge table. The owner moves a draft into
//! review; everything after that is done by approvers acting through an
//! [`ApprovalLevel`] that grants the matching capability. Entering `approved`
//! or `paid` records spending against the owner's balance, and the status
//! change, the approval row and the deduction are committed together.

use super::audit::{entity, log_audit, AuditAction, AuditContext, AuditRecord};
use super::balance::BalanceEngine;
use super::workflow::{project, WorkflowView};
use crate::db::{ClaimStore, Deduction, TransitionCommit};
use crate::error::{CoreError, CoreResult};
use crate::models::*;
use crate::validation::{validate_create_claim, ValidationError};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

/// Statuses from which the owner may still withdraw a claim
pub const CANCELLABLE: [ClaimStatus; 2] = [ClaimStatus::Draft, ClaimStatus::Submitted];

const MAX_COMMENT_LEN: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Approve,
    Reject,
    SetPaymentInProgress,
    SetPaid,
}

impl Capability {
    pub fn granted_by(self, level: &ApprovalLevel) -> bool {
        match self {
            Capability::Approve => level.can_approve,
            Capability::Reject => level.can_reject,
            Capability::SetPaymentInProgress => level.can_set_payment_in_progress,
            Capability::SetPaid => level.can_set_paid,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Capability::Approve => "approve",
            Capability::Reject => "reject or return",
            Capability::SetPaymentInProgress => "start payment for",
            Capability::SetPaid => "mark as paid",
        }
    }
}

/// Which approval levels count when checking an approver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelScope {
    /// Only levels belonging to the claim owner's group
    OwnerGroup,
    /// Any level the approver holds
    AnyHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRule {
    Owner,
    Approver {
        capability: Capability,
        scope: LevelScope,
    },
}

/// The rule guarding `from -> to`, or `None` when the edge does not exist
pub fn transition_rule(from: ClaimStatus, to: ClaimStatus) -> Option<ActorRule> {
    use ClaimStatus::*;

    let approver = |capability, scope| ActorRule::Approver { capability, scope };
    match (from, to) {
        (Draft, Submitted) => Some(ActorRule::Owner),
        (Submitted, Approved) => Some(approver(Capability::Approve, LevelScope::OwnerGroup)),
        (Submitted, Rejected) | (Submitted, Draft) => {
            Some(approver(Capability::Reject, LevelScope::OwnerGroup))
        }
        (Approved, PaymentInProgress) => Some(approver(
            Capability::SetPaymentInProgress,
            LevelScope::AnyHeld,
        )),
        (Approved, Paid) | (PaymentInProgress, Paid) => {
            Some(approver(Capability::SetPaid, LevelScope::AnyHeld))
        }
        _ => None,
    }
}

/// Entering `approved` or `paid` records the claim amount as spent
pub fn deducts_on_entry(from: ClaimStatus, to: ClaimStatus) -> bool {
    (to == ClaimStatus::Approved && from != ClaimStatus::Approved)
        || (to == ClaimStatus::Paid && from != ClaimStatus::Paid)
}

/// Check that `actor_id` may move `claim` to `target`.
///
/// Returns the approval level the actor acts under, `None` for the owner's
/// own submit. An explicitly requested level must belong to the actor and
/// carry the capability; otherwise the lowest qualifying level is chosen.
pub fn authorize_transition(
    claim: &Claim,
    owner_group: Option<Uuid>,
    actor_id: Uuid,
    target: ClaimStatus,
    actor_levels: &[ApprovalLevel],
    requested_level: Option<Uuid>,
) -> CoreResult<Option<Uuid>> {
    let rule = transition_rule(claim.status, target).ok_or_else(|| {
        CoreError::conflict(format!(
            "Cannot move a claim from {} to {}",
            claim.status, target
        ))
    })?;

    let (capability, scope) = match rule {
        ActorRule::Owner => {
            if actor_id != claim.user_id {
                return Err(CoreError::permission_denied(
                    "Only the claim owner can submit a claim",
                ));
            }
            return Ok(None);
        }
        ActorRule::Approver { capability, scope } => (capability, scope),
    };

    if actor_id == claim.user_id {
        return Err(CoreError::permission_denied(format!(
            "You cannot {} your own claim",
            capability.verb()
        )));
    }

    let mut candidates: Vec<&ApprovalLevel> = actor_levels
        .iter()
        .filter(|l| l.approver_id == actor_id)
        .filter(|l| match scope {
            LevelScope::OwnerGroup => Some(l.user_group_id) == owner_group,
            LevelScope::AnyHeld => true,
        })
        .collect();
    candidates.sort_by_key(|l| l.level);

    let chosen = match requested_level {
        Some(level_id) => {
            let level = candidates
                .iter()
                .find(|l| l.id == level_id)
                .ok_or_else(|| {
                    CoreError::permission_denied("You are not the approver for this approval level")
                })?;
            if !capability.granted_by(level) {
                return Err(CoreError::permission_denied(format!(
                    "This approval level does not allow you to {} this claim",
                    capability.verb()
                )));
            }
            level.id
        }
        None => candidates
            .iter()
            .find(|l| capability.granted_by(l))
            .map(|l| l.id)
            .ok_or_else(|| {
                CoreError::permission_denied(format!(
                    "You do not have permission to {} this claim",
                    capability.verb()
                ))
            })?,
    };

    Ok(Some(chosen))
}

fn audit_action_for(target: ClaimStatus) -> AuditAction {
    match target {
        ClaimStatus::Submitted => AuditAction::Submit,
        ClaimStatus::Approved => AuditAction::Approve,
        ClaimStatus::Rejected => AuditAction::Reject,
        _ => AuditAction::Update,
    }
}

fn snapshot(claim: &Claim) -> serde_json::Value {
    serde_json::to_value(claim).unwrap_or_default()
}

pub struct ClaimService<'a> {
    store: &'a dyn ClaimStore,
    now: Option<DateTime<Utc>>,
}

impl<'a> ClaimService<'a> {
    pub fn new(store: &'a dyn ClaimStore) -> Self {
        Self { store, now: None }
    }

    pub fn at(store: &'a dyn ClaimStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now: Some(now),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn balances(&self) -> BalanceEngine<'a> {
        BalanceEngine::at(self.store, self.now())
    }

    async fn load(&self, claim_id: Uuid) -> CoreResult<Claim> {
        self.store
            .get_claim(claim_id)
            .await?
            .ok_or(CoreError::NotFound("Claim"))
    }

    async fn require_claim_type(&self, claim_type_id: Uuid) -> CoreResult<ClaimType> {
        self.store
            .get_claim_type(claim_type_id)
            .await?
            .ok_or(CoreError::NotFound("Claim type"))
    }

    /// Owners, admins and approvers in the owner's group may read a claim
    async fn ensure_can_view(&self, viewer: &User, claim: &Claim) -> CoreResult<()> {
        if viewer.id == claim.user_id || viewer.is_admin() {
            return Ok(());
        }
        let owner_group = self
            .store
            .get_user(claim.user_id)
            .await?
            .and_then(|owner| owner.user_group_id);
        let levels = self.store.list_levels_for_approver(viewer.id).await?;
        let approves_for_owner = owner_group
            .map(|group_id| levels.iter().any(|l| l.user_group_id == group_id))
            .unwrap_or(false);
        if approves_for_owner {
            Ok(())
        } else {
            Err(CoreError::permission_denied(
                "You do not have access to this claim",
            ))
        }
    }

    /// Create a draft after checking access and the remaining balance
    pub async fn create_claim(
        &self,
        owner: &User,
        input: CreateClaim,
        ctx: &AuditContext,
    ) -> CoreResult<Claim> {
        validate_create_claim(&input)?;
        self.require_claim_type(input.claim_type_id).await?;
        self.balances()
            .ensure_claimable(owner.id, input.claim_type_id, input.amount)
            .await?;

        let now = self.now();
        let claim = self
            .store
            .insert_claim(Claim {
                id: Uuid::new_v4(),
                user_id: owner.id,
                claim_type_id: input.claim_type_id,
                title: input.title.trim().to_string(),
                description: input.description,
                amount: input.amount,
                status: ClaimStatus::Draft,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(
            "Claim {} created by {} for {}",
            claim.id,
            owner.email,
            claim.amount
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Create, entity::CLAIM, Some(claim.id))
                .by(owner.id)
                .new_values(snapshot(&claim)),
        )
        .await;

        Ok(claim)
    }

    /// Edit a draft. The new amount is checked against the balance again.
    pub async fn update_claim(
        &self,
        actor: &User,
        claim_id: Uuid,
        input: UpdateClaim,
        ctx: &AuditContext,
    ) -> CoreResult<Claim> {
        let existing = self.load(claim_id).await?;
        if existing.user_id != actor.id {
            return Err(CoreError::permission_denied(
                "You can only edit your own claims",
            ));
        }
        if existing.status != ClaimStatus::Draft {
            return Err(CoreError::conflict("Can only update draft claims"));
        }

        validate_create_claim(&input)?;
        self.require_claim_type(input.claim_type_id).await?;
        self.balances()
            .ensure_claimable(actor.id, input.claim_type_id, input.amount)
            .await?;

        let updated = self
            .store
            .update_draft_claim(Claim {
                claim_type_id: input.claim_type_id,
                title: input.title.trim().to_string(),
                description: input.description,
                amount: input.amount,
                updated_at: self.now(),
                ..existing.clone()
            })
            .await?
            .ok_or_else(|| CoreError::conflict("Can only update draft claims"))?;

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Update, entity::CLAIM, Some(claim_id))
                .by(actor.id)
                .old(snapshot(&existing))
                .new_values(snapshot(&updated)),
        )
        .await;

        Ok(updated)
    }

    /// Move a claim along one edge of the lifecycle
    pub async fn transition_claim(
        &self,
        actor: &User,
        claim_id: Uuid,
        request: TransitionRequest,
        ctx: &AuditContext,
    ) -> CoreResult<Claim> {
        if let Some(comments) = &request.comments {
            if comments.chars().count() > MAX_COMMENT_LEN {
                return Err(ValidationError::TooLong {
                    field: "comments".to_string(),
                    max: MAX_COMMENT_LEN,
                }
                .into());
            }
        }

        let claim = self.load(claim_id).await?;
        let owner = self
            .store
            .get_user(claim.user_id)
            .await?
            .ok_or(CoreError::NotFound("User"))?;
        let actor_levels = self.store.list_levels_for_approver(actor.id).await?;

        let level_id = authorize_transition(
            &claim,
            owner.user_group_id,
            actor.id,
            request.status,
            &actor_levels,
            request.approval_level_id,
        )?;

        let deduction = if deducts_on_entry(claim.status, request.status) {
            // Make sure the row exists and sits in the current period
            self.balances()
                .get_or_create_balance(claim.user_id, claim.claim_type_id)
                .await?;
            Some(Deduction {
                user_id: claim.user_id,
                claim_type_id: claim.claim_type_id,
                amount: claim.amount,
            })
        } else {
            None
        };

        let now = self.now();
        let approval = ClaimApproval {
            id: Uuid::new_v4(),
            claim_id,
            approval_level_id: level_id,
            approver_id: actor.id,
            status: request.status,
            comments: request.comments.clone(),
            created_at: now,
        };

        let updated = self
            .store
            .commit_transition(TransitionCommit {
                claim_id,
                from: claim.status,
                to: request.status,
                approval,
                deduction,
                now,
            })
            .await?;

        tracing::info!(
            "Claim {} moved {} -> {} by {}",
            claim_id,
            claim.status,
            updated.status,
            actor.email
        );

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(audit_action_for(request.status), entity::CLAIM, Some(claim_id))
                .by(actor.id)
                .old(json!({ "status": claim.status }))
                .new_values(json!({
                    "status": updated.status,
                    "comments": request.comments,
                    "approval_level_id": level_id,
                    "deducted": deduction.map(|d| d.amount),
                })),
        )
        .await;

        Ok(updated)
    }

    /// Withdraw a claim that has not been decided yet
    pub async fn cancel_claim(&self, actor: &User, claim_id: Uuid, ctx: &AuditContext) -> CoreResult<()> {
        let claim = self.load(claim_id).await?;
        if claim.user_id != actor.id {
            return Err(CoreError::permission_denied(
                "You can only cancel your own claims",
            ));
        }
        if !CANCELLABLE.contains(&claim.status) {
            return Err(CoreError::conflict(
                "Cannot cancel approved or processed claims",
            ));
        }

        if !self.store.delete_claim(claim_id, &CANCELLABLE).await? {
            return Err(CoreError::conflict(
                "Claim changed status and can no longer be cancelled",
            ));
        }

        tracing::info!("Claim {} cancelled by {}", claim_id, actor.email);

        log_audit(
            self.store,
            ctx,
            AuditRecord::new(AuditAction::Delete, entity::CLAIM, Some(claim_id))
                .by(actor.id)
                .old(snapshot(&claim)),
        )
        .await;

        Ok(())
    }

    pub async fn get_claim(&self, viewer: &User, claim_id: Uuid) -> CoreResult<ClaimResponse> {
        let claim = self.load(claim_id).await?;
        self.ensure_can_view(viewer, &claim).await?;
        let approvals = self.store.list_claim_approvals(claim_id).await?;
        Ok(ClaimResponse { claim, approvals })
    }

    /// Admins see every claim, everyone else their own
    pub async fn list_claims(&self, viewer: &User) -> CoreResult<Vec<Claim>> {
        let owner = if viewer.is_admin() {
            None
        } else {
            Some(viewer.id)
        };
        self.store.list_claims(owner).await
    }

    pub async fn get_workflow(&self, viewer: &User, claim_id: Uuid) -> CoreResult<WorkflowView> {
        let claim = self.load(claim_id).await?;
        self.ensure_can_view(viewer, &claim).await?;

        let owner = self
            .store
            .get_user(claim.user_id)
            .await?
            .ok_or(CoreError::NotFound("User"))?;
        let levels = match owner.user_group_id {
            Some(group_id) => self.store.list_approval_levels(group_id).await?,
            None => Vec::new(),
        };
        let history = self.store.list_claim_approvals(claim_id).await?;

        Ok(project(&claim, &levels, &history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{self, Office};
    use crate::services::workflow::WorkflowAction;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn to(status: ClaimStatus) -> TransitionRequest {
        TransitionRequest {
            status,
            comments: None,
            approval_level_id: None,
        }
    }

    async fn submitted(office: &Office, amount: Decimal) -> Claim {
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();
        let claim = svc
            .create_claim(&office.owner, office.travel_claim("Client visit", amount), &ctx)
            .await
            .unwrap();
        svc.transition_claim(&office.owner, claim.id, to(ClaimStatus::Submitted), &ctx)
            .await
            .unwrap()
    }

    async fn spent(office: &Office) -> (Decimal, Decimal) {
        let b = office
            .store
            .find_balance(office.owner.id, office.travel.id)
            .await
            .unwrap()
            .unwrap();
        (b.current_spent, b.remaining_balance)
    }

    #[test]
    fn test_edge_table() {
        use ClaimStatus::*;
        let all = [Draft, Submitted, Approved, Rejected, PaymentInProgress, Paid];
        let edges: Vec<(ClaimStatus, ClaimStatus)> = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| transition_rule(*from, *to).is_some())
            .collect();
        assert_eq!(
            edges,
            vec![
                (Draft, Submitted),
                (Submitted, Draft),
                (Submitted, Approved),
                (Submitted, Rejected),
                (Approved, PaymentInProgress),
                (Approved, Paid),
                (PaymentInProgress, Paid),
            ]
        );
        for terminal in [Rejected, Paid] {
            assert!(all.iter().all(|to| transition_rule(terminal, *to).is_none()));
        }
    }

    #[test]
    fn test_deduction_edges() {
        use ClaimStatus::*;
        assert!(deducts_on_entry(Submitted, Approved));
        assert!(deducts_on_entry(Approved, Paid));
        assert!(deducts_on_entry(PaymentInProgress, Paid));
        assert!(!deducts_on_entry(Approved, PaymentInProgress));
        assert!(!deducts_on_entry(Draft, Submitted));
        assert!(!deducts_on_entry(Submitted, Rejected));
    }

    #[tokio::test]
    async fn test_travel_scenario() {
        let office = Office::seed().await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        let err = svc
            .create_claim(&office.owner, office.travel_claim("Flight", dec!(1200)), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BalanceExceeded { .. }));

        let claim = svc
            .create_claim(&office.owner, office.travel_claim("Train", dec!(800)), &ctx)
            .await
            .unwrap();
        assert_eq!(claim.status, ClaimStatus::Draft);
        assert_eq!(spent(&office).await, (Decimal::ZERO, dec!(1000)));

        svc.transition_claim(&office.owner, claim.id, to(ClaimStatus::Submitted), &ctx)
            .await
            .unwrap();
        assert_eq!(spent(&office).await, (Decimal::ZERO, dec!(1000)));

        let approved = svc
            .transition_claim(&office.manager, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap();
        assert_eq!(approved.status, ClaimStatus::Approved);
        assert_eq!(spent(&office).await, (dec!(800), dec!(200)));

        let history = office.store.list_claim_approvals(claim.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ClaimStatus::Submitted);
        assert_eq!(history[0].approval_level_id, None);
        let approvals: Vec<&ClaimApproval> = history
            .iter()
            .filter(|a| a.status == ClaimStatus::Approved)
            .collect();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].approval_level_id, Some(office.review_level.id));
        assert_eq!(approvals[0].approver_id, office.manager.id);
    }

    #[tokio::test]
    async fn test_self_approval_is_denied() {
        let office = Office::seed().await;
        // The manager is also an approver in their own group
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();
        let claim = svc
            .create_claim(&office.manager, office.travel_claim("Hotel", dec!(300)), &ctx)
            .await
            .unwrap();
        svc.transition_claim(&office.manager, claim.id, to(ClaimStatus::Submitted), &ctx)
            .await
            .unwrap();

        for target in [ClaimStatus::Approved, ClaimStatus::Rejected, ClaimStatus::Draft] {
            let err = svc
                .transition_claim(&office.manager, claim.id, to(target), &ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::PermissionDenied(_)));
        }

        let still = office.store.get_claim(claim.id).await.unwrap().unwrap();
        assert_eq!(still.status, ClaimStatus::Submitted);
    }

    #[tokio::test]
    async fn test_only_owner_submits() {
        let office = Office::seed().await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();
        let claim = svc
            .create_claim(&office.owner, office.travel_claim("Taxi", dec!(40)), &ctx)
            .await
            .unwrap();

        let err = svc
            .transition_claim(&office.manager, claim.id, to(ClaimStatus::Submitted), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_approver_needs_matching_capability_and_group() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(100)).await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        // Finance only holds payment flags
        let err = svc
            .transition_claim(&office.finance, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));

        // Nobody in another group can act
        let err = svc
            .transition_claim(&office.outsider, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));

        // Naming someone else's level does not help
        let err = svc
            .transition_claim(
                &office.manager,
                claim.id,
                TransitionRequest {
                    status: ClaimStatus::Approved,
                    comments: None,
                    approval_level_id: Some(office.payment_level.id),
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));

        // Admin role alone grants nothing
        let err = svc
            .transition_claim(&office.admin, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_invalid_edges_conflict() {
        let office = Office::seed().await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();
        let claim = svc
            .create_claim(&office.owner, office.travel_claim("Parking", dec!(15)), &ctx)
            .await
            .unwrap();

        let err = svc
            .transition_claim(&office.manager, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let err = svc
            .transition_claim(&office.finance, claim.id, to(ClaimStatus::Paid), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rejected_is_terminal() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(100)).await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        let rejected = svc
            .transition_claim(
                &office.manager,
                claim.id,
                TransitionRequest {
                    status: ClaimStatus::Rejected,
                    comments: Some("Missing receipt".to_string()),
                    approval_level_id: Some(office.review_level.id),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, ClaimStatus::Rejected);
        assert_eq!(spent(&office).await, (Decimal::ZERO, dec!(1000)));

        for target in [ClaimStatus::Draft, ClaimStatus::Submitted, ClaimStatus::Approved] {
            let err = svc
                .transition_claim(&office.manager, claim.id, to(target), &ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::Conflict(_)));
        }
    }

    #[tokio::test]
    async fn test_request_changes_returns_to_draft() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(100)).await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        let back = svc
            .transition_claim(&office.manager, claim.id, to(ClaimStatus::Draft), &ctx)
            .await
            .unwrap();
        assert_eq!(back.status, ClaimStatus::Draft);

        let edited = svc
            .update_claim(
                &office.owner,
                claim.id,
                office.travel_claim("Client visit with receipt", dec!(120)),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(edited.amount, dec!(120));

        let resubmitted = svc
            .transition_claim(&office.owner, claim.id, to(ClaimStatus::Submitted), &ctx)
            .await
            .unwrap();
        assert_eq!(resubmitted.status, ClaimStatus::Submitted);
    }

    #[tokio::test]
    async fn test_payment_flow_records_spending_on_paid() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(300)).await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        svc.transition_claim(&office.manager, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap();
        assert_eq!(spent(&office).await, (dec!(300), dec!(700)));

        // Payment levels act regardless of group membership
        svc.transition_claim(
            &office.finance,
            claim.id,
            to(ClaimStatus::PaymentInProgress),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(spent(&office).await, (dec!(300), dec!(700)));

        let paid = svc
            .transition_claim(&office.finance, claim.id, to(ClaimStatus::Paid), &ctx)
            .await
            .unwrap();
        assert_eq!(paid.status, ClaimStatus::Paid);
        assert_eq!(spent(&office).await, (dec!(600), dec!(400)));

        let err = svc
            .transition_claim(&office.finance, claim.id, to(ClaimStatus::Paid), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_deduction_leaves_claim_untouched() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(250)).await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        office.store.fail_balance_writes(true);
        let err = svc
            .transition_claim(&office.manager, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap_err();
        assert!(!err.is_business_failure());
        office.store.fail_balance_writes(false);

        let still = office.store.get_claim(claim.id).await.unwrap().unwrap();
        assert_eq!(still.status, ClaimStatus::Submitted);
        let history = office.store.list_claim_approvals(claim.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(spent(&office).await, (Decimal::ZERO, dec!(1000)));
    }

    #[tokio::test]
    async fn test_stale_commit_is_a_conflict() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(50)).await;

        let err = office
            .store
            .commit_transition(TransitionCommit {
                claim_id: claim.id,
                from: ClaimStatus::Draft,
                to: ClaimStatus::Submitted,
                approval: ClaimApproval {
                    id: Uuid::new_v4(),
                    claim_id: claim.id,
                    approval_level_id: None,
                    approver_id: office.owner.id,
                    status: ClaimStatus::Submitted,
                    comments: None,
                    created_at: Utc::now(),
                },
                deduction: None,
                now: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(office.store.list_claim_approvals(claim.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let office = Office::seed().await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();

        let draft = svc
            .create_claim(&office.owner, office.travel_claim("Lunch", dec!(20)), &ctx)
            .await
            .unwrap();
        let err = svc.cancel_claim(&office.manager, draft.id, &ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
        svc.cancel_claim(&office.owner, draft.id, &ctx).await.unwrap();
        assert!(office.store.get_claim(draft.id).await.unwrap().is_none());

        let pending = submitted(&office, dec!(30)).await;
        svc.cancel_claim(&office.owner, pending.id, &ctx).await.unwrap();
        assert!(office.store.get_claim(pending.id).await.unwrap().is_none());
        assert!(office.store.list_claim_approvals(pending.id).await.unwrap().is_empty());

        let approved = submitted(&office, dec!(40)).await;
        svc.transition_claim(&office.manager, approved.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap();
        let err = svc.cancel_claim(&office.owner, approved.id, &ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(office.store.get_claim(approved.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sub_cent_amounts_are_rejected() {
        let office = Office::seed().await;
        let svc = ClaimService::new(&office.store);

        let err = svc
            .create_claim(
                &office.owner,
                office.travel_claim("Stamp", dec!(0.004)),
                &AuditContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(svc.list_claims(&office.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_denied_type_cannot_be_claimed() {
        let office = Office::seed().await;
        office
            .store
            .replace_user_overrides(
                office.owner.id,
                vec![UserClaimType {
                    id: Uuid::new_v4(),
                    user_id: office.owner.id,
                    claim_type_id: office.travel.id,
                    is_allowed: false,
                    custom_limit_amount: None,
                    created_at: Utc::now(),
                }],
            )
            .await
            .unwrap();

        let err = ClaimService::new(&office.store)
            .create_claim(
                &office.owner,
                office.travel_claim("Flight", dec!(10)),
                &AuditContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_update_rechecks_balance_and_ownership() {
        let office = Office::seed().await;
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();
        let claim = svc
            .create_claim(&office.owner, office.travel_claim("Bus", dec!(10)), &ctx)
            .await
            .unwrap();

        let err = svc
            .update_claim(&office.owner, claim.id, office.travel_claim("Bus", dec!(5000)), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BalanceExceeded { .. }));

        let err = svc
            .update_claim(&office.manager, claim.id, office.travel_claim("Bus", dec!(5)), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));

        let pending = submitted(&office, dec!(10)).await;
        let err = svc
            .update_claim(&office.owner, pending.id, office.travel_claim("Bus", dec!(5)), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_visibility() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(75)).await;
        let svc = ClaimService::new(&office.store);

        assert!(svc.get_claim(&office.owner, claim.id).await.is_ok());
        assert!(svc.get_claim(&office.admin, claim.id).await.is_ok());
        assert!(svc.get_claim(&office.manager, claim.id).await.is_ok());
        assert!(matches!(
            svc.get_claim(&office.outsider, claim.id).await,
            Err(CoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            svc.get_claim(&office.owner, Uuid::new_v4()).await,
            Err(CoreError::NotFound("Claim"))
        ));

        assert_eq!(svc.list_claims(&office.owner).await.unwrap().len(), 1);
        assert!(svc.list_claims(&office.outsider).await.unwrap().is_empty());
        assert_eq!(svc.list_claims(&office.admin).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workflow_for_submitted_claim() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(75)).await;
        let view = ClaimService::new(&office.store)
            .get_workflow(&office.owner, claim.id)
            .await
            .unwrap();

        assert_eq!(view.total_steps, 4);
        assert_eq!(view.completed_steps, 2);
        assert_eq!(view.next_actions.len(), 3);
        assert_eq!(view.next_actions[0].action, WorkflowAction::Approve);
        assert_eq!(view.next_actions[0].level_id, Some(office.review_level.id));
    }

    #[tokio::test]
    async fn test_transitions_are_audited() {
        let office = Office::seed().await;
        let claim = submitted(&office, dec!(60)).await;
        ClaimService::new(&office.store)
            .transition_claim(
                &office.manager,
                claim.id,
                to(ClaimStatus::Approved),
                &AuditContext::default(),
            )
            .await
            .unwrap();

        let actions: Vec<String> = office
            .store
            .audit_entries()
            .await
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["create", "submit", "approve"]);
    }

    #[tokio::test]
    async fn test_user_without_group_has_no_reviewers() {
        let office = Office::seed().await;
        let loner = office
            .store
            .insert_user(fixtures::user("lena@example.com", UserRole::Normal, None))
            .await
            .unwrap();
        let svc = ClaimService::new(&office.store);
        let ctx = AuditContext::default();
        let claim = svc
            .create_claim(&loner, office.travel_claim("Desk lamp", dec!(35)), &ctx)
            .await
            .unwrap();
        svc.transition_claim(&loner, claim.id, to(ClaimStatus::Submitted), &ctx)
            .await
            .unwrap();

        let err = svc
            .transition_claim(&office.manager, claim.id, to(ClaimStatus::Approved), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }
}
