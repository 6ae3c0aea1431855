//! Read-side projection of a claim's progress through its approval chain

use crate::models::{ApprovalLevel, Claim, ClaimApproval, ClaimStatus, LevelCapabilities};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    System,
    Approval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Pending,
    NotStarted,
    NotReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStep {
    pub id: String,
    pub kind: StepKind,
    pub title: String,
    pub description: String,
    pub level: i32,
    pub status: StepStatus,
    /// Status the recorded decision moved the claim to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ClaimStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<LevelCapabilities>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Submit,
    Edit,
    Cancel,
    Approve,
    Reject,
    RequestChanges,
    SetPaymentInProgress,
    SetPaid,
}

impl WorkflowAction {
    fn label(&self) -> &'static str {
        match self {
            WorkflowAction::Submit => "Submit for Approval",
            WorkflowAction::Edit => "Edit Claim",
            WorkflowAction::Cancel => "Cancel Claim",
            WorkflowAction::Approve => "Approve",
            WorkflowAction::Reject => "Reject",
            WorkflowAction::RequestChanges => "Request Changes",
            WorkflowAction::SetPaymentInProgress => "Mark Payment in Progress",
            WorkflowAction::SetPaid => "Mark as Paid",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            WorkflowAction::Submit => "Submit claim to approval workflow",
            WorkflowAction::Edit => "Modify claim details",
            WorkflowAction::Cancel => "Delete this claim",
            WorkflowAction::Approve => "Approve this claim",
            WorkflowAction::Reject => "Reject this claim",
            WorkflowAction::RequestChanges => "Send the claim back to draft",
            WorkflowAction::SetPaymentInProgress => "Mark claim as payment in progress",
            WorkflowAction::SetPaid => "Mark claim as paid",
        }
    }

    /// Status a transition request for this action should name
    pub fn target_status(&self) -> Option<ClaimStatus> {
        match self {
            WorkflowAction::Submit => Some(ClaimStatus::Submitted),
            WorkflowAction::Edit | WorkflowAction::Cancel => None,
            WorkflowAction::Approve => Some(ClaimStatus::Approved),
            WorkflowAction::Reject => Some(ClaimStatus::Rejected),
            WorkflowAction::RequestChanges => Some(ClaimStatus::Draft),
            WorkflowAction::SetPaymentInProgress => Some(ClaimStatus::PaymentInProgress),
            WorkflowAction::SetPaid => Some(ClaimStatus::Paid),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NextAction {
    pub action: WorkflowAction,
    pub label: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_status: Option<ClaimStatus>,
    pub available: bool,
}

impl NextAction {
    fn new(action: WorkflowAction, level_id: Option<Uuid>) -> Self {
        Self {
            action,
            label: action.label(),
            description: action.description(),
            level_id,
            target_status: action.target_status(),
            available: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowView {
    pub claim_id: Uuid,
    pub status: ClaimStatus,
    pub steps: Vec<WorkflowStep>,
    pub progress: f64,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub current_step: Option<WorkflowStep>,
    pub next_actions: Vec<NextAction>,
}

fn latest_for_level<'a>(history: &'a [ClaimApproval], level_id: Uuid) -> Option<&'a ClaimApproval> {
    history
        .iter()
        .filter(|a| a.approval_level_id == Some(level_id))
        .max_by_key(|a| a.created_at)
}

/// Build the workflow view. `levels` may arrive in any order.
pub fn project(claim: &Claim, levels: &[ApprovalLevel], history: &[ClaimApproval]) -> WorkflowView {
    let mut levels: Vec<&ApprovalLevel> = levels.iter().collect();
    levels.sort_by_key(|l| l.level);

    let mut steps = vec![WorkflowStep {
        id: "created".to_string(),
        kind: StepKind::System,
        title: "Claim Created".to_string(),
        description: "Claim created".to_string(),
        level: 0,
        status: StepStatus::Completed,
        outcome: Some(ClaimStatus::Draft),
        completed_at: Some(claim.created_at),
        comments: None,
        approver_id: None,
        approved_by: Some(claim.user_id),
        permissions: None,
    }];

    if claim.status != ClaimStatus::Draft {
        let submitted_at = history
            .iter()
            .filter(|a| a.status == ClaimStatus::Submitted)
            .map(|a| a.created_at)
            .max()
            .unwrap_or(claim.updated_at);
        steps.push(WorkflowStep {
            id: "submitted".to_string(),
            kind: StepKind::System,
            title: "Submitted for Approval".to_string(),
            description: "Claim submitted to approval workflow".to_string(),
            level: 0,
            status: StepStatus::Completed,
            outcome: Some(ClaimStatus::Submitted),
            completed_at: Some(submitted_at),
            comments: None,
            approver_id: None,
            approved_by: Some(claim.user_id),
            permissions: None,
        });
    }

    for level in &levels {
        let decision = latest_for_level(history, level.id);
        let status = match (decision, claim.status) {
            (Some(_), _) => StepStatus::Completed,
            (None, ClaimStatus::Draft) => StepStatus::NotStarted,
            (None, ClaimStatus::Submitted) => StepStatus::Pending,
            (None, _) => StepStatus::NotReached,
        };
        steps.push(WorkflowStep {
            id: level.id.to_string(),
            kind: StepKind::Approval,
            title: format!("Level {} Approval", level.level),
            description: format!("Level {} approval required", level.level),
            level: level.level,
            status,
            outcome: decision.map(|a| a.status),
            completed_at: decision.map(|a| a.created_at),
            comments: decision.and_then(|a| a.comments.clone()),
            approver_id: Some(level.approver_id),
            approved_by: decision.map(|a| a.approver_id),
            permissions: Some(level.capabilities()),
        });
    }

    let total_steps = steps.len();
    let completed_steps = steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .count();
    let progress = completed_steps as f64 / total_steps as f64 * 100.0;
    let current_step = steps
        .iter()
        .find(|s| s.status == StepStatus::Pending)
        .cloned();

    WorkflowView {
        claim_id: claim.id,
        status: claim.status,
        next_actions: next_actions(claim.status, &levels, history),
        steps,
        progress,
        completed_steps,
        total_steps,
        current_step,
    }
}

fn next_actions(
    status: ClaimStatus,
    levels: &[&ApprovalLevel],
    history: &[ClaimApproval],
) -> Vec<NextAction> {
    let mut actions = Vec::new();

    match status {
        ClaimStatus::Draft => {
            actions.push(NextAction::new(WorkflowAction::Submit, None));
            actions.push(NextAction::new(WorkflowAction::Edit, None));
            actions.push(NextAction::new(WorkflowAction::Cancel, None));
        }
        ClaimStatus::Submitted => {
            // Only the first level without a recorded decision
            let next = levels
                .iter()
                .find(|l| latest_for_level(history, l.id).is_none());
            if let Some(level) = next {
                if level.can_approve {
                    actions.push(NextAction::new(WorkflowAction::Approve, Some(level.id)));
                }
                if level.can_reject {
                    actions.push(NextAction::new(WorkflowAction::Reject, Some(level.id)));
                    actions.push(NextAction::new(WorkflowAction::RequestChanges, Some(level.id)));
                }
            }
        }
        ClaimStatus::Approved => {
            for level in levels {
                if level.can_set_payment_in_progress {
                    actions.push(NextAction::new(
                        WorkflowAction::SetPaymentInProgress,
                        Some(level.id),
                    ));
                }
                if level.can_set_paid {
                    actions.push(NextAction::new(WorkflowAction::SetPaid, Some(level.id)));
                }
            }
        }
        ClaimStatus::PaymentInProgress => {
            for level in levels.iter().filter(|l| l.can_set_paid) {
                actions.push(NextAction::new(WorkflowAction::SetPaid, Some(level.id)));
            }
        }
        ClaimStatus::Rejected | ClaimStatus::Paid => {}
    }

    actions
}
