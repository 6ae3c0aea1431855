//! Data models for the application

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "claim_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ClaimStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    PaymentInProgress,
    Paid,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Draft => "draft",
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::PaymentInProgress => "payment-in-progress",
            ClaimStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Normal,
    Admin,
}

/// Period after which a spending balance starts over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "limit_timespan", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LimitTimespan {
    Daily,
    Weekly,
    Monthly,
    Annual,
}

// =============================================================================
// User & Group
// =============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub user_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub user_group_id: Option<Uuid>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            user_group_id: user.user_group_id,
        }
    }
}

/// Account created by an administrator
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 1024))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub user_group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserGroup {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignGroupRequest {
    pub user_group_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

// =============================================================================
// Claim Type
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClaimType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub limit_amount: Decimal,
    pub limit_timespan: LimitTimespan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClaimType {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub limit_amount: Decimal,
    pub limit_timespan: LimitTimespan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateClaimTypeLimit {
    pub limit_amount: Decimal,
    pub limit_timespan: LimitTimespan,
}

// =============================================================================
// Approval Level
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovalLevel {
    pub id: Uuid,
    pub user_group_id: Uuid,
    pub level: i32,
    pub approver_id: Uuid,
    pub can_draft: bool,
    pub can_submit: bool,
    pub can_approve: bool,
    pub can_reject: bool,
    pub can_set_payment_in_progress: bool,
    pub can_set_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalLevel {
    pub fn capabilities(&self) -> LevelCapabilities {
        LevelCapabilities {
            can_draft: self.can_draft,
            can_submit: self.can_submit,
            can_approve: self.can_approve,
            can_reject: self.can_reject,
            can_set_payment_in_progress: self.can_set_payment_in_progress,
            can_set_paid: self.can_set_paid,
        }
    }

    pub fn apply_capabilities(&mut self, caps: LevelCapabilities) {
        self.can_draft = caps.can_draft;
        self.can_submit = caps.can_submit;
        self.can_approve = caps.can_approve;
        self.can_reject = caps.can_reject;
        self.can_set_payment_in_progress = caps.can_set_payment_in_progress;
        self.can_set_paid = caps.can_set_paid;
    }
}

/// The six independent status permissions an approval level may grant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCapabilities {
    #[serde(default)]
    pub can_draft: bool,
    #[serde(default)]
    pub can_submit: bool,
    #[serde(default)]
    pub can_approve: bool,
    #[serde(default)]
    pub can_reject: bool,
    #[serde(default)]
    pub can_set_payment_in_progress: bool,
    #[serde(default)]
    pub can_set_paid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApprovalLevel {
    pub approver_id: Uuid,
    #[serde(flatten)]
    pub capabilities: LevelCapabilities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateApprovalLevel {
    pub approver_id: Option<Uuid>,
    #[serde(flatten)]
    pub capabilities: LevelCapabilities,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LevelOrder {
    pub id: Uuid,
    pub level: i32,
}

// =============================================================================
// Claim
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Claim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub claim_type_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClaim {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub amount: Decimal,
    pub claim_type_id: Uuid,
}

/// Draft edits; the claim type may change as long as the new amount still fits
pub type UpdateClaim = CreateClaim;

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub status: ClaimStatus,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub approval_level_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClaimApproval {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub approval_level_id: Option<Uuid>,
    pub approver_id: Uuid,
    pub status: ClaimStatus,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimResponse {
    #[serde(flatten)]
    pub claim: Claim,
    pub approvals: Vec<ClaimApproval>,
}

// =============================================================================
// Overrides
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserGroupClaimType {
    pub id: Uuid,
    pub user_group_id: Uuid,
    pub claim_type_id: Uuid,
    pub is_allowed: bool,
    pub custom_limit_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserClaimType {
    pub id: Uuid,
    pub user_id: Uuid,
    pub claim_type_id: Uuid,
    pub is_allowed: bool,
    pub custom_limit_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// One row of a bulk override replacement
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub claim_type_id: Uuid,
    pub is_allowed: bool,
    #[serde(default)]
    pub custom_limit_amount: Option<Decimal>,
}

// =============================================================================
// Balance
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserClaimBalance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub claim_type_id: Uuid,
    pub total_limit: Decimal,
    pub current_spent: Decimal,
    pub remaining_balance: Decimal,
    pub last_reset_date: DateTime<Utc>,
    pub reset_period: LimitTimespan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckClaimRequest {
    pub claim_type_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimCheck {
    pub can_claim: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustBalanceRequest {
    pub user_id: Uuid,
    pub claim_type_id: Uuid,
    pub new_limit: Decimal,
}

// =============================================================================
// Audit Log
// =============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// API Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            message: None,
        }
    }
}
