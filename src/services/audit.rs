//! Best-effort audit trail

use crate::db::ClaimStore;
use crate::models::AuditLog;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    Submit,
    Login,
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Approve => "approve",
            AuditAction::Reject => "reject",
            AuditAction::Submit => "submit",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
        }
    }
}

pub mod entity {
    pub const CLAIM: &str = "claim";
    pub const USER: &str = "user";
    pub const USER_GROUP: &str = "user_group";
    pub const CLAIM_TYPE: &str = "claim_type";
    pub const APPROVAL_LEVEL: &str = "approval_level";
    pub const USER_CLAIM_BALANCE: &str = "user_claim_balance";
}

/// Where a request came from
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    action: AuditAction,
    entity_type: &'static str,
    entity_id: Option<Uuid>,
    user_id: Option<Uuid>,
    old_values: Option<Value>,
    new_values: Option<Value>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, entity_type: &'static str, entity_id: Option<Uuid>) -> Self {
        Self {
            action,
            entity_type,
            entity_id,
            user_id: None,
            old_values: None,
            new_values: None,
        }
    }

    pub fn by(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn old(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Append an audit row. Failures are logged and swallowed.
pub async fn log_audit(store: &dyn ClaimStore, ctx: &AuditContext, record: AuditRecord) {
    let entry = AuditLog {
        id: Uuid::new_v4(),
        user_id: record.user_id,
        action: record.action.as_str().to_string(),
        entity_type: record.entity_type.to_string(),
        entity_id: record.entity_id,
        old_values: record.old_values,
        new_values: record.new_values,
        ip_address: ctx.ip_address.clone(),
        user_agent: ctx.user_agent.clone(),
        created_at: Utc::now(),
    };

    if let Err(e) = store.insert_audit_log(entry).await {
        tracing::warn!(
            "Failed to write audit log for {} {}: {}",
            record.action.as_str(),
            record.entity_type,
            e
        );
    }
}
