//! Claim lifecycle and balance services

pub mod admin;
pub mod approval_levels;
pub mod audit;
pub mod balance;
pub mod claims;
pub mod overrides;
pub mod permissions;
pub mod workflow;

#[cfg(test)]
pub(crate) mod fixtures;

pub use admin::AdminService;
pub use approval_levels::ApprovalLevelAdmin;
pub use audit::{AuditAction, AuditContext};
pub use balance::BalanceEngine;
pub use claims::ClaimService;
pub use overrides::OverrideAdmin;
pub use permissions::{EffectivePermission, PermissionResolver};
pub use workflow::WorkflowView;
