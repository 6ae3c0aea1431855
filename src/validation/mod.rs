//! Input validation module

use crate::models::{CreateClaim, LevelOrder, OverrideEntry};
use rust_decimal::Decimal;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Largest amount a single claim or limit may carry
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(999_999_999, 0, 0, false, 0);

/// Money columns are NUMERIC(12,2)
pub const MONEY_DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' is too long (max {max} characters)")]
    TooLong { field: String, max: usize },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Field '{field}' must be greater than zero")]
    NotPositive { field: String },

    #[error("Field '{field}' must not be negative")]
    Negative { field: String },

    #[error("Field '{field}' allows at most {places} decimal places")]
    TooPrecise { field: String, places: u32 },

    #[error("Field '{field}' exceeds the maximum of {max}")]
    TooLarge { field: String, max: Decimal },

    #[error("Claim type {0} appears more than once")]
    DuplicateClaimType(Uuid),

    #[error("Approval level order must assign levels 1..={expected} exactly once")]
    InvalidLevelOrder { expected: usize },
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
        fields.sort_unstable();
        ValidationError::Invalid(fields.join(", "))
    }
}

/// Validate a claim creation or draft update request
pub fn validate_create_claim(input: &CreateClaim) -> Result<(), ValidationError> {
    if input.title.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "title".to_string(),
        });
    }
    input.validate()?;
    validate_amount("amount", input.amount)
}

/// Trailing zeros are fine, "10.500" is two places
fn check_precision(field: &str, value: Decimal) -> Result<(), ValidationError> {
    if value.normalize().scale() > MONEY_DECIMAL_PLACES {
        return Err(ValidationError::TooPrecise {
            field: field.to_string(),
            places: MONEY_DECIMAL_PLACES,
        });
    }
    Ok(())
}

/// A monetary amount that must be strictly positive
pub fn validate_amount(field: &str, amount: Decimal) -> Result<(), ValidationError> {
    check_precision(field, amount)?;
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NotPositive {
            field: field.to_string(),
        });
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::TooLarge {
            field: field.to_string(),
            max: MAX_AMOUNT,
        });
    }
    Ok(())
}

/// A spending limit, where zero is a legitimate "nothing allowed" value
pub fn validate_limit(field: &str, limit: Decimal) -> Result<(), ValidationError> {
    check_precision(field, limit)?;
    if limit < Decimal::ZERO {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    if limit > MAX_AMOUNT {
        return Err(ValidationError::TooLarge {
            field: field.to_string(),
            max: MAX_AMOUNT,
        });
    }
    Ok(())
}

/// Validate a bulk override replacement payload
pub fn validate_override_entries(entries: &[OverrideEntry]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.claim_type_id) {
            return Err(ValidationError::DuplicateClaimType(entry.claim_type_id));
        }
        if let Some(limit) = entry.custom_limit_amount {
            validate_limit("custom_limit_amount", limit)?;
        }
    }
    Ok(())
}

/// A reorder must cover exactly the group's levels and number them 1..=n
pub fn validate_level_order(
    orders: &[LevelOrder],
    existing: &[Uuid],
) -> Result<(), ValidationError> {
    let expected = existing.len();
    let invalid = || ValidationError::InvalidLevelOrder { expected };

    if orders.len() != expected {
        return Err(invalid());
    }

    let ids: HashSet<Uuid> = orders.iter().map(|o| o.id).collect();
    let existing_ids: HashSet<Uuid> = existing.iter().copied().collect();
    if ids != existing_ids {
        return Err(invalid());
    }

    let mut levels: Vec<i32> = orders.iter().map(|o| o.level).collect();
    levels.sort_unstable();
    let dense = levels
        .iter()
        .enumerate()
        .all(|(i, level)| *level == i as i32 + 1);
    if !dense {
        return Err(invalid());
    }

    Ok(())
}

/// Validate login credentials shape before touching the store
pub fn validate_login(email: &str, password: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "email".to_string(),
        });
    }
    if !is_valid_email(email.trim()) {
        return Err(ValidationError::InvalidEmail);
    }
    if password.is_empty() {
        return Err(ValidationError::Required {
            field: "password".to_string(),
        });
    }
    if password.len() > 1024 {
        return Err(ValidationError::TooLong {
            field: "password".to_string(),
            max: 1024,
        });
    }
    Ok(())
}

/// Simple email validation
fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let (local, domain) = (parts[0], parts[1]);

    !local.is_empty() && !domain.is_empty() && domain.contains('.') && domain.len() > 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn claim(title: &str, amount: Decimal) -> CreateClaim {
        CreateClaim {
            title: title.to_string(),
            description: None,
            amount,
            claim_type_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email("user.name@domain.nl"));
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("@domain.com"));
        assert!(!is_valid_email("user@"));
    }

    #[test]
    fn test_validate_create_claim_valid() {
        assert!(validate_create_claim(&claim("Train to Utrecht", dec!(42.50))).is_ok());
    }

    #[test]
    fn test_validate_create_claim_blank_title() {
        assert!(matches!(
            validate_create_claim(&claim("   ", dec!(10))),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_validate_create_claim_title_too_long() {
        let title = "x".repeat(256);
        assert!(matches!(
            validate_create_claim(&claim(&title, dec!(10))),
            Err(ValidationError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_create_claim_zero_amount() {
        assert!(matches!(
            validate_create_claim(&claim("Lunch", Decimal::ZERO)),
            Err(ValidationError::NotPositive { .. })
        ));
        assert!(matches!(
            validate_create_claim(&claim("Lunch", dec!(-5))),
            Err(ValidationError::NotPositive { .. })
        ));
    }

    #[test]
    fn test_money_allows_two_decimal_places() {
        assert!(validate_amount("amount", dec!(10.05)).is_ok());
        assert!(validate_amount("amount", dec!(10.500)).is_ok());
        assert!(matches!(
            validate_amount("amount", dec!(0.004)),
            Err(ValidationError::TooPrecise { places: 2, .. })
        ));
        assert!(matches!(
            validate_amount("amount", dec!(10.005)),
            Err(ValidationError::TooPrecise { .. })
        ));
        assert!(matches!(
            validate_limit("limit_amount", dec!(99.999)),
            Err(ValidationError::TooPrecise { .. })
        ));
        assert!(matches!(
            validate_create_claim(&claim("Parking", dec!(3.141))),
            Err(ValidationError::TooPrecise { .. })
        ));
    }

    #[test]
    fn test_validate_limit_allows_zero() {
        assert!(validate_limit("new_limit", Decimal::ZERO).is_ok());
        assert!(matches!(
            validate_limit("new_limit", dec!(-0.01)),
            Err(ValidationError::Negative { .. })
        ));
        assert!(matches!(
            validate_limit("new_limit", MAX_AMOUNT + Decimal::ONE),
            Err(ValidationError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_override_entries_duplicate() {
        let type_id = Uuid::new_v4();
        let entry = OverrideEntry {
            claim_type_id: type_id,
            is_allowed: true,
            custom_limit_amount: None,
        };
        assert!(validate_override_entries(&[entry]).is_ok());
        assert!(matches!(
            validate_override_entries(&[entry, entry]),
            Err(ValidationError::DuplicateClaimType(id)) if id == type_id
        ));
    }

    #[test]
    fn test_validate_override_entries_negative_limit() {
        let entry = OverrideEntry {
            claim_type_id: Uuid::new_v4(),
            is_allowed: true,
            custom_limit_amount: Some(dec!(-1)),
        };
        assert!(matches!(
            validate_override_entries(&[entry]),
            Err(ValidationError::Negative { .. })
        ));
    }

    #[test]
    fn test_validate_level_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let existing = [a, b, c];

        let swap = [
            LevelOrder { id: a, level: 3 },
            LevelOrder { id: b, level: 1 },
            LevelOrder { id: c, level: 2 },
        ];
        assert!(validate_level_order(&swap, &existing).is_ok());

        let gap = [
            LevelOrder { id: a, level: 1 },
            LevelOrder { id: b, level: 2 },
            LevelOrder { id: c, level: 4 },
        ];
        assert!(validate_level_order(&gap, &existing).is_err());

        let missing = [LevelOrder { id: a, level: 1 }, LevelOrder { id: b, level: 2 }];
        assert!(validate_level_order(&missing, &existing).is_err());

        let foreign = [
            LevelOrder { id: a, level: 1 },
            LevelOrder { id: b, level: 2 },
            LevelOrder {
                id: Uuid::new_v4(),
                level: 3,
            },
        ];
        assert!(validate_level_order(&foreign, &existing).is_err());
    }

    #[test]
    fn test_validate_login() {
        assert!(validate_login("anna@example.com", "secret").is_ok());
        assert!(matches!(
            validate_login("", "secret"),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_login("anna", "secret"),
            Err(ValidationError::InvalidEmail)
        ));
        assert!(matches!(
            validate_login("anna@example.com", ""),
            Err(ValidationError::Required { .. })
        ));
    }
}
