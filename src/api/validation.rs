//! Input validation for API requests.
//!
//! Validators return `Err(message)` and are collected per field with the
//! `ValidationErrorBuilder` from the `error` module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use super::error::ApiError;

lazy_static! {
    /// Deliberately loose: something@something.tld
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();

    /// `YYYY-MM-DD`
    static ref DATE_REGEX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one digit".to_string());
    }

    Ok(())
}

/// Validate a required text field of bounded length
pub fn validate_required(value: &str, label: &str, max: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", label));
    }

    if value.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }

    Ok(())
}

/// Validate an optional text field of bounded length
pub fn validate_optional(value: &Option<String>, label: &str, max: usize) -> Result<(), String> {
    if let Some(v) = value {
        if v.chars().count() > max {
            return Err(format!("{} is too long (max {} characters)", label, max));
        }
    }

    Ok(())
}

/// Validate an integer within an inclusive range
pub fn validate_range(value: i64, label: &str, min: i64, max: i64) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("{} must be between {} and {}", label, min, max));
    }

    Ok(())
}

/// Validate an optional non-negative quantity
pub fn validate_non_negative(value: Option<f64>, label: &str) -> Result<(), String> {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            return Err(format!("{} must be a non-negative number", label));
        }
    }

    Ok(())
}

/// Validate a `YYYY-MM-DD` date
pub fn validate_date(date: &str) -> Result<(), String> {
    if !DATE_REGEX.is_match(date) || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err("Date must be a valid YYYY-MM-DD date".to_string());
    }

    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Validate a path/query id, as an `ApiError`
pub fn require_uuid(id: &str, field_name: &str) -> Result<(), ApiError> {
    validate_uuid(id, field_name).map_err(|e| ApiError::validation_field(field_name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ana@gym.example").is_ok());
        assert!(validate_email("a.b+c@sub.example.org").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("ana").is_err());
        assert!(validate_email("ana@gym").is_err());
        assert!(validate_email("an a@gym.example").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("squat4life").is_ok());

        assert!(validate_password("short1").is_err());
        assert!(validate_password("onlyletters").is_err());
        assert!(validate_password("12345678").is_err());
    }

    #[test]
    fn test_validate_required() {
        assert!(validate_required("Yoga", "Name", 100).is_ok());
        assert!(validate_required("   ", "Name", 100).is_err());
        assert!(validate_required(&"x".repeat(101), "Name", 100).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(1, "Capacity", 1, 500).is_ok());
        assert!(validate_range(500, "Capacity", 1, 500).is_ok());
        assert!(validate_range(0, "Capacity", 1, 500).is_err());
        assert!(validate_range(501, "Capacity", 1, 500).is_err());
    }

    #[test]
    fn test_validate_non_negative() {
        assert!(validate_non_negative(None, "Protein").is_ok());
        assert!(validate_non_negative(Some(0.0), "Protein").is_ok());
        assert!(validate_non_negative(Some(-1.0), "Protein").is_err());
        assert!(validate_non_negative(Some(f64::NAN), "Protein").is_err());
    }

    #[test]
    fn test_validate_date() {
        assert!(validate_date("2026-03-01").is_ok());
        assert!(validate_date("2026-02-30").is_err());
        assert!(validate_date("01/03/2026").is_err());
        assert!(validate_date("").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "trainer_id").is_ok());
        assert!(validate_uuid("", "trainer_id").is_err());
        assert!(validate_uuid("not-a-uuid", "trainer_id").is_err());
    }
}
