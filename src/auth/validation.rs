use lazy_static::lazy_static;
use regex::Regex;

use crate::auth::repo_types::User;
use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref PHONE_RE: Regex = Regex::new(r"^\+(?:[0-9] ?){6,14}[0-9]$").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9._-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Trims the value; empty and whitespace-only values count as absent.
pub fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Emails compare case-insensitively; anything without an `@` (a phone
/// number) is left as typed.
pub fn normalize_email(value: &str) -> String {
    if value.contains('@') {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

/// Returns the trimmed value or a "`{field}` field is required" error.
pub fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    present(value).ok_or_else(|| AppError::Validation(format!("{field} field is required")))
}

pub fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Validates a contact pair; at least one must be given.
pub fn check_contact(email: Option<&str>, phone: Option<&str>) -> Result<(), AppError> {
    if email.is_none() && phone.is_none() {
        return Err(AppError::validation("Email or Phone number are required"));
    }
    if let Some(phone) = phone {
        if !is_valid_phone(phone) {
            return Err(AppError::validation("Invalid phone number"));
        }
    }
    if let Some(email) = email {
        if !is_valid_email(email) {
            return Err(AppError::validation("Invalid email"));
        }
    }
    Ok(())
}

/// Conflict message when any of `existing` already holds the phone or the
/// email. Which record holds which does not matter.
pub fn duplicate_conflict(existing: &[User], phone: Option<&str>, email: Option<&str>) -> Option<&'static str> {
    let phone_taken = phone.is_some_and(|p| existing.iter().any(|u| u.phone.as_deref() == Some(p)));
    let email_taken = email.is_some_and(|e| existing.iter().any(|u| u.email.as_deref() == Some(e)));
    match (phone_taken, email_taken) {
        (true, true) => Some("Email and Phone Number Already exist. Please login now"),
        (true, false) => Some("Phone Number already exists. Please login now"),
        (false, true) => Some("Email already exists. Please login now"),
        (false, false) => None,
    }
}
