//! Input validation for donor profiles.
//!
//! These checks run at the edge, before a registration or update is handed to
//! the identity resolver.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::{ProfileInput, ProfileUpdate};

/// Minimum number of characters in a donor name.
pub const MIN_NAME_LENGTH: usize = 3;

/// Iraqi mobile numbers: `07` followed by nine digits.
const PHONE_PATTERN: &str = r"^07[0-9]{9}$";

/// 24-hour `HH:MM`.
const TIME_PATTERN: &str = r"^([01][0-9]|2[0-3]):[0-5][0-9]$";

/// A single validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name shorter than [`MIN_NAME_LENGTH`].
    #[error("name must be at least {MIN_NAME_LENGTH} characters")]
    NameTooShort,

    /// Phone number is not an Iraqi mobile number.
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// A contact window bound is not `HH:MM`.
    #[error("invalid time for {field}: {value}")]
    InvalidTime {
        /// Which field carried the bad value.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A required text field is blank.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl ValidationError {
    /// Localized message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NameTooShort => "الاسم يجب أن يكون 3 أحرف على الأقل",
            Self::InvalidPhone(_) => "رقم الهاتف غير صحيح (مثال: 07901234567)",
            Self::InvalidTime { .. } => "صيغة الوقت غير صحيحة",
            Self::Empty(_) => "يرجى ملء جميع الحقول المطلوبة",
        }
    }
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PHONE_PATTERN).expect("phone pattern is valid"))
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TIME_PATTERN).expect("time pattern is valid"))
}

/// Check whether `phone` is a valid Iraqi mobile number.
#[must_use]
pub fn is_valid_phone(phone: &str) -> bool {
    phone_regex().is_match(phone.trim())
}

fn check_name(name: &str, errors: &mut Vec<ValidationError>) {
    if name.trim().chars().count() < MIN_NAME_LENGTH {
        errors.push(ValidationError::NameTooShort);
    }
}

fn check_phone(phone: &str, errors: &mut Vec<ValidationError>) {
    if !is_valid_phone(phone) {
        errors.push(ValidationError::InvalidPhone(phone.trim().to_string()));
    }
}

fn check_required(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.trim().is_empty() {
        errors.push(ValidationError::Empty(field));
    }
}

fn check_time(field: &'static str, value: Option<&str>, errors: &mut Vec<ValidationError>) {
    if let Some(value) = value {
        if !time_regex().is_match(value) {
            errors.push(ValidationError::InvalidTime {
                field,
                value: value.to_string(),
            });
        }
    }
}

/// Validate a registration payload, collecting every failure.
///
/// # Errors
///
/// Returns all validation failures found.
pub fn validate_input(input: &ProfileInput) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_name(&input.name, &mut errors);
    check_phone(&input.phone, &mut errors);
    check_required("governorate", &input.governorate, &mut errors);
    check_required("city", &input.city, &mut errors);
    check_time("morning_from", input.morning_from.as_deref(), &mut errors);
    check_time("morning_to", input.morning_to.as_deref(), &mut errors);
    check_time("evening_from", input.evening_from.as_deref(), &mut errors);
    check_time("evening_to", input.evening_to.as_deref(), &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the fields a partial update carries.
///
/// # Errors
///
/// Returns all validation failures found.
pub fn validate_update(update: &ProfileUpdate) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if let Some(name) = &update.name {
        check_name(name, &mut errors);
    }
    if let Some(phone) = &update.phone {
        check_phone(phone, &mut errors);
    }
    if let Some(governorate) = &update.governorate {
        check_required("governorate", governorate, &mut errors);
    }
    if let Some(city) = &update.city {
        check_required("city", city, &mut errors);
    }
    check_time(
        "morning_from",
        update.morning_from.as_ref().and_then(Option::as_deref),
        &mut errors,
    );
    check_time(
        "morning_to",
        update.morning_to.as_ref().and_then(Option::as_deref),
        &mut errors,
    );
    check_time(
        "evening_from",
        update.evening_from.as_ref().and_then(Option::as_deref),
        &mut errors,
    );
    check_time(
        "evening_to",
        update.evening_to.as_ref().and_then(Option::as_deref),
        &mut errors,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
