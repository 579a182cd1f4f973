use std::borrow::Cow;

use chrono::{Datelike, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rocket::FromForm;
use serde::Deserialize;
use validator::{Validate, ValidationError};

static SCHOOL_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{4})$").expect("school year pattern compiles"));

static LRN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{12}$").expect("LRN pattern compiles"));

static CONTACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,19}$").expect("contact pattern compiles"));

/// One enrollment submission, shared by the JSON endpoint and the browser form.
/// Only the two names and the grade level are required.
#[derive(Deserialize, Validate, FromForm, Clone, Default)]
pub struct StudentApplication {
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(max = 100, message = "Middle name is too long"))]
    pub middle_name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub last_name: String,
    #[validate(length(max = 10, message = "Suffix is too long"))]
    pub suffix: Option<String>,
    #[validate(custom(function = "validate_lrn"))]
    pub lrn: Option<String>,
    #[validate(custom(function = "validate_birthdate"))]
    pub birthdate: Option<String>,
    #[validate(length(max = 20, message = "Gender is too long"))]
    pub gender: Option<String>,
    #[validate(length(max = 255, message = "Address is too long"))]
    pub address: Option<String>,
    #[validate(range(min = 0, max = 6, message = "Grade level must be between 0 and 6"))]
    pub grade_level: i64,
    #[validate(custom(function = "validate_school_year"))]
    pub school_year: Option<String>,
    #[validate(length(max = 100, message = "Guardian name is too long"))]
    pub guardian_name: Option<String>,
    #[validate(custom(function = "validate_contact"))]
    pub guardian_contact: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(min = 3, max = 50, message = "Username must be 3 to 50 characters"))]
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl StudentApplication {
    /// Trims every text field and turns blank optional fields into `None`.
    /// Passwords are left untouched apart from blank detection.
    pub fn normalized(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            middle_name: blank_to_none(self.middle_name),
            last_name: self.last_name.trim().to_string(),
            suffix: blank_to_none(self.suffix),
            lrn: blank_to_none(self.lrn),
            birthdate: blank_to_none(self.birthdate),
            gender: blank_to_none(self.gender),
            address: blank_to_none(self.address),
            grade_level: self.grade_level,
            school_year: blank_to_none(self.school_year),
            guardian_name: blank_to_none(self.guardian_name),
            guardian_contact: blank_to_none(self.guardian_contact),
            email: blank_to_none(self.email),
            username: blank_to_none(self.username),
            password: self.password.filter(|p| !p.is_empty()),
            confirm_password: self.confirm_password.filter(|p| !p.is_empty()),
        }
    }

    pub fn birthdate(&self) -> Option<NaiveDate> {
        self.birthdate
            .as_deref()
            .and_then(|b| NaiveDate::parse_from_str(b, "%Y-%m-%d").ok())
    }
}

/// `2026-2027` for any date on or after the start month of 2026.
pub fn school_year_for(date: NaiveDate, start_month: u32) -> String {
    let start = if date.month() >= start_month {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}-{}", start, start + 1)
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

pub fn validate_school_year(value: &str) -> Result<(), ValidationError> {
    let message = "School year must look like 2025-2026";
    let captures = SCHOOL_YEAR_RE
        .captures(value)
        .ok_or_else(|| invalid("school_year", message))?;

    let start: i32 = captures[1].parse().map_err(|_| invalid("school_year", message))?;
    let end: i32 = captures[2].parse().map_err(|_| invalid("school_year", message))?;

    if end != start + 1 {
        return Err(invalid(
            "school_year",
            "School year must span two consecutive years",
        ));
    }

    Ok(())
}

pub fn validate_lrn(value: &str) -> Result<(), ValidationError> {
    if LRN_RE.is_match(value) {
        Ok(())
    } else {
        Err(invalid("lrn", "LRN must be exactly 12 digits"))
    }
}

pub fn validate_contact(value: &str) -> Result<(), ValidationError> {
    if CONTACT_RE.is_match(value) {
        Ok(())
    } else {
        Err(invalid("guardian_contact", "Invalid contact number"))
    }
}

pub fn validate_birthdate(value: &str) -> Result<(), ValidationError> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| invalid("birthdate", "Birthdate must be a YYYY-MM-DD date"))?;

    if date > Local::now().date_naive() {
        return Err(invalid("birthdate", "Birthdate cannot be in the future"));
    }

    Ok(())
}
