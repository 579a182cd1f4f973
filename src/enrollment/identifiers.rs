//! Usernames, emails, student ids and initial passwords for new students.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::db::{email_taken, emails_with_prefix, username_taken, usernames_with_prefix};
use crate::error::AppError;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const GENERATED_PASSWORD_LEN: usize = 12;

const EMAIL_SUFFIX_ATTEMPTS: u32 = 100;
const EMAIL_RANDOM_ATTEMPTS: u32 = 50;
const EMAIL_TOKEN_LEN: usize = 8;
const USERNAME_SUFFIX_ATTEMPTS: u32 = 100;
const USERNAME_RANDOM_ATTEMPTS: u32 = 50;

const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#$%&*?";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9\-]+(\.[a-z0-9\-]+)+$").expect("email pattern compiles")
});

/// Lowercases a name part, folds common Latin accents and drops anything
/// that is not ASCII alphanumeric. `"Dela Cruz"` becomes `"delacruz"`.
pub fn fold_name(part: &str) -> String {
    part.chars()
        .flat_map(char::to_lowercase)
        .filter_map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' => Some('e'),
            'í' | 'ì' | 'î' | 'ï' => Some('i'),
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => Some('o'),
            'ú' | 'ù' | 'û' | 'ü' => Some('u'),
            'ñ' => Some('n'),
            'ç' => Some('c'),
            c if c.is_ascii_alphanumeric() => Some(c),
            _ => None,
        })
        .collect()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// `first.last`, or whichever half survives folding.
pub fn email_local_part(first_name: &str, last_name: &str) -> String {
    let first = fold_name(first_name);
    let last = fold_name(last_name);

    match (first.is_empty(), last.is_empty()) {
        (false, false) => format!("{first}.{last}"),
        (false, true) => first,
        (true, false) => last,
        (true, true) => "student".to_string(),
    }
}

/// First initial plus surname. When that is too short, the first three
/// letters of the first name plus surname. Empty if neither reaches the
/// minimum length.
pub fn username_base(first_name: &str, last_name: &str) -> String {
    let first = fold_name(first_name);
    let last = fold_name(last_name);

    let initial: String = first.chars().take(1).collect();
    let base = format!("{initial}{last}");
    if base.len() >= MIN_USERNAME_LEN {
        return base;
    }

    let fallback = format!("{}{last}", first.chars().take(3).collect::<String>());
    if fallback.len() >= MIN_USERNAME_LEN {
        return fallback;
    }

    String::new()
}

/// `base`, then `base1`, `base2`, ... up to `max_attempts` suffixes.
pub fn first_available<F>(taken: &HashSet<String>, max_attempts: u32, candidate: F) -> Option<String>
where
    F: Fn(Option<u32>) -> String,
{
    std::iter::once(None)
        .chain((1..=max_attempts).map(Some))
        .map(candidate)
        .find(|c| !taken.contains(c))
}

pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| PASSWORD_CHARSET[rng.random_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

pub fn format_student_id(year: i32, sequence: i64) -> String {
    format!("ST-{year}-{sequence:04}")
}

/// The password to store and whether the caller must be told about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordPlan {
    Supplied(String),
    Generated(String),
}

impl PasswordPlan {
    pub fn secret(&self) -> &str {
        match self {
            PasswordPlan::Supplied(p) | PasswordPlan::Generated(p) => p,
        }
    }

    pub fn generated(&self) -> Option<&str> {
        match self {
            PasswordPlan::Generated(p) => Some(p),
            PasswordPlan::Supplied(_) => None,
        }
    }
}

/// Applies the password policy. Blank input means "generate one".
pub fn plan_password(
    password: Option<&str>,
    confirmation: Option<&str>,
) -> Result<PasswordPlan, AppError> {
    let password = password.filter(|p| !p.is_empty());
    let confirmation = confirmation.filter(|p| !p.is_empty());

    match password {
        None if confirmation.is_none() => Ok(PasswordPlan::Generated(generate_password())),
        None => Err(AppError::Validation("Passwords do not match".to_string())),
        Some(p) if p.chars().count() < MIN_PASSWORD_LEN => Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ))),
        Some(p) if confirmation != Some(p) => {
            Err(AppError::Validation("Passwords do not match".to_string()))
        }
        Some(p) => Ok(PasswordPlan::Supplied(p.to_string())),
    }
}

#[instrument(skip(conn))]
pub async fn resolve_email(
    conn: &mut SqliteConnection,
    supplied: Option<&str>,
    first_name: &str,
    last_name: &str,
    domain: &str,
) -> Result<String, AppError> {
    if let Some(email) = supplied.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty()) {
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }
        if email_taken(conn, &email).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }
        return Ok(email);
    }

    let local = email_local_part(first_name, last_name);
    let taken = emails_with_prefix(conn, &local, domain).await?;

    if let Some(email) = first_available(&taken, EMAIL_SUFFIX_ATTEMPTS, |n| match n {
        None => format!("{local}@{domain}"),
        Some(n) => format!("{local}{n}@{domain}"),
    }) {
        info!(email = %email, "Derived student email");
        return Ok(email);
    }

    warn!(local = %local, "Email suffixes exhausted, using random token");
    for _ in 0..EMAIL_RANDOM_ATTEMPTS {
        let candidate = format!("{local}.{}@{domain}", random_token(EMAIL_TOKEN_LEN));
        if !email_taken(conn, &candidate).await? {
            return Ok(candidate);
        }
    }

    Err(AppError::Internal("Unable to generate a unique email".to_string()))
}

#[instrument(skip(conn))]
pub async fn resolve_username(
    conn: &mut SqliteConnection,
    supplied: Option<&str>,
    first_name: &str,
    last_name: &str,
) -> Result<String, AppError> {
    if let Some(username) = supplied.map(|u| u.trim().to_lowercase()).filter(|u| !u.is_empty()) {
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(AppError::Validation(format!(
                "Username must be at least {MIN_USERNAME_LEN} characters"
            )));
        }
        if username_taken(conn, &username).await? {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        return Ok(username);
    }

    let base = username_base(first_name, last_name);
    if !base.is_empty() {
        let taken = usernames_with_prefix(conn, &base).await?;
        if let Some(username) = first_available(&taken, USERNAME_SUFFIX_ATTEMPTS, |n| match n {
            None => base.clone(),
            Some(n) => format!("{base}{n}"),
        }) {
            info!(username = %username, "Derived student username");
            return Ok(username);
        }
    }

    warn!(base = %base, "No derived username available, trying random fallback");
    for _ in 0..USERNAME_RANDOM_ATTEMPTS {
        let candidate = format!("stu{}", rand::rng().random_range(100_000..1_000_000));
        if !username_taken(conn, &candidate).await? {
            return Ok(candidate);
        }
    }

    Err(AppError::Internal(
        "Unable to generate a unique username".to_string(),
    ))
}
