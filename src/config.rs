use serde::de::{Deserializer, Error as _};
use serde::Deserialize;

pub const DEFAULT_EMAIL_DOMAIN: &str = "sanagustines.edu.ph";
pub const DEFAULT_SECTION_CAPACITY: i64 = 30;

/// Portal settings extracted from Rocket's figment (`Rocket.toml` and `ROCKET_*` variables).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    pub email_domain: String,
    #[serde(deserialize_with = "positive_capacity")]
    pub section_capacity: i64,
    /// Month (1-12) in which a new school year begins.
    #[serde(deserialize_with = "calendar_month")]
    pub school_year_start_month: u32,
    pub bcrypt_cost: u32,
    pub enrollment_form_url: String,
    pub roster_url: String,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            email_domain: DEFAULT_EMAIL_DOMAIN.to_string(),
            section_capacity: DEFAULT_SECTION_CAPACITY,
            school_year_start_month: 6,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            enrollment_form_url: "/registrar/enroll".to_string(),
            roster_url: "/registrar/students".to_string(),
        }
    }
}

fn positive_capacity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let capacity = i64::deserialize(deserializer)?;
    if capacity < 1 {
        return Err(D::Error::custom(format!(
            "section_capacity must be at least 1, got {capacity}"
        )));
    }
    Ok(capacity)
}

fn calendar_month<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let month = u32::deserialize(deserializer)?;
    if !(1..=12).contains(&month) {
        return Err(D::Error::custom(format!(
            "school_year_start_month must be between 1 and 12, got {month}"
        )));
    }
    Ok(month)
}
