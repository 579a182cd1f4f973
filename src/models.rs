use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Dropped,
    Transferred,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "Pending",
            EnrollmentStatus::Active => "Active",
            EnrollmentStatus::Dropped => "Dropped",
            EnrollmentStatus::Transferred => "Transferred",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Active,
    Inactive,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Active => "active",
            SectionStatus::Inactive => "inactive",
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub user_id: i64,
    pub lrn: Option<String>,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub grade_level: i64,
    pub section: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_contact: Option<String>,
    pub status: String,
    pub school_year: String,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn full_name(&self) -> String {
        display_name(
            &self.first_name,
            self.middle_name.as_deref(),
            &self.last_name,
            self.suffix.as_deref(),
        )
    }
}

/// "First M. Last Suffix", skipping parts that are absent.
pub fn display_name(first: &str, middle: Option<&str>, last: &str, suffix: Option<&str>) -> String {
    let mut parts = vec![first.trim().to_string()];

    if let Some(initial) = middle.and_then(|m| m.trim().chars().next()) {
        parts.push(format!("{}.", initial.to_uppercase()));
    }

    parts.push(last.trim().to_string());

    if let Some(suffix) = suffix.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(suffix.to_string());
    }

    parts.join(" ")
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbStudent {
    pub student_id: Option<String>,
    pub user_id: Option<i64>,
    pub lrn: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub grade_level: Option<i64>,
    pub section: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_contact: Option<String>,
    pub status: Option<String>,
    pub school_year: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            student_id: db.student_id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            lrn: db.lrn,
            first_name: db.first_name.unwrap_or_default(),
            middle_name: db.middle_name,
            last_name: db.last_name.unwrap_or_default(),
            suffix: db.suffix,
            birthdate: db.birthdate,
            gender: db.gender,
            address: db.address,
            grade_level: db.grade_level.unwrap_or_default(),
            section: db.section,
            guardian_name: db.guardian_name,
            guardian_contact: db.guardian_contact,
            status: db.status.unwrap_or_default(),
            school_year: db.school_year.unwrap_or_default(),
            created_at: db
                .created_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub grade_level: i64,
    pub name: String,
    pub school_year: String,
    pub status: String,
    pub current_students: i64,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbSection {
    pub id: Option<i64>,
    pub grade_level: Option<i64>,
    pub name: Option<String>,
    pub school_year: Option<String>,
    pub status: Option<String>,
    pub current_students: Option<i64>,
}

impl From<DbSection> for Section {
    fn from(db: DbSection) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            grade_level: db.grade_level.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            school_year: db.school_year.unwrap_or_default(),
            status: db.status.unwrap_or_default(),
            current_students: db.current_students.unwrap_or_default(),
        }
    }
}
