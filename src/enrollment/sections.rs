use sqlx::{Connection, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::db::{find_open_section, insert_section, section_names};
use crate::error::AppError;

pub const SECTION_PREFIX: &str = "S";

/// Numeric part of an `S<n>` label.
pub fn section_number(name: &str) -> Option<u32> {
    name.trim()
        .strip_prefix(SECTION_PREFIX)
        .and_then(|n| n.parse().ok())
}

/// One past the highest `S<n>` among `existing`; `S1` when there is none.
pub fn next_section_label<S: AsRef<str>>(existing: &[S]) -> String {
    let next = existing
        .iter()
        .filter_map(|name| section_number(name.as_ref()))
        .max()
        .map_or(1, |n| n + 1);

    format!("{SECTION_PREFIX}{next}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPlacement {
    Existing(String),
    Created(String),
    Unassigned,
}

impl SectionPlacement {
    pub fn name(&self) -> Option<&str> {
        match self {
            SectionPlacement::Existing(name) | SectionPlacement::Created(name) => Some(name),
            SectionPlacement::Unassigned => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self, SectionPlacement::Unassigned)
    }
}

/// Places a new student in the emptiest open section, opening a new one when
/// every active section is full. A failed section insert is rolled back to a
/// savepoint and leaves the student unassigned; lookup failures propagate.
#[instrument(skip(conn))]
pub async fn assign_section(
    conn: &mut SqliteConnection,
    grade_level: i64,
    school_year: &str,
    capacity: i64,
) -> Result<SectionPlacement, AppError> {
    if let Some(section) = find_open_section(conn, grade_level, school_year, capacity).await? {
        info!(
            section = %section.name,
            current_students = section.current_students,
            "Assigning existing section"
        );
        return Ok(SectionPlacement::Existing(section.name));
    }

    let label = next_section_label(&section_names(conn, grade_level, school_year).await?);

    let mut savepoint = conn.begin().await?;
    match insert_section(&mut savepoint, grade_level, &label, school_year).await {
        Ok(_) => {
            savepoint.commit().await?;
            info!(section = %label, "Opened new section");
            Ok(SectionPlacement::Created(label))
        }
        Err(err) => {
            warn!(section = %label, error = %err, "Failed to open new section, leaving student unassigned");
            savepoint.rollback().await?;
            Ok(SectionPlacement::Unassigned)
        }
    }
}
