use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{DbSection, DbStudent, EnrollmentStatus, Section, SectionStatus, Student};

const STUDENT_COLUMNS: &str = "student_id, user_id, lrn, first_name, middle_name, last_name, \
     suffix, birthdate, gender, address, grade_level, section, guardian_name, guardian_contact, \
     status, school_year, created_at";

// Occupancy is the number of student rows carrying the section's name for
// the same grade and school year.
const SECTION_SELECT: &str = "SELECT s.id, s.grade_level, s.name, s.school_year, s.status,
        (SELECT COUNT(*) FROM students st
          WHERE st.grade_level = s.grade_level
            AND st.section = s.name
            AND st.school_year = s.school_year) AS current_students
     FROM sections s";

/// A student row ready to be written inside an enrollment transaction.
pub struct NewStudent<'a> {
    pub student_id: &'a str,
    pub user_id: i64,
    pub lrn: Option<&'a str>,
    pub first_name: &'a str,
    pub middle_name: Option<&'a str>,
    pub last_name: &'a str,
    pub suffix: Option<&'a str>,
    pub birthdate: Option<chrono::NaiveDate>,
    pub gender: Option<&'a str>,
    pub address: Option<&'a str>,
    pub grade_level: i64,
    pub section: Option<&'a str>,
    pub guardian_name: Option<&'a str>,
    pub guardian_contact: Option<&'a str>,
    pub status: EnrollmentStatus,
    pub school_year: &'a str,
}

#[derive(Debug, Default)]
pub struct RosterFilter {
    pub grade_level: Option<i64>,
    pub section: Option<String>,
    pub school_year: Option<String>,
}

/// Highest numeric suffix among `ST-<year>-NNNN` ids, if any exist for the year.
#[instrument(skip(conn))]
pub async fn max_student_sequence(
    conn: &mut SqliteConnection,
    year: i32,
) -> Result<Option<i64>, AppError> {
    let prefix = format!("ST-{year}-");
    let max = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(CAST(SUBSTR(student_id, ?) AS INTEGER)) FROM students WHERE student_id LIKE ?",
    )
    .bind(prefix.len() as i64 + 1)
    .bind(format!("{prefix}%"))
    .fetch_one(&mut *conn)
    .await?;

    Ok(max)
}

#[instrument(skip(conn))]
pub async fn lrn_taken(conn: &mut SqliteConnection, lrn: &str) -> Result<bool, AppError> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM students WHERE lrn = ?")
        .bind(lrn)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(existing.is_some())
}

/// The least occupied active section below `capacity`, oldest first on ties.
#[instrument(skip(conn))]
pub async fn find_open_section(
    conn: &mut SqliteConnection,
    grade_level: i64,
    school_year: &str,
    capacity: i64,
) -> Result<Option<Section>, AppError> {
    info!("Looking for a section with free seats");
    let row = sqlx::query_as::<_, DbSection>(&format!(
        "SELECT * FROM ({SECTION_SELECT}
           WHERE s.grade_level = ? AND s.school_year = ? AND s.status = 'active')
         WHERE current_students < ?
         ORDER BY current_students ASC, id ASC
         LIMIT 1"
    ))
    .bind(grade_level)
    .bind(school_year)
    .bind(capacity)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Section::from))
}

/// Names of every section for the grade and year, active or not.
#[instrument(skip(conn))]
pub async fn section_names(
    conn: &mut SqliteConnection,
    grade_level: i64,
    school_year: &str,
) -> Result<Vec<String>, AppError> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sections WHERE grade_level = ? AND school_year = ?",
    )
    .bind(grade_level)
    .bind(school_year)
    .fetch_all(&mut *conn)
    .await?;

    Ok(names)
}

#[instrument(skip(conn))]
pub async fn insert_section(
    conn: &mut SqliteConnection,
    grade_level: i64,
    name: &str,
    school_year: &str,
) -> Result<i64, AppError> {
    info!("Creating section");
    let res = sqlx::query(
        "INSERT INTO sections (grade_level, name, school_year, status) VALUES (?, ?, ?, 'active')",
    )
    .bind(grade_level)
    .bind(name)
    .bind(school_year)
    .execute(&mut *conn)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(student_id = %student.student_id))]
pub async fn insert_student(
    conn: &mut SqliteConnection,
    student: &NewStudent<'_>,
) -> Result<i64, AppError> {
    info!("Inserting student record");
    let res = sqlx::query(
        "INSERT INTO students
         (student_id, user_id, lrn, first_name, middle_name, last_name, suffix, birthdate,
          gender, address, grade_level, section, guardian_name, guardian_contact, status,
          school_year)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(student.student_id)
    .bind(student.user_id)
    .bind(student.lrn)
    .bind(student.first_name)
    .bind(student.middle_name)
    .bind(student.last_name)
    .bind(student.suffix)
    .bind(student.birthdate)
    .bind(student.gender)
    .bind(student.address)
    .bind(student.grade_level)
    .bind(student.section)
    .bind(student.guardian_name)
    .bind(student.guardian_contact)
    .bind(student.status.as_str())
    .bind(student.school_year)
    .execute(&mut *conn)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(conn))]
pub async fn upsert_enrollment(
    conn: &mut SqliteConnection,
    student_id: &str,
    grade_level: i64,
    section: Option<&str>,
    school_year: &str,
    status: EnrollmentStatus,
) -> Result<(), AppError> {
    info!("Upserting enrollment");
    sqlx::query(
        "INSERT INTO enrollments (student_id, grade_level, section, school_year, status)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (student_id) DO UPDATE SET
            grade_level = excluded.grade_level,
            section = excluded.section,
            school_year = excluded.school_year,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP",
    )
    .bind(student_id)
    .bind(grade_level)
    .bind(section)
    .bind(school_year)
    .bind(status.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_sections(
    pool: &Pool<Sqlite>,
    grade_level: Option<i64>,
    school_year: Option<&str>,
) -> Result<Vec<Section>, AppError> {
    info!("Listing sections");
    let rows = sqlx::query_as::<_, DbSection>(&format!(
        "{SECTION_SELECT}
         WHERE (?1 IS NULL OR s.grade_level = ?1)
           AND (?2 IS NULL OR s.school_year = ?2)
         ORDER BY s.school_year, s.grade_level, s.id"
    ))
    .bind(grade_level)
    .bind(school_year)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Section::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_section(pool: &Pool<Sqlite>, id: i64) -> Result<Section, AppError> {
    let row = sqlx::query_as::<_, DbSection>(&format!("{SECTION_SELECT} WHERE s.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(section) => Ok(Section::from(section)),
        _ => Err(AppError::NotFound(format!("Section with id {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn set_section_status(
    pool: &Pool<Sqlite>,
    id: i64,
    status: SectionStatus,
) -> Result<(), AppError> {
    info!("Updating section status");
    let res = sqlx::query("UPDATE sections SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Section with id {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn list_students(
    pool: &Pool<Sqlite>,
    filter: &RosterFilter,
) -> Result<Vec<Student>, AppError> {
    info!("Listing students");
    let rows = sqlx::query_as::<_, DbStudent>(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE (?1 IS NULL OR grade_level = ?1)
           AND (?2 IS NULL OR section = ?2)
           AND (?3 IS NULL OR school_year = ?3)
         ORDER BY last_name, first_name"
    ))
    .bind(filter.grade_level)
    .bind(filter.section.as_deref())
    .bind(filter.school_year.as_deref())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_student(pool: &Pool<Sqlite>, student_id: &str) -> Result<Student, AppError> {
    info!("Getting student");
    let row = sqlx::query_as::<_, DbStudent>(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?"
    ))
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(student) => Ok(Student::from(student)),
        _ => Err(AppError::NotFound(format!(
            "Student {} not found",
            student_id
        ))),
    }
}
