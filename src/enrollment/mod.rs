//! Student enrollment: one user account in the login store and one student
//! record (plus its enrollment row) in the student store.
//!
//! The two stores are written through independent transactions. Both are
//! rolled back on any failure before the commits. If the student commit
//! fails after the login commit went through, the new account is deleted
//! again so no login exists without a student record.

pub mod application;
pub mod identifiers;
pub mod sections;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use sqlx::{Pool, Sqlite, SqliteConnection, Transaction};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::auth::Role;
use crate::config::RegistrarConfig;
use crate::db::{
    NewAccount, NewStudent, delete_user, insert_student, insert_user, lrn_taken,
    max_student_sequence, upsert_enrollment,
};
use crate::error::AppError;
use crate::models::{EnrollmentStatus, display_name};

pub use application::{StudentApplication, school_year_for};
use identifiers::{PasswordPlan, format_student_id, plan_password, resolve_email, resolve_username};
use sections::{SectionPlacement, assign_section};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStage {
    Received,
    Validated,
    IdentifiersResolved,
    SectionResolved,
    LoginPersisted,
    Persisted,
}

#[derive(Debug, Error)]
#[error("enrollment failed after stage {stage:?}: {source}")]
pub struct EnrollmentError {
    pub stage: EnrollmentStage,
    #[source]
    pub source: AppError,
}

impl EnrollmentError {
    fn at(stage: EnrollmentStage) -> impl FnOnce(AppError) -> Self {
        move |source| Self { stage, source }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentReceipt {
    pub student_id: String,
    pub user_id: i64,
    pub name: String,
    pub grade_level: i64,
    pub section: Option<String>,
    pub section_assigned: bool,
    pub username: String,
    pub email: String,
    pub school_year: String,
    /// Only present when the password was generated for the student.
    pub temporary_password: Option<String>,
}

/// Everything written inside the two open transactions.
struct StagedEnrollment {
    user_id: i64,
    username: String,
    email: String,
    student_id: String,
    placement: SectionPlacement,
}

/// Runs the whole enrollment for an application that already passed field
/// validation. `enrolled_on` fixes the student-id year and the default
/// school year.
#[instrument(skip_all, fields(grade_level = application.grade_level))]
pub async fn enroll_student(
    login: &Pool<Sqlite>,
    student: &Pool<Sqlite>,
    config: &RegistrarConfig,
    application: &StudentApplication,
    enrolled_on: NaiveDate,
) -> Result<EnrollmentReceipt, EnrollmentError> {
    let mut stage = EnrollmentStage::Received;

    let password = plan_password(
        application.password.as_deref(),
        application.confirm_password.as_deref(),
    )
    .map_err(EnrollmentError::at(stage))?;

    let school_year = application
        .school_year
        .clone()
        .unwrap_or_else(|| school_year_for(enrolled_on, config.school_year_start_month));

    stage = EnrollmentStage::Validated;
    info!(school_year = %school_year, "Enrollment validated");

    let mut login_tx = login.begin().await.map_err(|e| EnrollmentError::at(stage)(e.into()))?;
    let mut student_tx = match student.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            roll_back_login(login_tx).await;
            return Err(EnrollmentError::at(stage)(e.into()));
        }
    };

    let staged = stage_records(
        &mut login_tx,
        &mut student_tx,
        config,
        application,
        &password,
        &school_year,
        enrolled_on.year(),
        &mut stage,
    )
    .await;

    let staged = match staged {
        Ok(staged) => staged,
        Err(source) => {
            roll_back(student_tx, login_tx).await;
            return Err(EnrollmentError { stage, source });
        }
    };

    if let Err(e) = login_tx.commit().await {
        if let Err(rollback_err) = student_tx.rollback().await {
            warn!(error = %rollback_err, "Student transaction rollback failed");
        }
        return Err(EnrollmentError::at(stage)(e.into()));
    }
    stage = EnrollmentStage::LoginPersisted;

    if let Err(e) = student_tx.commit().await {
        compensate_login(login, staged.user_id).await;
        return Err(EnrollmentError::at(stage)(e.into()));
    }
    stage = EnrollmentStage::Persisted;

    info!(
        stage = ?stage,
        student_id = %staged.student_id,
        section = ?staged.placement.name(),
        "Student enrolled"
    );

    Ok(EnrollmentReceipt {
        student_id: staged.student_id,
        user_id: staged.user_id,
        name: display_name(
            &application.first_name,
            application.middle_name.as_deref(),
            &application.last_name,
            application.suffix.as_deref(),
        ),
        grade_level: application.grade_level,
        section: staged.placement.name().map(String::from),
        section_assigned: staged.placement.is_assigned(),
        username: staged.username,
        email: staged.email,
        school_year,
        temporary_password: password.generated().map(String::from),
    })
}

#[allow(clippy::too_many_arguments)]
async fn stage_records(
    login: &mut SqliteConnection,
    student: &mut SqliteConnection,
    config: &RegistrarConfig,
    application: &StudentApplication,
    password: &PasswordPlan,
    school_year: &str,
    year: i32,
    stage: &mut EnrollmentStage,
) -> Result<StagedEnrollment, AppError> {
    let username = resolve_username(
        login,
        application.username.as_deref(),
        &application.first_name,
        &application.last_name,
    )
    .await?;

    let email = resolve_email(
        login,
        application.email.as_deref(),
        &application.first_name,
        &application.last_name,
        &config.email_domain,
    )
    .await?;

    if let Some(lrn) = application.lrn.as_deref() {
        if lrn_taken(student, lrn).await? {
            return Err(AppError::Conflict("LRN already exists".to_string()));
        }
    }

    let account = NewAccount {
        username: username.clone(),
        email: email.clone(),
        password_hash: bcrypt::hash(password.secret(), config.bcrypt_cost)?,
        role: Role::Student,
        display_name: display_name(
            &application.first_name,
            application.middle_name.as_deref(),
            &application.last_name,
            application.suffix.as_deref(),
        ),
    };
    let user_id = insert_user(login, &account).await?;

    let sequence = max_student_sequence(student, year).await?.unwrap_or(0) + 1;
    let student_id = format_student_id(year, sequence);
    *stage = EnrollmentStage::IdentifiersResolved;

    let placement = assign_section(
        student,
        application.grade_level,
        school_year,
        config.section_capacity,
    )
    .await?;
    *stage = EnrollmentStage::SectionResolved;

    let birthdate = application.birthdate();
    insert_student(
        student,
        &NewStudent {
            student_id: &student_id,
            user_id,
            lrn: application.lrn.as_deref(),
            first_name: &application.first_name,
            middle_name: application.middle_name.as_deref(),
            last_name: &application.last_name,
            suffix: application.suffix.as_deref(),
            birthdate,
            gender: application.gender.as_deref(),
            address: application.address.as_deref(),
            grade_level: application.grade_level,
            section: placement.name(),
            guardian_name: application.guardian_name.as_deref(),
            guardian_contact: application.guardian_contact.as_deref(),
            status: EnrollmentStatus::Pending,
            school_year,
        },
    )
    .await?;

    upsert_enrollment(
        student,
        &student_id,
        application.grade_level,
        placement.name(),
        school_year,
        EnrollmentStatus::Pending,
    )
    .await?;

    Ok(StagedEnrollment {
        user_id,
        username,
        email,
        student_id,
        placement,
    })
}

/// Student store first, then login store.
async fn roll_back(student_tx: Transaction<'_, Sqlite>, login_tx: Transaction<'_, Sqlite>) {
    if let Err(err) = student_tx.rollback().await {
        warn!(error = %err, "Student transaction rollback failed");
    }
    roll_back_login(login_tx).await;
}

async fn roll_back_login(login_tx: Transaction<'_, Sqlite>) {
    if let Err(err) = login_tx.rollback().await {
        warn!(error = %err, "Login transaction rollback failed");
    }
}

/// Removes an account whose student record failed to commit.
pub async fn compensate_login(login: &Pool<Sqlite>, user_id: i64) {
    match delete_user(login, user_id).await {
        Ok(removed) => warn!(user_id, removed, "Removed login account after student commit failure"),
        Err(err) => error!(
            user_id,
            error = %err,
            "Compensation failed, login account has no student record"
        ),
    }
}
