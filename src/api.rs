use std::collections::HashMap;

use chrono::{Local, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::{Error as JsonError, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use validator::{Validate, ValidationErrors};

use crate::auth::{Permission, SESSION_COOKIE, User, UserSession};
use crate::config::RegistrarConfig;
use crate::db::{
    LoginDb, RosterFilter, StudentDb, authenticate_user, create_user_session, get_section,
    get_student, insert_section, invalidate_session, list_sections, list_students, section_names,
    set_section_status,
};
use crate::enrollment::application::validate_school_year;
use crate::enrollment::sections::next_section_label;
use crate::enrollment::{EnrollmentError, EnrollmentReceipt, StudentApplication, enroll_student};
use crate::error::AppError;
use crate::models::{Section, SectionStatus, Student};
use crate::telemetry::RequestId;
use crate::validation::{
    AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse, field_error_map,
};

pub const SESSION_HOURS: i64 = 8;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub archived: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            role: user.role.to_string(),
            archived: user.archived,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<LoginDb>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(SESSION_HOURS);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            cookies.add_private(
                Cookie::build((SESSION_COOKIE, token))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(SESSION_HOURS)),
            );

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<LoginDb>) -> Json<Value> {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Json(json!({ "success": true }))
}

#[get("/me")]
pub async fn api_me(user: User) -> Result<Json<UserData>, Status> {
    user.require_permission(Permission::ViewOwnProfile)?;

    Ok(Json(UserData::from(user)))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

/// What the registrar gets back for a new student.
#[derive(Serialize, Deserialize, Debug)]
pub struct EnrolledStudent {
    pub student_id: String,
    pub name: String,
    pub grade: i64,
    pub section: Option<String>,
    pub username: String,
    pub email: String,
    pub school_year: String,
    pub section_assigned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

impl From<EnrollmentReceipt> for EnrolledStudent {
    fn from(receipt: EnrollmentReceipt) -> Self {
        Self {
            student_id: receipt.student_id,
            name: receipt.name,
            grade: receipt.grade_level,
            section: receipt.section,
            username: receipt.username,
            email: receipt.email,
            school_year: receipt.school_year,
            section_assigned: receipt.section_assigned,
            temporary_password: receipt.temporary_password,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EnrollmentResponse {
    pub success: bool,
    pub message: String,
    pub data: EnrolledStudent,
}

/// Error body for the enrollment endpoint. `trace` is the request reference
/// that also appears in the server log.
#[derive(Serialize, Deserialize, Debug)]
pub struct FailureResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
    pub trace: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub errors: HashMap<String, Vec<String>>,
}

type Failure = Custom<Json<FailureResponse>>;

impl FailureResponse {
    fn new(status: Status, kind: &str, message: impl Into<String>, trace: RequestId) -> Failure {
        Custom(
            status,
            Json(Self {
                success: false,
                message: message.into(),
                error: kind.to_string(),
                trace: trace.to_string(),
                errors: HashMap::new(),
            }),
        )
    }

    fn invalid_fields(errors: &ValidationErrors, trace: RequestId) -> Failure {
        let errors = field_error_map(errors);
        warn!(trace = %trace, fields = ?errors.keys().collect::<Vec<_>>(), "Enrollment rejected by field validation");

        Custom(
            Status::UnprocessableEntity,
            Json(Self {
                success: false,
                message: first_error_message(&errors),
                error: "validation_error".to_string(),
                trace: trace.to_string(),
                errors,
            }),
        )
    }

    fn from_enrollment(err: &EnrollmentError, trace: RequestId) -> Failure {
        err.source.log_and_record("Enrollment");
        warn!(trace = %trace, stage = ?err.stage, error = %err, "Enrollment failed");

        Self::new(
            err.source.status_code(),
            err.source.kind(),
            err.source.public_message(),
            trace,
        )
    }
}

/// The message of the alphabetically first failing field.
pub fn first_error_message(errors: &HashMap<String, Vec<String>>) -> String {
    let mut fields: Vec<_> = errors.keys().collect();
    fields.sort();

    fields
        .first()
        .and_then(|field| errors[*field].first())
        .cloned()
        .unwrap_or_else(|| "Invalid enrollment request".to_string())
}

pub fn enrollment_message(receipt: &EnrollmentReceipt) -> String {
    if receipt.section_assigned {
        format!("Student {} enrolled successfully", receipt.student_id)
    } else {
        format!(
            "Student {} enrolled successfully, but no section could be assigned",
            receipt.student_id
        )
    }
}

#[post("/students", data = "<application>")]
pub async fn api_enroll_student(
    application: Result<Json<StudentApplication>, JsonError<'_>>,
    user: User,
    trace: RequestId,
    login_db: &State<LoginDb>,
    student_db: &State<StudentDb>,
    config: &State<RegistrarConfig>,
) -> Result<Custom<Json<EnrollmentResponse>>, Failure> {
    if user.require_permission(Permission::EnrollStudents).is_err() {
        return Err(FailureResponse::new(
            Status::Forbidden,
            "authorization_error",
            "Registrar access required",
            trace,
        ));
    }

    let application = match application {
        Ok(application) => application.into_inner().normalized(),
        Err(err) => {
            warn!(trace = %trace, error = %err, "Malformed enrollment request");
            return Err(FailureResponse::new(
                Status::BadRequest,
                "validation_error",
                "Invalid enrollment request",
                trace,
            ));
        }
    };

    if let Err(errors) = application.validate() {
        return Err(FailureResponse::invalid_fields(&errors, trace));
    }

    let receipt = enroll_student(
        &login_db.0,
        &student_db.0,
        config,
        &application,
        Local::now().date_naive(),
    )
    .await
    .map_err(|err| FailureResponse::from_enrollment(&err, trace))?;

    info!(
        trace = %trace,
        registrar = %user.username,
        student_id = %receipt.student_id,
        "Enrollment completed"
    );

    Ok(Custom(
        Status::Created,
        Json(EnrollmentResponse {
            success: true,
            message: enrollment_message(&receipt),
            data: EnrolledStudent::from(receipt),
        }),
    ))
}

#[get("/students?<grade_level>&<section>&<school_year>")]
pub async fn api_list_students(
    grade_level: Option<i64>,
    section: Option<String>,
    school_year: Option<String>,
    user: User,
    db: &State<StudentDb>,
) -> Result<Json<Vec<Student>>, Status> {
    user.require_permission(Permission::ViewRoster)?;

    let filter = RosterFilter {
        grade_level,
        section,
        school_year,
    };
    let students = list_students(db, &filter).await?;

    Ok(Json(students))
}

#[get("/students/<student_id>")]
pub async fn api_get_student(
    student_id: &str,
    user: User,
    db: &State<StudentDb>,
) -> Result<Json<Student>, Status> {
    user.require_permission(Permission::ViewRoster)?;

    let student = get_student(db, student_id).await?;
    info!(student = %student.full_name(), viewer = %user.username, "Student record viewed");

    Ok(Json(student))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SectionData {
    pub id: i64,
    pub grade_level: i64,
    pub name: String,
    pub school_year: String,
    pub status: String,
    pub current_students: i64,
    pub capacity: i64,
    pub available_seats: i64,
}

impl SectionData {
    fn new(section: Section, capacity: i64) -> Self {
        Self {
            available_seats: (capacity - section.current_students).max(0),
            id: section.id,
            grade_level: section.grade_level,
            name: section.name,
            school_year: section.school_year,
            status: section.status,
            current_students: section.current_students,
            capacity,
        }
    }
}

#[get("/sections?<grade_level>&<school_year>")]
pub async fn api_list_sections(
    grade_level: Option<i64>,
    school_year: Option<&str>,
    user: User,
    db: &State<StudentDb>,
    config: &State<RegistrarConfig>,
) -> Result<Json<Vec<SectionData>>, Status> {
    user.require_permission(Permission::ViewSections)?;

    let sections = list_sections(db, grade_level, school_year).await?;

    Ok(Json(
        sections
            .into_iter()
            .map(|s| SectionData::new(s, config.section_capacity))
            .collect(),
    ))
}

#[derive(Deserialize, Validate)]
pub struct CreateSectionRequest {
    #[validate(range(min = 0, max = 6, message = "Grade level must be between 0 and 6"))]
    grade_level: i64,
    #[validate(custom(function = "validate_school_year"))]
    school_year: String,
    #[validate(length(min = 1, max = 20, message = "Section name must be 1 to 20 characters"))]
    name: Option<String>,
}

#[post("/sections", data = "<request>")]
pub async fn api_create_section(
    request: Json<CreateSectionRequest>,
    user: User,
    db: &State<StudentDb>,
    config: &State<RegistrarConfig>,
) -> Result<Custom<Json<SectionData>>, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ManageSections).validate_custom()?;

    let validated = request.validate_custom()?;

    let id = create_section(db, &validated).await.validate_custom()?;
    let section = get_section(db, id).await.validate_custom()?;

    info!(section = %section.name, grade_level = section.grade_level, "Section created");

    Ok(Custom(
        Status::Created,
        Json(SectionData::new(section, config.section_capacity)),
    ))
}

async fn create_section(db: &StudentDb, request: &CreateSectionRequest) -> Result<i64, AppError> {
    let mut conn = db.acquire().await?;

    let name = match request.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => next_section_label(
            &section_names(&mut conn, request.grade_level, &request.school_year).await?,
        ),
    };

    match insert_section(&mut conn, request.grade_level, &name, &request.school_year).await {
        Err(AppError::Database(sqlx::Error::Database(db_err))) if db_err.is_unique_violation() => {
            Err(AppError::Conflict(format!("Section {} already exists", name)))
        }
        result => result,
    }
}

#[derive(Deserialize)]
pub struct SectionStatusRequest {
    status: SectionStatus,
}

#[put("/sections/<id>/status", data = "<request>")]
pub async fn api_update_section_status(
    id: i64,
    request: Json<SectionStatusRequest>,
    user: User,
    db: &State<StudentDb>,
    config: &State<RegistrarConfig>,
) -> Result<Json<SectionData>, Status> {
    user.require_permission(Permission::ManageSections)?;

    set_section_status(db, id, request.status).await?;
    let section = get_section(db, id).await?;

    Ok(Json(SectionData::new(section, config.section_capacity)))
}
