use chrono::Local;
use rocket::State;
use rocket::form::{Errors, Form};
use rocket::http::{RawStr, Status};
use rocket::response::Redirect;
use tracing::{info, warn};
use validator::Validate;

use crate::api::first_error_message;
use crate::auth::{Permission, User};
use crate::config::RegistrarConfig;
use crate::db::{LoginDb, StudentDb};
use crate::enrollment::{StudentApplication, enroll_student};
use crate::validation::field_error_map;

fn back_to_form(config: &RegistrarConfig, message: &str) -> Redirect {
    Redirect::to(format!(
        "{}?error={}",
        config.enrollment_form_url,
        RawStr::new(message).percent_encode().as_str()
    ))
}

/// Browser form submission of an enrollment. Always answers with a redirect:
/// to the roster on success, back to the form with `?error=` otherwise.
#[post("/students/enroll", data = "<form>")]
pub async fn enroll_student_form(
    form: Result<Form<StudentApplication>, Errors<'_>>,
    user: User,
    login_db: &State<LoginDb>,
    student_db: &State<StudentDb>,
    config: &State<RegistrarConfig>,
) -> Result<Redirect, Status> {
    user.require_permission(Permission::EnrollStudents)?;

    let application = match form {
        Ok(form) => form.into_inner().normalized(),
        Err(errors) => {
            warn!(error = %errors, "Malformed enrollment form");
            return Ok(back_to_form(config, "Please fill in all required fields"));
        }
    };

    if let Err(errors) = application.validate() {
        let message = first_error_message(&field_error_map(&errors));
        warn!(message = %message, "Enrollment form rejected by field validation");
        return Ok(back_to_form(config, &message));
    }

    match enroll_student(
        &login_db.0,
        &student_db.0,
        config,
        &application,
        Local::now().date_naive(),
    )
    .await
    {
        Ok(receipt) => {
            info!(
                registrar = %user.username,
                student_id = %receipt.student_id,
                "Enrollment completed from form"
            );
            Ok(Redirect::to(format!(
                "{}?enrolled={}&section_assigned={}",
                config.roster_url,
                RawStr::new(&receipt.student_id).percent_encode().as_str(),
                receipt.section_assigned
            )))
        }
        Err(err) => {
            err.source.log_and_record("Enrollment form");
            warn!(stage = ?err.stage, "Enrollment form submission failed");
            Ok(back_to_form(config, &err.source.public_message()))
        }
    }
}
