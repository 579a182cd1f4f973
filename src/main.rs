#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod db;
mod enrollment;
mod env;
mod error;
mod models;
mod routes;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::time::Duration;

use api::{
    api_create_section, api_enroll_student, api_get_student, api_list_sections,
    api_list_students, api_login, api_logout, api_me, api_update_section_status, health,
};
use auth::{Role, forbidden_api, unauthorized_api};
use config::RegistrarConfig;
use db::{LoginDb, StudentDb, Stores, clean_expired_sessions, count_users_with_role, create_user};
use env::{BootstrapRegistrar, StoreUrls, load_environment};
use error::AppError;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use routes::enroll_student_form;
use sqlx::SqlitePool;
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::{error, info, warn};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {e}");
    }
    init_tracing();

    let urls = StoreUrls::from_env()?;
    let stores = Stores::connect(&urls).await?;

    info!("Running database migrations...");
    stores.migrate().await?;
    info!("Migrations completed successfully");

    spawn_session_cleanup(stores.login.clone());

    let rocket = init_rocket(stores.clone());
    let config: RegistrarConfig = rocket.figment().extract()?;
    bootstrap_registrar(&stores.login, &config).await?;

    let _ = rocket.launch().await?;
    Ok(())
}

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired sessions: {}", e),
            }

            tokio::time::sleep(SESSION_CLEANUP_INTERVAL).await;
        }
    });
}

/// Creates the first registrar from the environment when none exists yet.
async fn bootstrap_registrar(pool: &SqlitePool, config: &RegistrarConfig) -> Result<(), AppError> {
    let Some(bootstrap) = BootstrapRegistrar::from_env() else {
        return Ok(());
    };

    if count_users_with_role(pool, Role::Registrar).await? > 0 {
        info!("Registrar account already present, skipping bootstrap");
        return Ok(());
    }

    let id = create_user(
        pool,
        &bootstrap.username,
        &bootstrap.email,
        &bootstrap.password,
        Role::Registrar,
        &bootstrap.username,
        config.bcrypt_cost,
    )
    .await?;
    warn!(user_id = id, username = %bootstrap.username, "Created bootstrap registrar account");

    Ok(())
}

pub fn init_rocket(stores: Stores) -> Rocket<Build> {
    mount_registrar(rocket::build(), stores)
}

/// Attaches state, fairings, routes and catchers to `rocket`.
pub fn mount_registrar(rocket: Rocket<Build>, stores: Stores) -> Rocket<Build> {
    info!("Starting registrar portal");

    rocket
        .manage(LoginDb(stores.login))
        .manage(StudentDb(stores.student))
        .attach(AdHoc::config::<RegistrarConfig>())
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async move { shutdown_telemetry() })
        }))
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                health,
                api_enroll_student,
                api_list_students,
                api_get_student,
                api_list_sections,
                api_create_section,
                api_update_section_status,
            ],
        )
        .mount("/", routes![enroll_student_form])
        .register("/", catchers![unauthorized_api, forbidden_api])
}
