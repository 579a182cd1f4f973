use std::path::Path;

use tracing::{info, warn};

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Connection strings for the two stores the portal writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUrls {
    pub login: String,
    pub student: String,
}

impl StoreUrls {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let login = dotenvy::var("LOGIN_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("LOGIN_DATABASE_URL must be set"))?;

        let student = dotenvy::var("STUDENT_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("STUDENT_DATABASE_URL must be set"))?;

        if login == student {
            anyhow::bail!("LOGIN_DATABASE_URL and STUDENT_DATABASE_URL must differ");
        }

        Ok(Self { login, student })
    }
}

/// Credentials for the registrar account created on first start.
pub struct BootstrapRegistrar {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl BootstrapRegistrar {
    pub fn from_env() -> Option<Self> {
        let username = dotenvy::var("REGISTRAR_BOOTSTRAP_USERNAME").ok()?;
        let password = dotenvy::var("REGISTRAR_BOOTSTRAP_PASSWORD").ok()?;
        let email = dotenvy::var("REGISTRAR_BOOTSTRAP_EMAIL")
            .unwrap_or_else(|_| format!("{}@localhost", username));

        Some(Self {
            username,
            email,
            password,
        })
    }
}

