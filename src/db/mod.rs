pub mod accounts;
pub mod roster;

pub use accounts::*;
pub use roster::*;

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use tracing::info;

use crate::env::StoreUrls;

/// Pool for the login store: user accounts and sessions.
pub struct LoginDb(pub SqlitePool);

/// Pool for the student store: students, sections and enrollments.
pub struct StudentDb(pub SqlitePool);

impl Deref for LoginDb {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for StudentDb {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone)]
pub struct Stores {
    pub login: SqlitePool,
    pub student: SqlitePool,
}

impl Stores {
    /// Opens both stores. They must live in separate files: an enrollment
    /// holds a write transaction on each at the same time, and SQLite allows
    /// one writer per file.
    pub async fn connect(urls: &StoreUrls) -> Result<Self, anyhow::Error> {
        let login = SqliteConnectOptions::from_str(&urls.login)
            .with_context(|| format!("Invalid login store URL {}", urls.login))?;
        let student = SqliteConnectOptions::from_str(&urls.student)
            .with_context(|| format!("Invalid student store URL {}", urls.student))?;

        if let (Some(l), Some(s)) = (store_file(&login), store_file(&student)) {
            if l == s {
                bail!(
                    "Login and student stores must use separate files, both point at {}",
                    l.display()
                );
            }
        }

        Ok(Self {
            login: open_store(login).await?,
            student: open_store(student).await?,
        })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations/login").run(&self.login).await?;
        sqlx::migrate!("./migrations/student").run(&self.student).await?;

        Ok(())
    }
}

/// Absolute path of a file-backed store; `None` for in-memory databases.
fn store_file(options: &SqliteConnectOptions) -> Option<PathBuf> {
    let filename = options.get_filename();
    if filename.as_os_str().is_empty() || filename == Path::new(":memory:") {
        return None;
    }
    std::path::absolute(filename).ok()
}

async fn open_store(options: SqliteConnectOptions) -> Result<SqlitePool, anyhow::Error> {
    let options = options.create_if_missing(true);

    if let Some(parent) = store_file(&options).as_deref().and_then(Path::parent) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create {}", parent.display()))?;
            info!(dir = %parent.display(), "Created database directory");
        }
    }

    Ok(SqlitePool::connect_with(options).await?)
}
