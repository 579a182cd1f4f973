use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::auth::{DbUser, DbUserSession, Role, User, UserSession};
use crate::error::AppError;

const USER_COLUMNS: &str = "id, username, email, role, display_name, archived";

/// A user account ready to be written. The password is already hashed.
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: String,
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash = sqlx::query_scalar::<_, String>(
        "SELECT password FROM users WHERE username = ? AND archived = FALSE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some(hash) = hash else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hash) {
        Ok(true) => find_user_by_username(pool, username).await,
        _ => Ok(None),
    }
}

#[instrument(skip_all, fields(username = %account.username, role = %account.role))]
pub async fn insert_user(conn: &mut SqliteConnection, account: &NewAccount) -> Result<i64, AppError> {
    info!("Inserting user account");
    let res = sqlx::query(
        "INSERT INTO users (username, email, password, role, display_name)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&account.username)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(account.role.as_str())
    .bind(&account.display_name)
    .execute(&mut *conn)
    .await?;

    Ok(res.last_insert_rowid())
}

/// Hashes `password` and creates the account outside of any enrollment.
#[instrument(skip(pool, password))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    email: &str,
    password: &str,
    role: Role,
    display_name: &str,
    bcrypt_cost: u32,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let mut conn = pool.acquire().await?;

    if username_taken(&mut conn, username).await? {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let account = NewAccount {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: bcrypt::hash(password, bcrypt_cost)?,
        role,
        display_name: display_name.to_string(),
    };

    insert_user(&mut conn, &account).await
}

/// Compensating delete for an account whose student record never landed.
#[instrument(skip(pool))]
pub async fn delete_user(pool: &Pool<Sqlite>, user_id: i64) -> Result<u64, AppError> {
    info!("Deleting user account");
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}

#[instrument(skip(pool))]
pub async fn count_users_with_role(pool: &Pool<Sqlite>, role: Role) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role = ?")
        .bind(role.as_str())
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[instrument(skip(conn))]
pub async fn username_taken(conn: &mut SqliteConnection, username: &str) -> Result<bool, AppError> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(existing.is_some())
}

#[instrument(skip(conn))]
pub async fn email_taken(conn: &mut SqliteConnection, email: &str) -> Result<bool, AppError> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(existing.is_some())
}

/// Every username starting with `prefix`, for collision probing in memory.
#[instrument(skip(conn))]
pub async fn usernames_with_prefix(
    conn: &mut SqliteConnection,
    prefix: &str,
) -> Result<HashSet<String>, AppError> {
    let rows = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE username LIKE ?")
        .bind(format!("{prefix}%"))
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().collect())
}

/// Every email whose local part starts with `local_prefix` at `domain`.
#[instrument(skip(conn))]
pub async fn emails_with_prefix(
    conn: &mut SqliteConnection,
    local_prefix: &str,
    domain: &str,
) -> Result<HashSet<String>, AppError> {
    let rows = sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE email LIKE ?")
        .bind(format!("{local_prefix}%@{domain}"))
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().collect())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
