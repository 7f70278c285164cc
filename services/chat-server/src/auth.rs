//! Credential store: user registration and login verification.
//!
//! Username and password length constraints and the SQLite-backed storage
//! shape are grounded on the reference implementation; the hash itself is a
//! real adaptive hash (`argon2`) rather than the assumed-standard primitive
//! the wire protocol leaves unspecified.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sqlx::SqlitePool;

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    InvalidLength,
    UsernameTaken,
}

fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("argon2 hashing never fails for a valid salt")
        .to_string()
}

fn verify_password(password: &str, hash_str: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash_str) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Registers a new user, rejecting out-of-range usernames/passwords and
/// names already taken.
pub async fn register_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<RegisterOutcome, sqlx::Error> {
    if !USERNAME_LEN.contains(&username.len()) || !PASSWORD_LEN.contains(&password.len()) {
        return Ok(RegisterOutcome::InvalidLength);
    }

    let hash = hash_password(password);
    let result = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
        .bind(username)
        .bind(&hash)
        .execute(pool)
        .await;

    match result {
        Ok(_) => Ok(RegisterOutcome::Registered),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Ok(RegisterOutcome::UsernameTaken)
        }
        Err(e) => Err(e),
    }
}

/// Verifies a username/password pair against the stored hash and, on
/// success, stamps `last_login`. A missing user or a hash mismatch are both
/// reported as `false` — never surfaced as an error.
pub async fn authenticate_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT password_hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some((hash,)) = row else {
        return Ok(false);
    };

    if !verify_password(password, &hash) {
        return Ok(false);
    }

    sqlx::query("UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE username = ?")
        .bind(username)
        .execute(pool)
        .await?;
    Ok(true)
}

/// All registered usernames, in lexical order, for `USERLIST` composition.
pub async fn all_usernames(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT username FROM users ORDER BY username")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(u,)| u).collect())
}
