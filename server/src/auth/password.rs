use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use std::sync::OnceLock;

use super::AuthError;

/// Hash checked when the username is unknown, so both failures cost one argon2 run
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn dummy_hash() -> &'static str {
    DUMMY_HASH.get_or_init(|| hash_password("not-a-real-account").unwrap_or_default())
}

/// Hash a password with a fresh random salt (PHC string format)
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswordHash(e.to_string()))
}

/// Check a password against a stored hash.
///
/// A mismatch is `InvalidCredentials`; a stored hash that cannot be parsed
/// is `PasswordHash`.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<(), AuthError> {
    let parsed_hash =
        PasswordHash::new(stored_hash).map_err(|e| AuthError::PasswordHash(e.to_string()))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

/// Burn one verification for a login whose username does not exist.
/// Always `InvalidCredentials`.
pub fn reject_unknown_user(password: &str) -> AuthError {
    let _ = verify_password(password, dummy_hash());
    AuthError::InvalidCredentials
}
