//! Password hashing and access tokens.

mod password;
mod token;

pub use password::{hash_password, reject_unknown_user, verify_password};
pub use token::TokenService;

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
    #[error("Token encoding failed: {0}")]
    TokenEncoding(String),
}
