//! Request and response bodies shared between the API server and its clients.

use serde::{Deserialize, Serialize};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8000;

/// Token type reported by the login endpoint
pub const TOKEN_TYPE: &str = "bearer";

/// Default token lifetime in minutes (one day)
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60 * 24;

// =============================================================================
// Accounts
// =============================================================================

/// Username/password pair used by both registration and login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("Username must not be empty".to_string());
        }
        if self.username.len() > 64 {
            return Err("Username must be at most 64 characters".to_string());
        }
        if self.password.is_empty() {
            return Err("Password must not be empty".to_string());
        }
        Ok(())
    }
}

/// Public view of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
}

/// Successful login response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
        }
    }
}

// =============================================================================
// Characters
// =============================================================================

/// Body form of the set-level request (the query string form is also accepted)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetLevelRequest {
    pub new_level: i32,
}

/// Error payload returned for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
