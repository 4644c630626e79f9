//! Registration, login and the current-user view.

use log::{info, warn};

use charsheet_shared::{Credentials, TokenResponse, UserInfo};

use crate::auth::{hash_password, reject_unknown_user, verify_password};
use crate::network::api::{ApiRequest, AppState};
use crate::network::error::{ApiError, ApiResult};
use crate::network::response::{ok, HttpResponse};
use crate::persistence::UserRecord;

/// Handle registration request
pub async fn register(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let credentials: Credentials = req.json()?;
    credentials.validate().map_err(ApiError::Validation)?;

    // Argon2 is deliberately slow; keep it off the async workers
    let password = credentials.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("Hashing task failed: {}", e)))??;

    let user = state
        .repo
        .create_user(credentials.username.trim(), &password_hash)
        .await?;
    info!("New user registered: {} (ID: {})", user.username, user.id);

    Ok(ok(&UserInfo {
        id: user.id,
        username: user.username,
    }))
}

/// Exchange credentials (JSON or form-encoded) for a bearer token
pub async fn login(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let credentials = read_credentials(req)?;

    let Some(user) = state.repo.find_user(credentials.username.trim()).await? else {
        warn!("Login failed: unknown user {}", credentials.username);
        let password = credentials.password;
        let rejected = tokio::task::spawn_blocking(move || reject_unknown_user(&password))
            .await
            .map_err(|e| ApiError::Internal(format!("Verification task failed: {}", e)))?;
        return Err(rejected.into());
    };

    let password = credentials.password;
    let stored_hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| ApiError::Internal(format!("Verification task failed: {}", e)))?;
    if let Err(e) = verified {
        warn!("Login failed for {}: {}", user.username, e);
        return Err(e.into());
    }

    let token = state.tokens.issue(&user.username)?;
    info!("User {} logged in", user.username);
    Ok(ok(&TokenResponse::bearer(token)))
}

pub fn me(user: &UserRecord) -> HttpResponse {
    ok(&UserInfo {
        id: user.id,
        username: user.username.clone(),
    })
}

fn read_credentials(req: &ApiRequest) -> ApiResult<Credentials> {
    if !req.is_form() {
        return req.json();
    }

    let mut username = None;
    let mut password = None;
    for (key, value) in req.form()? {
        match key.as_str() {
            "username" => username = Some(value),
            "password" => password = Some(value),
            _ => {}
        }
    }

    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials { username, password }),
        _ => Err(ApiError::Validation("username and password are required".to_string())),
    }
}
