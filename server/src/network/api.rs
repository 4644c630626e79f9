//! Request model and routing.
//!
//! `dispatch` is transport-agnostic: the hyper accept loop feeds it requests
//! with fully collected bodies, and the tests call it directly.

use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Method};
use log::{debug, error};
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;

use super::error::{ApiError, ApiResult};
use super::handlers::{accounts, catalog, characters, inventory};
use super::response::HttpResponse;
use crate::auth::{AuthError, TokenService};
use crate::persistence::{SharedRepository, UserRecord};

/// State shared by every request
pub struct AppState {
    pub repo: SharedRepository,
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(repo: SharedRepository, tokens: TokenService) -> Self {
        Self { repo, tokens }
    }
}

/// An HTTP request with its body already read
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str, query: Option<&str>, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers,
            body,
        }
    }

    /// Token from an `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// Decode the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        if self.body.is_empty() {
            return Err(ApiError::Validation("Request body is required".to_string()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))
    }

    pub fn is_form(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
    }

    /// Fields of an `application/x-www-form-urlencoded` body
    pub fn form(&self) -> ApiResult<Vec<(String, String)>> {
        let text = std::str::from_utf8(&self.body)
            .map_err(|_| ApiError::Validation("Form body is not valid UTF-8".to_string()))?;
        Ok(parse_urlencoded(text))
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        parse_urlencoded(self.query.as_deref()?)
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

fn parse_urlencoded(text: &str) -> Vec<(String, String)> {
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Parse a numeric path segment
fn parse_id(segment: &str) -> ApiResult<i64> {
    segment
        .parse()
        .map_err(|_| ApiError::Validation(format!("Invalid id: {}", segment)))
}

/// Resolve the bearer token to an account
async fn authenticate(state: &AppState, req: &ApiRequest) -> ApiResult<UserRecord> {
    let token = req.bearer_token().ok_or(AuthError::InvalidToken)?;
    let username = state.tokens.verify(token)?;

    // Tokens outlive deleted accounts
    let user = state.repo.find_user(&username).await?;
    user.ok_or_else(|| AuthError::InvalidToken.into())
}

/// Route a request and turn any error into its HTTP response
pub async fn dispatch(state: &AppState, req: ApiRequest) -> HttpResponse {
    let response = match route(state, &req).await {
        Ok(response) => response,
        Err(e) => {
            if let ApiError::Internal(ref detail) = e {
                error!("{} {} failed: {}", req.method, req.path, detail);
            }
            e.into_response()
        }
    };

    debug!("{} {} -> {}", req.method, req.path, response.status().as_u16());
    response
}

async fn route(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let segments: Vec<&str> = req.path.split('/').filter(|s| !s.is_empty()).collect();

    match (&req.method, segments.as_slice()) {
        // =====================================================================
        // Accounts
        // =====================================================================
        (&Method::POST, ["register"]) => accounts::register(state, req).await,
        (&Method::POST, ["token"]) => accounts::login(state, req).await,
        (&Method::GET, ["users", "me"]) => {
            let user = authenticate(state, req).await?;
            Ok(accounts::me(&user))
        }

        // =====================================================================
        // Catalog (reads are public)
        // =====================================================================
        (&Method::GET, ["character_classes"]) => catalog::list_classes(state).await,
        (&Method::POST, ["character_classes"]) => {
            authenticate(state, req).await?;
            catalog::create_class(state, req).await
        }
        (&Method::PUT, ["character_classes", id]) => {
            authenticate(state, req).await?;
            catalog::update_class(state, req, parse_id(id)?).await
        }
        (&Method::DELETE, ["character_classes", id]) => {
            authenticate(state, req).await?;
            catalog::delete_class(state, parse_id(id)?).await
        }

        (&Method::GET, ["class_progression"]) => catalog::list_progressions(state).await,
        (&Method::GET, ["class_progression", id]) => {
            catalog::get_progression(state, parse_id(id)?).await
        }
        (&Method::POST, ["class_progression"]) => {
            authenticate(state, req).await?;
            catalog::create_progression(state, req).await
        }
        (&Method::PUT, ["class_progression", id]) => {
            authenticate(state, req).await?;
            catalog::update_progression(state, req, parse_id(id)?).await
        }
        (&Method::DELETE, ["class_progression", id]) => {
            authenticate(state, req).await?;
            catalog::delete_progression(state, parse_id(id)?).await
        }
        (&Method::POST, ["class_progression", id, "add_ability", ability_id]) => {
            authenticate(state, req).await?;
            catalog::add_progression_ability(state, parse_id(id)?, parse_id(ability_id)?).await
        }
        (&Method::DELETE, ["class_progression", id, "remove_ability", ability_id]) => {
            authenticate(state, req).await?;
            catalog::remove_progression_ability(state, parse_id(id)?, parse_id(ability_id)?).await
        }

        (&Method::GET, ["abilities"]) => catalog::list_abilities(state).await,
        (&Method::POST, ["abilities"]) => {
            authenticate(state, req).await?;
            catalog::create_ability(state, req).await
        }
        (&Method::GET, ["equipment"]) => catalog::list_equipment(state).await,
        (&Method::POST, ["equipment"]) => {
            authenticate(state, req).await?;
            catalog::create_equipment(state, req).await
        }

        // =====================================================================
        // Characters (always scoped to the caller)
        // =====================================================================
        (method, ["characters", rest @ ..]) => {
            let user = authenticate(state, req).await?;
            route_character(state, req, &user, method, rest).await
        }

        _ => Err(ApiError::NotFound("Not Found".to_string())),
    }
}

async fn route_character(
    state: &AppState,
    req: &ApiRequest,
    user: &UserRecord,
    method: &Method,
    rest: &[&str],
) -> ApiResult<HttpResponse> {
    match (method, rest) {
        (&Method::GET, []) => characters::list(state, user).await,
        (&Method::POST, []) => characters::create(state, req, user).await,
        (&Method::GET, [local_id]) => characters::get(state, user, parse_id(local_id)?).await,
        (&Method::PUT, [local_id]) => {
            characters::update(state, req, user, parse_id(local_id)?).await
        }
        (&Method::DELETE, [local_id]) => {
            characters::delete(state, user, parse_id(local_id)?).await
        }
        (&Method::PATCH, [local_id, "set_level"]) => {
            characters::set_level(state, req, user, parse_id(local_id)?).await
        }
        (&Method::POST, [local_id, "level_up"]) => {
            characters::level_up(state, user, parse_id(local_id)?).await
        }
        (&Method::GET, [local_id, "effective_stats"]) => {
            characters::effective_stats(state, user, parse_id(local_id)?).await
        }

        (&Method::GET, [local_id, "abilities"]) => {
            inventory::list_abilities(state, user, parse_id(local_id)?).await
        }
        (&Method::POST, [local_id, "abilities"]) => {
            inventory::add_ability(state, req, user, parse_id(local_id)?).await
        }
        (&Method::DELETE, [local_id, "abilities", ability_id]) => {
            inventory::remove_ability(state, user, parse_id(local_id)?, parse_id(ability_id)?).await
        }

        (&Method::GET, [local_id, "equipment"]) => {
            inventory::list_equipment(state, user, parse_id(local_id)?, false).await
        }
        (&Method::GET, [local_id, "equipment", "equipped"]) => {
            inventory::list_equipment(state, user, parse_id(local_id)?, true).await
        }
        (&Method::POST, [local_id, "equipment"]) => {
            inventory::add_equipment(state, req, user, parse_id(local_id)?).await
        }
        (&Method::DELETE, [local_id, "equipment", equipment_id]) => {
            inventory::remove_equipment(state, user, parse_id(local_id)?, parse_id(equipment_id)?).await
        }
        (&Method::PATCH, [local_id, "equipment", equipment_id, "equip"]) => {
            inventory::set_equipped(state, user, parse_id(local_id)?, parse_id(equipment_id)?, true).await
        }
        (&Method::PATCH, [local_id, "equipment", equipment_id, "unequip"]) => {
            inventory::set_equipped(state, user, parse_id(local_id)?, parse_id(equipment_id)?, false).await
        }

        _ => Err(ApiError::NotFound("Not Found".to_string())),
    }
}
