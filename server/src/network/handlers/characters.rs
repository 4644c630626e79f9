//! Character CRUD, levelling and effective stats.
//!
//! Characters are addressed by the caller's local id. A character owned by
//! someone else is indistinguishable from one that does not exist.

use log::info;

use charsheet_shared::{validate_level, Character, CharacterSheet, NewCharacter, SetLevelRequest};

use crate::network::api::{ApiRequest, AppState};
use crate::network::error::{ApiError, ApiResult};
use crate::network::response::{no_content, ok, HttpResponse};
use crate::persistence::UserRecord;
use crate::rules;

/// Look up one of the caller's characters
pub async fn load_character(state: &AppState, user: &UserRecord, local_id: i64) -> ApiResult<Character> {
    state
        .repo
        .get_character(user.id, local_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Character not found".to_string()))
}

/// Attach class, abilities and inventory
async fn sheet(state: &AppState, character: Character) -> ApiResult<CharacterSheet> {
    let character_class = state.repo.get_class(character.character_class_id).await?;
    let abilities = state.repo.list_character_abilities(character.id).await?;
    let equipment = state.repo.list_character_equipment(character.id, false).await?;

    Ok(CharacterSheet {
        character,
        character_class,
        abilities,
        equipment,
    })
}

pub async fn list(state: &AppState, user: &UserRecord) -> ApiResult<HttpResponse> {
    let characters = state.repo.list_characters(user.id).await?;

    let mut sheets = Vec::with_capacity(characters.len());
    for character in characters {
        sheets.push(sheet(state, character).await?);
    }
    Ok(ok(&sheets))
}

pub async fn create(state: &AppState, req: &ApiRequest, user: &UserRecord) -> ApiResult<HttpResponse> {
    let new: NewCharacter = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    let character = state.repo.create_character(user.id, &new).await?;
    info!(
        "User {} created character {} (local {}, global {})",
        user.username, character.name, character.local_id, character.id
    );
    Ok(ok(&sheet(state, character).await?))
}

pub async fn get(state: &AppState, user: &UserRecord, local_id: i64) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    Ok(ok(&sheet(state, character).await?))
}

pub async fn update(
    state: &AppState,
    req: &ApiRequest,
    user: &UserRecord,
    local_id: i64,
) -> ApiResult<HttpResponse> {
    let new: NewCharacter = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    let character = load_character(state, user, local_id).await?;
    let updated = state.repo.update_character(character.id, &new).await?;
    Ok(ok(&sheet(state, updated).await?))
}

pub async fn delete(state: &AppState, user: &UserRecord, local_id: i64) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    state.repo.delete_character(character.id).await?;
    info!("User {} deleted character {} (local {})", user.username, character.name, local_id);
    Ok(no_content())
}

/// `new_level` comes from the query string, or failing that a JSON body
pub async fn set_level(
    state: &AppState,
    req: &ApiRequest,
    user: &UserRecord,
    local_id: i64,
) -> ApiResult<HttpResponse> {
    let new_level = match req.query_param("new_level") {
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| ApiError::Validation(format!("new_level is not an integer: {}", raw)))?,
        None if !req.body.is_empty() => req.json::<SetLevelRequest>()?.new_level,
        None => return Err(ApiError::Validation("new_level is required".to_string())),
    };
    validate_level(new_level).map_err(ApiError::Validation)?;

    let character = load_character(state, user, local_id).await?;
    let updated = rules::sync_level(state.repo.as_ref(), &character, new_level).await?;
    Ok(ok(&sheet(state, updated).await?))
}

pub async fn level_up(state: &AppState, user: &UserRecord, local_id: i64) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    let updated = rules::level_up(state.repo.as_ref(), &character).await?;
    Ok(ok(&sheet(state, updated).await?))
}

pub async fn effective_stats(state: &AppState, user: &UserRecord, local_id: i64) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    let stats = rules::compute_effective_stats(state.repo.as_ref(), &character).await?;
    Ok(ok(&stats))
}
