//! A character's learned abilities and owned equipment.

use log::info;

use charsheet_shared::{AddCharacterAbility, AddCharacterEquipment};

use super::characters::load_character;
use crate::network::api::{ApiRequest, AppState};
use crate::network::error::{ApiError, ApiResult};
use crate::network::response::{no_content, ok, HttpResponse};
use crate::persistence::UserRecord;

// =============================================================================
// Abilities
// =============================================================================

pub async fn list_abilities(state: &AppState, user: &UserRecord, local_id: i64) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    Ok(ok(&state.repo.list_character_abilities(character.id).await?))
}

pub async fn add_ability(
    state: &AppState,
    req: &ApiRequest,
    user: &UserRecord,
    local_id: i64,
) -> ApiResult<HttpResponse> {
    let add: AddCharacterAbility = req.json()?;
    add.validate().map_err(ApiError::Validation)?;
    let character = load_character(state, user, local_id).await?;

    let learned = state.repo.add_character_ability(character.id, &add).await?;
    info!("Character {} learned {}", character.id, learned.name);
    Ok(ok(&learned))
}

pub async fn remove_ability(
    state: &AppState,
    user: &UserRecord,
    local_id: i64,
    ability_id: i64,
) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    state.repo.remove_character_ability(character.id, ability_id).await?;
    Ok(no_content())
}

// =============================================================================
// Equipment
// =============================================================================

pub async fn list_equipment(
    state: &AppState,
    user: &UserRecord,
    local_id: i64,
    equipped_only: bool,
) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    Ok(ok(&state.repo.list_character_equipment(character.id, equipped_only).await?))
}

pub async fn add_equipment(
    state: &AppState,
    req: &ApiRequest,
    user: &UserRecord,
    local_id: i64,
) -> ApiResult<HttpResponse> {
    let add: AddCharacterEquipment = req.json()?;
    let character = load_character(state, user, local_id).await?;

    let item = state.repo.add_character_equipment(character.id, &add).await?;
    info!("Character {} received {} (slot {})", character.id, item.name, item.id);
    Ok(ok(&item))
}

pub async fn remove_equipment(
    state: &AppState,
    user: &UserRecord,
    local_id: i64,
    equipment_id: i64,
) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    state.repo.remove_character_equipment(character.id, equipment_id).await?;
    Ok(no_content())
}

pub async fn set_equipped(
    state: &AppState,
    user: &UserRecord,
    local_id: i64,
    equipment_id: i64,
    equipped: bool,
) -> ApiResult<HttpResponse> {
    let character = load_character(state, user, local_id).await?;
    let item = state.repo.set_equipped(character.id, equipment_id, equipped).await?;
    Ok(ok(&item))
}
