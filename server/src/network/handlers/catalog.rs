//! Classes, progression rules, abilities and equipment.

use log::info;

use charsheet_shared::{NewAbility, NewCharacterClass, NewEquipment, NewProgressionRule};

use crate::network::api::{ApiRequest, AppState};
use crate::network::error::{ApiError, ApiResult};
use crate::network::response::{no_content, ok, HttpResponse};

// =============================================================================
// Classes
// =============================================================================

pub async fn list_classes(state: &AppState) -> ApiResult<HttpResponse> {
    Ok(ok(&state.repo.list_classes().await?))
}

pub async fn create_class(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let new: NewCharacterClass = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    let class = state.repo.create_class(&new).await?;
    info!("Created class {} (ID: {})", class.name, class.id);
    Ok(ok(&class))
}

pub async fn update_class(state: &AppState, req: &ApiRequest, id: i64) -> ApiResult<HttpResponse> {
    let new: NewCharacterClass = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    Ok(ok(&state.repo.update_class(id, &new).await?))
}

pub async fn delete_class(state: &AppState, id: i64) -> ApiResult<HttpResponse> {
    state.repo.delete_class(id).await?;
    info!("Deleted class {}", id);
    Ok(no_content())
}

// =============================================================================
// Progression rules
// =============================================================================

pub async fn list_progressions(state: &AppState) -> ApiResult<HttpResponse> {
    Ok(ok(&state.repo.list_progressions().await?))
}

pub async fn get_progression(state: &AppState, id: i64) -> ApiResult<HttpResponse> {
    let rule = state
        .repo
        .get_progression(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Progression rule not found".to_string()))?;
    Ok(ok(&rule))
}

pub async fn create_progression(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let new: NewProgressionRule = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    let rule = state.repo.create_progression(&new).await?;
    info!(
        "Created progression rule {} (class {}, level {})",
        rule.id, rule.character_class_id, rule.level
    );
    Ok(ok(&rule))
}

pub async fn update_progression(
    state: &AppState,
    req: &ApiRequest,
    id: i64,
) -> ApiResult<HttpResponse> {
    let new: NewProgressionRule = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    Ok(ok(&state.repo.update_progression(id, &new).await?))
}

pub async fn delete_progression(state: &AppState, id: i64) -> ApiResult<HttpResponse> {
    state.repo.delete_progression(id).await?;
    Ok(no_content())
}

pub async fn add_progression_ability(
    state: &AppState,
    id: i64,
    ability_id: i64,
) -> ApiResult<HttpResponse> {
    Ok(ok(&state.repo.add_progression_ability(id, ability_id).await?))
}

pub async fn remove_progression_ability(
    state: &AppState,
    id: i64,
    ability_id: i64,
) -> ApiResult<HttpResponse> {
    state.repo.remove_progression_ability(id, ability_id).await?;
    Ok(no_content())
}

// =============================================================================
// Abilities and equipment
// =============================================================================

pub async fn list_abilities(state: &AppState) -> ApiResult<HttpResponse> {
    Ok(ok(&state.repo.list_abilities().await?))
}

pub async fn create_ability(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let new: NewAbility = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    let ability = state.repo.create_ability(&new).await?;
    info!("Created ability {} (ID: {})", ability.name, ability.id);
    Ok(ok(&ability))
}

pub async fn list_equipment(state: &AppState) -> ApiResult<HttpResponse> {
    Ok(ok(&state.repo.list_equipment().await?))
}

pub async fn create_equipment(state: &AppState, req: &ApiRequest) -> ApiResult<HttpResponse> {
    let new: NewEquipment = req.json()?;
    new.validate().map_err(ApiError::Validation)?;

    let equipment = state.repo.create_equipment(&new).await?;
    info!("Created equipment {} (ID: {})", equipment.name, equipment.id);
    Ok(ok(&equipment))
}
