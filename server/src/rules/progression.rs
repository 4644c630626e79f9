//! Level changes and ability synchronisation.
//!
//! A character's learned abilities are always exactly the union of the
//! grants of its class's progression rules from level 1 up to its level.
//! Abilities added by hand are discarded on the next sync.

use log::{debug, info};

use charsheet_shared::{granted_abilities, validate_level, Character};

use crate::persistence::{Repository, StoreError, StoreResult};

/// Set `character` to `target_level` and rebuild its ability list.
///
/// Idempotent: syncing twice to the same level leaves the same abilities.
pub async fn sync_level(
    repo: &dyn Repository,
    character: &Character,
    target_level: i32,
) -> StoreResult<Character> {
    validate_level(target_level).map_err(StoreError::Invalid)?;

    let rules = repo
        .progression_for_class(character.character_class_id, target_level)
        .await?;
    let grants = granted_abilities(&rules, target_level);
    debug!(
        "Character {} level {} -> {}: {} rules, {} abilities",
        character.id,
        character.level,
        target_level,
        rules.len(),
        grants.len()
    );

    let updated = repo.sync_abilities(character.id, target_level, &grants).await?;
    info!(
        "Character {} (owner {}) is now level {}",
        updated.id, updated.owner_id, updated.level
    );
    Ok(updated)
}

/// Advance one level
pub async fn level_up(repo: &dyn Repository, character: &Character) -> StoreResult<Character> {
    let next = character
        .level
        .checked_add(1)
        .ok_or_else(|| StoreError::Invalid("Character is already at the maximum level".to_string()))?;
    sync_level(repo, character, next).await
}
