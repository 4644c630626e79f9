//! Persistence layer for the character server.
//!
//! Handlers and rule engines only see the `Repository` trait. `Database`
//! backs it with PostgreSQL; `MemoryStore` keeps everything in-process and is
//! what the test-suite runs against.

mod database;
mod memory;
mod schema;

pub use database::Database;
pub use memory::MemoryStore;

use std::sync::Arc;
use async_trait::async_trait;
use log::info;

use charsheet_shared::{
    Ability, AddCharacterAbility, AddCharacterEquipment, Character, CharacterAbility,
    CharacterClass, CharacterEquipment, Equipment, NewAbility, NewCharacter, NewCharacterClass,
    NewEquipment, NewProgressionRule, ProgressionRule,
};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named entity does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// A uniqueness rule was violated
    #[error("{0}")]
    Conflict(String),
    /// A value failed a check constraint
    #[error("{0}")]
    Invalid(String),
    #[error("Database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Account row, including the password hash
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

/// Shared handle to whichever store the server runs on
pub type SharedRepository = Arc<dyn Repository>;

#[async_trait]
pub trait Repository: Send + Sync {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert an account. Fails with `Conflict` if the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord>;

    async fn find_user(&self, username: &str) -> StoreResult<Option<UserRecord>>;

    // =========================================================================
    // Catalog
    // =========================================================================

    async fn create_class(&self, new: &NewCharacterClass) -> StoreResult<CharacterClass>;

    async fn list_classes(&self) -> StoreResult<Vec<CharacterClass>>;

    async fn update_class(&self, id: i64, new: &NewCharacterClass) -> StoreResult<CharacterClass>;

    /// Fails with `Conflict` while characters or progression rules use the class
    async fn delete_class(&self, id: i64) -> StoreResult<()>;

    async fn create_ability(&self, new: &NewAbility) -> StoreResult<Ability>;

    async fn list_abilities(&self) -> StoreResult<Vec<Ability>>;

    async fn create_equipment(&self, new: &NewEquipment) -> StoreResult<Equipment>;

    async fn list_equipment(&self) -> StoreResult<Vec<Equipment>>;

    // =========================================================================
    // Class progression
    // =========================================================================

    /// Fails with `Conflict` if the class already has a rule for that level
    async fn create_progression(&self, new: &NewProgressionRule) -> StoreResult<ProgressionRule>;

    async fn list_progressions(&self) -> StoreResult<Vec<ProgressionRule>>;

    async fn get_progression(&self, id: i64) -> StoreResult<Option<ProgressionRule>>;

    async fn update_progression(
        &self,
        id: i64,
        new: &NewProgressionRule,
    ) -> StoreResult<ProgressionRule>;

    async fn delete_progression(&self, id: i64) -> StoreResult<()>;

    async fn add_progression_ability(&self, id: i64, ability_id: i64) -> StoreResult<ProgressionRule>;

    async fn remove_progression_ability(
        &self,
        id: i64,
        ability_id: i64,
    ) -> StoreResult<ProgressionRule>;

    /// Rules for a class at or below `max_level`, in ascending level order
    async fn progression_for_class(
        &self,
        class_id: i64,
        max_level: i32,
    ) -> StoreResult<Vec<ProgressionRule>>;

    // =========================================================================
    // Characters
    // =========================================================================

    /// Insert a character, assigning the owner's next local id atomically
    async fn create_character(&self, owner_id: i64, new: &NewCharacter) -> StoreResult<Character>;

    async fn list_characters(&self, owner_id: i64) -> StoreResult<Vec<Character>>;

    /// Look a character up inside its owner's local id space
    async fn get_character(&self, owner_id: i64, local_id: i64) -> StoreResult<Option<Character>>;

    async fn get_class(&self, id: i64) -> StoreResult<Option<CharacterClass>>;

    /// Replace every field except the ids
    async fn update_character(&self, character_id: i64, new: &NewCharacter) -> StoreResult<Character>;

    /// Delete a character together with its abilities and equipment
    async fn delete_character(&self, character_id: i64) -> StoreResult<()>;

    /// In one transaction: drop all learned abilities, learn `ability_ids`
    /// with catalog default uses (unknown ids are skipped) and set the level.
    async fn sync_abilities(
        &self,
        character_id: i64,
        level: i32,
        ability_ids: &[i64],
    ) -> StoreResult<Character>;

    // =========================================================================
    // Character abilities and equipment
    // =========================================================================

    async fn list_character_abilities(&self, character_id: i64) -> StoreResult<Vec<CharacterAbility>>;

    /// Fails with `Conflict` if the character already knows the ability
    async fn add_character_ability(
        &self,
        character_id: i64,
        add: &AddCharacterAbility,
    ) -> StoreResult<CharacterAbility>;

    async fn remove_character_ability(&self, character_id: i64, ability_id: i64) -> StoreResult<()>;

    async fn list_character_equipment(
        &self,
        character_id: i64,
        equipped_only: bool,
    ) -> StoreResult<Vec<CharacterEquipment>>;

    async fn add_character_equipment(
        &self,
        character_id: i64,
        add: &AddCharacterEquipment,
    ) -> StoreResult<CharacterEquipment>;

    /// Removes the oldest inventory entry holding `equipment_id`
    async fn remove_character_equipment(&self, character_id: i64, equipment_id: i64) -> StoreResult<()>;

    /// Toggles the oldest inventory entry holding `equipment_id`
    async fn set_equipped(
        &self,
        character_id: i64,
        equipment_id: i64,
        equipped: bool,
    ) -> StoreResult<CharacterEquipment>;
}

/// Open the configured store.
///
/// `memory_store` selects the in-process store; otherwise `database_url` is a
/// PostgreSQL URL and the schema is created if missing.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    memory_store: bool,
) -> StoreResult<SharedRepository> {
    if memory_store {
        info!("Using in-memory store (data is lost on shutdown)");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db = Database::connect(database_url, max_connections).await?;
    info!("Connected to PostgreSQL");

    db.migrate().await?;
    info!("Database schema ready");

    Ok(Arc::new(db))
}
