//! PostgreSQL database operations.

use async_trait::async_trait;
use log::warn;
use sqlx::{postgres::{PgPoolOptions, PgRow}, types::Json, PgPool, Row};
use std::collections::HashSet;

use charsheet_shared::{
    parse_grants_lenient, Ability, AddCharacterAbility, AddCharacterEquipment, BaseStats,
    Character, CharacterAbility, CharacterClass, CharacterEquipment, Equipment, ItemEffects,
    NewAbility, NewCharacter, NewCharacterClass, NewEquipment, NewProgressionRule,
    ProgressionRule,
};

use super::schema::MIGRATION_V1;
use super::{Repository, StoreError, StoreResult, UserRecord};

const CHARACTER_COLUMNS: &str = "id, owner_id, local_id, name, character_class_id, level, \
     max_hp, current_hp, armor_class, strength, dexterity, constitution, intelligence, wisdom, charisma";

const PROGRESSION_COLUMNS: &str =
    "id, character_class_id, level, hp_bonus, other_bonuses, abilities";

const CHARACTER_ABILITY_SELECT: &str =
    "SELECT ca.id, ca.ability_id, ca.current_uses, a.name, a.available_classes, a.uses, a.description";

const CHARACTER_EQUIPMENT_SELECT: &str =
    "SELECT ce.id, ce.equipment_id, ce.is_equipped, e.name, e.cost, e.rarity, e.description, e.effects";

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_error)?;

        Ok(Self { pool })
    }

    /// Create any missing tables
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(MIGRATION_V1)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Fail with `NotFound` naming the first id that is not in the ability catalog
    async fn ensure_abilities_exist(&self, ids: &[i64]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let found: Vec<i64> = sqlx::query_scalar("SELECT id FROM abilities WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let found: HashSet<i64> = found.into_iter().collect();

        match ids.iter().find(|id| !found.contains(id)) {
            Some(missing) => Err(StoreError::NotFound(format!("Ability {}", missing))),
            None => Ok(()),
        }
    }

    /// Read-modify-write of a rule's grant list under a row lock
    async fn edit_grants(
        &self,
        id: i64,
        ability_id: i64,
        edit: impl FnOnce(&mut Vec<i64>) -> StoreResult<()> + Send,
    ) -> StoreResult<ProgressionRule> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM class_progression WHERE id = $1 FOR UPDATE",
            PROGRESSION_COLUMNS
        ))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;
        let mut rule = row
            .map(|r| progression_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("Progression rule".to_string()))?;

        let ability_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM abilities WHERE id = $1)"
        )
            .bind(ability_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        if !ability_exists {
            return Err(StoreError::NotFound("Ability".to_string()));
        }

        edit(&mut rule.abilities)?;

        sqlx::query("UPDATE class_progression SET abilities = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(&rule.abilities))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(rule)
    }
}

#[async_trait]
impl Repository for Database {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id"
        )
            .bind(username)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "User", "Username already registered"))?;

        Ok(UserRecord {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query("SELECT id, username, password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(|r| UserRecord {
            id: r.get("id"),
            username: r.get("username"),
            password_hash: r.get("password_hash"),
        }))
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn create_class(&self, new: &NewCharacterClass) -> StoreResult<CharacterClass> {
        let row = sqlx::query(
            "INSERT INTO character_classes (name, description) VALUES ($1, $2)
             RETURNING id, name, description"
        )
            .bind(&new.name)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Character class", "Class with this name already exists"))?;

        Ok(class_from_row(&row))
    }

    async fn list_classes(&self) -> StoreResult<Vec<CharacterClass>> {
        let rows = sqlx::query("SELECT id, name, description FROM character_classes ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(class_from_row).collect())
    }

    async fn update_class(&self, id: i64, new: &NewCharacterClass) -> StoreResult<CharacterClass> {
        let row = sqlx::query(
            "UPDATE character_classes SET name = $2, description = $3 WHERE id = $1
             RETURNING id, name, description"
        )
            .bind(id)
            .bind(&new.name)
            .bind(&new.description)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Character class", "Class with this name already exists"))?;

        row.map(|r| class_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("Character class".to_string()))
    }

    async fn delete_class(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM character_classes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    StoreError::Conflict("Character class is still in use".to_string())
                }
                other => db_error(other),
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Character class".to_string()));
        }
        Ok(())
    }

    async fn create_ability(&self, new: &NewAbility) -> StoreResult<Ability> {
        let row = sqlx::query(
            "INSERT INTO abilities (name, available_classes, uses, description) VALUES ($1, $2, $3, $4)
             RETURNING id, name, available_classes, uses, description"
        )
            .bind(&new.name)
            .bind(&new.available_classes)
            .bind(new.uses)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Ability", "Ability with this name already exists"))?;

        Ok(ability_from_row(&row, "id"))
    }

    async fn list_abilities(&self) -> StoreResult<Vec<Ability>> {
        let rows = sqlx::query(
            "SELECT id, name, available_classes, uses, description FROM abilities ORDER BY id"
        )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(|r| ability_from_row(r, "id")).collect())
    }

    async fn create_equipment(&self, new: &NewEquipment) -> StoreResult<Equipment> {
        let effects = new.effects.clone().unwrap_or_default();
        let row = sqlx::query(
            "INSERT INTO equipment (name, cost, rarity, description, effects) VALUES ($1, $2, $3, $4, $5)
             RETURNING id, name, cost, rarity, description, effects"
        )
            .bind(&new.name)
            .bind(new.cost)
            .bind(&new.rarity)
            .bind(&new.description)
            .bind(Json(&effects))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Equipment", "Equipment with this name already exists"))?;

        Ok(equipment_from_row(&row, "id"))
    }

    async fn list_equipment(&self) -> StoreResult<Vec<Equipment>> {
        let rows = sqlx::query(
            "SELECT id, name, cost, rarity, description, effects FROM equipment ORDER BY id"
        )
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(|r| equipment_from_row(r, "id")).collect())
    }

    // =========================================================================
    // Progression Operations
    // =========================================================================

    async fn create_progression(&self, new: &NewProgressionRule) -> StoreResult<ProgressionRule> {
        self.ensure_abilities_exist(&new.abilities).await?;

        let row = sqlx::query(&format!(
            "INSERT INTO class_progression (character_class_id, level, hp_bonus, other_bonuses, abilities)
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            PROGRESSION_COLUMNS
        ))
            .bind(new.character_class_id)
            .bind(new.level)
            .bind(new.hp_bonus)
            .bind(&new.other_bonuses)
            .bind(Json(&new.abilities))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(
                e,
                "Character class",
                "A progression rule for this class and level already exists",
            ))?;

        Ok(progression_from_row(&row))
    }

    async fn list_progressions(&self) -> StoreResult<Vec<ProgressionRule>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM class_progression ORDER BY character_class_id, level",
            PROGRESSION_COLUMNS
        ))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(progression_from_row).collect())
    }

    async fn get_progression(&self, id: i64) -> StoreResult<Option<ProgressionRule>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM class_progression WHERE id = $1",
            PROGRESSION_COLUMNS
        ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(|r| progression_from_row(&r)))
    }

    async fn update_progression(
        &self,
        id: i64,
        new: &NewProgressionRule,
    ) -> StoreResult<ProgressionRule> {
        self.ensure_abilities_exist(&new.abilities).await?;

        let row = sqlx::query(&format!(
            "UPDATE class_progression
             SET character_class_id = $2, level = $3, hp_bonus = $4, other_bonuses = $5, abilities = $6
             WHERE id = $1 RETURNING {}",
            PROGRESSION_COLUMNS
        ))
            .bind(id)
            .bind(new.character_class_id)
            .bind(new.level)
            .bind(new.hp_bonus)
            .bind(&new.other_bonuses)
            .bind(Json(&new.abilities))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| constraint_error(
                e,
                "Character class",
                "A progression rule for this class and level already exists",
            ))?;

        row.map(|r| progression_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("Progression rule".to_string()))
    }

    async fn delete_progression(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM class_progression WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Progression rule".to_string()));
        }
        Ok(())
    }

    async fn add_progression_ability(&self, id: i64, ability_id: i64) -> StoreResult<ProgressionRule> {
        self.edit_grants(id, ability_id, |grants| {
            if grants.contains(&ability_id) {
                return Err(StoreError::Conflict("Ability is already granted at this level".to_string()));
            }
            grants.push(ability_id);
            Ok(())
        })
        .await
    }

    async fn remove_progression_ability(
        &self,
        id: i64,
        ability_id: i64,
    ) -> StoreResult<ProgressionRule> {
        self.edit_grants(id, ability_id, |grants| {
            let before = grants.len();
            grants.retain(|granted| *granted != ability_id);
            if grants.len() == before {
                return Err(StoreError::NotFound("Link".to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn progression_for_class(
        &self,
        class_id: i64,
        max_level: i32,
    ) -> StoreResult<Vec<ProgressionRule>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM class_progression
             WHERE character_class_id = $1 AND level <= $2
             ORDER BY level, id",
            PROGRESSION_COLUMNS
        ))
            .bind(class_id)
            .bind(max_level)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(progression_from_row).collect())
    }

    // =========================================================================
    // Character Operations
    // =========================================================================

    async fn create_character(&self, owner_id: i64, new: &NewCharacter) -> StoreResult<Character> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Serialise creations per owner so the max+1 read cannot race
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let local_id: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(local_id), 0) + 1 FROM characters WHERE owner_id = $1"
        )
            .bind(owner_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        let s = &new.stats;
        let row = sqlx::query(&format!(
            "INSERT INTO characters (owner_id, local_id, name, character_class_id, level,
                                     max_hp, current_hp, armor_class, strength, dexterity,
                                     constitution, intelligence, wisdom, charisma)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING {}",
            CHARACTER_COLUMNS
        ))
            .bind(owner_id)
            .bind(local_id)
            .bind(&new.name)
            .bind(new.character_class_id)
            .bind(new.level)
            .bind(s.max_hp)
            .bind(s.current_hp)
            .bind(s.armor_class)
            .bind(s.strength)
            .bind(s.dexterity)
            .bind(s.constitution)
            .bind(s.intelligence)
            .bind(s.wisdom)
            .bind(s.charisma)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| constraint_error(e, "Character class", "Character id already assigned, retry"))?;

        tx.commit().await.map_err(db_error)?;

        Ok(character_from_row(&row))
    }

    async fn list_characters(&self, owner_id: i64) -> StoreResult<Vec<Character>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM characters WHERE owner_id = $1 ORDER BY local_id",
            CHARACTER_COLUMNS
        ))
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(character_from_row).collect())
    }

    async fn get_character(&self, owner_id: i64, local_id: i64) -> StoreResult<Option<Character>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM characters WHERE owner_id = $1 AND local_id = $2",
            CHARACTER_COLUMNS
        ))
            .bind(owner_id)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(|r| character_from_row(&r)))
    }

    async fn get_class(&self, id: i64) -> StoreResult<Option<CharacterClass>> {
        let row = sqlx::query("SELECT id, name, description FROM character_classes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(|r| class_from_row(&r)))
    }

    async fn update_character(&self, character_id: i64, new: &NewCharacter) -> StoreResult<Character> {
        let s = &new.stats;
        let row = sqlx::query(&format!(
            "UPDATE characters SET
                name = $2, character_class_id = $3, level = $4,
                max_hp = $5, current_hp = $6, armor_class = $7,
                strength = $8, dexterity = $9, constitution = $10,
                intelligence = $11, wisdom = $12, charisma = $13
             WHERE id = $1 RETURNING {}",
            CHARACTER_COLUMNS
        ))
            .bind(character_id)
            .bind(&new.name)
            .bind(new.character_class_id)
            .bind(new.level)
            .bind(s.max_hp)
            .bind(s.current_hp)
            .bind(s.armor_class)
            .bind(s.strength)
            .bind(s.dexterity)
            .bind(s.constitution)
            .bind(s.intelligence)
            .bind(s.wisdom)
            .bind(s.charisma)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Character class", "Character conflicts with an existing one"))?;

        row.map(|r| character_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("Character".to_string()))
    }

    async fn delete_character(&self, character_id: i64) -> StoreResult<()> {
        // Cascade removes abilities and equipment
        let result = sqlx::query("DELETE FROM characters WHERE id = $1")
            .bind(character_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Character".to_string()));
        }
        Ok(())
    }

    async fn sync_abilities(
        &self,
        character_id: i64,
        level: i32,
        ability_ids: &[i64],
    ) -> StoreResult<Character> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(&format!(
            "UPDATE characters SET level = $2 WHERE id = $1 RETURNING {}",
            CHARACTER_COLUMNS
        ))
            .bind(character_id)
            .bind(level)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;
        let character = row
            .map(|r| character_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("Character".to_string()))?;

        sqlx::query("DELETE FROM character_abilities WHERE character_id = $1")
            .bind(character_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        // Grant order is preserved; ids missing from the catalog drop out of the join
        sqlx::query(
            "INSERT INTO character_abilities (character_id, ability_id, current_uses)
             SELECT $1, a.id, a.uses
             FROM UNNEST($2::BIGINT[]) WITH ORDINALITY AS g(ability_id, ord)
             JOIN abilities a ON a.id = g.ability_id
             ORDER BY g.ord
             ON CONFLICT (character_id, ability_id) DO NOTHING"
        )
            .bind(character_id)
            .bind(ability_ids.to_vec())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(character)
    }

    // =========================================================================
    // Character Ability Operations
    // =========================================================================

    async fn list_character_abilities(&self, character_id: i64) -> StoreResult<Vec<CharacterAbility>> {
        let rows = sqlx::query(&format!(
            "{} FROM character_abilities ca
             JOIN abilities a ON a.id = ca.ability_id
             WHERE ca.character_id = $1
             ORDER BY ca.id",
            CHARACTER_ABILITY_SELECT
        ))
            .bind(character_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(character_ability_from_row).collect())
    }

    async fn add_character_ability(
        &self,
        character_id: i64,
        add: &AddCharacterAbility,
    ) -> StoreResult<CharacterAbility> {
        let default_uses: Option<i32> = sqlx::query_scalar("SELECT uses FROM abilities WHERE id = $1")
            .bind(add.ability_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        let default_uses = default_uses.ok_or_else(|| StoreError::NotFound("Ability".to_string()))?;

        let row = sqlx::query(&format!(
            "WITH ca AS (
                INSERT INTO character_abilities (character_id, ability_id, current_uses)
                VALUES ($1, $2, $3)
                RETURNING id, ability_id, current_uses
             )
             {} FROM ca JOIN abilities a ON a.id = ca.ability_id",
            CHARACTER_ABILITY_SELECT
        ))
            .bind(character_id)
            .bind(add.ability_id)
            .bind(add.current_uses.unwrap_or(default_uses))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Character", "This character already has this ability"))?;

        Ok(character_ability_from_row(&row))
    }

    async fn remove_character_ability(&self, character_id: i64, ability_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM character_abilities WHERE character_id = $1 AND ability_id = $2"
        )
            .bind(character_id)
            .bind(ability_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Ability for this character".to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Character Equipment Operations
    // =========================================================================

    async fn list_character_equipment(
        &self,
        character_id: i64,
        equipped_only: bool,
    ) -> StoreResult<Vec<CharacterEquipment>> {
        let rows = sqlx::query(&format!(
            "{} FROM character_equipment ce
             JOIN equipment e ON e.id = ce.equipment_id
             WHERE ce.character_id = $1 AND ($2 = FALSE OR ce.is_equipped)
             ORDER BY ce.id",
            CHARACTER_EQUIPMENT_SELECT
        ))
            .bind(character_id)
            .bind(equipped_only)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.iter().map(character_equipment_from_row).collect())
    }

    async fn add_character_equipment(
        &self,
        character_id: i64,
        add: &AddCharacterEquipment,
    ) -> StoreResult<CharacterEquipment> {
        let row = sqlx::query(&format!(
            "WITH ce AS (
                INSERT INTO character_equipment (character_id, equipment_id, is_equipped)
                VALUES ($1, $2, $3)
                RETURNING id, equipment_id, is_equipped
             )
             {} FROM ce JOIN equipment e ON e.id = ce.equipment_id",
            CHARACTER_EQUIPMENT_SELECT
        ))
            .bind(character_id)
            .bind(add.equipment_id)
            .bind(add.is_equipped)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Equipment", "Equipment conflicts with an existing entry"))?;

        Ok(character_equipment_from_row(&row))
    }

    async fn remove_character_equipment(&self, character_id: i64, equipment_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM character_equipment WHERE id = (
                SELECT id FROM character_equipment
                WHERE character_id = $1 AND equipment_id = $2
                ORDER BY id LIMIT 1
             )"
        )
            .bind(character_id)
            .bind(equipment_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Equipment for this character".to_string()));
        }
        Ok(())
    }

    async fn set_equipped(
        &self,
        character_id: i64,
        equipment_id: i64,
        equipped: bool,
    ) -> StoreResult<CharacterEquipment> {
        let row = sqlx::query(&format!(
            "WITH ce AS (
                UPDATE character_equipment SET is_equipped = $3
                WHERE id = (
                    SELECT id FROM character_equipment
                    WHERE character_id = $1 AND equipment_id = $2
                    ORDER BY id LIMIT 1
                )
                RETURNING id, equipment_id, is_equipped
             )
             {} FROM ce JOIN equipment e ON e.id = ce.equipment_id",
            CHARACTER_EQUIPMENT_SELECT
        ))
            .bind(character_id)
            .bind(equipment_id)
            .bind(equipped)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|r| character_equipment_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("Equipment for this character".to_string()))
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Translate constraint violations into domain errors
fn constraint_error(e: sqlx::Error, missing: &str, duplicate: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(duplicate.to_string());
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::NotFound(missing.to_string());
        }
        if db_err.is_check_violation() {
            return StoreError::Invalid(db_err.message().to_string());
        }
    }
    db_error(e)
}

fn class_from_row(r: &PgRow) -> CharacterClass {
    CharacterClass {
        id: r.get("id"),
        name: r.get("name"),
        description: r.get("description"),
    }
}

fn ability_from_row(r: &PgRow, id_column: &str) -> Ability {
    Ability {
        id: r.get(id_column),
        name: r.get("name"),
        available_classes: r.get("available_classes"),
        uses: r.get("uses"),
        description: r.get("description"),
    }
}

fn equipment_from_row(r: &PgRow, id_column: &str) -> Equipment {
    let id: i64 = r.get(id_column);
    let effects_json: serde_json::Value = r.get("effects");
    if !effects_json.is_object() {
        warn!("Equipment {} has a non-object effects document: {}", id, effects_json);
    }

    Equipment {
        id,
        name: r.get("name"),
        cost: r.get("cost"),
        rarity: r.get("rarity"),
        description: r.get("description"),
        effects: ItemEffects::from_json_lenient(&effects_json),
    }
}

fn progression_from_row(r: &PgRow) -> ProgressionRule {
    let id: i64 = r.get("id");
    let abilities_json: serde_json::Value = r.get("abilities");
    if !abilities_json.is_array() {
        warn!("Progression rule {} has a non-array ability grant document: {}", id, abilities_json);
    }

    ProgressionRule {
        id,
        character_class_id: r.get("character_class_id"),
        level: r.get("level"),
        hp_bonus: r.get("hp_bonus"),
        other_bonuses: r.get("other_bonuses"),
        abilities: parse_grants_lenient(&abilities_json),
    }
}

fn character_from_row(r: &PgRow) -> Character {
    Character {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        local_id: r.get("local_id"),
        name: r.get("name"),
        character_class_id: r.get("character_class_id"),
        level: r.get("level"),
        stats: BaseStats {
            max_hp: r.get("max_hp"),
            current_hp: r.get("current_hp"),
            armor_class: r.get("armor_class"),
            strength: r.get("strength"),
            dexterity: r.get("dexterity"),
            constitution: r.get("constitution"),
            intelligence: r.get("intelligence"),
            wisdom: r.get("wisdom"),
            charisma: r.get("charisma"),
        },
    }
}

fn character_ability_from_row(r: &PgRow) -> CharacterAbility {
    let ability = ability_from_row(r, "ability_id");
    CharacterAbility {
        id: r.get("id"),
        ability_id: ability.id,
        current_uses: r.get("current_uses"),
        name: ability.name.clone(),
        ability,
    }
}

fn character_equipment_from_row(r: &PgRow) -> CharacterEquipment {
    let equipment = equipment_from_row(r, "equipment_id");
    CharacterEquipment {
        id: r.get("id"),
        equipment_id: equipment.id,
        is_equipped: r.get("is_equipped"),
        name: equipment.name.clone(),
        equipment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Needs a disposable PostgreSQL database in TEST_DATABASE_URL
    async fn test_database() -> Database {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let db = Database::connect(&url, 5).await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn unique_name(prefix: &str) -> String {
        format!("{}_{}", prefix, chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    fn hero(class_id: i64) -> NewCharacter {
        NewCharacter {
            name: "Hero".into(),
            character_class_id: class_id,
            level: 1,
            stats: BaseStats {
                max_hp: 10,
                current_hp: 10,
                armor_class: 10,
                strength: 10,
                dexterity: 10,
                constitution: 10,
                intelligence: 10,
                wisdom: 10,
                charisma: 10,
            },
        }
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn test_concurrent_local_ids_postgres() {
        let db = Arc::new(test_database().await);
        let user = db.create_user(&unique_name("pg_user"), "hash").await.unwrap();
        let class = db
            .create_class(&NewCharacterClass { name: unique_name("pg_class"), description: None })
            .await
            .unwrap();

        let tasks = (0..8).map(|_| {
            let db = db.clone();
            let new = hero(class.id);
            tokio::spawn(async move { db.create_character(user.id, &new).await })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let local_ids: Vec<i64> = db
            .list_characters(user.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.local_id)
            .collect();
        assert_eq!(local_ids, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn test_sync_abilities_postgres() {
        let db = test_database().await;
        let user = db.create_user(&unique_name("pg_sync"), "hash").await.unwrap();
        let class = db
            .create_class(&NewCharacterClass { name: unique_name("pg_sorcerer"), description: None })
            .await
            .unwrap();
        let fireball = db
            .create_ability(&NewAbility {
                name: unique_name("pg_fireball"),
                available_classes: None,
                uses: 3,
                description: None,
            })
            .await
            .unwrap();
        let character = db.create_character(user.id, &hero(class.id)).await.unwrap();

        let updated = db.sync_abilities(character.id, 2, &[fireball.id, -1]).await.unwrap();
        assert_eq!(updated.level, 2);

        let learned = db.list_character_abilities(character.id).await.unwrap();
        assert_eq!(learned.len(), 1);
        assert_eq!(learned[0].ability_id, fireball.id);
        assert_eq!(learned[0].current_uses, 3);
    }
}
