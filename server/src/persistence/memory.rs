//! In-process store.
//!
//! Mirrors the PostgreSQL store's constraints (unique names, per-owner local
//! ids, cascading deletes) so that behaviour does not depend on the backend.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use charsheet_shared::{
    Ability, AddCharacterAbility, AddCharacterEquipment, Character, CharacterAbility,
    CharacterClass, CharacterEquipment, Equipment, NewAbility, NewCharacter, NewCharacterClass,
    NewEquipment, NewProgressionRule, ProgressionRule,
};

use super::{Repository, StoreError, StoreResult, UserRecord};

struct AbilityLink {
    character_id: i64,
    ability_id: i64,
    current_uses: i32,
}

struct EquipmentLink {
    character_id: i64,
    equipment_id: i64,
    is_equipped: bool,
}

#[derive(Default)]
struct MemoryState {
    sequences: HashMap<&'static str, i64>,
    users: BTreeMap<i64, UserRecord>,
    classes: BTreeMap<i64, CharacterClass>,
    abilities: BTreeMap<i64, Ability>,
    equipment: BTreeMap<i64, Equipment>,
    progressions: BTreeMap<i64, ProgressionRule>,
    characters: BTreeMap<i64, Character>,
    character_abilities: BTreeMap<i64, AbilityLink>,
    character_equipment: BTreeMap<i64, EquipmentLink>,
}

impl MemoryState {
    /// Per-table sequence, starting at 1
    fn allocate_id(&mut self, table: &'static str) -> i64 {
        let next = self.sequences.entry(table).or_insert(0);
        *next += 1;
        *next
    }

    fn ensure_class(&self, id: i64) -> StoreResult<()> {
        if self.classes.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound("Character class".to_string()))
        }
    }

    fn ensure_abilities(&self, ids: &[i64]) -> StoreResult<()> {
        match ids.iter().find(|id| !self.abilities.contains_key(id)) {
            Some(missing) => Err(StoreError::NotFound(format!("Ability {}", missing))),
            None => Ok(()),
        }
    }

    fn ensure_rule_slot_free(&self, class_id: i64, level: i32, except: Option<i64>) -> StoreResult<()> {
        let taken = self.progressions.values().any(|rule| {
            rule.character_class_id == class_id && rule.level == level && Some(rule.id) != except
        });
        if taken {
            return Err(StoreError::Conflict(
                "A progression rule for this class and level already exists".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_ability(&self, id: i64, link: &AbilityLink) -> Option<CharacterAbility> {
        let ability = self.abilities.get(&link.ability_id)?.clone();
        Some(CharacterAbility {
            id,
            ability_id: link.ability_id,
            current_uses: link.current_uses,
            name: ability.name.clone(),
            ability,
        })
    }

    fn resolve_equipment(&self, id: i64, link: &EquipmentLink) -> Option<CharacterEquipment> {
        let equipment = self.equipment.get(&link.equipment_id)?.clone();
        Some(CharacterEquipment {
            id,
            equipment_id: link.equipment_id,
            is_equipped: link.is_equipped,
            name: equipment.name.clone(),
            equipment,
        })
    }

    /// Oldest inventory row of `character_id` holding `equipment_id`
    fn oldest_equipment_row(&self, character_id: i64, equipment_id: i64) -> Option<i64> {
        self.character_equipment
            .iter()
            .find(|(_, link)| link.character_id == character_id && link.equipment_id == equipment_id)
            .map(|(id, _)| *id)
    }
}

/// Repository kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == username) {
            return Err(StoreError::Conflict("Username already registered".to_string()));
        }

        let user = UserRecord {
            id: state.allocate_id("users"),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn create_class(&self, new: &NewCharacterClass) -> StoreResult<CharacterClass> {
        let mut state = self.state.lock().await;
        if state.classes.values().any(|c| c.name == new.name) {
            return Err(StoreError::Conflict("Class with this name already exists".to_string()));
        }

        let class = CharacterClass {
            id: state.allocate_id("character_classes"),
            name: new.name.clone(),
            description: new.description.clone(),
        };
        state.classes.insert(class.id, class.clone());
        Ok(class)
    }

    async fn list_classes(&self) -> StoreResult<Vec<CharacterClass>> {
        let state = self.state.lock().await;
        Ok(state.classes.values().cloned().collect())
    }

    async fn update_class(&self, id: i64, new: &NewCharacterClass) -> StoreResult<CharacterClass> {
        let mut state = self.state.lock().await;
        state.ensure_class(id)?;
        if state.classes.values().any(|c| c.name == new.name && c.id != id) {
            return Err(StoreError::Conflict("Class with this name already exists".to_string()));
        }

        let class = CharacterClass {
            id,
            name: new.name.clone(),
            description: new.description.clone(),
        };
        state.classes.insert(id, class.clone());
        Ok(class)
    }

    async fn delete_class(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_class(id)?;

        let in_use = state.characters.values().any(|c| c.character_class_id == id)
            || state.progressions.values().any(|r| r.character_class_id == id);
        if in_use {
            return Err(StoreError::Conflict("Character class is still in use".to_string()));
        }

        state.classes.remove(&id);
        Ok(())
    }

    async fn create_ability(&self, new: &NewAbility) -> StoreResult<Ability> {
        let mut state = self.state.lock().await;
        if state.abilities.values().any(|a| a.name == new.name) {
            return Err(StoreError::Conflict("Ability with this name already exists".to_string()));
        }

        let ability = Ability {
            id: state.allocate_id("abilities"),
            name: new.name.clone(),
            available_classes: new.available_classes.clone(),
            uses: new.uses,
            description: new.description.clone(),
        };
        state.abilities.insert(ability.id, ability.clone());
        Ok(ability)
    }

    async fn list_abilities(&self) -> StoreResult<Vec<Ability>> {
        let state = self.state.lock().await;
        Ok(state.abilities.values().cloned().collect())
    }

    async fn create_equipment(&self, new: &NewEquipment) -> StoreResult<Equipment> {
        let mut state = self.state.lock().await;
        if state.equipment.values().any(|e| e.name == new.name) {
            return Err(StoreError::Conflict("Equipment with this name already exists".to_string()));
        }

        let equipment = Equipment {
            id: state.allocate_id("equipment"),
            name: new.name.clone(),
            cost: new.cost,
            rarity: new.rarity.clone(),
            description: new.description.clone(),
            effects: new.effects.clone().unwrap_or_default(),
        };
        state.equipment.insert(equipment.id, equipment.clone());
        Ok(equipment)
    }

    async fn list_equipment(&self) -> StoreResult<Vec<Equipment>> {
        let state = self.state.lock().await;
        Ok(state.equipment.values().cloned().collect())
    }

    // =========================================================================
    // Progression Operations
    // =========================================================================

    async fn create_progression(&self, new: &NewProgressionRule) -> StoreResult<ProgressionRule> {
        let mut state = self.state.lock().await;
        state.ensure_abilities(&new.abilities)?;
        state.ensure_class(new.character_class_id)?;
        state.ensure_rule_slot_free(new.character_class_id, new.level, None)?;

        let rule = ProgressionRule {
            id: state.allocate_id("class_progression"),
            character_class_id: new.character_class_id,
            level: new.level,
            hp_bonus: new.hp_bonus,
            other_bonuses: new.other_bonuses.clone(),
            abilities: new.abilities.clone(),
        };
        state.progressions.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn list_progressions(&self) -> StoreResult<Vec<ProgressionRule>> {
        let state = self.state.lock().await;
        let mut rules: Vec<ProgressionRule> = state.progressions.values().cloned().collect();
        rules.sort_by_key(|r| (r.character_class_id, r.level));
        Ok(rules)
    }

    async fn get_progression(&self, id: i64) -> StoreResult<Option<ProgressionRule>> {
        let state = self.state.lock().await;
        Ok(state.progressions.get(&id).cloned())
    }

    async fn update_progression(
        &self,
        id: i64,
        new: &NewProgressionRule,
    ) -> StoreResult<ProgressionRule> {
        let mut state = self.state.lock().await;
        state.ensure_abilities(&new.abilities)?;
        if !state.progressions.contains_key(&id) {
            return Err(StoreError::NotFound("Progression rule".to_string()));
        }
        state.ensure_class(new.character_class_id)?;
        state.ensure_rule_slot_free(new.character_class_id, new.level, Some(id))?;

        let rule = ProgressionRule {
            id,
            character_class_id: new.character_class_id,
            level: new.level,
            hp_bonus: new.hp_bonus,
            other_bonuses: new.other_bonuses.clone(),
            abilities: new.abilities.clone(),
        };
        state.progressions.insert(id, rule.clone());
        Ok(rule)
    }

    async fn delete_progression(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .progressions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound("Progression rule".to_string()))
    }

    async fn add_progression_ability(&self, id: i64, ability_id: i64) -> StoreResult<ProgressionRule> {
        let mut state = self.state.lock().await;
        if !state.progressions.contains_key(&id) {
            return Err(StoreError::NotFound("Progression rule".to_string()));
        }
        if !state.abilities.contains_key(&ability_id) {
            return Err(StoreError::NotFound("Ability".to_string()));
        }

        let rule = state
            .progressions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("Progression rule".to_string()))?;
        if rule.abilities.contains(&ability_id) {
            return Err(StoreError::Conflict("Ability is already granted at this level".to_string()));
        }
        rule.abilities.push(ability_id);
        Ok(rule.clone())
    }

    async fn remove_progression_ability(
        &self,
        id: i64,
        ability_id: i64,
    ) -> StoreResult<ProgressionRule> {
        let mut state = self.state.lock().await;
        if !state.abilities.contains_key(&ability_id) {
            return Err(StoreError::NotFound("Ability".to_string()));
        }

        let rule = state
            .progressions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("Progression rule".to_string()))?;
        let before = rule.abilities.len();
        rule.abilities.retain(|granted| *granted != ability_id);
        if rule.abilities.len() == before {
            return Err(StoreError::NotFound("Link".to_string()));
        }
        Ok(rule.clone())
    }

    async fn progression_for_class(
        &self,
        class_id: i64,
        max_level: i32,
    ) -> StoreResult<Vec<ProgressionRule>> {
        let state = self.state.lock().await;
        let mut rules: Vec<ProgressionRule> = state
            .progressions
            .values()
            .filter(|r| r.character_class_id == class_id && r.level <= max_level)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.level, r.id));
        Ok(rules)
    }

    // =========================================================================
    // Character Operations
    // =========================================================================

    async fn create_character(&self, owner_id: i64, new: &NewCharacter) -> StoreResult<Character> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&owner_id) {
            return Err(StoreError::NotFound("User".to_string()));
        }
        state.ensure_class(new.character_class_id)?;

        // The lock is held from read to insert, so no two creations see the same max
        let local_id = state
            .characters
            .values()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.local_id)
            .max()
            .unwrap_or(0)
            + 1;

        let character = Character {
            id: state.allocate_id("characters"),
            owner_id,
            local_id,
            name: new.name.clone(),
            character_class_id: new.character_class_id,
            level: new.level,
            stats: new.stats,
        };
        state.characters.insert(character.id, character.clone());
        Ok(character)
    }

    async fn list_characters(&self, owner_id: i64) -> StoreResult<Vec<Character>> {
        let state = self.state.lock().await;
        let mut characters: Vec<Character> = state
            .characters
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        characters.sort_by_key(|c| c.local_id);
        Ok(characters)
    }

    async fn get_character(&self, owner_id: i64, local_id: i64) -> StoreResult<Option<Character>> {
        let state = self.state.lock().await;
        Ok(state
            .characters
            .values()
            .find(|c| c.owner_id == owner_id && c.local_id == local_id)
            .cloned())
    }

    async fn get_class(&self, id: i64) -> StoreResult<Option<CharacterClass>> {
        let state = self.state.lock().await;
        Ok(state.classes.get(&id).cloned())
    }

    async fn update_character(&self, character_id: i64, new: &NewCharacter) -> StoreResult<Character> {
        let mut state = self.state.lock().await;
        if !state.characters.contains_key(&character_id) {
            return Err(StoreError::NotFound("Character".to_string()));
        }
        state.ensure_class(new.character_class_id)?;

        let character = state
            .characters
            .get_mut(&character_id)
            .ok_or_else(|| StoreError::NotFound("Character".to_string()))?;
        character.name = new.name.clone();
        character.character_class_id = new.character_class_id;
        character.level = new.level;
        character.stats = new.stats;
        Ok(character.clone())
    }

    async fn delete_character(&self, character_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.characters.remove(&character_id).is_none() {
            return Err(StoreError::NotFound("Character".to_string()));
        }

        state.character_abilities.retain(|_, link| link.character_id != character_id);
        state.character_equipment.retain(|_, link| link.character_id != character_id);
        Ok(())
    }

    async fn sync_abilities(
        &self,
        character_id: i64,
        level: i32,
        ability_ids: &[i64],
    ) -> StoreResult<Character> {
        let mut state = self.state.lock().await;

        let character = state
            .characters
            .get_mut(&character_id)
            .ok_or_else(|| StoreError::NotFound("Character".to_string()))?;
        character.level = level;
        let character = character.clone();

        state.character_abilities.retain(|_, link| link.character_id != character_id);

        let mut learned: Vec<i64> = Vec::new();
        for &ability_id in ability_ids {
            if learned.contains(&ability_id) {
                continue;
            }
            let Some(uses) = state.abilities.get(&ability_id).map(|a| a.uses) else {
                continue;
            };

            let id = state.allocate_id("character_abilities");
            state.character_abilities.insert(id, AbilityLink {
                character_id,
                ability_id,
                current_uses: uses,
            });
            learned.push(ability_id);
        }

        Ok(character)
    }

    // =========================================================================
    // Character Ability Operations
    // =========================================================================

    async fn list_character_abilities(&self, character_id: i64) -> StoreResult<Vec<CharacterAbility>> {
        let state = self.state.lock().await;
        Ok(state
            .character_abilities
            .iter()
            .filter(|(_, link)| link.character_id == character_id)
            .filter_map(|(id, link)| state.resolve_ability(*id, link))
            .collect())
    }

    async fn add_character_ability(
        &self,
        character_id: i64,
        add: &AddCharacterAbility,
    ) -> StoreResult<CharacterAbility> {
        let mut state = self.state.lock().await;
        if !state.characters.contains_key(&character_id) {
            return Err(StoreError::NotFound("Character".to_string()));
        }
        let default_uses = state
            .abilities
            .get(&add.ability_id)
            .map(|a| a.uses)
            .ok_or_else(|| StoreError::NotFound("Ability".to_string()))?;

        let known = state
            .character_abilities
            .values()
            .any(|link| link.character_id == character_id && link.ability_id == add.ability_id);
        if known {
            return Err(StoreError::Conflict("This character already has this ability".to_string()));
        }

        let id = state.allocate_id("character_abilities");
        let link = AbilityLink {
            character_id,
            ability_id: add.ability_id,
            current_uses: add.current_uses.unwrap_or(default_uses),
        };
        let resolved = state
            .resolve_ability(id, &link)
            .ok_or_else(|| StoreError::NotFound("Ability".to_string()))?;
        state.character_abilities.insert(id, link);
        Ok(resolved)
    }

    async fn remove_character_ability(&self, character_id: i64, ability_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .character_abilities
            .iter()
            .find(|(_, link)| link.character_id == character_id && link.ability_id == ability_id)
            .map(|(id, _)| *id)
            .ok_or_else(|| StoreError::NotFound("Ability for this character".to_string()))?;

        state.character_abilities.remove(&row);
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
        let state = self.state.lock().await;
        Ok(state
            .character_equipment
            .iter()
            .filter(|(_, link)| link.character_id == character_id)
            .filter(|(_, link)| !equipped_only || link.is_equipped)
            .filter_map(|(id, link)| state.resolve_equipment(*id, link))
            .collect())
    }

    async fn add_character_equipment(
        &self,
        character_id: i64,
        add: &AddCharacterEquipment,
    ) -> StoreResult<CharacterEquipment> {
        let mut state = self.state.lock().await;
        if !state.characters.contains_key(&character_id) {
            return Err(StoreError::NotFound("Character".to_string()));
        }

        let id = state.allocate_id("character_equipment");
        let link = EquipmentLink {
            character_id,
            equipment_id: add.equipment_id,
            is_equipped: add.is_equipped,
        };
        let resolved = state
            .resolve_equipment(id, &link)
            .ok_or_else(|| StoreError::NotFound("Equipment".to_string()))?;
        state.character_equipment.insert(id, link);
        Ok(resolved)
    }

    async fn remove_character_equipment(&self, character_id: i64, equipment_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .oldest_equipment_row(character_id, equipment_id)
            .ok_or_else(|| StoreError::NotFound("Equipment for this character".to_string()))?;

        state.character_equipment.remove(&row);
        Ok(())
    }

    async fn set_equipped(
        &self,
        character_id: i64,
        equipment_id: i64,
        equipped: bool,
    ) -> StoreResult<CharacterEquipment> {
        let mut state = self.state.lock().await;
        let row = state
            .oldest_equipment_row(character_id, equipment_id)
            .ok_or_else(|| StoreError::NotFound("Equipment for this character".to_string()))?;

        if let Some(link) = state.character_equipment.get_mut(&row) {
            link.is_equipped = equipped;
        }

        let link = state
            .character_equipment
            .get(&row)
            .ok_or_else(|| StoreError::NotFound("Equipment for this character".to_string()))?;
        state
            .resolve_equipment(row, link)
            .ok_or_else(|| StoreError::NotFound("Equipment".to_string()))
    }
}
