//! Character definitions shared between client and server.

use serde::{Deserialize, Serialize};

use crate::{Ability, BaseStats, CharacterClass, Equipment, UNLIMITED_USES};

/// Level every character starts at
pub const MIN_LEVEL: i32 = 1;

/// Maximum length of a character name
pub const MAX_CHARACTER_NAME_LEN: usize = 64;

/// A stored character (without its owned collections)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Global, system-wide id
    pub id: i64,
    pub owner_id: i64,
    /// Id within the owner's own character list, starting at 1
    pub local_id: i64,
    pub name: String,
    pub character_class_id: i64,
    pub level: i32,
    #[serde(flatten)]
    pub stats: BaseStats,
}

/// Body for creating or replacing a character.
///
/// A client-supplied `local_id` is accepted and ignored; the server assigns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCharacter {
    pub name: String,
    pub character_class_id: i64,
    #[serde(default = "starting_level")]
    pub level: i32,
    #[serde(flatten)]
    pub stats: BaseStats,
}

fn starting_level() -> i32 {
    MIN_LEVEL
}

impl NewCharacter {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() || self.name.len() > MAX_CHARACTER_NAME_LEN {
            return Err(format!("Name must be 1-{} characters", MAX_CHARACTER_NAME_LEN));
        }
        validate_level(self.level)?;
        self.stats.validate()
    }
}

pub fn validate_level(level: i32) -> Result<(), String> {
    if level < MIN_LEVEL {
        return Err(format!("Level must be at least {}", MIN_LEVEL));
    }
    Ok(())
}

/// An ability learned by a character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterAbility {
    pub id: i64,
    pub ability_id: i64,
    pub current_uses: i32,
    /// Display name, resolved from the catalog when read
    pub name: String,
    pub ability: Ability,
}

/// Body for teaching a character an ability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCharacterAbility {
    pub ability_id: i64,
    /// Defaults to the catalog's usage count
    #[serde(default)]
    pub current_uses: Option<i32>,
}

impl AddCharacterAbility {
    pub fn validate(&self) -> Result<(), String> {
        match self.current_uses {
            Some(uses) if uses < UNLIMITED_USES => {
                Err("Current uses must be -1 (unlimited) or a non-negative count".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// An item in a character's inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterEquipment {
    pub id: i64,
    pub equipment_id: i64,
    pub is_equipped: bool,
    /// Display name, resolved from the catalog when read
    pub name: String,
    pub equipment: Equipment,
}

/// Body for adding an item to a character's inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCharacterEquipment {
    pub equipment_id: i64,
    #[serde(default)]
    pub is_equipped: bool,
}

/// Full character view returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    #[serde(flatten)]
    pub character: Character,
    pub character_class: Option<CharacterClass>,
    pub abilities: Vec<CharacterAbility>,
    pub equipment: Vec<CharacterEquipment>,
}
