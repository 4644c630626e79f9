//! Ability, class and class-progression definitions.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Usage count meaning "no limit"
pub const UNLIMITED_USES: i32 = -1;

// =============================================================================
// Abilities
// =============================================================================

/// Ability catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    pub id: i64,
    pub name: String,
    /// Free-text eligibility tag (e.g. "wizard,sorcerer")
    pub available_classes: Option<String>,
    /// Uses per rest, or `UNLIMITED_USES`
    pub uses: i32,
    pub description: Option<String>,
}

/// Body for creating an ability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAbility {
    pub name: String,
    #[serde(default)]
    pub available_classes: Option<String>,
    #[serde(default = "unlimited_uses")]
    pub uses: i32,
    #[serde(default)]
    pub description: Option<String>,
}

fn unlimited_uses() -> i32 {
    UNLIMITED_USES
}

impl NewAbility {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Ability name must not be empty".to_string());
        }
        if self.uses < UNLIMITED_USES {
            return Err("Ability uses must be -1 (unlimited) or a non-negative count".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Classes
// =============================================================================

/// Character class catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterClass {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Body for creating or replacing a character class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCharacterClass {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewCharacterClass {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Class name must not be empty".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Class progression
// =============================================================================

/// What a class gains on reaching a given level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionRule {
    pub id: i64,
    pub character_class_id: i64,
    pub level: i32,
    pub hp_bonus: i32,
    /// Informational bonuses document; not applied by level sync
    pub other_bonuses: Option<Value>,
    /// Ability ids granted at exactly this level
    pub abilities: Vec<i64>,
}

/// Body for creating or replacing a progression rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProgressionRule {
    pub character_class_id: i64,
    pub level: i32,
    #[serde(default)]
    pub hp_bonus: i32,
    #[serde(default)]
    pub other_bonuses: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_grants")]
    pub abilities: Vec<i64>,
}

impl NewProgressionRule {
    pub fn validate(&self) -> Result<(), String> {
        if self.level < crate::MIN_LEVEL {
            return Err(format!("Progression level must be at least {}", crate::MIN_LEVEL));
        }
        Ok(())
    }
}

/// Accept a list of ids, a JSON-encoded list inside a string, or null
fn deserialize_grants<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<i64>),
        Encoded(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(Raw::List(ids)) => Ok(ids),
        Some(Raw::Encoded(text)) if text.trim().is_empty() => Ok(Vec::new()),
        Some(Raw::Encoded(text)) => serde_json::from_str(&text)
            .map_err(|e| D::Error::custom(format!("invalid abilities payload: {}", e))),
    }
}

/// Parse a stored ability-grant document.
///
/// Anything other than an array of integers (or a string holding one)
/// grants nothing; non-integer entries are skipped.
pub fn parse_grants_lenient(json: &Value) -> Vec<i64> {
    let decoded;
    let array = match json {
        Value::Array(items) => Some(items),
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text).ok();
            decoded.as_ref().and_then(Value::as_array)
        }
        _ => None,
    };

    array
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Union of the ability grants of every rule at or below `level`.
///
/// Rules are applied in ascending level order and each ability appears at
/// most once, in the order it was first granted.
pub fn granted_abilities<'a, I>(rules: I, level: i32) -> Vec<i64>
where
    I: IntoIterator<Item = &'a ProgressionRule>,
{
    let mut applicable: Vec<&ProgressionRule> = rules
        .into_iter()
        .filter(|rule| rule.level >= crate::MIN_LEVEL && rule.level <= level)
        .collect();
    applicable.sort_by_key(|rule| (rule.level, rule.id));

    let mut seen = HashSet::new();
    let mut granted = Vec::new();
    for rule in applicable {
        for &ability_id in &rule.abilities {
            if seen.insert(ability_id) {
                granted.push(ability_id);
            }
        }
    }
    granted
}
