//! Character attributes and the effective-stats fold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ItemEffects;

/// Lowest allowed ability score
pub const MIN_ABILITY_SCORE: i32 = 1;

/// Highest allowed ability score
pub const MAX_ABILITY_SCORE: i32 = 30;

/// Effective stats keyed by attribute name
pub type StatMap = BTreeMap<String, i32>;

// =============================================================================
// Attributes
// =============================================================================

/// Attributes that equipment effects can modify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    ArmorClass,
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
    MaxHp,
    CurrentHp,
}

impl Attribute {
    pub const ALL: [Attribute; 9] = [
        Self::ArmorClass,
        Self::Strength,
        Self::Dexterity,
        Self::Constitution,
        Self::Intelligence,
        Self::Wisdom,
        Self::Charisma,
        Self::MaxHp,
        Self::CurrentHp,
    ];

    /// Key used in effect payloads and in the effective-stats map
    pub fn name(&self) -> &'static str {
        match self {
            Self::ArmorClass => "armor_class",
            Self::Strength => "strength",
            Self::Dexterity => "dexterity",
            Self::Constitution => "constitution",
            Self::Intelligence => "intelligence",
            Self::Wisdom => "wisdom",
            Self::Charisma => "charisma",
            Self::MaxHp => "max_hp",
            Self::CurrentHp => "current_hp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.name() == name)
    }

    /// Whether this is one of the six ability scores
    pub fn is_ability_score(&self) -> bool {
        !matches!(self, Self::ArmorClass | Self::MaxHp | Self::CurrentHp)
    }
}

// =============================================================================
// Base stats
// =============================================================================

/// The stat block stored on every character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseStats {
    pub max_hp: i32,
    pub current_hp: i32,
    pub armor_class: i32,
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl BaseStats {
    pub fn get(&self, attribute: Attribute) -> i32 {
        match attribute {
            Attribute::ArmorClass => self.armor_class,
            Attribute::Strength => self.strength,
            Attribute::Dexterity => self.dexterity,
            Attribute::Constitution => self.constitution,
            Attribute::Intelligence => self.intelligence,
            Attribute::Wisdom => self.wisdom,
            Attribute::Charisma => self.charisma,
            Attribute::MaxHp => self.max_hp,
            Attribute::CurrentHp => self.current_hp,
        }
    }

    /// Check declared ranges: ability scores 1-30, everything else non-negative
    pub fn validate(&self) -> Result<(), String> {
        for attribute in Attribute::ALL {
            let value = self.get(attribute);
            if attribute.is_ability_score() {
                if !(MIN_ABILITY_SCORE..=MAX_ABILITY_SCORE).contains(&value) {
                    return Err(format!(
                        "{} must be between {} and {}",
                        attribute.name(),
                        MIN_ABILITY_SCORE,
                        MAX_ABILITY_SCORE
                    ));
                }
            } else if value < 0 {
                return Err(format!("{} must not be negative", attribute.name()));
            }
        }
        Ok(())
    }

    /// Base stats as a name -> value map
    pub fn to_map(&self) -> StatMap {
        Attribute::ALL
            .into_iter()
            .map(|attr| (attr.name().to_string(), self.get(attr)))
            .collect()
    }
}

/// Fold the effects of every equipped item into the base stats.
///
/// Keys that do not name a tracked attribute are ignored. Summation is
/// commutative, so the order of `equipped` does not matter.
pub fn effective_stats<'a, I>(base: &BaseStats, equipped: I) -> StatMap
where
    I: IntoIterator<Item = &'a ItemEffects>,
{
    let mut stats = base.to_map();

    for effects in equipped {
        for (key, delta) in effects.iter() {
            if let Some(total) = stats.get_mut(key) {
                *total = total.saturating_add(delta);
            }
        }
    }

    stats
}
