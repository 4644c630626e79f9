//! Equipment catalog definitions and item effects.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute deltas an item applies while equipped (attribute name -> delta)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ItemEffects(BTreeMap<String, i32>);

impl ItemEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: impl Into<String>, delta: i32) -> Self {
        self.0.insert(attribute.into(), delta);
        self
    }

    pub fn get(&self, attribute: &str) -> Option<i32> {
        self.0.get(attribute).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse effects from a stored document.
    ///
    /// Never fails: anything that is not an object (or a string holding one)
    /// yields no effects, and entries whose value is not an integer are skipped.
    pub fn from_json_lenient(json: &Value) -> Self {
        let mut effects = BTreeMap::new();

        let decoded;
        let object = match json {
            Value::Object(obj) => Some(obj),
            Value::String(text) => {
                decoded = serde_json::from_str::<Value>(text).ok();
                decoded.as_ref().and_then(Value::as_object)
            }
            _ => None,
        };

        if let Some(obj) = object {
            for (key, val) in obj {
                if let Some(delta) = val.as_i64().and_then(|d| i32::try_from(d).ok()) {
                    effects.insert(key.clone(), delta);
                }
            }
        }

        Self(effects)
    }
}

impl<'de> Deserialize<'de> for ItemEffects {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older clients send the map JSON-encoded inside a string
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Map(BTreeMap<String, i32>),
            Encoded(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Map(map) => Ok(Self(map)),
            Raw::Encoded(text) if text.trim().is_empty() => Ok(Self::default()),
            Raw::Encoded(text) => serde_json::from_str::<BTreeMap<String, i32>>(&text)
                .map(Self)
                .map_err(|e| D::Error::custom(format!("invalid effects payload: {}", e))),
        }
    }
}

/// Equipment catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: i64,
    pub name: String,
    pub cost: i32,
    pub rarity: Option<String>,
    pub description: Option<String>,
    pub effects: ItemEffects,
}

/// Body for creating an equipment entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEquipment {
    pub name: String,
    pub cost: i32,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub effects: Option<ItemEffects>,
}

impl NewEquipment {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Equipment name must not be empty".to_string());
        }
        if self.cost < 0 {
            return Err("Equipment cost must not be negative".to_string());
        }
        Ok(())
    }
}
