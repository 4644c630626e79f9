use charsheet_shared::{effective_stats, Character, StatMap};

use crate::persistence::{Repository, StoreResult};

/// Base stats plus the effects of every currently equipped item
pub async fn compute_effective_stats(
    repo: &dyn Repository,
    character: &Character,
) -> StoreResult<StatMap> {
    let equipped = repo.list_character_equipment(character.id, true).await?;
    Ok(effective_stats(
        &character.stats,
        equipped.iter().map(|item| &item.equipment.effects),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use charsheet_shared::{
        AddCharacterEquipment, BaseStats, ItemEffects, NewCharacter, NewCharacterClass,
        NewEquipment,
    };

    #[tokio::test]
    async fn test_only_equipped_items_count() {
        let store = MemoryStore::new();
        let user = store.create_user("gimli", "hash").await.unwrap();
        let class = store
            .create_class(&NewCharacterClass { name: "Fighter".into(), description: None })
            .await
            .unwrap();
        let character = store
            .create_character(user.id, &NewCharacter {
                name: "Axe".into(),
                character_class_id: class.id,
                level: 1,
                stats: BaseStats {
                    max_hp: 14,
                    current_hp: 14,
                    armor_class: 10,
                    strength: 10,
                    dexterity: 10,
                    constitution: 14,
                    intelligence: 8,
                    wisdom: 10,
                    charisma: 8,
                },
            })
            .await
            .unwrap();

        let chainmail = store
            .create_equipment(&NewEquipment {
                name: "Chainmail".into(),
                cost: 50,
                rarity: Some("common".into()),
                description: None,
                effects: Some(ItemEffects::new().with("armor_class", 5).with("strength", 2)),
            })
            .await
            .unwrap();
        let amulet = store
            .create_equipment(&NewEquipment {
                name: "Amulet".into(),
                cost: 80,
                rarity: None,
                description: None,
                effects: Some(ItemEffects::new().with("wisdom", 3)),
            })
            .await
            .unwrap();

        for (equipment_id, is_equipped) in [(chainmail.id, true), (amulet.id, false)] {
            store
                .add_character_equipment(character.id, &AddCharacterEquipment { equipment_id, is_equipped })
                .await
                .unwrap();
        }

        let stats = compute_effective_stats(&store, &character).await.unwrap();
        assert_eq!(stats["armor_class"], 15);
        assert_eq!(stats["strength"], 12);
        assert_eq!(stats["wisdom"], 10);

        store.set_equipped(character.id, chainmail.id, false).await.unwrap();
        let stats = compute_effective_stats(&store, &character).await.unwrap();
        assert_eq!(stats, character.stats.to_map());
    }
}
