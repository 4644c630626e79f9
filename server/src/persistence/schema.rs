//! PostgreSQL schema, applied at startup.

/// Idempotent schema creation script
pub const MIGRATION_V1: &str = r#"
-- ============================================================================
-- Accounts
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id              BIGSERIAL PRIMARY KEY,
    username        VARCHAR(64) UNIQUE NOT NULL,
    password_hash   TEXT NOT NULL,
    created_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);

-- ============================================================================
-- Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS character_classes (
    id              BIGSERIAL PRIMARY KEY,
    name            TEXT UNIQUE NOT NULL,
    description     TEXT
);

CREATE TABLE IF NOT EXISTS abilities (
    id                  BIGSERIAL PRIMARY KEY,
    name                TEXT UNIQUE NOT NULL,
    available_classes   TEXT,
    uses                INTEGER NOT NULL DEFAULT -1,
    description         TEXT
);

CREATE TABLE IF NOT EXISTS equipment (
    id              BIGSERIAL PRIMARY KEY,
    name            TEXT UNIQUE NOT NULL,
    cost            INTEGER NOT NULL DEFAULT 0,
    rarity          TEXT,
    description     TEXT,
    -- attribute name -> signed delta
    effects         JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE TABLE IF NOT EXISTS class_progression (
    id                  BIGSERIAL PRIMARY KEY,
    character_class_id  BIGINT NOT NULL REFERENCES character_classes(id) ON DELETE RESTRICT,
    level               INTEGER NOT NULL CHECK (level >= 1),
    hp_bonus            INTEGER NOT NULL DEFAULT 0,
    other_bonuses       JSONB,
    -- ability ids granted at exactly this level
    abilities           JSONB NOT NULL DEFAULT '[]'::jsonb,
    CONSTRAINT class_progression_class_level_uc UNIQUE (character_class_id, level)
);

-- ============================================================================
-- Characters
-- ============================================================================

CREATE TABLE IF NOT EXISTS characters (
    id                  BIGSERIAL PRIMARY KEY,
    owner_id            BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    local_id            BIGINT NOT NULL,
    name                TEXT NOT NULL,
    character_class_id  BIGINT NOT NULL REFERENCES character_classes(id) ON DELETE RESTRICT,
    level               INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
    max_hp              INTEGER NOT NULL,
    current_hp          INTEGER NOT NULL,
    armor_class         INTEGER NOT NULL,
    strength            INTEGER NOT NULL,
    dexterity           INTEGER NOT NULL,
    constitution        INTEGER NOT NULL,
    intelligence        INTEGER NOT NULL,
    wisdom              INTEGER NOT NULL,
    charisma            INTEGER NOT NULL,
    created_at          TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    CONSTRAINT characters_owner_local_uc UNIQUE (owner_id, local_id)
);

CREATE TABLE IF NOT EXISTS character_abilities (
    id              BIGSERIAL PRIMARY KEY,
    character_id    BIGINT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    ability_id      BIGINT NOT NULL REFERENCES abilities(id) ON DELETE CASCADE,
    current_uses    INTEGER NOT NULL,
    CONSTRAINT character_abilities_unique UNIQUE (character_id, ability_id)
);

-- No uniqueness: duplicate items occupy separate inventory slots
CREATE TABLE IF NOT EXISTS character_equipment (
    id              BIGSERIAL PRIMARY KEY,
    character_id    BIGINT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    equipment_id    BIGINT NOT NULL REFERENCES equipment(id) ON DELETE CASCADE,
    is_equipped     BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_character_equipment_character
    ON character_equipment(character_id, equipment_id);
"#;
