//! Database schema definitions.
//!
//! Container names are globally unique; snapshots live in the same table as
//! regular containers under their `parent/leaf` name with `type = 1`.
//! Profiles bind to containers through `containers_profiles` with an explicit
//! `apply_order`, and devices split into a name/type row plus attribute rows.

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
"#;

pub const CONTAINERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    architecture INTEGER NOT NULL,
    type INTEGER NOT NULL
);
"#;

pub const CONTAINERS_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS containers_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER NOT NULL REFERENCES containers (id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (container_id, key)
);
"#;

pub const PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
"#;

pub const PROFILES_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id INTEGER NOT NULL REFERENCES profiles (id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (profile_id, key)
);
"#;

pub const CONTAINERS_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS containers_profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER NOT NULL REFERENCES containers (id) ON DELETE CASCADE,
    profile_id INTEGER NOT NULL REFERENCES profiles (id) ON DELETE CASCADE,
    apply_order INTEGER NOT NULL,
    UNIQUE (container_id, profile_id)
);
"#;

pub const CONTAINERS_DEVICES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS containers_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER NOT NULL REFERENCES containers (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    UNIQUE (container_id, name)
);
"#;

pub const CONTAINERS_DEVICES_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS containers_devices_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_device_id INTEGER NOT NULL REFERENCES containers_devices (id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL
);
"#;

pub const PROFILES_DEVICES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id INTEGER NOT NULL REFERENCES profiles (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    UNIQUE (profile_id, name)
);
"#;

pub const PROFILES_DEVICES_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles_devices_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_device_id INTEGER NOT NULL REFERENCES profiles_devices (id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL
);
"#;

pub const IMAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE
);
"#;

pub const IMAGES_ALIASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS images_aliases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    image_id INTEGER NOT NULL
);
"#;

/// All schema creation statements, in dependency order.
pub fn all_schemas() -> Vec<&'static str> {
    vec![
        SCHEMA_VERSION_TABLE,
        CONTAINERS_TABLE,
        CONTAINERS_CONFIG_TABLE,
        PROFILES_TABLE,
        PROFILES_CONFIG_TABLE,
        CONTAINERS_PROFILES_TABLE,
        CONTAINERS_DEVICES_TABLE,
        CONTAINERS_DEVICES_CONFIG_TABLE,
        PROFILES_DEVICES_TABLE,
        PROFILES_DEVICES_CONFIG_TABLE,
        IMAGES_TABLE,
        IMAGES_ALIASES_TABLE,
    ]
}
