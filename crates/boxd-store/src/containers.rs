//! Container, config, profile, device and snapshot queries.

use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, Transaction, params};

use crate::error::{Result, StoreError};
use crate::{Store, valid_config_key};

/// A device is a named map of attributes, always including `type`.
pub type Device = BTreeMap<String, String>;

/// Devices keyed by device name.
pub type Devices = BTreeMap<String, Device>;

/// Container row kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// A regular container.
    Regular,
    /// A snapshot, named `parent/leaf`.
    Snapshot,
}

impl ContainerKind {
    /// Integer column value.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Regular => 0,
            Self::Snapshot => 1,
        }
    }
}

/// Owner table for device rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOwner {
    Container,
    Profile,
}

impl DeviceOwner {
    fn tables(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Container => (
                "containers_devices",
                "containers_devices_config",
                "container_device_id",
            ),
            Self::Profile => (
                "profiles_devices",
                "profiles_devices_config",
                "profile_device_id",
            ),
        }
    }
}

/// A container row as stored.
#[derive(Debug, Clone)]
pub struct ContainerRow {
    /// Row id.
    pub id: i64,
    /// Architecture tag (integer column; `0` is the only recognized value).
    pub architecture: i64,
    /// Row kind.
    pub kind: ContainerKind,
}

impl Store {
    /// Looks up a container id by name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no container has this name.
    pub fn container_id_by_name(&self, name: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id FROM containers WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("container {name}")))
    }

    /// Loads the container row for a name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no container has this name.
    pub fn container_row(&self, name: &str) -> Result<ContainerRow> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, architecture, type FROM containers WHERE name = ?1",
            [name],
            |row| {
                Ok(ContainerRow {
                    id: row.get(0)?,
                    architecture: row.get(1)?,
                    kind: if row.get::<_, i64>(2)? == ContainerKind::Snapshot.as_i64() {
                        ContainerKind::Snapshot
                    } else {
                        ContainerKind::Regular
                    },
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("container {name}")))
    }

    /// Lists container names of the given kind, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn list_containers(&self, kind: ContainerKind) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name FROM containers WHERE type = ?1 ORDER BY name")?;
        let names = stmt
            .query_map([kind.as_i64()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Inserts a container row together with its config, atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyDefined` if the name is taken and
    /// `StoreError::BadKey` (rolling everything back) if any config key is
    /// rejected by the whitelist.
    pub fn create_container(
        &self,
        name: &str,
        kind: ContainerKind,
        config: &BTreeMap<String, String>,
    ) -> Result<i64> {
        let mut conn = self.conn();

        let existing: Option<i64> = conn
            .query_row("SELECT id FROM containers WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::AlreadyDefined(name.to_string()));
        }

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO containers (name, architecture, type) VALUES (?1, 0, ?2)",
            params![name, kind.as_i64()],
        )?;
        let id = tx.last_insert_rowid();
        insert_container_config(&tx, id, config)?;
        tx.commit()?;

        tracing::debug!(container = name, id, "container row created");
        Ok(id)
    }

    /// Deletes a container row by name. Missing rows are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn delete_container(&self, name: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM containers WHERE name = ?1", [name])?;
        Ok(())
    }

    /// Renames a container row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyDefined` if the new name is taken.
    pub fn rename_container(&self, old: &str, new: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE containers SET name = ?1 WHERE name = ?2",
                params![new, old],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(e, _)
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::AlreadyDefined(new.to_string())
                }
                other => StoreError::Sqlite(other),
            })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("container {old}")));
        }
        Ok(())
    }

    /// Replaces a container's config, profile bindings and devices in one
    /// transaction. Readers see either the pre- or the post-state.
    ///
    /// # Errors
    ///
    /// Any step failure rolls the whole transaction back.
    pub fn replace_container_config(
        &self,
        id: i64,
        config: &BTreeMap<String, String>,
        profiles: &[String],
        devices: &Devices,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        clear_container_config(&tx, id)?;
        insert_container_config(&tx, id, config)?;
        bind_profiles(&tx, id, profiles)?;
        insert_devices(&tx, DeviceOwner::Container, id, devices)?;

        tx.commit()?;
        Ok(())
    }

    /// Loads a container's config map.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn load_config(&self, id: i64) -> Result<BTreeMap<String, String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT key, value FROM containers_config WHERE container_id = ?1")?;
        let rows = stmt.query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut config = BTreeMap::new();
        for row in rows {
            let (key, value): (String, String) = row?;
            config.insert(key, value);
        }
        Ok(config)
    }

    /// Loads the profile names bound to a container, in apply order.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn load_profiles(&self, id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT profiles.name FROM containers_profiles
             JOIN profiles ON profiles.id = containers_profiles.profile_id
             WHERE containers_profiles.container_id = ?1
             ORDER BY containers_profiles.apply_order",
        )?;
        let names = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Loads a profile's config map by profile name.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn load_profile_config(&self, profile: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT profiles_config.key, profiles_config.value FROM profiles_config
             JOIN profiles ON profiles.id = profiles_config.profile_id
             WHERE profiles.name = ?1",
        )?;
        let rows = stmt.query_map([profile], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut config = BTreeMap::new();
        for row in rows {
            let (key, value): (String, String) = row?;
            config.insert(key, value);
        }
        Ok(config)
    }

    /// Loads the devices owned by a container or a profile, by name.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn load_devices(&self, owner_name: &str, owner: DeviceOwner) -> Result<Devices> {
        let conn = self.conn();
        let query = match owner {
            DeviceOwner::Container => {
                "SELECT containers_devices.id, containers_devices.name, containers_devices.type
                 FROM containers_devices
                 JOIN containers ON containers.id = containers_devices.container_id
                 WHERE containers.name = ?1"
            }
            DeviceOwner::Profile => {
                "SELECT profiles_devices.id, profiles_devices.name, profiles_devices.type
                 FROM profiles_devices
                 JOIN profiles ON profiles.id = profiles_devices.profile_id
                 WHERE profiles.name = ?1"
            }
        };

        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map([owner_name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let (_, config_table, fk_column) = owner.tables();
        let config_query =
            format!("SELECT key, value FROM {config_table} WHERE {fk_column} = ?1");

        let mut devices = Devices::new();
        let rows: Vec<(i64, String, String)> =
            rows.collect::<std::result::Result<_, _>>()?;
        for (device_id, name, dtype) in rows {
            let mut device = Device::new();
            device.insert("type".to_string(), dtype);

            let mut cfg_stmt = conn.prepare(&config_query)?;
            let cfg_rows = cfg_stmt.query_map([device_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in cfg_rows {
                let (key, value) = row?;
                device.insert(key, value);
            }
            devices.insert(name, device);
        }

        Ok(devices)
    }

    /// Lists snapshots of a container as `(leaf, id)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn snapshots_of(&self, container: &str) -> Result<Vec<(String, i64)>> {
        let prefix = format!("{container}/");
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, id FROM containers
             WHERE type = ?1 AND SUBSTR(name, 1, ?2) = ?3
             ORDER BY name",
        )?;
        let rows = stmt.query_map(
            params![ContainerKind::Snapshot.as_i64(), prefix.len() as i64, prefix],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (full, id) = row?;
            result.push((full[prefix.len()..].to_string(), id));
        }
        Ok(result)
    }

    /// Returns the next free index for generated `snap<n>` snapshot names:
    /// one past the highest existing index, or 0 when none exist.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn next_snapshot_index(&self, container: &str) -> Result<i64> {
        let base = format!("{container}/snap");
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM containers WHERE type = ?1 AND SUBSTR(name, 1, ?2) = ?3",
        )?;
        let rows = stmt.query_map(
            params![ContainerKind::Snapshot.as_i64(), base.len() as i64, base],
            |row| row.get::<_, String>(0),
        )?;

        let mut next = 0;
        for row in rows {
            let name = row?;
            let Ok(num) = name[base.len()..].parse::<i64>() else {
                continue;
            };
            if num >= next {
                next = num + 1;
            }
        }
        Ok(next)
    }

    /// Deletes a snapshot row by parent and leaf name.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn delete_snapshot(&self, container: &str, leaf: &str) -> Result<()> {
        let full = format!("{container}/{leaf}");
        self.conn().execute(
            "DELETE FROM containers WHERE type = ?1 AND name = ?2",
            params![ContainerKind::Snapshot.as_i64(), full],
        )?;
        Ok(())
    }

    /// Renames a snapshot row.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn rename_snapshot(&self, container: &str, old_leaf: &str, new_leaf: &str) -> Result<()> {
        let old = format!("{container}/{old_leaf}");
        let new = format!("{container}/{new_leaf}");
        self.conn().execute(
            "UPDATE containers SET name = ?1 WHERE type = ?2 AND name = ?3",
            params![new, ContainerKind::Snapshot.as_i64(), old],
        )?;
        Ok(())
    }

    /// Creates a profile with config and devices, atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyDefined` if the profile name is taken.
    pub fn create_profile(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
        devices: &Devices,
    ) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("INSERT INTO profiles (name) VALUES (?1)", [name])
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(e, _)
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::AlreadyDefined(name.to_string())
                }
                other => StoreError::Sqlite(other),
            })?;
        let id = tx.last_insert_rowid();

        for (key, value) in config {
            tx.execute(
                "INSERT INTO profiles_config (profile_id, key, value) VALUES (?1, ?2, ?3)",
                params![id, key, value],
            )?;
        }
        insert_devices(&tx, DeviceOwner::Profile, id, devices)?;

        tx.commit()?;
        Ok(id)
    }
}

/// Deletes a container's config rows, profile bindings, device attribute rows
/// and device rows, in that order, inside the caller's transaction.
///
/// # Errors
///
/// Returns an error on store failure.
pub fn clear_container_config(tx: &Transaction<'_>, id: i64) -> Result<()> {
    tx.execute("DELETE FROM containers_config WHERE container_id = ?1", [id])?;
    tx.execute(
        "DELETE FROM containers_profiles WHERE container_id = ?1",
        [id],
    )?;
    tx.execute(
        "DELETE FROM containers_devices_config WHERE container_device_id IN
         (SELECT id FROM containers_devices WHERE container_id = ?1)",
        [id],
    )?;
    tx.execute(
        "DELETE FROM containers_devices WHERE container_id = ?1",
        [id],
    )?;
    Ok(())
}

/// Validates and inserts config rows for a container inside the caller's
/// transaction.
///
/// # Errors
///
/// Returns `StoreError::BadKey` on the first key rejected by the whitelist,
/// leaving the transaction poisoned for the caller to roll back.
pub fn insert_container_config(
    tx: &Transaction<'_>,
    id: i64,
    config: &BTreeMap<String, String>,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO containers_config (container_id, key, value) VALUES (?1, ?2, ?3)",
    )?;
    for (key, value) in config {
        if !valid_config_key(key) {
            return Err(StoreError::BadKey(key.clone()));
        }
        stmt.execute(params![id, key, value])?;
    }
    Ok(())
}

/// Rebinds a container's profiles inside the caller's transaction.
///
/// An empty list (or a single empty string) clears the bindings; otherwise
/// bindings get `apply_order` 1..N in list order.
///
/// # Errors
///
/// Returns an error on store failure (including unknown profile names).
pub fn bind_profiles(tx: &Transaction<'_>, id: i64, profiles: &[String]) -> Result<()> {
    let empty = profiles.is_empty() || (profiles.len() == 1 && profiles[0].is_empty());
    if empty {
        tx.execute(
            "DELETE FROM containers_profiles WHERE container_id = ?1",
            [id],
        )?;
        return Ok(());
    }

    let mut stmt = tx.prepare(
        "INSERT INTO containers_profiles (container_id, profile_id, apply_order)
         VALUES (?1, (SELECT id FROM profiles WHERE name = ?2), ?3)",
    )?;
    for (order, profile) in profiles.iter().enumerate() {
        stmt.execute(params![id, profile, order as i64 + 1])?;
    }
    Ok(())
}

/// Inserts device rows and their attributes inside the caller's transaction.
///
/// # Errors
///
/// Returns `StoreError::BadDevice` if a device is missing its `type`
/// attribute.
pub fn insert_devices(
    tx: &Transaction<'_>,
    owner: DeviceOwner,
    id: i64,
    devices: &Devices,
) -> Result<()> {
    let (device_table, config_table, fk_column) = owner.tables();
    let owner_column = match owner {
        DeviceOwner::Container => "container_id",
        DeviceOwner::Profile => "profile_id",
    };

    let insert_device = format!(
        "INSERT INTO {device_table} ({owner_column}, name, type) VALUES (?1, ?2, ?3)"
    );
    let insert_attr =
        format!("INSERT INTO {config_table} ({fk_column}, key, value) VALUES (?1, ?2, ?3)");

    for (name, attrs) in devices {
        let dtype = attrs
            .get("type")
            .ok_or_else(|| StoreError::BadDevice(format!("device {name} has no type")))?;

        tx.execute(&insert_device, params![id, name, dtype])?;
        let device_id = tx.last_insert_rowid();

        for (key, value) in attrs {
            if key == "type" {
                continue;
            }
            tx.execute(&insert_attr, params![device_id, key, value])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn device(pairs: &[(&str, &str)]) -> Device {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn create_and_lookup_container() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .create_container("foo", ContainerKind::Regular, &config(&[("user.x", "1")]))
            .unwrap();

        assert_eq!(store.container_id_by_name("foo").unwrap(), id);
        assert_eq!(store.load_config(id).unwrap(), config(&[("user.x", "1")]));
        assert_eq!(store.list_containers(ContainerKind::Regular).unwrap(), ["foo"]);
    }

    #[test]
    fn duplicate_create_is_already_defined() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_container("foo", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();
        let err = store
            .create_container("foo", ContainerKind::Regular, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyDefined(_)));
    }

    #[test]
    fn bad_config_key_rolls_back_creation() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .create_container(
                "foo",
                ContainerKind::Regular,
                &config(&[("limits.cpus", "2"), ("not.a.key", "x")]),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::BadKey(_)));

        // The whole transaction rolled back: no row, no config.
        assert!(matches!(
            store.container_id_by_name("foo"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn replace_config_is_atomic_and_complete() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_profile("default", &config(&[("limits.memory", "1G")]), &Devices::new())
            .unwrap();
        let id = store
            .create_container(
                "foo",
                ContainerKind::Regular,
                &config(&[("limits.cpus", "2")]),
            )
            .unwrap();

        let mut devices = Devices::new();
        devices.insert(
            "eth0".to_string(),
            device(&[("type", "nic"), ("parent", "br0")]),
        );

        store
            .replace_container_config(
                id,
                &config(&[("limits.memory", "512M")]),
                &["default".to_string()],
                &devices,
            )
            .unwrap();

        assert_eq!(
            store.load_config(id).unwrap(),
            config(&[("limits.memory", "512M")])
        );
        assert_eq!(store.load_profiles(id).unwrap(), ["default"]);
        let loaded = store.load_devices("foo", DeviceOwner::Container).unwrap();
        assert_eq!(loaded["eth0"]["type"], "nic");
        assert_eq!(loaded["eth0"]["parent"], "br0");
    }

    #[test]
    fn profile_apply_order_is_contiguous() {
        let store = Store::open_in_memory().unwrap();
        for p in ["a", "b", "c"] {
            store
                .create_profile(p, &BTreeMap::new(), &Devices::new())
                .unwrap();
        }
        let id = store
            .create_container("foo", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();
        store
            .replace_container_config(
                id,
                &BTreeMap::new(),
                &["c".to_string(), "a".to_string(), "b".to_string()],
                &Devices::new(),
            )
            .unwrap();

        // Bound order, not alphabetical order.
        assert_eq!(store.load_profiles(id).unwrap(), ["c", "a", "b"]);

        let conn = store.conn();
        let mut stmt = conn
            .prepare(
                "SELECT apply_order FROM containers_profiles
                 WHERE container_id = ?1 ORDER BY apply_order",
            )
            .unwrap();
        let orders: Vec<i64> = stmt
            .query_map([id], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(orders, [1, 2, 3]);
    }

    #[test]
    fn empty_profile_list_clears_bindings() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_profile("default", &BTreeMap::new(), &Devices::new())
            .unwrap();
        let id = store
            .create_container("foo", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();
        store
            .replace_container_config(
                id,
                &BTreeMap::new(),
                &["default".to_string()],
                &Devices::new(),
            )
            .unwrap();
        store
            .replace_container_config(id, &BTreeMap::new(), &[String::new()], &Devices::new())
            .unwrap();
        assert!(store.load_profiles(id).unwrap().is_empty());
    }

    #[test]
    fn snapshot_enumeration_and_index() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_container("c", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();
        assert_eq!(store.next_snapshot_index("c").unwrap(), 0);

        for leaf in ["snap0", "snap3", "backup", "snapx"] {
            store
                .create_container(
                    &format!("c/{leaf}"),
                    ContainerKind::Snapshot,
                    &BTreeMap::new(),
                )
                .unwrap();
        }

        let snaps = store.snapshots_of("c").unwrap();
        let leaves: Vec<&str> = snaps.iter().map(|(leaf, _)| leaf.as_str()).collect();
        assert_eq!(leaves, ["backup", "snap0", "snap3", "snapx"]);

        // Highest numeric suffix is 3; non-numeric leaves are ignored.
        assert_eq!(store.next_snapshot_index("c").unwrap(), 4);
    }

    #[test]
    fn snapshot_rename_and_delete() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_container("c", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();
        store
            .create_container("c/snap0", ContainerKind::Snapshot, &BTreeMap::new())
            .unwrap();

        store.rename_snapshot("c", "snap0", "backup").unwrap();
        let leaves: Vec<String> = store
            .snapshots_of("c")
            .unwrap()
            .into_iter()
            .map(|(leaf, _)| leaf)
            .collect();
        assert_eq!(leaves, ["backup"]);

        store.delete_snapshot("c", "backup").unwrap();
        assert!(store.snapshots_of("c").unwrap().is_empty());
    }

    #[test]
    fn device_without_type_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .create_container("foo", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();

        let mut devices = Devices::new();
        devices.insert("bad".to_string(), device(&[("path", "/dev/null")]));

        let err = store
            .replace_container_config(id, &BTreeMap::new(), &[], &devices)
            .unwrap_err();
        assert!(matches!(err, StoreError::BadDevice(_)));
        // Rolled back: the earlier (empty) state is intact.
        assert!(store.load_devices("foo", DeviceOwner::Container).unwrap().is_empty());
    }
}
