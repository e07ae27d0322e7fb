//! SQLite-backed store for the container daemon.
//!
//! The store holds container rows (regular containers and snapshots in one
//! table), whitelisted config entries, ordered profile bindings, device rows
//! with their attributes, and the image alias table. All mutating operations
//! that touch more than one table run inside a single transaction.

mod containers;
mod error;
mod images;
mod schema;

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

pub use containers::{
    ContainerKind, ContainerRow, Device, DeviceOwner, Devices, bind_profiles,
    clear_container_config, insert_container_config, insert_devices,
};
pub use error::{Result, StoreError};

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`; transactions never span handler
/// boundaries, so the coarse lock is sufficient.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// initialized.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL for concurrent readers, foreign keys for cascading deletes.
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=30000;
            ",
        )?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquires the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(schema::SCHEMA_VERSION_TABLE)?;

        let current: Option<i32> = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match current {
            None => {
                for stmt in schema::all_schemas() {
                    conn.execute_batch(stmt)?;
                }
                conn.execute(
                    "INSERT INTO schema_version (id, version) VALUES (1, ?1)",
                    [schema::SCHEMA_VERSION],
                )?;
                tracing::debug!(version = schema::SCHEMA_VERSION, "store schema created");
            }
            Some(v) if v == schema::SCHEMA_VERSION => {}
            Some(v) => {
                return Err(StoreError::NotFound(format!(
                    "unsupported schema version {v} (daemon supports {})",
                    schema::SCHEMA_VERSION
                )));
            }
        }

        Ok(())
    }
}

/// Returns true if `key` is an accepted container config key.
///
/// Everything outside the fixed whitelist is rejected at insertion time,
/// except opaque `user.*` metadata.
#[must_use]
pub fn valid_config_key(key: &str) -> bool {
    matches!(
        key,
        "limits.cpus" | "limits.memory" | "security.privileged" | "raw.apparmor" | "raw.lxc"
    ) || key.starts_with("user.")
}
