//! Image and alias lookups.

use rusqlite::OptionalExtension;

use crate::error::{Result, StoreError};
use crate::Store;

impl Store {
    /// Resolves an alias to its image id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown alias.
    pub fn image_id_by_alias(&self, alias: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT image_id FROM images_aliases WHERE name = ?1",
            [alias],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("alias {alias}")))
    }

    /// Resolves an image id to its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StaleAlias` if the image row is gone; this is the
    /// alias-points-at-nothing case.
    pub fn image_fingerprint_by_id(&self, id: i64) -> Result<String> {
        let conn = self.conn();
        conn.query_row(
            "SELECT fingerprint FROM images WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::StaleAlias(format!("image id {id}")))
    }

    /// Looks up an image by fingerprint, returning `(id, fingerprint)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownImage` if no row matches.
    pub fn image_by_fingerprint(&self, fingerprint: &str) -> Result<(i64, String)> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, fingerprint FROM images WHERE fingerprint = ?1",
            [fingerprint],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::UnknownImage(fingerprint.to_string()))
    }

    /// Registers an image fingerprint, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn insert_image(&self, fingerprint: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute("INSERT INTO images (fingerprint) VALUES (?1)", [fingerprint])?;
        Ok(conn.last_insert_rowid())
    }

    /// Creates an alias for an image id.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn insert_alias(&self, name: &str, image_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO images_aliases (name, image_id) VALUES (?1, ?2)",
            rusqlite::params![name, image_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolution_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_image("abc123").unwrap();
        store.insert_alias("ubuntu", id).unwrap();

        let resolved = store.image_id_by_alias("ubuntu").unwrap();
        assert_eq!(resolved, id);
        assert_eq!(store.image_fingerprint_by_id(resolved).unwrap(), "abc123");
    }

    #[test]
    fn stale_alias_is_distinguishable() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_image("abc123").unwrap();
        store.insert_alias("ubuntu", id).unwrap();
        store
            .conn()
            .execute("DELETE FROM images WHERE id = ?1", [id])
            .unwrap();

        let looked_up = store.image_id_by_alias("ubuntu").unwrap();
        let err = store.image_fingerprint_by_id(looked_up).unwrap_err();
        assert!(matches!(err, StoreError::StaleAlias(_)));
    }

    #[test]
    fn unknown_fingerprint() {
        let store = Store::open_in_memory().unwrap();
        let err = store.image_by_fingerprint("nope").unwrap_err();
        assert!(matches!(err, StoreError::UnknownImage(_)));
    }
}
