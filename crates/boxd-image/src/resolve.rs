//! Image reference resolution.

use boxd_store::Store;

use crate::error::{ImageError, Result};

/// Resolves an image reference (exactly one of alias or fingerprint) to the
/// image uuid used as its on-disk blob name.
///
/// # Errors
///
/// Returns `ImageError::BadSource` when not exactly one of the two is given,
/// and surfaces stale-alias / unknown-image store errors.
pub fn resolve_image(
    store: &Store,
    alias: Option<&str>,
    fingerprint: Option<&str>,
) -> Result<String> {
    match (alias, fingerprint) {
        (Some(alias), None) => {
            let image_id = store.image_id_by_alias(alias)?;
            Ok(store.image_fingerprint_by_id(image_id)?)
        }
        (None, Some(fingerprint)) => {
            let (_, uuid) = store.image_by_fingerprint(fingerprint)?;
            Ok(uuid)
        }
        _ => Err(ImageError::BadSource(
            "must specify exactly one of alias or fingerprint".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxd_store::StoreError;

    #[test]
    fn resolves_via_alias_and_fingerprint() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_image("abc").unwrap();
        store.insert_alias("ubuntu", id).unwrap();

        assert_eq!(resolve_image(&store, Some("ubuntu"), None).unwrap(), "abc");
        assert_eq!(resolve_image(&store, None, Some("abc")).unwrap(), "abc");
    }

    #[test]
    fn requires_exactly_one_reference() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            resolve_image(&store, None, None),
            Err(ImageError::BadSource(_))
        ));
        assert!(matches!(
            resolve_image(&store, Some("a"), Some("b")),
            Err(ImageError::BadSource(_))
        ));
    }

    #[test]
    fn stale_alias_surfaces() {
        let store = Store::open_in_memory().unwrap();
        // Alias pointing at an image row that does not exist.
        store.insert_alias("ubuntu", 999).unwrap();

        assert!(matches!(
            resolve_image(&store, Some("ubuntu"), None),
            Err(ImageError::Store(StoreError::StaleAlias(_)))
        ));
    }
}
