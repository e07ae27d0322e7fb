//! On-disk layout of the daemon's state directory.
//!
//! Regular containers live under `<var>/lxc/<name>/` with `rootfs/` and a
//! `log` file; snapshots under `<var>/lxc/<parent>/snapshots/<leaf>/` with
//! `rootfs/` and optionally `state/`. Images live at `<var>/images/<uuid>`.

use std::path::{Path, PathBuf};

use crate::error::{ContainerError, Result};

/// Resolves paths under the daemon's state directory.
#[derive(Debug, Clone)]
pub struct Layout {
    var_dir: PathBuf,
}

impl Layout {
    /// Creates a layout rooted at `var_dir`.
    pub fn new(var_dir: impl Into<PathBuf>) -> Self {
        Self {
            var_dir: var_dir.into(),
        }
    }

    /// The state directory root.
    #[must_use]
    pub fn var_dir(&self) -> &Path {
        &self.var_dir
    }

    /// The runtime path holding all container directories.
    #[must_use]
    pub fn lxc_dir(&self) -> PathBuf {
        self.var_dir.join("lxc")
    }

    /// A container's directory.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.lxc_dir().join(name)
    }

    /// A container's root filesystem.
    #[must_use]
    pub fn rootfs_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("rootfs")
    }

    /// A container's log file.
    #[must_use]
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("log")
    }

    /// The snapshots directory of a container.
    #[must_use]
    pub fn snapshots_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("snapshots")
    }

    /// A single snapshot's directory.
    #[must_use]
    pub fn snapshot_dir(&self, name: &str, leaf: &str) -> PathBuf {
        self.snapshots_dir(name).join(leaf)
    }

    /// A snapshot's checkpoint state directory.
    #[must_use]
    pub fn snapshot_state_dir(&self, name: &str, leaf: &str) -> PathBuf {
        self.snapshot_dir(name, leaf).join("state")
    }

    /// A snapshot's root filesystem.
    #[must_use]
    pub fn snapshot_rootfs_dir(&self, name: &str, leaf: &str) -> PathBuf {
        self.snapshot_dir(name, leaf).join("rootfs")
    }

    /// The image blob directory.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.var_dir.join("images")
    }

    /// The path of an image blob by fingerprint.
    #[must_use]
    pub fn image_path(&self, fingerprint: &str) -> PathBuf {
        self.images_dir().join(fingerprint)
    }
}

/// A parsed snapshot name of the form `parent/leaf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotName {
    /// The owning container.
    pub parent: String,
    /// The snapshot leaf name.
    pub leaf: String,
}

impl SnapshotName {
    /// Parses a full snapshot name. Snapshots of snapshots are not
    /// supported, so the name must contain exactly one `/`.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::BadSnapshotName` otherwise.
    pub fn parse(full: &str) -> Result<Self> {
        let mut parts = full.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(parent), Some(leaf), None) if !parent.is_empty() && !leaf.is_empty() => {
                Ok(Self {
                    parent: parent.to_string(),
                    leaf: leaf.to_string(),
                })
            }
            _ => Err(ContainerError::BadSnapshotName(full.to_string())),
        }
    }

    /// The full `parent/leaf` form.
    #[must_use]
    pub fn full(&self) -> String {
        format!("{}/{}", self.parent, self.leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = Layout::new("/var/lib/boxd");
        assert_eq!(
            layout.rootfs_dir("web"),
            PathBuf::from("/var/lib/boxd/lxc/web/rootfs")
        );
        assert_eq!(
            layout.snapshot_state_dir("web", "snap0"),
            PathBuf::from("/var/lib/boxd/lxc/web/snapshots/snap0/state")
        );
        assert_eq!(
            layout.image_path("abc"),
            PathBuf::from("/var/lib/boxd/images/abc")
        );
    }

    #[test]
    fn snapshot_name_needs_exactly_one_slash() {
        let name = SnapshotName::parse("web/snap0").unwrap();
        assert_eq!(name.parent, "web");
        assert_eq!(name.leaf, "snap0");
        assert_eq!(name.full(), "web/snap0");

        for bad in ["web", "web/snap0/extra", "/snap0", "web/", ""] {
            assert!(SnapshotName::parse(bad).is_err(), "{bad} should be invalid");
        }
    }
}
