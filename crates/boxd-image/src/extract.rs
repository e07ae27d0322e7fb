//! Rootfs extraction and ownership shifting.
//!
//! Image tarballs are extracted with the system `tar` so device nodes,
//! hard links and xattrs survive `--numeric-owner` extraction, then the
//! tree's ownership is shifted into the daemon's subordinate id range.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::unistd::{Gid, Uid, fchownat, FchownatFlags};
use tokio::process::Command;

use crate::compression::detect_compression;
use crate::error::{ImageError, Result};

/// Extracts the `rootfs` member of an image tarball into `container_dir`.
///
/// # Errors
///
/// Returns `ImageError::UnknownCompression` for unrecognized images and
/// `ImageError::Extract` when `tar` fails.
pub async fn extract_rootfs(image: &Path, container_dir: &Path) -> Result<()> {
    let compression = detect_compression(image)?;

    let mut cmd = Command::new("tar");
    cmd.arg("-C").arg(container_dir).arg("--numeric-owner");
    cmd.args(compression.tar_flags());
    cmd.arg(image).arg("rootfs");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(ImageError::Extract(format!(
            "tar of {}: {}",
            image.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    tracing::debug!(image = %image.display(), dir = %container_dir.display(), "rootfs extracted");
    Ok(())
}

/// Shifts every inode under `root` (inclusive) by the given uid/gid offsets,
/// without following symlinks.
///
/// # Errors
///
/// Returns `ImageError::Shift` on the first chown failure.
pub fn shift_rootfs(root: &Path, uid_offset: u32, gid_offset: u32) -> Result<()> {
    shift_entry(root, uid_offset, gid_offset)?;

    let entries = std::fs::read_dir(root)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            shift_rootfs(&path, uid_offset, gid_offset)?;
        } else {
            shift_entry(&path, uid_offset, gid_offset)?;
        }
    }
    Ok(())
}

fn shift_entry(path: &Path, uid_offset: u32, gid_offset: u32) -> Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    let uid = Uid::from_raw(meta.uid() + uid_offset);
    let gid = Gid::from_raw(meta.gid() + gid_offset);

    fchownat(
        None,
        path,
        Some(uid),
        Some(gid),
        FchownatFlags::NoFollowSymlink,
    )
    .map_err(|err| ImageError::Shift(format!("{}: {err}", path.display())))
}

/// Grants the mapped root user traversal rights on the container directory.
///
/// # Errors
///
/// Returns an error if `setfacl` fails; callers treat this as non-fatal.
pub async fn grant_root_traversal(dir: &Path, uid: u32) -> Result<()> {
    let output = Command::new("setfacl")
        .arg("-m")
        .arg(format!("{uid}:rx"))
        .arg(dir)
        .output()
        .await?;
    if !output.status.success() {
        return Err(ImageError::Shift(format!(
            "setfacl on {}: {}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Populates a container directory from an image: extract, shift, and
/// grant the mapped root traversal rights. ACL failure only logs a warning;
/// the container may still start on many filesystems.
///
/// # Errors
///
/// Returns the first extraction or shift failure.
pub async fn populate_rootfs(
    image: &Path,
    container_dir: &Path,
    uid_offset: u32,
    gid_offset: u32,
) -> Result<()> {
    extract_rootfs(image, container_dir).await?;

    let rootfs = container_dir.join("rootfs");
    shift_rootfs(&rootfs, uid_offset, gid_offset)?;

    if let Err(err) = grant_root_traversal(container_dir, uid_offset).await {
        tracing::warn!(dir = %container_dir.display(), error = %err,
            "failed to add acl for container root; start will likely fail");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    #[tokio::test]
    async fn extracts_rootfs_member_from_plain_tar() {
        let dir = tempfile::tempdir().unwrap();

        // Build an image tarball containing rootfs/etc/hostname.
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(staging.join("rootfs/etc")).unwrap();
        std::fs::write(staging.join("rootfs/etc/hostname"), "test\n").unwrap();

        let image = dir.path().join("image.tar");
        let status = StdCommand::new("tar")
            .arg("-C")
            .arg(&staging)
            .arg("-cf")
            .arg(&image)
            .arg("rootfs")
            .status()
            .unwrap();
        assert!(status.success());

        let container_dir = dir.path().join("container");
        std::fs::create_dir_all(&container_dir).unwrap();
        extract_rootfs(&image, &container_dir).await.unwrap();

        let extracted = container_dir.join("rootfs/etc/hostname");
        assert_eq!(std::fs::read_to_string(extracted).unwrap(), "test\n");
    }

    #[test]
    fn shift_with_zero_offset_walks_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/file"), "x").unwrap();

        // Offset 0 keeps ownership; the walk itself must succeed.
        shift_rootfs(dir.path(), 0, 0).unwrap();
    }
}
