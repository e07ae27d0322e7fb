//! Compression detection for image tarballs.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ImageError, Result};

/// Compression format of an image tarball.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Tar,
    Gzip,
    Bzip2,
    Lzma,
    Xz,
}

impl Compression {
    /// The `tar` flags that extract this format.
    #[must_use]
    pub fn tar_flags(self) -> &'static [&'static str] {
        match self {
            Self::Tar => &["-xf"],
            Self::Gzip => &["-zxf"],
            Self::Bzip2 => &["--jxf"],
            Self::Lzma => &["--lzma", "-xf"],
            Self::Xz => &["-Jxf"],
        }
    }
}

/// Detects the compression of a file by its magic bytes.
///
/// Plain tar is recognized by the `ustar` marker at offset 257.
///
/// # Errors
///
/// Returns `ImageError::UnknownCompression` when no signature matches.
pub fn detect_compression(path: &Path) -> Result<Compression> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 263];
    let n = file.read(&mut header)?;
    let header = &header[..n];

    if header.starts_with(&[0x1f, 0x8b]) {
        return Ok(Compression::Gzip);
    }
    if header.starts_with(b"BZh") {
        return Ok(Compression::Bzip2);
    }
    if header.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
        return Ok(Compression::Xz);
    }
    if header.starts_with(&[0x5d, 0x00, 0x00]) {
        return Ok(Compression::Lzma);
    }
    if header.len() > 262 && &header[257..262] == b"ustar" {
        return Ok(Compression::Tar);
    }

    Err(ImageError::UnknownCompression(path.display().to_string()))
}
