//! Attach stdio plumbing for exec.
//!
//! Interactive attach gets a single PTY pair with the subordinate end wired
//! to all three stdio streams; non-interactive attach gets three pipes. The
//! daemon-side ends are set non-blocking so they can be driven by async I/O.

use std::collections::BTreeMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::pty::openpty;
use nix::unistd::pipe;

use crate::driver::AttachOptions;
use crate::error::Result;

/// A PTY pair. The master side stays with the daemon for mirroring; the
/// slave side becomes the attached process's stdio.
pub struct Pty {
    /// Daemon side.
    pub master: OwnedFd,
    /// Process side.
    pub slave: OwnedFd,
}

impl Pty {
    /// Opens a new PTY pair with a non-blocking master.
    ///
    /// # Errors
    ///
    /// Returns an error if the PTY cannot be allocated.
    pub fn open() -> Result<Self> {
        let pair = openpty(None, None).map_err(std::io::Error::from)?;
        set_nonblocking(pair.master.as_raw_fd())?;
        Ok(Self {
            master: pair.master,
            slave: pair.slave,
        })
    }
}

/// Opens a pipe, returning `(read, write)` ends.
///
/// # Errors
///
/// Returns an error if the pipe cannot be created.
pub fn pipe_pair() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = pipe().map_err(std::io::Error::from)?;
    // Safety: `pipe()` returns two newly created, uniquely owned descriptors.
    let read = unsafe { OwnedFd::from_raw_fd(read) };
    let write = unsafe { OwnedFd::from_raw_fd(write) };
    Ok((read, write))
}

/// Sets `O_NONBLOCK` on a descriptor.
///
/// # Errors
///
/// Returns an error if the flags cannot be changed.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(std::io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(std::io::Error::from)?;
    Ok(())
}

/// Builds attach options from an exec request's environment.
///
/// The environment replaces the container's entirely, and `HOME` also seeds
/// the working directory.
#[must_use]
pub fn attach_options(
    environment: &BTreeMap<String, String>,
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
) -> AttachOptions {
    let cwd = environment.get("HOME").map(PathBuf::from);
    let env = environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    AttachOptions {
        clear_env: true,
        env,
        cwd,
        stdin,
        stdout,
        stderr,
    }
}
