//! The runtime driver seam.
//!
//! [`ContainerDriver`] is the narrow surface the daemon needs from the
//! low-level container library: config items, lifecycle primitives,
//! checkpointing and command attach. The production implementation
//! ([`CmdDriver`]) shells out to the `lxc-*` tools; tests substitute a
//! recording mock.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ContainerError, Result};

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Aborting,
    Freezing,
    Frozen,
    Thawed,
}

impl ContainerStatus {
    /// Numeric state code, matching the runtime's state enumeration.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Stopped => 1,
            Self::Starting => 2,
            Self::Running => 3,
            Self::Stopping => 4,
            Self::Aborting => 5,
            Self::Freezing => 6,
            Self::Frozen => 7,
            Self::Thawed => 8,
        }
    }

    fn parse(s: &str) -> Self {
        match s.trim() {
            "STARTING" => Self::Starting,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "ABORTING" => Self::Aborting,
            "FREEZING" => Self::Freezing,
            "FROZEN" => Self::Frozen,
            "THAWED" => Self::Thawed,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Aborting => "ABORTING",
            Self::Freezing => "FREEZING",
            Self::Frozen => "FROZEN",
            Self::Thawed => "THAWED",
        };
        write!(f, "{s}")
    }
}

/// Options for attaching a command inside a running container.
///
/// The environment replaces the container's entirely (`clear_env`), and the
/// three stdio fds are moved into the attached process.
pub struct AttachOptions {
    /// Clear the inherited environment before applying `env`.
    pub clear_env: bool,
    /// Environment to set.
    pub env: Vec<(String, String)>,
    /// Working directory inside the container.
    pub cwd: Option<PathBuf>,
    /// Stdin for the attached process.
    pub stdin: OwnedFd,
    /// Stdout for the attached process.
    pub stdout: OwnedFd,
    /// Stderr for the attached process.
    pub stderr: OwnedFd,
}

/// Low-level container operations.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Appends a runtime config item. Repeated keys accumulate.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is rejected.
    fn set_config_item(&mut self, key: &str, value: &str) -> Result<()>;

    /// Starts the container.
    async fn start(&self) -> Result<()>;

    /// Stops the container immediately.
    async fn stop(&self) -> Result<()>;

    /// Gracefully shuts the container down; `None` means no timeout.
    async fn shutdown(&self, timeout: Option<Duration>) -> Result<()>;

    /// Reboots the container.
    async fn reboot(&self) -> Result<()>;

    /// Freezes the container's processes.
    async fn freeze(&self) -> Result<()>;

    /// Thaws the container's processes.
    async fn unfreeze(&self) -> Result<()>;

    /// Renames the container on disk and in the runtime.
    async fn rename(&self, new_name: &str) -> Result<()>;

    /// Checkpoints process state into `dir`.
    async fn checkpoint(&self, dir: &Path, stop: bool, verbose: bool) -> Result<()>;

    /// Runs a command inside the container, returning its exit status.
    async fn attach(&self, command: &[String], options: AttachOptions) -> Result<i32>;

    /// Current runtime state.
    fn status(&self) -> ContainerStatus;

    /// Whether the container is running.
    fn running(&self) -> bool {
        self.status() == ContainerStatus::Running
    }

    /// Pid of the container's init process, when running.
    fn init_pid(&self) -> Option<i32>;
}

/// Produces driver instances rooted at the daemon's runtime path.
pub trait DriverFactory: Send + Sync {
    /// Opens a driver for the named container.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot be constructed.
    fn open(&self, name: &str) -> Result<Box<dyn ContainerDriver>>;
}

/// Driver shelling out to the `lxc-*` tools.
pub struct CmdDriver {
    name: String,
    lxc_path: PathBuf,
    items: Vec<(String, String)>,
}

impl CmdDriver {
    /// Creates a driver for `name` rooted at `lxc_path`.
    #[must_use]
    pub fn new(name: impl Into<String>, lxc_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            lxc_path: lxc_path.into(),
            items: Vec::new(),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.lxc_path.join(&self.name).join("config")
    }

    /// Writes the accumulated config items to the container's config file.
    fn save_config(&self) -> Result<()> {
        let mut rendered = String::new();
        for (key, value) in &self.items {
            rendered.push_str(key);
            rendered.push_str(" = ");
            rendered.push_str(value);
            rendered.push('\n');
        }
        if let Some(parent) = self.config_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(self.config_path(), rendered)?;
        Ok(())
    }

    fn base_command(&self, tool: &str) -> Command {
        let mut cmd = Command::new(tool);
        cmd.arg("-P")
            .arg(&self.lxc_path)
            .arg("-n")
            .arg(&self.name);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<()> {
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::Driver(format!(
                "{}: {}",
                self.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn info_field(&self, flag: &str) -> Option<String> {
        let output = std::process::Command::new("lxc-info")
            .arg("-P")
            .arg(&self.lxc_path)
            .arg("-n")
            .arg(&self.name)
            .arg(flag)
            .arg("-H")
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerDriver for CmdDriver {
    fn set_config_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.items.push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.save_config()?;
        let mut cmd = self.base_command("lxc-start");
        cmd.arg("-d").arg("-f").arg(self.config_path());
        self.run(cmd).await
    }

    async fn stop(&self) -> Result<()> {
        let mut cmd = self.base_command("lxc-stop");
        cmd.arg("-k");
        self.run(cmd).await
    }

    async fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let mut cmd = self.base_command("lxc-stop");
        cmd.arg("--nokill");
        if let Some(timeout) = timeout {
            cmd.arg("-t").arg(timeout.as_secs().to_string());
        }
        self.run(cmd).await
    }

    async fn reboot(&self) -> Result<()> {
        let mut cmd = self.base_command("lxc-stop");
        cmd.arg("-r");
        self.run(cmd).await
    }

    async fn freeze(&self) -> Result<()> {
        self.run(self.base_command("lxc-freeze")).await
    }

    async fn unfreeze(&self) -> Result<()> {
        self.run(self.base_command("lxc-unfreeze")).await
    }

    async fn rename(&self, new_name: &str) -> Result<()> {
        let mut cmd = self.base_command("lxc-copy");
        cmd.arg("-R").arg("-N").arg(new_name);
        self.run(cmd).await
    }

    async fn checkpoint(&self, dir: &Path, stop: bool, verbose: bool) -> Result<()> {
        let mut cmd = self.base_command("lxc-checkpoint");
        cmd.arg("-D").arg(dir);
        if stop {
            cmd.arg("-s");
        }
        if verbose {
            cmd.arg("-v");
        }
        self.run(cmd).await
    }

    async fn attach(&self, command: &[String], options: AttachOptions) -> Result<i32> {
        if command.is_empty() {
            return Err(ContainerError::BadConfig("empty command".to_string()));
        }

        let mut cmd = self.base_command("lxc-attach");
        if options.clear_env {
            cmd.arg("--clear-env");
        }
        for (key, value) in &options.env {
            cmd.arg("-v").arg(format!("{key}={value}"));
        }
        cmd.arg("--");

        // lxc-attach has no working-directory flag; wrap when one is set.
        if let Some(cwd) = &options.cwd {
            cmd.arg("sh")
                .arg("-c")
                .arg(format!("cd {} && exec \"$@\"", cwd.display()))
                .arg("sh");
        }
        cmd.args(command);

        cmd.stdin(Stdio::from(options.stdin));
        cmd.stdout(Stdio::from(options.stdout));
        cmd.stderr(Stdio::from(options.stderr));

        let status = cmd.status().await?;
        Ok(status.code().unwrap_or(-1))
    }

    fn status(&self) -> ContainerStatus {
        self.info_field("-s")
            .map_or(ContainerStatus::Stopped, |s| ContainerStatus::parse(&s))
    }

    fn init_pid(&self) -> Option<i32> {
        self.info_field("-p")?.parse().ok()
    }
}

/// Factory producing [`CmdDriver`] instances.
pub struct CmdDriverFactory {
    lxc_path: PathBuf,
}

impl CmdDriverFactory {
    /// Creates a factory rooted at the daemon's runtime path.
    #[must_use]
    pub fn new(lxc_path: impl Into<PathBuf>) -> Self {
        Self {
            lxc_path: lxc_path.into(),
        }
    }
}

impl DriverFactory for CmdDriverFactory {
    fn open(&self, name: &str) -> Result<Box<dyn ContainerDriver>> {
        Ok(Box::new(CmdDriver::new(name, self.lxc_path.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_covers_runtime_states() {
        assert_eq!(ContainerStatus::parse("RUNNING"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::parse("FROZEN"), ContainerStatus::Frozen);
        assert_eq!(ContainerStatus::parse("garbage"), ContainerStatus::Stopped);
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(ContainerStatus::Stopped.code(), 1);
        assert_eq!(ContainerStatus::Running.code(), 3);
        assert_eq!(ContainerStatus::Thawed.code(), 8);
    }

    #[test]
    fn config_file_renders_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = CmdDriver::new("c1", dir.path());
        driver.set_config_item("lxc.arch", "x86_64").unwrap();
        driver.set_config_item("lxc.id_map", "u 0 100000 65536").unwrap();
        driver.set_config_item("lxc.id_map", "g 0 100000 65536").unwrap();
        driver.save_config().unwrap();

        let rendered = std::fs::read_to_string(dir.path().join("c1/config")).unwrap();
        assert_eq!(
            rendered,
            "lxc.arch = x86_64\nlxc.id_map = u 0 100000 65536\nlxc.id_map = g 0 100000 65536\n"
        );
    }
}
