//! Lifecycle operations on a materialized container.

use std::path::Path;
use std::time::Duration;

use crate::driver::AttachOptions;
use crate::error::{ContainerError, Result};
use crate::materialize::ContainerHandle;

/// A requested lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Freeze,
    Unfreeze,
}

impl std::str::FromStr for Action {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "freeze" => Ok(Self::Freeze),
            "unfreeze" => Ok(Self::Unfreeze),
            other => Err(ContainerError::UnknownAction(other.to_string())),
        }
    }
}

impl ContainerHandle {
    /// Performs a lifecycle action.
    ///
    /// `stop` is immediate when `timeout == 0` or `force` is set; otherwise
    /// it is a graceful shutdown with the given timeout in seconds, where a
    /// negative timeout means no timeout at all.
    ///
    /// # Errors
    ///
    /// Surfaces the underlying driver error.
    pub async fn perform(&self, action: Action, timeout: i64, force: bool) -> Result<()> {
        match action {
            Action::Start => self.driver.start().await,
            Action::Stop => {
                if timeout == 0 || force {
                    self.driver.stop().await
                } else {
                    let timeout = u64::try_from(timeout)
                        .ok()
                        .map(Duration::from_secs);
                    self.driver.shutdown(timeout).await
                }
            }
            Action::Restart => self.driver.reboot().await,
            Action::Freeze => self.driver.freeze().await,
            Action::Unfreeze => self.driver.unfreeze().await,
        }
    }

    /// Renames the container through the runtime.
    ///
    /// # Errors
    ///
    /// Surfaces the underlying driver error.
    pub async fn rename(&self, new_name: &str) -> Result<()> {
        self.driver.rename(new_name).await
    }

    /// Checkpoints process state into `dir`.
    ///
    /// # Errors
    ///
    /// Surfaces the underlying driver error.
    pub async fn checkpoint(&self, dir: &Path, stop: bool, verbose: bool) -> Result<()> {
        self.driver.checkpoint(dir, stop, verbose).await
    }

    /// Runs a command inside the container.
    ///
    /// # Errors
    ///
    /// Surfaces the underlying driver error.
    pub async fn attach(&self, command: &[String], options: AttachOptions) -> Result<i32> {
        self.driver.attach(command, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse() {
        assert_eq!("start".parse::<Action>().unwrap(), Action::Start);
        assert_eq!("unfreeze".parse::<Action>().unwrap(), Action::Unfreeze);
        assert!(matches!(
            "explode".parse::<Action>(),
            Err(ContainerError::UnknownAction(_))
        ));
    }
}
