//! Recording mock driver for tests.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{AttachOptions, ContainerDriver, ContainerStatus, DriverFactory};
use crate::error::Result;

/// Shared mock state, inspectable after the driver is consumed by a handle.
pub struct MockState {
    /// Config items in application order.
    pub items: Vec<(String, String)>,
    /// Reported runtime state.
    pub status: ContainerStatus,
    /// Reported init pid.
    pub init_pid: Option<i32>,
    /// Lifecycle calls in order.
    pub calls: Vec<String>,
    /// Bytes the mock writes to stdout during attach.
    pub attach_stdout: Vec<u8>,
    /// Exit status attach returns.
    pub attach_result: i32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            status: ContainerStatus::Stopped,
            init_pid: None,
            calls: Vec::new(),
            attach_stdout: Vec::new(),
            attach_result: 0,
        }
    }
}

/// Driver that records everything into a shared [`MockState`].
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Creates a driver with its own fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Creates a driver around shared state.
    #[must_use]
    pub fn with_state(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }

    /// Config items recorded so far.
    #[must_use]
    pub fn recorded_items(&self) -> Vec<(String, String)> {
        self.state.lock().items.clone()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    fn set_config_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .items
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("start".to_string());
        state.status = ContainerStatus::Running;
        state.init_pid = Some(1);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("stop".to_string());
        state.status = ContainerStatus::Stopped;
        state.init_pid = None;
        Ok(())
    }

    async fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(match timeout {
            Some(t) => format!("shutdown {}", t.as_secs()),
            None => "shutdown".to_string(),
        });
        state.status = ContainerStatus::Stopped;
        state.init_pid = None;
        Ok(())
    }

    async fn reboot(&self) -> Result<()> {
        self.state.lock().calls.push("reboot".to_string());
        Ok(())
    }

    async fn freeze(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("freeze".to_string());
        state.status = ContainerStatus::Frozen;
        Ok(())
    }

    async fn unfreeze(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push("unfreeze".to_string());
        state.status = ContainerStatus::Running;
        Ok(())
    }

    async fn rename(&self, new_name: &str) -> Result<()> {
        self.state.lock().calls.push(format!("rename {new_name}"));
        Ok(())
    }

    async fn checkpoint(&self, dir: &Path, stop: bool, verbose: bool) -> Result<()> {
        self.state.lock().calls.push(format!(
            "checkpoint {} stop={stop} verbose={verbose}",
            dir.display()
        ));
        Ok(())
    }

    async fn attach(&self, command: &[String], options: AttachOptions) -> Result<i32> {
        let (stdout, result) = {
            let mut state = self.state.lock();
            state.calls.push(format!("attach {}", command.join(" ")));
            (state.attach_stdout.clone(), state.attach_result)
        };
        if !stdout.is_empty() {
            let _ = nix::unistd::write(options.stdout.as_raw_fd(), &stdout);
        }
        // Dropping the options closes the attached ends.
        Ok(result)
    }

    fn status(&self) -> ContainerStatus {
        self.state.lock().status
    }

    fn init_pid(&self) -> Option<i32> {
        self.state.lock().init_pid
    }
}

/// Factory handing out [`MockDriver`]s with per-name shared state.
pub struct MockFactory {
    states: Mutex<HashMap<String, Arc<Mutex<MockState>>>>,
}

impl MockFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns (creating if needed) the shared state for a name.
    pub fn state(&self, name: &str) -> Arc<Mutex<MockState>> {
        self.states
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Config items recorded for a name.
    #[must_use]
    pub fn recorded_items(&self, name: &str) -> Vec<(String, String)> {
        self.state(name).lock().items.clone()
    }

    /// Lifecycle calls recorded for a name.
    #[must_use]
    pub fn calls(&self, name: &str) -> Vec<String> {
        self.state(name).lock().calls.clone()
    }

    /// Forces the reported runtime state for a name.
    pub fn set_status(&self, name: &str, status: ContainerStatus) {
        let state = self.state(name);
        let mut state = state.lock();
        state.status = status;
        state.init_pid = (status == ContainerStatus::Running).then_some(1);
    }

    /// Sets the bytes attach writes to stdout.
    pub fn set_attach_stdout(&self, name: &str, bytes: &[u8]) {
        self.state(name).lock().attach_stdout = bytes.to_vec();
    }

    /// Sets the exit status attach returns.
    pub fn set_attach_result(&self, name: &str, result: i32) {
        self.state(name).lock().attach_result = result;
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for MockFactory {
    fn open(&self, name: &str) -> Result<Box<dyn ContainerDriver>> {
        let state = self.state(name);
        // A fresh handle starts from an empty item list; runtime state
        // persists across materializations.
        state.lock().items.clear();
        Ok(Box::new(MockDriver::with_state(state)))
    }
}
