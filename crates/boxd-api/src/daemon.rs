//! Daemon state shared with handlers.

use std::path::PathBuf;
use std::sync::Arc;

use boxd_container::{
    CmdDriverFactory, DeviceMapper, DriverFactory, IdMap, Layout, LxcDeviceMapper, Materializer,
};
use boxd_store::Store;

use crate::error::Result;
use crate::ops::Operations;

/// Daemon configuration, read-only after startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// State directory (default `/var/lib/boxd`).
    pub var_dir: PathBuf,
    /// TLS certificate used when dialing migration peers.
    pub cert_path: PathBuf,
    /// TLS key used when dialing migration peers.
    pub key_path: PathBuf,
    /// Subordinate id allocation; container creation requires one.
    pub id_map: Option<IdMap>,
}

impl DaemonConfig {
    /// Configuration rooted at a state directory, with conventional cert
    /// locations and a default subordinate range.
    #[must_use]
    pub fn for_var_dir(var_dir: impl Into<PathBuf>) -> Self {
        let var_dir = var_dir.into();
        Self {
            cert_path: var_dir.join("server.crt"),
            key_path: var_dir.join("server.key"),
            id_map: Some(IdMap {
                uid_min: 100_000,
                uid_range: 65_536,
                gid_min: 100_000,
                gid_range: 65_536,
            }),
            var_dir,
        }
    }
}

/// The daemon: store, materializer and operation registry.
pub struct Daemon {
    /// Relational store.
    pub store: Store,
    /// Produces runtime handles from store records.
    pub materializer: Materializer,
    /// Operation registry and runner.
    pub operations: Operations,
    /// Static configuration.
    pub config: DaemonConfig,
}

impl Daemon {
    /// Creates a daemon with the production driver and device mapper.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directories or the store cannot be
    /// initialized.
    pub fn new(config: DaemonConfig) -> Result<Arc<Self>> {
        let layout = Layout::new(&config.var_dir);
        let factory = Arc::new(CmdDriverFactory::new(layout.lxc_dir()));
        Self::with_backends(config, factory, Arc::new(LxcDeviceMapper))
    }

    /// Creates a daemon with explicit driver and mapper backends; tests use
    /// this with a recording mock.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directories or the store cannot be
    /// initialized.
    pub fn with_backends(
        config: DaemonConfig,
        factory: Arc<dyn DriverFactory>,
        mapper: Arc<dyn DeviceMapper>,
    ) -> Result<Arc<Self>> {
        let layout = Layout::new(&config.var_dir);
        std::fs::create_dir_all(layout.lxc_dir())?;
        std::fs::create_dir_all(layout.images_dir())?;

        let store = Store::open(&config.var_dir.join("boxd.db"))?;

        let materializer = Materializer::new(
            store.clone(),
            layout,
            config.id_map,
            factory,
            mapper,
        );

        Ok(Arc::new(Self {
            store,
            materializer,
            operations: Operations::new(),
            config,
        }))
    }

    /// The on-disk layout.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        self.materializer.layout()
    }
}

/// Axum application state.
#[derive(Clone)]
pub struct AppState {
    /// Shared daemon.
    pub daemon: Arc<Daemon>,
}
