//! Container materialization.
//!
//! A stored container record is turned into a configured runtime handle on
//! demand: base config items first, then each bound profile's config and
//! devices in apply order, then the container's own devices and config. The
//! handle is transient — materialized per request and dropped on scope exit.

use std::collections::BTreeMap;
use std::sync::Arc;

use boxd_store::{DeviceOwner, Devices, Store};
use serde::Serialize;

use crate::config::{apply_config, is_privileged};
use crate::device::{DeviceMapper, apply_devices};
use crate::driver::{ContainerDriver, DriverFactory};
use crate::error::{ContainerError, Result};
use crate::layout::Layout;

/// The daemon's subordinate uid/gid allocation, read-only after startup.
#[derive(Debug, Clone, Copy)]
pub struct IdMap {
    pub uid_min: u32,
    pub uid_range: u32,
    pub gid_min: u32,
    pub gid_range: u32,
}

/// Rendered container state for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedState {
    pub name: String,
    pub profiles: Vec<String>,
    pub config: BTreeMap<String, String>,
    pub devices: Devices,
    pub status: StatusBlock,
}

/// Status subobject of a rendered container.
#[derive(Debug, Clone, Serialize)]
pub struct StatusBlock {
    pub status: String,
    pub status_code: i64,
}

/// A materialized container: the stored record plus a configured driver.
pub struct ContainerHandle {
    /// Store row id.
    pub id: i64,
    /// Container name.
    pub name: String,
    /// Stored config map.
    pub config: BTreeMap<String, String>,
    /// Bound profiles, in apply order.
    pub profiles: Vec<String>,
    /// Effective device map after profile layering.
    pub devices: Devices,
    pub(crate) driver: Box<dyn ContainerDriver>,
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .field("profiles", &self.profiles)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl ContainerHandle {
    /// Whether the container is running.
    #[must_use]
    pub fn running(&self) -> bool {
        self.driver.running()
    }

    /// Pid of the init process, when running.
    #[must_use]
    pub fn init_pid(&self) -> Option<i32> {
        self.driver.init_pid()
    }

    /// Renders the container for API responses.
    #[must_use]
    pub fn render_state(&self) -> RenderedState {
        let status = self.driver.status();
        RenderedState {
            name: self.name.clone(),
            profiles: self.profiles.clone(),
            config: self.config.clone(),
            devices: self.devices.clone(),
            status: StatusBlock {
                status: status.to_string(),
                status_code: status.code(),
            },
        }
    }

    /// Renders just the status subobject.
    #[must_use]
    pub fn render_status(&self) -> StatusBlock {
        let status = self.driver.status();
        StatusBlock {
            status: status.to_string(),
            status_code: status.code(),
        }
    }
}

/// Produces configured runtime handles from store records.
#[derive(Clone)]
pub struct Materializer {
    store: Store,
    layout: Layout,
    id_map: Option<IdMap>,
    factory: Arc<dyn DriverFactory>,
    mapper: Arc<dyn DeviceMapper>,
}

impl Materializer {
    /// Creates a materializer.
    pub fn new(
        store: Store,
        layout: Layout,
        id_map: Option<IdMap>,
        factory: Arc<dyn DriverFactory>,
        mapper: Arc<dyn DeviceMapper>,
    ) -> Self {
        Self {
            store,
            layout,
            id_map,
            factory,
            mapper,
        }
    }

    /// The on-disk layout.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Materializes a container by name into a configured handle.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::NotFound` for unknown names and surfaces any
    /// store, config or driver failure.
    pub fn materialize(&self, name: &str) -> Result<ContainerHandle> {
        let row = self
            .store
            .container_row(name)
            .map_err(|err| match err {
                boxd_store::StoreError::NotFound(_) => {
                    ContainerError::NotFound(name.to_string())
                }
                other => ContainerError::Store(other),
            })?;

        let mut driver = self.factory.open(name)?;

        // Only one architecture tag is recognized today.
        let arch = "x86_64";
        driver.set_config_item("lxc.arch", arch)?;
        driver.set_config_item("lxc.include", "/usr/share/lxc/config/common.conf")?;
        driver.set_config_item("lxc.include", "/usr/share/lxc/config/userns.conf")?;

        let config = self.store.load_config(row.id)?;
        let profiles = self.store.load_profiles(row.id)?;
        let mut devices = Devices::new();

        driver.set_config_item(
            "lxc.rootfs",
            &self.layout.rootfs_dir(name).display().to_string(),
        )?;
        driver.set_config_item("lxc.loglevel", "0")?;
        driver.set_config_item(
            "lxc.logfile",
            &self.layout.log_path(name).display().to_string(),
        )?;
        driver.set_config_item("lxc.utsname", name)?;

        for profile in &profiles {
            tracing::debug!(container = name, profile = %profile, "applying profile");
            let profile_config = self.store.load_profile_config(profile)?;
            let profile_devices = self.store.load_devices(profile, DeviceOwner::Profile)?;
            for (dev_name, dev) in profile_devices {
                devices.insert(dev_name, dev);
            }
            apply_config(&profile_config, driver.as_mut())?;
        }

        let own_devices = self.store.load_devices(name, DeviceOwner::Container)?;
        for (dev_name, dev) in own_devices {
            devices.insert(dev_name, dev);
        }

        apply_devices(&devices, self.mapper.as_ref(), driver.as_mut())?;

        if !is_privileged(&config) {
            if let Some(map) = self.id_map {
                driver.set_config_item(
                    "lxc.id_map",
                    &format!("u 0 {} {}", map.uid_min, map.uid_range),
                )?;
                driver.set_config_item(
                    "lxc.id_map",
                    &format!("g 0 {} {}", map.gid_min, map.gid_range),
                )?;
            }
        }

        apply_config(&config, driver.as_mut())?;

        Ok(ContainerHandle {
            id: row.id,
            name: name.to_string(),
            config,
            profiles,
            devices,
            driver,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LxcDeviceMapper;
    use crate::testing::MockFactory;
    use boxd_store::{ContainerKind, Device};

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn device(pairs: &[(&str, &str)]) -> Device {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn materializer(store: Store, factory: Arc<MockFactory>) -> Materializer {
        Materializer::new(
            store,
            Layout::new("/var/lib/boxd"),
            Some(IdMap {
                uid_min: 100_000,
                uid_range: 65_536,
                gid_min: 100_000,
                gid_range: 65_536,
            }),
            factory,
            Arc::new(LxcDeviceMapper),
        )
    }

    #[test]
    fn unknown_container_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let factory = Arc::new(MockFactory::new());
        let err = materializer(store, factory).materialize("ghost").unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }

    #[test]
    fn base_items_come_in_fixed_order() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_container("web", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();

        let factory = Arc::new(MockFactory::new());
        materializer(store, factory.clone()).materialize("web").unwrap();

        let items = factory.recorded_items("web");
        let keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            &keys[..7],
            &[
                "lxc.arch",
                "lxc.include",
                "lxc.include",
                "lxc.rootfs",
                "lxc.loglevel",
                "lxc.logfile",
                "lxc.utsname",
            ]
        );
        assert_eq!(items[0].1, "x86_64");
        assert_eq!(items[3].1, "/var/lib/boxd/lxc/web/rootfs");
        assert_eq!(items[6].1, "web");
    }

    #[test]
    fn unprivileged_containers_get_id_maps() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_container("web", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();

        let factory = Arc::new(MockFactory::new());
        materializer(store, factory.clone()).materialize("web").unwrap();

        let maps: Vec<String> = factory
            .recorded_items("web")
            .into_iter()
            .filter(|(k, _)| k == "lxc.id_map")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(maps, ["u 0 100000 65536", "g 0 100000 65536"]);
    }

    #[test]
    fn privileged_containers_get_no_id_maps() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_container(
                "web",
                ContainerKind::Regular,
                &config(&[("security.privileged", "1")]),
            )
            .unwrap();

        let factory = Arc::new(MockFactory::new());
        materializer(store, factory.clone()).materialize("web").unwrap();

        assert!(factory
            .recorded_items("web")
            .iter()
            .all(|(k, _)| k != "lxc.id_map"));
    }

    #[test]
    fn profiles_apply_in_bound_order_and_devices_layer() {
        let store = Store::open_in_memory().unwrap();

        let mut dev_a = Devices::new();
        dev_a.insert("eth0".to_string(), device(&[("type", "nic"), ("parent", "brA")]));
        store
            .create_profile("a", &config(&[("limits.memory", "1G")]), &dev_a)
            .unwrap();

        let mut dev_b = Devices::new();
        dev_b.insert("eth0".to_string(), device(&[("type", "nic"), ("parent", "brB")]));
        store
            .create_profile("b", &config(&[("limits.memory", "2G")]), &dev_b)
            .unwrap();

        let id = store
            .create_container("web", ContainerKind::Regular, &BTreeMap::new())
            .unwrap();
        store
            .replace_container_config(
                id,
                &BTreeMap::new(),
                &["a".to_string(), "b".to_string()],
                &Devices::new(),
            )
            .unwrap();

        let factory = Arc::new(MockFactory::new());
        let handle = materializer(store, factory.clone()).materialize("web").unwrap();

        // Later profile shadows earlier for the overlapping device name.
        assert_eq!(handle.devices["eth0"]["parent"], "brB");

        let memory_values: Vec<String> = factory
            .recorded_items("web")
            .into_iter()
            .filter(|(k, _)| k == "lxc.cgroup.memory.limit_in_bytes")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(memory_values, ["1G", "2G"]);

        let links: Vec<String> = factory
            .recorded_items("web")
            .into_iter()
            .filter(|(k, _)| k == "lxc.network.link")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(links, ["brB"]);
    }

    #[test]
    fn container_config_applies_after_profiles() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_profile("p", &config(&[("limits.cpus", "1")]), &Devices::new())
            .unwrap();
        let id = store
            .create_container(
                "web",
                ContainerKind::Regular,
                &config(&[("limits.cpus", "4")]),
            )
            .unwrap();
        store
            .replace_container_config(
                id,
                &config(&[("limits.cpus", "4")]),
                &["p".to_string()],
                &Devices::new(),
            )
            .unwrap();

        let factory = Arc::new(MockFactory::new());
        materializer(store, factory.clone()).materialize("web").unwrap();

        let cpusets: Vec<String> = factory
            .recorded_items("web")
            .into_iter()
            .filter(|(k, _)| k == "lxc.cgroup.cpuset.cpus")
            .map(|(_, v)| v)
            .collect();
        // Profile first, container's own value last.
        assert_eq!(cpusets, ["0-0", "0-3"]);
    }
}
