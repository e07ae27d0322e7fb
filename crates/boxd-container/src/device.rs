//! Device translation.
//!
//! A device is a named attribute map with a mandatory `type`. Translation to
//! runtime config items is behind [`DeviceMapper`] so the daemon core stays
//! independent of the runtime's device vocabulary.

use boxd_store::{Device, Devices};

use crate::driver::ContainerDriver;
use crate::error::{ContainerError, Result};

/// Translates a device into runtime `(key, value)` config items.
pub trait DeviceMapper: Send + Sync {
    /// Translates one device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be expressed as runtime config.
    fn to_config_items(&self, name: &str, device: &Device) -> Result<Vec<(String, String)>>;
}

/// Default mapper for the LXC runtime's device vocabulary.
pub struct LxcDeviceMapper;

impl DeviceMapper for LxcDeviceMapper {
    fn to_config_items(&self, name: &str, device: &Device) -> Result<Vec<(String, String)>> {
        let dtype = device
            .get("type")
            .ok_or_else(|| ContainerError::BadDevice(format!("device {name} has no type")))?;

        let mut items = Vec::new();
        match dtype.as_str() {
            "none" => {}
            "nic" => {
                let nictype = device.get("nictype").map_or("veth", String::as_str);
                items.push(("lxc.network.type".to_string(), nictype.to_string()));
                if let Some(parent) = device.get("parent") {
                    items.push(("lxc.network.link".to_string(), parent.clone()));
                }
                if let Some(hwaddr) = device.get("hwaddr") {
                    items.push(("lxc.network.hwaddr".to_string(), hwaddr.clone()));
                }
                if let Some(mtu) = device.get("mtu") {
                    items.push(("lxc.network.mtu".to_string(), mtu.clone()));
                }
                if let Some(ifname) = device.get("name") {
                    items.push(("lxc.network.name".to_string(), ifname.clone()));
                }
            }
            "disk" => {
                let source = device.get("source").ok_or_else(|| {
                    ContainerError::BadDevice(format!("disk {name} has no source"))
                })?;
                let path = device.get("path").ok_or_else(|| {
                    ContainerError::BadDevice(format!("disk {name} has no path"))
                })?;
                let target = path.trim_start_matches('/');
                items.push((
                    "lxc.mount.entry".to_string(),
                    format!("{source} {target} none bind,create=dir 0 0"),
                ));
            }
            "unix-char" | "unix-block" => {
                let kind = if dtype == "unix-char" { 'c' } else { 'b' };
                let major = device.get("major").ok_or_else(|| {
                    ContainerError::BadDevice(format!("device {name} has no major"))
                })?;
                let minor = device.get("minor").ok_or_else(|| {
                    ContainerError::BadDevice(format!("device {name} has no minor"))
                })?;
                items.push((
                    "lxc.cgroup.devices.allow".to_string(),
                    format!("{kind} {major}:{minor} rwm"),
                ));
            }
            other => {
                return Err(ContainerError::BadDevice(format!(
                    "device {name} has unknown type {other}"
                )));
            }
        }

        Ok(items)
    }
}

/// Applies every device in the map through the mapper. Entries named `type`
/// are skipped. Translation failures and item failures both abort.
///
/// # Errors
///
/// Returns the first translation or driver failure.
pub fn apply_devices(
    devices: &Devices,
    mapper: &dyn DeviceMapper,
    driver: &mut dyn ContainerDriver,
) -> Result<()> {
    for (name, device) in devices {
        if name == "type" {
            continue;
        }
        let items = mapper
            .to_config_items(name, device)
            .map_err(|err| ContainerError::BadDevice(format!("configuring {name}: {err}")))?;
        for (key, value) in items {
            driver.set_config_item(&key, &value)?;
        }
        tracing::debug!(device = %name, "device configured");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn device(pairs: &[(&str, &str)]) -> Device {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn nic_translates_to_network_items() {
        let mapper = LxcDeviceMapper;
        let items = mapper
            .to_config_items("eth0", &device(&[("type", "nic"), ("parent", "br0")]))
            .unwrap();
        assert_eq!(
            items,
            [
                ("lxc.network.type".to_string(), "veth".to_string()),
                ("lxc.network.link".to_string(), "br0".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_type_is_fatal() {
        let mapper = LxcDeviceMapper;
        assert!(mapper
            .to_config_items("gpu", &device(&[("type", "mystery")]))
            .is_err());
    }

    #[test]
    fn disk_requires_source_and_path() {
        let mapper = LxcDeviceMapper;
        assert!(mapper
            .to_config_items("data", &device(&[("type", "disk"), ("source", "/srv")]))
            .is_err());

        let items = mapper
            .to_config_items(
                "data",
                &device(&[("type", "disk"), ("source", "/srv"), ("path", "/mnt/data")]),
            )
            .unwrap();
        assert_eq!(items[0].1, "/srv mnt/data none bind,create=dir 0 0");
    }

    #[test]
    fn apply_surfaces_translation_errors() {
        let mut devices = BTreeMap::new();
        devices.insert("bad".to_string(), device(&[("type", "mystery")]));
        let mut driver = crate::testing::MockDriver::new();
        let err = apply_devices(&devices, &LxcDeviceMapper, &mut driver).unwrap_err();
        assert!(matches!(err, ContainerError::BadDevice(_)));
    }
}
