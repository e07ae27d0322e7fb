//! Container config model and application.
//!
//! Stored config is a flat string map guarded by the store's whitelist. At
//! application time each recognized key parses into a tagged [`ConfigEntry`]
//! with a validated value; `user.*` keys stay opaque and are never applied.

use std::collections::BTreeMap;

use crate::driver::ContainerDriver;
use crate::error::{ContainerError, Result};

/// Upper bound for `limits.cpus`.
const MAX_CPUS: u32 = 65_000;

/// A recognized config entry with its parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEntry {
    /// `limits.cpus`: pins the cpuset to `0-(N-1)`.
    LimitsCpus(u32),
    /// `limits.memory`: opaque byte string for the memory cgroup limit.
    LimitsMemory(String),
    /// `security.privileged`: stored only; consulted via [`is_privileged`].
    SecurityPrivileged(String),
    /// `raw.apparmor`: stored only, passed through to the runtime elsewhere.
    RawApparmor(String),
    /// `raw.lxc`: newline-separated `key=value` lines applied verbatim.
    RawLxc(String),
    /// `user.*`: opaque metadata, never applied.
    User { key: String, value: String },
}

impl ConfigEntry {
    /// Parses a stored `(key, value)` pair into its tagged form.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::BadConfig` for unrecognized keys or values
    /// that fail validation.
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        match key {
            "limits.cpus" => {
                let count: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| ContainerError::BadConfig(format!("bad cpu limit: {value}")))?;
                if count > MAX_CPUS {
                    return Err(ContainerError::BadConfig(format!("bad cpu limit: {value}")));
                }
                Ok(Self::LimitsCpus(count))
            }
            "limits.memory" => Ok(Self::LimitsMemory(value.to_string())),
            "security.privileged" => Ok(Self::SecurityPrivileged(value.to_string())),
            "raw.apparmor" => Ok(Self::RawApparmor(value.to_string())),
            "raw.lxc" => Ok(Self::RawLxc(value.to_string())),
            _ if key.starts_with("user.") => Ok(Self::User {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => Err(ContainerError::BadConfig(format!("unknown key: {key}"))),
        }
    }

    /// Applies this entry to the runtime driver. Stored-only entries are a
    /// no-op here.
    ///
    /// # Errors
    ///
    /// Surfaces the underlying driver error.
    pub fn apply(&self, driver: &mut dyn ContainerDriver) -> Result<()> {
        match self {
            Self::LimitsCpus(count) => {
                let cpuset = format!("0-{}", i64::from(*count) - 1);
                driver.set_config_item("lxc.cgroup.cpuset.cpus", &cpuset)
            }
            Self::LimitsMemory(limit) => {
                driver.set_config_item("lxc.cgroup.memory.limit_in_bytes", limit)
            }
            Self::RawLxc(raw) => {
                for (key, value) in parse_raw_lxc(raw) {
                    driver.set_config_item(&key, &value)?;
                }
                Ok(())
            }
            Self::SecurityPrivileged(_) | Self::RawApparmor(_) | Self::User { .. } => Ok(()),
        }
    }
}

/// Splits a `raw.lxc` blob into trimmed `(key, value)` pairs, skipping
/// empty lines.
#[must_use]
pub fn parse_raw_lxc(raw: &str) -> Vec<(String, String)> {
    let mut items = Vec::new();
    for line in raw.split('\n') {
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (line.trim(), ""),
        };
        if key.is_empty() {
            continue;
        }
        items.push((key.to_string(), value.to_string()));
    }
    items
}

/// Applies a whole config map to the driver: recognized entries first, then
/// `raw.lxc` lines last so raw overrides win.
///
/// # Errors
///
/// Returns the first parse or driver failure.
pub fn apply_config(
    config: &BTreeMap<String, String>,
    driver: &mut dyn ContainerDriver,
) -> Result<()> {
    for (key, value) in config {
        if key == "raw.lxc" {
            continue;
        }
        ConfigEntry::parse(key, value)?.apply(driver)?;
    }

    if let Some(raw) = config.get("raw.lxc") {
        ConfigEntry::RawLxc(raw.clone()).apply(driver)?;
    }

    Ok(())
}

/// Whether the container is privileged.
///
/// A truthy `security.privileged` value means privileged; `"0"` and
/// `"false"` (case-insensitive) — or no value at all — mean unprivileged,
/// which is when the daemon installs its id map.
#[must_use]
pub fn is_privileged(config: &BTreeMap<String, String>) -> bool {
    match config.get("security.privileged") {
        Some(value) => !matches!(value.to_lowercase().as_str(), "0" | "false"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    #[test]
    fn cpu_limit_parses_and_bounds() {
        assert_eq!(
            ConfigEntry::parse("limits.cpus", "2").unwrap(),
            ConfigEntry::LimitsCpus(2)
        );
        assert_eq!(
            ConfigEntry::parse("limits.cpus", "0").unwrap(),
            ConfigEntry::LimitsCpus(0)
        );
        assert!(ConfigEntry::parse("limits.cpus", "65001").is_err());
        assert!(ConfigEntry::parse("limits.cpus", "-1").is_err());
        assert!(ConfigEntry::parse("limits.cpus", "two").is_err());
    }

    #[test]
    fn cpu_limit_sets_cpuset_range() {
        let mut driver = MockDriver::new();
        ConfigEntry::LimitsCpus(4).apply(&mut driver).unwrap();
        assert_eq!(
            driver.recorded_items(),
            [("lxc.cgroup.cpuset.cpus".to_string(), "0-3".to_string())]
        );
    }

    #[test]
    fn memory_limit_passes_raw_string() {
        let mut driver = MockDriver::new();
        ConfigEntry::LimitsMemory("512M".to_string())
            .apply(&mut driver)
            .unwrap();
        assert_eq!(
            driver.recorded_items(),
            [(
                "lxc.cgroup.memory.limit_in_bytes".to_string(),
                "512M".to_string()
            )]
        );
    }

    #[test]
    fn raw_lxc_splits_and_trims() {
        let raw = "lxc.aa_profile = unconfined\n\n lxc.cap.drop = mac_admin \nnovalue";
        assert_eq!(
            parse_raw_lxc(raw),
            [
                ("lxc.aa_profile".to_string(), "unconfined".to_string()),
                ("lxc.cap.drop".to_string(), "mac_admin".to_string()),
                ("novalue".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn user_keys_are_never_applied() {
        let mut config = BTreeMap::new();
        config.insert("user.comment".to_string(), "hello".to_string());
        let mut driver = MockDriver::new();
        apply_config(&config, &mut driver).unwrap();
        assert!(driver.recorded_items().is_empty());
    }

    #[test]
    fn privileged_detection() {
        let mut config = BTreeMap::new();
        assert!(!is_privileged(&config));

        config.insert("security.privileged".to_string(), "1".to_string());
        assert!(is_privileged(&config));

        for falsy in ["0", "false", "FALSE", "False"] {
            config.insert("security.privileged".to_string(), falsy.to_string());
            assert!(!is_privileged(&config), "{falsy} should be unprivileged");
        }
    }
}
