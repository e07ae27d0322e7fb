//! Container model, materialization and runtime driver seam.
//!
//! A container is a store record (config, profiles, devices) plus an on-disk
//! directory. [`Materializer`] turns a record into a configured
//! [`ContainerHandle`] by layering profile config and devices in apply order
//! over the daemon's base runtime config, then applying the container's own
//! devices and config. Handles are transient: materialized per request,
//! dropped on scope exit.

pub mod config;
pub mod device;
pub mod driver;
pub mod exec;
pub mod layout;
pub mod lifecycle;
pub mod materialize;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

mod error;

pub use config::{ConfigEntry, apply_config, is_privileged, parse_raw_lxc};
pub use device::{DeviceMapper, LxcDeviceMapper, apply_devices};
pub use driver::{
    AttachOptions, CmdDriver, CmdDriverFactory, ContainerDriver, ContainerStatus, DriverFactory,
};
pub use error::{ContainerError, Result};
pub use layout::{Layout, SnapshotName};
pub use lifecycle::Action;
pub use materialize::{ContainerHandle, IdMap, Materializer, RenderedState, StatusBlock};
