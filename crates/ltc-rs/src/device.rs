//! Device identity for the lazy runtime and its translation to the host framework.
//!
//! The runtime addresses devices as [`Device`] values: a backend-defined hardware type plus
//! an ordinal. The host framework instead sees a [`FrontendDevice`], which is tagged
//! [`DeviceKind::Lazy`] whenever the data lives behind the lazy runtime. Translation from the
//! frontend form resolves an unspecified ordinal (`None` or negative) first against the
//! current device of the calling thread and then against the backend's default device.

use std::cell::Cell;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::interface::BackendImpl;
use crate::backend::registry;
use crate::error::{fatal, ContractViolation};

/// Hardware family a backend reports for its devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendDeviceType {
    Cpu,
    Gpu,
    Tpu,
    Custom(u16),
}

impl fmt::Display for BackendDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendDeviceType::Cpu => f.write_str("CPU"),
            BackendDeviceType::Gpu => f.write_str("GPU"),
            BackendDeviceType::Tpu => f.write_str("TPU"),
            BackendDeviceType::Custom(code) => write!(f, "CUSTOM{code}"),
        }
    }
}

impl FromStr for BackendDeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CPU" => Ok(BackendDeviceType::Cpu),
            "GPU" => Ok(BackendDeviceType::Gpu),
            "TPU" => Ok(BackendDeviceType::Tpu),
            other => other
                .strip_prefix("CUSTOM")
                .and_then(|code| code.parse::<u16>().ok())
                .map(BackendDeviceType::Custom)
                .ok_or_else(|| format!("unknown backend device type '{s}'")),
        }
    }
}

/// Resolved lazy-runtime device. An ordinal of `-1` means "unspecified" and never survives
/// translation through [`frontend_to_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    device_type: BackendDeviceType,
    ordinal: i64,
}

impl Device {
    pub fn new(device_type: BackendDeviceType, ordinal: i64) -> Self {
        Device {
            device_type,
            ordinal,
        }
    }

    pub fn device_type(&self) -> BackendDeviceType {
        self.device_type
    }

    pub fn ordinal(&self) -> i64 {
        self.ordinal
    }

    /// Renders the `<TYPE>:<ordinal>` form used by backend topology calls.
    pub fn to_backend_string(&self) -> String {
        format!("{}:{}", self.device_type, self.ordinal)
    }

    /// Parses the `<TYPE>:<ordinal>` form produced by [`Device::to_backend_string`].
    pub fn parse_backend_string(value: &str) -> Option<Device> {
        let (kind, ordinal) = value.split_once(':')?;
        let device_type = kind.parse::<BackendDeviceType>().ok()?;
        let ordinal = ordinal.trim().parse::<i64>().ok()?;
        (ordinal >= 0).then_some(Device::new(device_type, ordinal))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lazy:{}", self.ordinal)
    }
}

/// Device families known to the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Lazy,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("cpu"),
            DeviceKind::Cuda => f.write_str("cuda"),
            DeviceKind::Lazy => f.write_str("lazy"),
        }
    }
}

/// Generic device as seen by the host framework: a kind tag plus an optional index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrontendDevice {
    kind: DeviceKind,
    index: Option<i64>,
}

impl FrontendDevice {
    pub fn new(kind: DeviceKind, index: Option<i64>) -> Self {
        FrontendDevice { kind, index }
    }

    pub fn cpu() -> Self {
        FrontendDevice::new(DeviceKind::Cpu, None)
    }

    pub fn lazy(index: Option<i64>) -> Self {
        FrontendDevice::new(DeviceKind::Lazy, index)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn index(&self) -> Option<i64> {
        self.index
    }

    /// Returns the index only when it names a concrete (non-negative) ordinal.
    pub fn explicit_index(&self) -> Option<i64> {
        self.index.filter(|index| *index >= 0)
    }

    pub fn is_lazy(&self) -> bool {
        self.kind == DeviceKind::Lazy
    }
}

impl fmt::Display for FrontendDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.kind, index),
            None => write!(f, "{}", self.kind),
        }
    }
}

thread_local! {
    static CURRENT_DEVICE: Cell<Option<Device>> = const { Cell::new(None) };
}

/// Returns the current device of the calling thread, if one was set.
pub fn current_device() -> Option<Device> {
    CURRENT_DEVICE.with(Cell::get)
}

/// Installs `device` as the current device of the calling thread and returns the previous one.
pub fn set_current_device(device: Device) -> Option<Device> {
    CURRENT_DEVICE.with(|cell| cell.replace(Some(device)))
}

/// Clears the calling thread's current device.
pub fn reset_current_device() -> Option<Device> {
    CURRENT_DEVICE.with(|cell| cell.replace(None))
}

/// Parses the backend's default device string.
pub fn default_device(backend: &dyn BackendImpl) -> Device {
    let value = backend.get_default_device();
    Device::parse_backend_string(&value)
        .unwrap_or_else(|| fatal(ContractViolation::InvalidDeviceString { value }))
}

/// Translates a lazy-tagged frontend device using the registered backend.
pub fn frontend_to_device(device: &FrontendDevice) -> Device {
    let backend = registry::get_backend();
    frontend_to_device_with(backend.as_ref(), device)
}

/// Translates a lazy-tagged frontend device against an explicit backend.
pub fn frontend_to_device_with(backend: &dyn BackendImpl, device: &FrontendDevice) -> Device {
    if !device.is_lazy() {
        fatal(ContractViolation::DeviceNotLazy {
            device: device.to_string(),
        });
    }
    let ordinal = device
        .explicit_index()
        .or_else(|| current_device().map(|current| current.ordinal()));
    match ordinal {
        Some(ordinal) => Device::new(backend.get_default_device_type(), ordinal),
        None => default_device(backend),
    }
}

/// Re-tags a runtime device for the host framework.
pub fn device_to_frontend(device: &Device) -> FrontendDevice {
    FrontendDevice::lazy(Some(device.ordinal()))
}

/// Renders a frontend device in the `lazy:<index>` form; an absent index prints as `-1`.
pub fn to_lazy_string(device: &FrontendDevice) -> String {
    format!("lazy:{}", device.index().unwrap_or(-1))
}

/// Frontend view of the registered backend's default device.
pub fn frontend_default_device() -> FrontendDevice {
    let backend = registry::get_backend();
    device_to_frontend(&default_device(backend.as_ref()))
}

/// Frontend view of the calling thread's current device, defaulting to the backend default.
pub fn current_frontend_device() -> FrontendDevice {
    match current_device() {
        Some(device) => device_to_frontend(&device),
        None => frontend_default_device(),
    }
}

/// Sets the current device from a frontend device and returns the previous one in frontend form.
pub fn set_current_frontend_device(device: &FrontendDevice) -> FrontendDevice {
    let previous = current_frontend_device();
    set_current_device(frontend_to_device(device));
    previous
}
