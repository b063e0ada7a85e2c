//! Attachment constants and task configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// QEMU's locally administered prefix.
pub const QEMU_MAC_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// libvirt reserves `fe:...` for host-side tap devices.
pub const RESERVED_MAC_BYTE: u8 = 0xfe;
pub const REMAPPED_MAC_BYTE: u8 = 0xee;

/// Parent index that lets libvirt pick the `<ip>` block itself.
pub const SENTINEL_SUBNET_INDEX: i32 = -1;

pub const PLACEHOLDER_HOSTNAME: &str = "guest";

/// Constants used while attaching interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachConfig {
    pub mac_prefix: [u8; 3],
    pub reserved_mac_byte: u8,
    pub remapped_mac_byte: u8,
    pub sentinel_index: i32,
    pub placeholder_hostname: String,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            mac_prefix: QEMU_MAC_PREFIX,
            reserved_mac_byte: RESERVED_MAC_BYTE,
            remapped_mac_byte: REMAPPED_MAC_BYTE,
            sentinel_index: SENTINEL_SUBNET_INDEX,
            placeholder_hostname: PLACEHOLDER_HOSTNAME.to_string(),
        }
    }
}

/// A requested network attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRequest {
    pub network_name: String,
    pub address: Option<String>,
}

impl InterfaceRequest {
    pub fn new(network_name: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// `network_interface` block of a task configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterfaceConfig {
    pub network_name: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// Task configuration as handed over by the task driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub network_interface: Vec<NetworkInterfaceConfig>,
}

impl TaskConfig {
    /// Load a task configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse task config {}", path.display()))
    }

    /// Interface requests in declaration order. Blank addresses count as unset.
    pub fn interface_requests(&self) -> Vec<InterfaceRequest> {
        self.network_interface
            .iter()
            .map(|iface| InterfaceRequest {
                network_name: iface.network_name.clone(),
                address: iface
                    .address
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string),
            })
            .collect()
    }
}
