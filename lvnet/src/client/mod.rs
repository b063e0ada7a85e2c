//! Client side of the libvirt network management API.
//!
//! Only the four calls the attachment path needs are modelled:
//! - network lookup by name
//! - network XML description
//! - `virNetworkUpdate` with modify and add-last commands
//!
//! Remote failures are mapped once, at the client boundary, into [`ApiError`]
//! so callers branch on variants instead of raw libvirt error numbers.

pub mod virsh;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use virsh::VirshClient;

/// libvirt `VIR_ERR_NO_NETWORK`.
pub const VIR_ERR_NO_NETWORK: u32 = 43;
/// libvirt `VIR_ERR_OPERATION_INVALID`.
pub const VIR_ERR_OPERATION_INVALID: u32 = 55;

/// Failures reported by the management API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network not found: {0}")]
    NoNetwork(String),

    /// The daemon refused the operation. For a host modify this means no
    /// entry matched at the given index.
    #[error("requested operation is not valid: {0}")]
    OperationInvalid(String),

    #[error("libvirt error {code}: {message}")]
    Other { code: u32, message: String },

    #[error("failed to reach management daemon: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Map a raw libvirt error number.
    pub fn from_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            VIR_ERR_NO_NETWORK => ApiError::NoNetwork(message),
            VIR_ERR_OPERATION_INVALID => ApiError::OperationInvalid(message),
            _ => ApiError::Other { code, message },
        }
    }

    pub fn is_operation_invalid(&self) -> bool {
        matches!(self, ApiError::OperationInvalid(_))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Reference to a network returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub name: String,
    pub uuid: String,
}

/// `virNetworkUpdateCommand` subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCommand {
    Modify,
    AddLast,
}

impl UpdateCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateCommand::Modify => "modify",
            UpdateCommand::AddLast => "add-last",
        }
    }
}

impl fmt::Display for UpdateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `virNetworkUpdateSection` subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSection {
    IpDhcpHost,
}

impl NetworkSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkSection::IpDhcpHost => "ip-dhcp-host",
        }
    }
}

/// Which copy of the network definition an update affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateScope {
    Live,
    Config,
    Both,
}

impl UpdateScope {
    pub fn affects_live(&self) -> bool {
        matches!(self, UpdateScope::Live | UpdateScope::Both)
    }

    pub fn affects_config(&self) -> bool {
        matches!(self, UpdateScope::Config | UpdateScope::Both)
    }
}

/// A single `virNetworkUpdate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkUpdate {
    pub command: UpdateCommand,
    pub section: NetworkSection,
    /// Position of the parent `<ip>` element; negative lets libvirt choose.
    pub parent_index: i32,
    pub xml: String,
    pub scope: UpdateScope,
}

/// Remote network management operations.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn lookup_network_by_name(&self, name: &str) -> Result<NetworkHandle>;

    async fn network_xml_desc(&self, network: &NetworkHandle) -> Result<String>;

    async fn network_update(&self, network: &NetworkHandle, update: &NetworkUpdate)
    -> Result<()>;
}
