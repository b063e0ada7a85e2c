//! Error types for lvnet.

use thiserror::Error;

use crate::client::{ApiError, UpdateCommand};

/// MAC address parsing errors.
#[derive(Debug, Error)]
pub enum MacError {
    #[error("invalid MAC address: {0}")]
    Invalid(String),
}

/// Subnet index resolution errors.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("network has no IP subnets")]
    NoSubnets,

    /// Nothing matched and at least one block could not be evaluated. Reports
    /// the first such block.
    #[error("invalid subnet #{index} ({block}): {reason}")]
    SubnetParseFailed {
        index: usize,
        block: String,
        reason: String,
    },

    #[error("no subnet contains {address}")]
    NotFound { address: String },
}

/// Errors fetching or reading a network description.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid network XML: {0}")]
    Xml(#[from] quick_xml::DeError),
}

/// Host reservation write errors. All of them are fatal for the interface.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{command} of DHCP host at subnet index {index} failed: {source}")]
    WriteFailed {
        command: UpdateCommand,
        index: i32,
        #[source]
        source: ApiError,
    },
}

/// Errors returned by an interface attachment batch.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("randomness source unavailable for MAC generation: {0}")]
    RandomnessUnavailable(#[from] rand::Error),

    #[error("failed to lookup network '{network}': {source}")]
    NetworkLookupFailed {
        network: String,
        #[source]
        source: ApiError,
    },

    #[error("could not parse address '{address}' for network '{network}'")]
    MalformedAddress { network: String, address: String },

    #[error("failed to read description of network '{network}': {source}")]
    NetworkDescribeFailed {
        network: String,
        #[source]
        source: DescriptorError,
    },

    #[error("failed to reserve {address} on network '{network}': {source}")]
    Reservation {
        network: String,
        address: String,
        #[source]
        source: ReconcileError,
    },
}

pub type Result<T> = std::result::Result<T, AttachError>;
