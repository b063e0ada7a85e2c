//! lvnet - network interface provisioning for libvirt guests.
//!
//! Generates guest MAC addresses, resolves requested libvirt networks and
//! keeps static DHCP host reservations in sync for guests with fixed
//! addresses.

pub mod attach;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod mac;
pub mod network;
pub mod reconciler;
pub mod test_util;

pub use attach::InterfaceAttacher;
pub use client::{NetworkApi, VirshClient};
pub use config::{AttachConfig, InterfaceRequest, TaskConfig};
pub use domain::{DomainDefinition, InterfaceAttachment};
pub use error::AttachError;
pub use mac::{MacAddress, MacGenerator};
pub use reconciler::{HostAction, HostReconciler};
