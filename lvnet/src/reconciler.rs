//! DHCP host reservation reconciler.
//!
//! libvirt has no upsert for `ip-dhcp-host`, so a reservation is written as a
//! modify and, when the daemon reports that no entry matched, retried once as
//! an add-last on the same `<ip>` index.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{
    NetworkApi, NetworkHandle, NetworkSection, NetworkUpdate, UpdateCommand, UpdateScope,
};
use crate::error::{DescriptorError, ReconcileError};
use crate::host::DhcpHostReservation;
use crate::network::NetworkDescriptor;

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    Updated,
    Added,
}

/// Writes DHCP host reservations into libvirt networks.
pub struct HostReconciler {
    api: Arc<dyn NetworkApi>,
    sentinel_index: i32,
}

impl HostReconciler {
    pub fn new(api: Arc<dyn NetworkApi>, sentinel_index: i32) -> Self {
        Self {
            api,
            sentinel_index,
        }
    }

    /// Fetch and parse the current definition of `network`.
    pub async fn describe(
        &self,
        network: &NetworkHandle,
    ) -> Result<NetworkDescriptor, DescriptorError> {
        let xml = self.api.network_xml_desc(network).await?;
        Ok(NetworkDescriptor::from_xml(&xml)?)
    }

    /// Position of the `<ip>` element containing `ip`, or the sentinel index.
    async fn subnet_index(&self, network: &NetworkHandle, ip: IpAddr) -> i32 {
        let descriptor = match self.describe(network).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(
                    network = %network.name,
                    index = self.sentinel_index,
                    "Failed to read network description, using default subnet index: {}", e
                );
                return self.sentinel_index;
            }
        };

        match descriptor.subnet_index(ip) {
            Ok(index) => i32::try_from(index).unwrap_or(self.sentinel_index),
            Err(e) => {
                warn!(
                    network = %network.name,
                    index = self.sentinel_index,
                    "Error detecting subnet index, using default: {}", e
                );
                self.sentinel_index
            }
        }
    }

    /// Update the host entry for `mac`, adding it if the network has none.
    pub async fn update_or_add_host(
        &self,
        network: &NetworkHandle,
        ip: IpAddr,
        mac: &str,
        hostname: &str,
    ) -> Result<HostAction, ReconcileError> {
        let ip = ip.to_canonical();
        let reservation = DhcpHostReservation {
            ip: ip.to_string(),
            mac: mac.to_string(),
            hostname: hostname.to_string(),
            subnet_index: self.subnet_index(network, ip).await,
        };

        match self.write(network, &reservation, UpdateCommand::Modify).await {
            Ok(()) => Ok(HostAction::Updated),
            Err(e) if e.is_operation_invalid() => {
                info!(
                    network = %network.name,
                    mac = %mac,
                    index = reservation.subnet_index,
                    "No existing DHCP host entry, adding one"
                );
                self.write(network, &reservation, UpdateCommand::AddLast)
                    .await
                    .map(|()| HostAction::Added)
                    .map_err(|source| ReconcileError::WriteFailed {
                        command: UpdateCommand::AddLast,
                        index: reservation.subnet_index,
                        source,
                    })
            }
            Err(source) => Err(ReconcileError::WriteFailed {
                command: UpdateCommand::Modify,
                index: reservation.subnet_index,
                source,
            }),
        }
    }

    async fn write(
        &self,
        network: &NetworkHandle,
        reservation: &DhcpHostReservation,
        command: UpdateCommand,
    ) -> crate::client::Result<()> {
        let xml = reservation.to_xml();
        debug!(
            network = %network.name,
            %command,
            index = reservation.subnet_index,
            "Writing DHCP host:\n{}", xml
        );

        // Live and persistent config, so the reservation survives a network restart
        let update = NetworkUpdate {
            command,
            section: NetworkSection::IpDhcpHost,
            parent_index: reservation.subnet_index,
            xml,
            scope: UpdateScope::Both,
        };
        self.api.network_update(network, &update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{FakeNetwork, FakeNetworkApi};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn two_subnets() -> FakeNetwork {
        FakeNetwork::new("lab")
            .forward("nat")
            .subnet("10.0.0.1", 24)
            .subnet("192.168.1.1", 24)
    }

    #[tokio::test]
    async fn test_adds_when_missing() {
        let api = Arc::new(FakeNetworkApi::new().with_network(two_subnets()));
        let reconciler = HostReconciler::new(api.clone(), -1);
        let handle = api.handle("lab");

        let action = reconciler
            .update_or_add_host(&handle, ip("192.168.1.50"), "52:54:00:aa:bb:cc", "web")
            .await
            .unwrap();
        assert_eq!(action, HostAction::Added);

        let updates = api.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].command, UpdateCommand::Modify);
        assert_eq!(updates[1].command, UpdateCommand::AddLast);
        for update in &updates {
            assert_eq!(update.parent_index, 1);
            assert_eq!(update.scope, UpdateScope::Both);
            assert_eq!(update.section, NetworkSection::IpDhcpHost);
        }
        assert_eq!(updates[0].xml, updates[1].xml);
        assert_eq!(
            updates[1].xml,
            r#"  <host mac="52:54:00:aa:bb:cc" name="web" ip="192.168.1.50"></host>"#
        );
        assert_eq!(api.hosts("lab", 1).len(), 1);
    }

    #[tokio::test]
    async fn test_second_write_is_update() {
        let api = Arc::new(FakeNetworkApi::new().with_network(two_subnets()));
        let reconciler = HostReconciler::new(api.clone(), -1);
        let handle = api.handle("lab");

        let first = reconciler
            .update_or_add_host(&handle, ip("10.0.0.20"), "52:54:00:01:02:03", "db")
            .await
            .unwrap();
        let second = reconciler
            .update_or_add_host(&handle, ip("10.0.0.20"), "52:54:00:01:02:03", "db")
            .await
            .unwrap();
        assert_eq!(first, HostAction::Added);
        assert_eq!(second, HostAction::Updated);

        let commands: Vec<_> = api.updates().iter().map(|u| u.command).collect();
        assert_eq!(
            commands,
            vec![
                UpdateCommand::Modify,
                UpdateCommand::AddLast,
                UpdateCommand::Modify,
            ]
        );
        assert_eq!(api.hosts("lab", 0).len(), 1);
        assert_eq!(api.config_hosts("lab", 0).len(), 1);
    }

    #[tokio::test]
    async fn test_describe_failure_uses_sentinel() {
        let api = Arc::new(
            FakeNetworkApi::new()
                .with_network(two_subnets())
                .fail_describe(1, "internal error"),
        );
        let reconciler = HostReconciler::new(api.clone(), -1);
        let handle = api.handle("lab");

        reconciler
            .update_or_add_host(&handle, ip("192.168.1.50"), "52:54:00:aa:bb:cc", "web")
            .await
            .unwrap();

        assert!(api.updates().iter().all(|u| u.parent_index == -1));
    }

    #[tokio::test]
    async fn test_unmatched_address_uses_overridden_sentinel() {
        let api = Arc::new(FakeNetworkApi::new().with_network(two_subnets()));
        let reconciler = HostReconciler::new(api.clone(), -7);
        let handle = api.handle("lab");

        let _ = reconciler
            .update_or_add_host(&handle, ip("172.16.0.1"), "52:54:00:aa:bb:cc", "web")
            .await;

        assert_eq!(api.updates()[0].parent_index, -7);
    }

    #[tokio::test]
    async fn test_mapped_ipv4_is_written_as_ipv4() {
        let api = Arc::new(FakeNetworkApi::new().with_network(two_subnets()));
        let reconciler = HostReconciler::new(api.clone(), -1);
        let handle = api.handle("lab");

        reconciler
            .update_or_add_host(&handle, ip("::ffff:192.168.1.50"), "52:54:00:aa:bb:cc", "web")
            .await
            .unwrap();

        let updates = api.updates();
        assert!(updates.iter().all(|u| u.parent_index == 1));
        assert!(updates[1].xml.contains(r#"ip="192.168.1.50""#));
        assert_eq!(api.hosts("lab", 1)[0].ip, "192.168.1.50");
    }

    #[tokio::test]
    async fn test_modify_failure_is_fatal() {
        let api = Arc::new(FakeNetworkApi::new().with_network(two_subnets()));
        api.fail_next_update(38, "system call failed");
        let reconciler = HostReconciler::new(api.clone(), -1);
        let handle = api.handle("lab");

        let err = reconciler
            .update_or_add_host(&handle, ip("10.0.0.20"), "52:54:00:01:02:03", "db")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::WriteFailed {
                command: UpdateCommand::Modify,
                index: 0,
                ..
            }
        ));
        assert_eq!(api.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_add_failure_is_fatal() {
        let api = Arc::new(FakeNetworkApi::new().with_network(two_subnets()));
        let reconciler = HostReconciler::new(api.clone(), -1);
        let handle = api.handle("lab");

        reconciler
            .update_or_add_host(&handle, ip("10.0.0.20"), "52:54:00:01:02:03", "db")
            .await
            .unwrap();

        // Same address for a different MAC: modify misses, add-last conflicts
        let err = reconciler
            .update_or_add_host(&handle, ip("10.0.0.20"), "52:54:00:09:09:09", "db2")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::WriteFailed {
                command: UpdateCommand::AddLast,
                ..
            }
        ));
    }
}
