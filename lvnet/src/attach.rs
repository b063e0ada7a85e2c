//! Attach requested network interfaces to a domain definition.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::client::NetworkApi;
use crate::config::{AttachConfig, InterfaceRequest};
use crate::domain::{DomainDefinition, InterfaceAttachment};
use crate::error::{AttachError, Result};
use crate::mac::MacGenerator;
use crate::reconciler::HostReconciler;

/// Attaches interfaces one request at a time, in request order.
pub struct InterfaceAttacher {
    api: Arc<dyn NetworkApi>,
    macs: MacGenerator,
    reconciler: HostReconciler,
    placeholder_hostname: String,
}

impl InterfaceAttacher {
    pub fn new(api: Arc<dyn NetworkApi>, config: &AttachConfig) -> Self {
        Self::with_generator(api, MacGenerator::new(config), config)
    }

    pub fn with_generator(
        api: Arc<dyn NetworkApi>,
        macs: MacGenerator,
        config: &AttachConfig,
    ) -> Self {
        Self {
            reconciler: HostReconciler::new(api.clone(), config.sentinel_index),
            api,
            macs,
            placeholder_hostname: config.placeholder_hostname.clone(),
        }
    }

    /// Attach every request to `domain`.
    ///
    /// Stops at the first error. Interfaces attached for earlier requests stay
    /// on the domain; the caller decides whether to discard it.
    pub async fn attach(
        &mut self,
        domain: &mut DomainDefinition,
        requests: &[InterfaceRequest],
        hostname: Option<&str>,
    ) -> Result<()> {
        let hostname = hostname.unwrap_or(self.placeholder_hostname.as_str()).to_string();
        for request in requests {
            let interface = self.attach_one(request, &hostname).await?;
            domain.attach(interface);
        }
        Ok(())
    }

    async fn attach_one(
        &mut self,
        request: &InterfaceRequest,
        hostname: &str,
    ) -> Result<InterfaceAttachment> {
        let network_name = &request.network_name;
        let mac = self.macs.generate()?;

        let network = self
            .api
            .lookup_network_by_name(network_name)
            .await
            .map_err(|source| AttachError::NetworkLookupFailed {
                network: network_name.clone(),
                source,
            })?;

        if let Some(address) = &request.address {
            // ::ffff:a.b.c.d is matched and reserved as a.b.c.d
            let ip = address
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| AttachError::MalformedAddress {
                    network: network_name.clone(),
                    address: address.clone(),
                })?
                .to_canonical();

            let descriptor = self.reconciler.describe(&network).await.map_err(|source| {
                AttachError::NetworkDescribeFailed {
                    network: network_name.clone(),
                    source,
                }
            })?;

            if descriptor.has_dhcp() {
                let action = self
                    .reconciler
                    .update_or_add_host(&network, ip, &mac.to_string(), hostname)
                    .await
                    .map_err(|source| AttachError::Reservation {
                        network: network_name.clone(),
                        address: ip.to_string(),
                        source,
                    })?;
                info!(network = %network.name, %ip, %mac, ?action, "Reserved DHCP address");
            } else {
                debug!(
                    network = %network.name,
                    %ip,
                    "Network has no managed DHCP, skipping reservation"
                );
            }
        }

        Ok(InterfaceAttachment::virtio(mac, network.name))
    }
}
