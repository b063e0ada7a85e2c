//! In-memory libvirt network daemon for tests.
//!
//! [`FakeNetworkApi`] keeps a live and a persistent copy of each network's DHCP
//! host list and answers `virNetworkUpdate` the way libvirt does for the
//! `ip-dhcp-host` section: modify requires an entry with the same MAC,
//! add-last refuses duplicates.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::client::{
    ApiError, NetworkApi, NetworkHandle, NetworkUpdate, Result, UpdateCommand,
    VIR_ERR_OPERATION_INVALID,
};
use crate::host::host_xml;

/// `VIR_ERR_OPERATION_FAILED`
const VIR_ERR_OPERATION_FAILED: u32 = 9;

/// A recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lookup(String),
    Describe(String),
    Update(String, NetworkUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeHost {
    pub mac: String,
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Clone)]
struct FakeSubnet {
    address: String,
    prefix: u8,
    live: Vec<FakeHost>,
    config: Vec<FakeHost>,
}

/// Network definition served by [`FakeNetworkApi`].
#[derive(Debug, Clone)]
pub struct FakeNetwork {
    name: String,
    forward: Option<String>,
    subnets: Vec<FakeSubnet>,
}

impl FakeNetwork {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            forward: None,
            subnets: Vec::new(),
        }
    }

    /// Add a `<forward>` element; an empty mode renders `<forward/>`.
    pub fn forward(mut self, mode: &str) -> Self {
        self.forward = Some(mode.to_string());
        self
    }

    pub fn subnet(mut self, address: &str, prefix: u8) -> Self {
        self.subnets.push(FakeSubnet {
            address: address.to_string(),
            prefix,
            live: Vec::new(),
            config: Vec::new(),
        });
        self
    }

    fn uuid(&self) -> String {
        format!("00000000-0000-4000-8000-{:012x}", self.name.len())
    }

    fn to_xml(&self) -> String {
        let mut xml = format!(
            "<network>\n  <name>{}</name>\n  <uuid>{}</uuid>\n",
            self.name,
            self.uuid()
        );
        match self.forward.as_deref() {
            Some("") => xml.push_str("  <forward/>\n"),
            Some(mode) => xml.push_str(&format!("  <forward mode='{}'/>\n", mode)),
            None => {}
        }
        for subnet in &self.subnets {
            xml.push_str(&format!(
                "  <ip address='{}' prefix='{}'>\n    <dhcp>\n",
                subnet.address, subnet.prefix
            ));
            for host in &subnet.live {
                xml.push_str("  ");
                xml.push_str(&host_xml(&host.ip, &host.mac, &host.name));
                xml.push('\n');
            }
            xml.push_str("    </dhcp>\n  </ip>\n");
        }
        xml.push_str("</network>\n");
        xml
    }
}

#[derive(Debug, Deserialize)]
struct HostPayload {
    #[serde(rename = "@mac", default)]
    mac: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@ip", default)]
    ip: String,
}

#[derive(Default)]
struct State {
    networks: HashMap<String, FakeNetwork>,
    calls: Vec<Call>,
    describe_error: Option<(u32, String)>,
    update_errors: Vec<(u32, String)>,
}

/// In-memory [`NetworkApi`].
#[derive(Default)]
pub struct FakeNetworkApi {
    state: Mutex<State>,
}

impl FakeNetworkApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(self, network: FakeNetwork) -> Self {
        self.lock().networks.insert(network.name.clone(), network);
        self
    }

    /// Every description request fails with the given libvirt error.
    pub fn fail_describe(self, code: u32, message: &str) -> Self {
        self.lock().describe_error = Some((code, message.to_string()));
        self
    }

    /// The next update call fails with the given libvirt error.
    pub fn fail_next_update(&self, code: u32, message: &str) {
        self.lock().update_errors.push((code, message.to_string()));
    }

    pub fn handle(&self, name: &str) -> NetworkHandle {
        let uuid = self
            .lock()
            .networks
            .get(name)
            .map(FakeNetwork::uuid)
            .unwrap_or_default();
        NetworkHandle {
            name: name.to_string(),
            uuid,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn updates(&self) -> Vec<NetworkUpdate> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Update(_, update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Live DHCP hosts of a subnet.
    pub fn hosts(&self, network: &str, index: usize) -> Vec<FakeHost> {
        self.lock()
            .networks
            .get(network)
            .and_then(|n| n.subnets.get(index))
            .map(|s| s.live.clone())
            .unwrap_or_default()
    }

    /// Persistent DHCP hosts of a subnet.
    pub fn config_hosts(&self, network: &str, index: usize) -> Vec<FakeHost> {
        self.lock()
            .networks
            .get(network)
            .and_then(|n| n.subnets.get(index))
            .map(|s| s.config.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn apply(hosts: &mut Vec<FakeHost>, command: UpdateCommand, host: &FakeHost) -> Result<()> {
    match command {
        UpdateCommand::Modify => match hosts.iter_mut().find(|h| h.mac == host.mac) {
            Some(existing) => {
                *existing = host.clone();
                Ok(())
            }
            None => Err(ApiError::from_code(
                VIR_ERR_OPERATION_INVALID,
                format!(
                    "couldn't locate an existing dhcp host entry with \"mac='{}'\"",
                    host.mac
                ),
            )),
        },
        UpdateCommand::AddLast => {
            if hosts.iter().any(|h| h.mac == host.mac || h.ip == host.ip) {
                return Err(ApiError::from_code(
                    VIR_ERR_OPERATION_FAILED,
                    format!(
                        "there is an existing dhcp host entry that matches \
                         \"<host mac='{}' ip='{}'/>\"",
                        host.mac, host.ip
                    ),
                ));
            }
            hosts.push(host.clone());
            Ok(())
        }
    }
}

#[async_trait]
impl NetworkApi for FakeNetworkApi {
    async fn lookup_network_by_name(&self, name: &str) -> Result<NetworkHandle> {
        let mut state = self.lock();
        state.calls.push(Call::Lookup(name.to_string()));
        match state.networks.get(name) {
            Some(network) => Ok(NetworkHandle {
                name: network.name.clone(),
                uuid: network.uuid(),
            }),
            None => Err(ApiError::NoNetwork(format!(
                "no network with matching name '{}'",
                name
            ))),
        }
    }

    async fn network_xml_desc(&self, network: &NetworkHandle) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(Call::Describe(network.name.clone()));
        if let Some((code, message)) = &state.describe_error {
            return Err(ApiError::from_code(*code, message.clone()));
        }
        state
            .networks
            .get(&network.name)
            .map(FakeNetwork::to_xml)
            .ok_or_else(|| ApiError::NoNetwork(network.name.clone()))
    }

    async fn network_update(&self, network: &NetworkHandle, update: &NetworkUpdate) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .push(Call::Update(network.name.clone(), update.clone()));
        if !state.update_errors.is_empty() {
            let (code, message) = state.update_errors.remove(0);
            return Err(ApiError::from_code(code, message));
        }

        let payload: HostPayload =
            quick_xml::de::from_str(&update.xml).map_err(|e| ApiError::Other {
                code: 27,
                message: format!("XML error: {}", e),
            })?;
        let host = FakeHost {
            mac: payload.mac,
            name: payload.name,
            ip: payload.ip,
        };

        let Some(net) = state.networks.get_mut(&network.name) else {
            return Err(ApiError::NoNetwork(network.name.clone()));
        };
        // A negative index selects the first <ip> element
        let index = usize::try_from(update.parent_index).unwrap_or(0);
        let Some(subnet) = net.subnets.get_mut(index) else {
            return Err(ApiError::from_code(
                VIR_ERR_OPERATION_INVALID,
                format!(
                    "couldn't update dhcp host entry - no <ip> element found at index {}",
                    update.parent_index
                ),
            ));
        };

        // Validate against the live copy first so a failure leaves both untouched
        let mut live = subnet.live.clone();
        let mut config = subnet.config.clone();
        if update.scope.affects_live() {
            apply(&mut live, update.command, &host)?;
        }
        if update.scope.affects_config() {
            apply(&mut config, update.command, &host)?;
        }
        subnet.live = live;
        subnet.config = config;
        Ok(())
    }
}
