//! libvirt network descriptions.
//!
//! A [`NetworkDescriptor`] is a snapshot of `virsh net-dumpxml`. It is read
//! right before each decision that depends on it and never cached: another
//! reservation may have changed the network in the meantime.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};
use serde::Deserialize;

use crate::error::IndexError;

/// `<forward mode=...>` of a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingMode {
    /// `<forward/>` without a mode; libvirt treats it as NAT.
    Unset,
    Nat,
    Route,
    Open,
    Bridge,
    Private,
    Vepa,
    Passthrough,
    Hostdev,
    Other(String),
}

impl From<&str> for ForwardingMode {
    fn from(mode: &str) -> Self {
        match mode {
            "" => ForwardingMode::Unset,
            "nat" => ForwardingMode::Nat,
            "route" => ForwardingMode::Route,
            "open" => ForwardingMode::Open,
            "bridge" => ForwardingMode::Bridge,
            "private" => ForwardingMode::Private,
            "vepa" => ForwardingMode::Vepa,
            "passthrough" => ForwardingMode::Passthrough,
            "hostdev" => ForwardingMode::Hostdev,
            other => ForwardingMode::Other(other.to_string()),
        }
    }
}

/// A `<host>` entry under `<ip><dhcp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpHostEntry {
    pub mac: Option<String>,
    pub name: Option<String>,
    pub ip: Option<String>,
}

/// One `<ip>` element of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetBlock {
    pub address: String,
    pub prefix: Option<String>,
    pub netmask: Option<String>,
    pub family: Option<String>,
    pub dhcp: bool,
    pub hosts: Vec<DhcpHostEntry>,
}

impl SubnetBlock {
    pub fn with_prefix(address: impl Into<String>, prefix: u8) -> Self {
        Self {
            address: address.into(),
            prefix: Some(prefix.to_string()),
            ..Default::default()
        }
    }

    pub fn with_netmask(address: impl Into<String>, netmask: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            netmask: Some(netmask.into()),
            ..Default::default()
        }
    }

    /// The CIDR block this element describes.
    pub fn net(&self) -> std::result::Result<IpNet, String> {
        let addr: IpAddr = self
            .address
            .parse()
            .map_err(|_| format!("invalid address '{}'", self.address))?;

        if let Some(prefix) = &self.prefix {
            let len: u8 = prefix
                .trim()
                .parse()
                .map_err(|_| format!("invalid prefix '{}'", prefix))?;
            return IpNet::new(addr, len)
                .map(|net| net.trunc())
                .map_err(|e| e.to_string());
        }

        if let Some(netmask) = &self.netmask {
            let IpAddr::V4(v4) = addr else {
                return Err("netmask is only valid for IPv4".to_string());
            };
            let mask: Ipv4Addr = netmask
                .parse()
                .map_err(|_| format!("invalid netmask '{}'", netmask))?;
            return Ipv4Net::with_netmask(v4, mask)
                .map(|net| IpNet::V4(net.trunc()))
                .map_err(|e| e.to_string());
        }

        Err("neither prefix nor netmask given".to_string())
    }

}

impl fmt::Display for SubnetBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.prefix, &self.netmask) {
            (Some(prefix), _) => write!(f, "{}/{}", self.address, prefix),
            (None, Some(netmask)) => write!(f, "{} netmask {}", self.address, netmask),
            (None, None) => f.write_str(&self.address),
        }
    }
}

/// Snapshot of a libvirt network definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub name: String,
    pub uuid: Option<String>,
    /// `None` when the network has no `<forward>` element at all.
    pub forward: Option<ForwardingMode>,
    pub subnets: Vec<SubnetBlock>,
}

impl NetworkDescriptor {
    pub fn from_xml(xml: &str) -> std::result::Result<Self, quick_xml::DeError> {
        let raw: NetworkXml = quick_xml::de::from_str(xml)?;
        Ok(raw.into())
    }

    /// Whether libvirt runs dnsmasq for this network.
    pub fn has_dhcp(&self) -> bool {
        has_dhcp(self.forward.as_ref())
    }

    pub fn subnet_index(&self, ip: IpAddr) -> std::result::Result<usize, IndexError> {
        resolve_subnet_index(&self.subnets, ip)
    }
}

/// Classification summary, one line for the network and one per subnet.
impl fmt::Display for NetworkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: forward={:?} dhcp={}",
            self.name,
            self.forward,
            self.has_dhcp()
        )?;
        for (index, subnet) in self.subnets.iter().enumerate() {
            writeln!(
                f,
                "  #{} {} family={} dhcp={} hosts={}",
                index,
                subnet,
                subnet.family.as_deref().unwrap_or("ipv4"),
                subnet.dhcp,
                subnet.hosts.len()
            )?;
        }
        Ok(())
    }
}

/// Classify a network's forwarding mode.
///
/// Networks without a `<forward>` element are isolated, but libvirt still
/// serves DHCP on them.
pub fn has_dhcp(forward: Option<&ForwardingMode>) -> bool {
    match forward {
        None => true,
        Some(
            ForwardingMode::Nat
            | ForwardingMode::Route
            | ForwardingMode::Open
            | ForwardingMode::Unset,
        ) => true,
        Some(_) => false,
    }
}

/// Find the position of the first subnet containing `ip`.
///
/// Blocks that fail to parse are skipped. If no block matches, the first parse
/// failure is the error; `NotFound` only when every block was evaluated.
pub fn resolve_subnet_index(
    subnets: &[SubnetBlock],
    ip: IpAddr,
) -> std::result::Result<usize, IndexError> {
    if subnets.is_empty() {
        return Err(IndexError::NoSubnets);
    }

    let mut parse_error = None;
    for (index, block) in subnets.iter().enumerate() {
        match block.net() {
            Ok(net) if net.contains(&ip) => return Ok(index),
            Ok(_) => {}
            Err(reason) => {
                parse_error.get_or_insert(IndexError::SubnetParseFailed {
                    index,
                    block: block.to_string(),
                    reason,
                });
            }
        }
    }

    Err(parse_error.unwrap_or_else(|| IndexError::NotFound {
        address: ip.to_string(),
    }))
}

// =============================================================================
// XML model
// =============================================================================

#[derive(Debug, Deserialize)]
struct NetworkXml {
    #[serde(default)]
    name: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    forward: Option<ForwardXml>,
    #[serde(rename = "ip", default)]
    ips: Vec<IpXml>,
}

#[derive(Debug, Deserialize)]
struct ForwardXml {
    #[serde(rename = "@mode", default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpXml {
    #[serde(rename = "@address", default)]
    address: Option<String>,
    #[serde(rename = "@prefix", default)]
    prefix: Option<String>,
    #[serde(rename = "@netmask", default)]
    netmask: Option<String>,
    #[serde(rename = "@family", default)]
    family: Option<String>,
    #[serde(default)]
    dhcp: Option<DhcpXml>,
}

#[derive(Debug, Deserialize)]
struct DhcpXml {
    #[serde(rename = "host", default)]
    hosts: Vec<HostXml>,
}

#[derive(Debug, Deserialize)]
struct HostXml {
    #[serde(rename = "@mac", default)]
    mac: Option<String>,
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@ip", default)]
    ip: Option<String>,
}

impl From<NetworkXml> for NetworkDescriptor {
    fn from(raw: NetworkXml) -> Self {
        let subnets = raw
            .ips
            .into_iter()
            .map(|ip| SubnetBlock {
                address: ip.address.unwrap_or_default(),
                prefix: ip.prefix,
                netmask: ip.netmask,
                family: ip.family,
                dhcp: ip.dhcp.is_some(),
                hosts: ip
                    .dhcp
                    .map(|dhcp| {
                        dhcp.hosts
                            .into_iter()
                            .map(|h| DhcpHostEntry {
                                mac: h.mac,
                                name: h.name,
                                ip: h.ip,
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        NetworkDescriptor {
            name: raw.name,
            uuid: raw.uuid,
            forward: raw
                .forward
                .map(|f| ForwardingMode::from(f.mode.as_deref().unwrap_or_default())),
            subnets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_NETWORK: &str = r#"<network>
  <name>default</name>
  <uuid>c6a0fa3d-3a61-4b5a-8d6f-0b2f3c1d9e01</uuid>
  <forward mode='nat'>
    <nat>
      <port start='1024' end='65535'/>
    </nat>
  </forward>
  <bridge name='virbr0' stp='on' delay='0'/>
  <mac address='52:54:00:0a:8c:71'/>
  <ip address='192.168.122.1' netmask='255.255.255.0'>
    <dhcp>
      <range start='192.168.122.2' end='192.168.122.254'/>
      <host mac='52:54:00:12:34:56' name='web' ip='192.168.122.10'/>
    </dhcp>
  </ip>
  <ip family='ipv6' address='fd00:122::1' prefix='64'/>
</network>"#;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_default_network() {
        let net = NetworkDescriptor::from_xml(DEFAULT_NETWORK).unwrap();
        assert_eq!(net.name, "default");
        assert_eq!(net.uuid.as_deref(), Some("c6a0fa3d-3a61-4b5a-8d6f-0b2f3c1d9e01"));
        assert_eq!(net.forward, Some(ForwardingMode::Nat));
        assert_eq!(net.subnets.len(), 2);

        let v4 = &net.subnets[0];
        assert_eq!(v4.address, "192.168.122.1");
        assert_eq!(v4.netmask.as_deref(), Some("255.255.255.0"));
        assert!(v4.dhcp);
        assert_eq!(
            v4.hosts,
            vec![DhcpHostEntry {
                mac: Some("52:54:00:12:34:56".to_string()),
                name: Some("web".to_string()),
                ip: Some("192.168.122.10".to_string()),
            }]
        );

        let v6 = &net.subnets[1];
        assert_eq!(v6.family.as_deref(), Some("ipv6"));
        assert_eq!(v6.prefix.as_deref(), Some("64"));
        assert!(!v6.dhcp);

        assert_eq!(net.subnet_index(ip("192.168.122.50")).unwrap(), 0);
        assert_eq!(net.subnet_index(ip("fd00:122::50")).unwrap(), 1);
    }

    #[test]
    fn test_descriptor_summary() {
        let net = NetworkDescriptor::from_xml(DEFAULT_NETWORK).unwrap();
        assert_eq!(
            net.to_string(),
            "default: forward=Some(Nat) dhcp=true\n\
             \x20 #0 192.168.122.1 netmask 255.255.255.0 family=ipv4 dhcp=true hosts=1\n\
             \x20 #1 fd00:122::1/64 family=ipv6 dhcp=false hosts=0\n"
        );
    }

    #[test]
    fn test_parse_forward_variants() {
        let isolated = NetworkDescriptor::from_xml("<network><name>iso</name></network>").unwrap();
        assert_eq!(isolated.forward, None);
        assert!(isolated.subnets.is_empty());

        let unset =
            NetworkDescriptor::from_xml("<network><name>n</name><forward/></network>").unwrap();
        assert_eq!(unset.forward, Some(ForwardingMode::Unset));

        let bridged = NetworkDescriptor::from_xml(
            "<network><name>br</name><forward mode='bridge'/><bridge name='br0'/></network>",
        )
        .unwrap();
        assert_eq!(bridged.forward, Some(ForwardingMode::Bridge));
        assert!(!bridged.has_dhcp());
    }

    #[test]
    fn test_parse_invalid_xml() {
        assert!(NetworkDescriptor::from_xml("<network><name>broken").is_err());
    }

    #[test]
    fn test_has_dhcp() {
        assert!(has_dhcp(None));
        assert!(has_dhcp(Some(&ForwardingMode::from(""))));
        assert!(has_dhcp(Some(&ForwardingMode::from("nat"))));
        assert!(has_dhcp(Some(&ForwardingMode::from("route"))));
        assert!(has_dhcp(Some(&ForwardingMode::from("open"))));
        assert!(!has_dhcp(Some(&ForwardingMode::from("bridge"))));
        assert!(!has_dhcp(Some(&ForwardingMode::from("passthrough"))));
        assert!(!has_dhcp(Some(&ForwardingMode::from("macvtap"))));
    }

    #[test]
    fn test_resolve_subnet_index() {
        let subnets = vec![
            SubnetBlock::with_prefix("10.0.0.0", 24),
            SubnetBlock::with_prefix("192.168.1.0", 24),
        ];
        assert_eq!(resolve_subnet_index(&subnets, ip("192.168.1.50")).unwrap(), 1);
        assert_eq!(resolve_subnet_index(&subnets, ip("10.0.0.7")).unwrap(), 0);

        let err = resolve_subnet_index(&subnets, ip("172.16.0.1")).unwrap_err();
        assert!(matches!(err, IndexError::NotFound { ref address } if address == "172.16.0.1"));
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let subnets = vec![
            SubnetBlock::with_prefix("10.0.0.0", 8),
            SubnetBlock::with_prefix("10.1.0.0", 16),
        ];
        assert_eq!(resolve_subnet_index(&subnets, ip("10.1.2.3")).unwrap(), 0);
    }

    #[test]
    fn test_resolve_host_address_block() {
        // libvirt stores the gateway address, not the network address
        let subnets = vec![SubnetBlock::with_prefix("192.168.100.1", 24)];
        assert_eq!(resolve_subnet_index(&subnets, ip("192.168.100.200")).unwrap(), 0);
    }

    #[test]
    fn test_resolve_skips_unparsable_block() {
        let subnets = vec![
            SubnetBlock::with_prefix("not-an-ip", 24),
            SubnetBlock::with_netmask("192.168.122.1", "255.255.255.0"),
        ];
        assert_eq!(resolve_subnet_index(&subnets, ip("192.168.122.9")).unwrap(), 1);

        // Nothing matched, so the skipped block is the reported error
        let err = resolve_subnet_index(&subnets, ip("10.9.9.9")).unwrap_err();
        assert!(matches!(
            err,
            IndexError::SubnetParseFailed { index: 0, ref block, .. } if block == "not-an-ip/24"
        ));
    }

    #[test]
    fn test_resolve_reports_first_bad_block() {
        let subnets = vec![
            SubnetBlock::with_prefix("10.0.0.0", 24),
            SubnetBlock::with_prefix("10.1.0.0", 40),
            SubnetBlock::with_netmask("fd00::1", "255.255.0.0"),
        ];
        let err = resolve_subnet_index(&subnets, ip("172.16.0.1")).unwrap_err();
        assert!(matches!(err, IndexError::SubnetParseFailed { index: 1, .. }));
        assert_eq!(
            SubnetBlock::with_netmask("192.168.122.1", "255.255.255.0").to_string(),
            "192.168.122.1 netmask 255.255.255.0"
        );
    }

    #[test]
    fn test_resolve_single_bad_block() {
        let subnets = vec![SubnetBlock::with_prefix("10.0.0.0", 33)];
        let err = resolve_subnet_index(&subnets, ip("10.0.0.1")).unwrap_err();
        assert!(matches!(err, IndexError::SubnetParseFailed { index: 0, .. }));

        let subnets = vec![SubnetBlock {
            address: "10.0.0.1".to_string(),
            ..Default::default()
        }];
        assert!(matches!(
            resolve_subnet_index(&subnets, ip("10.0.0.1")).unwrap_err(),
            IndexError::SubnetParseFailed { .. }
        ));
    }

    #[test]
    fn test_resolve_no_subnets() {
        assert!(matches!(
            resolve_subnet_index(&[], ip("10.0.0.1")).unwrap_err(),
            IndexError::NoSubnets
        ));
    }

    #[test]
    fn test_address_family_mismatch() {
        let subnets = vec![SubnetBlock::with_prefix("fd00::", 64)];
        assert!(resolve_subnet_index(&subnets, ip("10.0.0.1")).is_err());
    }
}
