//! DHCP static host reservations.

use quick_xml::escape::escape;

/// A static IP -> MAC -> hostname binding written to a network's DHCP config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpHostReservation {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    /// Position of the `<ip>` element the host belongs to.
    pub subnet_index: i32,
}

impl DhcpHostReservation {
    /// The `<host>` element sent to `virNetworkUpdate`.
    ///
    /// libvirt matches existing entries on these attributes, so the layout is
    /// fixed: two space prefix, attributes in mac, name, ip order, explicit
    /// end tag.
    pub fn to_xml(&self) -> String {
        host_xml(&self.ip, &self.mac, &self.hostname)
    }
}

// Written by hand rather than through quick-xml's serializer: the serializer
// has no leading indent and closes empty elements as `<host .../>`.
pub fn host_xml(ip: &str, mac: &str, name: &str) -> String {
    let mut attrs = Vec::with_capacity(3);
    if !mac.is_empty() {
        attrs.push(format!("mac=\"{}\"", escape(mac)));
    }
    if !name.is_empty() {
        attrs.push(format!("name=\"{}\"", escape(name)));
    }
    if !ip.is_empty() {
        attrs.push(format!("ip=\"{}\"", escape(ip)));
    }

    if attrs.is_empty() {
        "  <host></host>".to_string()
    } else {
        format!("  <host {}></host>", attrs.join(" "))
    }
}
