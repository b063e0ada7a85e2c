//! The part of a domain definition owned by interface attachment.

use serde::Serialize;

use crate::mac::MacAddress;

pub const VIRTIO_MODEL: &str = "virtio";

/// A network interface attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAttachment {
    pub model: String,
    pub mac: MacAddress,
    pub source_network: String,
}

impl InterfaceAttachment {
    pub fn virtio(mac: MacAddress, source_network: impl Into<String>) -> Self {
        Self {
            model: VIRTIO_MODEL.to_string(),
            mac,
            source_network: source_network.into(),
        }
    }
}

/// VM definition under construction.
#[derive(Debug, Clone, Default)]
pub struct DomainDefinition {
    pub name: String,
    pub interfaces: Vec<InterfaceAttachment>,
}

impl DomainDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
        }
    }

    pub fn attach(&mut self, interface: InterfaceAttachment) {
        self.interfaces.push(interface);
    }

    /// Render the interfaces as a libvirt `<devices>` fragment.
    pub fn interfaces_xml(&self) -> anyhow::Result<String> {
        let devices = DevicesXml {
            interface: self
                .interfaces
                .iter()
                .map(|iface| InterfaceXml {
                    kind: "network",
                    mac: MacXml { address: iface.mac },
                    source: SourceXml {
                        network: &iface.source_network,
                    },
                    model: ModelXml { kind: &iface.model },
                })
                .collect(),
        };

        let mut out = String::new();
        let mut ser = quick_xml::se::Serializer::new(&mut out);
        ser.indent(' ', 2);
        devices.serialize(ser)?;
        Ok(out)
    }
}

#[derive(Serialize)]
#[serde(rename = "devices")]
struct DevicesXml<'a> {
    interface: Vec<InterfaceXml<'a>>,
}

#[derive(Serialize)]
struct InterfaceXml<'a> {
    #[serde(rename = "@type")]
    kind: &'static str,
    mac: MacXml,
    source: SourceXml<'a>,
    model: ModelXml<'a>,
}

#[derive(Serialize)]
struct MacXml {
    #[serde(rename = "@address")]
    address: MacAddress,
}

#[derive(Serialize)]
struct SourceXml<'a> {
    #[serde(rename = "@network")]
    network: &'a str,
}

#[derive(Serialize)]
struct ModelXml<'a> {
    #[serde(rename = "@type")]
    kind: &'a str,
}
