//! Locally administered MAC addresses for guest interfaces.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Serialize, Serializer};

use crate::config::AttachConfig;
use crate::error::MacError;

/// A 6-byte hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = MacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacError::Invalid(s.to_string()));
        }
        let mut mac = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(MacError::Invalid(s.to_string()));
            }
            mac[i] =
                u8::from_str_radix(part, 16).map_err(|_| MacError::Invalid(s.to_string()))?;
        }
        Ok(Self(mac))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Generates MAC addresses under a fixed 3-byte prefix.
pub struct MacGenerator {
    rng: Box<dyn RngCore + Send>,
    prefix: [u8; 3],
    reserved_byte: u8,
    remapped_byte: u8,
}

impl MacGenerator {
    /// Generator backed by the operating system's randomness source.
    pub fn new(config: &AttachConfig) -> Self {
        Self::with_rng(Box::new(OsRng), config)
    }

    pub fn with_rng(rng: Box<dyn RngCore + Send>, config: &AttachConfig) -> Self {
        Self {
            rng,
            prefix: config.mac_prefix,
            reserved_byte: config.reserved_mac_byte,
            remapped_byte: config.remapped_mac_byte,
        }
    }

    /// Fails only when the randomness source does.
    pub fn generate(&mut self) -> Result<MacAddress, rand::Error> {
        let mut buf = [0u8; 3];
        self.rng.try_fill_bytes(&mut buf)?;

        // Locally administered, unicast
        buf[0] = (buf[0] | 0x02) & 0xfe;
        if buf[0] == self.reserved_byte {
            buf[0] = self.remapped_byte;
        }

        let [p0, p1, p2] = self.prefix;
        Ok(MacAddress([p0, p1, p2, buf[0], buf[1], buf[2]]))
    }
}
