//! Validated network-layer identifiers.
//!
//! MAC addresses are stored in canonical lowercase colon-separated form;
//! all comparisons are case-insensitive because the canonical form is the
//! only form that exists after construction.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rejection of a single out-of-range or malformed value.
///
/// Validation errors drop the offending record; they never halt the
/// pipeline.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),

    #[error("port out of range (1-65535): {0}")]
    PortOutOfRange(u32),

    #[error("VLAN id out of range (1-4094): {0}")]
    VlanOutOfRange(u16),

    #[error("invalid CIDR: {0:?}")]
    InvalidCidr(String),

    #[error("syslog severity out of range (0-7): {0}")]
    SeverityOutOfRange(u8),

    #[error("syslog facility out of range (0-23): {0}")]
    FacilityOutOfRange(u8),

    #[error("invalid IPv4 address: {0:?}")]
    InvalidIp(String),

    #[error("{0}")]
    Other(String),
}

/// A MAC address in canonical form.
///
/// Accepts `aa:bb:cc:dd:ee:ff`, `AA-BB-CC-DD-EE-FF`, Cisco-style
/// `aabb.ccdd.eeff`, and bare 12-digit hex on input. Always renders
/// lowercase colon-separated, so canonicalization is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// First three octets — the vendor OUI prefix, e.g. `28:63:36`.
    pub fn oui(&self) -> String {
        format!("{:02x}:{:02x}:{:02x}", self.0[0], self.0[1], self.0[2])
    }

    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl FromStr for MacAddr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidMac(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ValidationError::InvalidMac(s.to_string()))?;
        }
        Ok(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// A TCP/UDP port in the range 1-65535. Zero is never a valid endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Port(u16);

impl Port {
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if value == 0 || value > u16::MAX as u32 {
            return Err(ValidationError::PortOutOfRange(value));
        }
        Ok(Port(value as u16))
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for Port {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Port::new(value)
    }
}

impl From<Port> for u32 {
    fn from(port: Port) -> Self {
        port.0 as u32
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An IEEE 802.1Q VLAN id in the usable range 1-4094.
///
/// 0 (priority-tagged) and 4095 (reserved) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub fn new(value: u16) -> Result<Self, ValidationError> {
        if value == 0 || value > 4094 {
            return Err(ValidationError::VlanOutOfRange(value));
        }
        Ok(VlanId(value))
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        VlanId::new(value)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> Self {
        vlan.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An IPv4 CIDR block, e.g. `10.20.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, ValidationError> {
        if prefix > 32 {
            return Err(ValidationError::InvalidCidr(format!("{}/{}", addr, prefix)));
        }
        Ok(Cidr {
            network: Ipv4Addr::from(u32::from(addr) & Self::mask(prefix)),
            prefix,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// True if `addr` falls inside this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask(self.prefix) == u32::from(self.network)
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix as u32)
        }
    }
}

impl FromStr for Cidr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| ValidationError::InvalidCidr(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| ValidationError::InvalidCidr(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| ValidationError::InvalidCidr(s.to_string()))?;
        Cidr::new(addr, prefix)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl TryFrom<String> for Cidr {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_canonical_form() {
        let mac: MacAddr = "28:63:36:AA:BB:CC".parse().unwrap();
        assert_eq!(mac.to_string(), "28:63:36:aa:bb:cc");
    }

    #[test]
    fn test_mac_canonicalization_idempotent() {
        let once: MacAddr = "28-63-36-AA-BB-CC".parse().unwrap();
        let twice: MacAddr = once.to_string().parse().unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn test_mac_case_insensitive() {
        let upper: MacAddr = "28:63:36:AA:BB:CC".parse().unwrap();
        let lower: MacAddr = "28:63:36:aa:bb:cc".parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_mac_accepts_cisco_and_bare_forms() {
        let dotted: MacAddr = "2863.36aa.bbcc".parse().unwrap();
        let bare: MacAddr = "286336aabbcc".parse().unwrap();
        assert_eq!(dotted, bare);
        assert_eq!(dotted.to_string(), "28:63:36:aa:bb:cc");
    }

    #[test]
    fn test_mac_rejects_malformed() {
        assert!("28:63:36:aa:bb".parse::<MacAddr>().is_err());
        assert!("zz:63:36:aa:bb:cc".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_oui_prefix() {
        let mac: MacAddr = "28:63:36:aa:bb:cc".parse().unwrap();
        assert_eq!(mac.oui(), "28:63:36");
    }

    #[test]
    fn test_port_boundaries() {
        assert!(Port::new(0).is_err());
        assert!(Port::new(65536).is_err());
        assert_eq!(Port::new(1).unwrap().get(), 1);
        assert_eq!(Port::new(65535).unwrap().get(), 65535);
    }

    #[test]
    fn test_vlan_boundaries() {
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
        assert_eq!(VlanId::new(1).unwrap().get(), 1);
        assert_eq!(VlanId::new(4094).unwrap().get(), 4094);
    }

    #[test]
    fn test_cidr_contains() {
        let cidr: Cidr = "10.20.0.0/16".parse().unwrap();
        assert!(cidr.contains("10.20.1.50".parse().unwrap()));
        assert!(!cidr.contains("10.21.1.50".parse().unwrap()));
    }

    #[test]
    fn test_cidr_normalizes_network() {
        let cidr: Cidr = "192.168.1.77/24".parse().unwrap();
        assert_eq!(cidr.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_cidr_rejects_bad_prefix() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("10.0.0.0".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_mac_json_round_trip() {
        let mac: MacAddr = "28:63:36:AA:BB:CC".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"28:63:36:aa:bb:cc\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(mac, back);
    }

    #[test]
    fn test_port_json_rejects_zero() {
        assert!(serde_json::from_str::<Port>("0").is_err());
        assert!(serde_json::from_str::<Port>("502").is_ok());
    }
}
