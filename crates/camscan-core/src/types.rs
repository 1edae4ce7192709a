//! Core inventory types shared by the scanner and the storage layer.
//!
//! Devices carry their IPv4 address as a single [`HostAddress`], so the
//! dotted-string form and the 32-bit integer form can never drift apart.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// MAC address written for devices discovered by the subnet sweep.
pub const PLACEHOLDER_MAC: &str = "000000000000";

// ── Addresses ─────────────────────────────────────────────────────

/// An IPv4 host address. The integer form is the canonical sort/range key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAddress(Ipv4Addr);

impl HostAddress {
    pub fn new(addr: Ipv4Addr) -> Self {
        Self(addr)
    }

    pub fn from_u32(value: u32) -> Self {
        Self(Ipv4Addr::from(value))
    }

    pub fn as_u32(&self) -> u32 {
        u32::from(self.0)
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl Default for HostAddress {
    fn default() -> Self {
        Self(Ipv4Addr::UNSPECIFIED)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for HostAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))
    }
}

impl TryFrom<String> for HostAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HostAddress> for String {
    fn from(value: HostAddress) -> Self {
        value.to_string()
    }
}

impl From<Ipv4Addr> for HostAddress {
    fn from(value: Ipv4Addr) -> Self {
        Self(value)
    }
}

// ── Devices ───────────────────────────────────────────────────────

/// The two inventoried device roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    AccessPoint,
    SubscriberModule,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 2] = [DeviceRole::AccessPoint, DeviceRole::SubscriberModule];

    /// Short tag used in job types, logs, and export file names.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::AccessPoint => "ap",
            Self::SubscriberModule => "sm",
        }
    }

    /// Storage label / table name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AccessPoint => "AccessPoint",
            Self::SubscriberModule => "SubscriberModule",
        }
    }

    /// Numeric device type used by OID map records.
    pub fn type_code(&self) -> i64 {
        match self {
            Self::AccessPoint => 1,
            Self::SubscriberModule => 2,
        }
    }

    pub fn from_type_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::AccessPoint),
            2 => Ok(Self::SubscriberModule),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Lifecycle status of an inventory record.
///
/// `0` is unknown/new, anything `>= 1` is managed, and `2` marks a record
/// created by the classification sweep that still needs review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStatus(pub i64);

impl DeviceStatus {
    pub const UNKNOWN: DeviceStatus = DeviceStatus(0);
    pub const ACTIVE: DeviceStatus = DeviceStatus(1);
    pub const RECLASSIFIED: DeviceStatus = DeviceStatus(2);

    pub fn is_active(&self) -> bool {
        self.0 >= 1
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An access point or subscriber module record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: i64,
    pub network_id: i64,
    #[serde(default)]
    pub mac_address: String,
    #[serde(rename = "ipv4_address")]
    pub address: HostAddress,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl Device {
    /// Minimal record written when the subnet sweep classifies a host.
    pub fn reclassified(network_id: i64, address: HostAddress) -> Self {
        Self {
            id: 0,
            network_id,
            mac_address: PLACEHOLDER_MAC.to_string(),
            address,
            status: DeviceStatus::RECLASSIFIED,
        }
    }
}

/// A host synthesized from a subnet sweep, not yet part of the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub network_id: i64,
    pub subnet_id: i64,
    pub address: HostAddress,
    pub status: DeviceStatus,
}

// ── Subnets ───────────────────────────────────────────────────────

/// A CIDR block registered for scanning. Status `0` disables the block.
///
/// The network address and prefix length are always read off `cidr`, so the
/// string and integer forms cannot drift apart. A malformed `cidr` is kept
/// as-is; the sweep reports it when the block is expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(default)]
    pub id: i64,
    pub network_id: i64,
    pub cidr: String,
    #[serde(default = "default_subnet_status")]
    pub status: i64,
}

fn default_subnet_status() -> i64 {
    1
}

impl Subnet {
    /// Build a subnet from a CIDR string in canonical (host bits masked) form.
    pub fn from_cidr(id: i64, network_id: i64, cidr: &str, status: i64) -> Result<Self> {
        let block = parse_cidr(cidr)?;
        Ok(Self {
            id,
            network_id,
            cidr: block.to_string(),
            status,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.status >= 1
    }

    /// Parse the stored CIDR string. Host bits are masked off.
    pub fn block(&self) -> Result<Ipv4Net> {
        parse_cidr(&self.cidr)
    }

    pub fn network_address(&self) -> Result<HostAddress> {
        self.block().map(|block| HostAddress::new(block.network()))
    }

    pub fn prefix_len(&self) -> Result<u8> {
        self.block().map(|block| block.prefix_len())
    }
}

fn parse_cidr(cidr: &str) -> Result<Ipv4Net> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|e| CoreError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: e.to_string(),
        })
}

// ── SNMP OID maps ─────────────────────────────────────────────────

/// Declares one SNMP object to fetch for a device role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidMap {
    #[serde(default)]
    pub id: i64,
    pub role: DeviceRole,
    pub key_name: String,
    pub oid: String,
    #[serde(default)]
    pub order: i64,
}

/// The ordered set of OIDs polled for one device role.
///
/// Entries are sorted by `order` (then key name), which is also the export
/// column order. OIDs are stored without a leading `.`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OidSet {
    entries: Vec<(String, String)>,
    by_oid: HashMap<String, usize>,
}

impl OidSet {
    pub fn from_maps(mut maps: Vec<OidMap>) -> Self {
        maps.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key_name.cmp(&b.key_name)));

        let mut set = Self::default();
        for map in maps {
            set.insert(&map.key_name, &map.oid);
        }
        set
    }

    fn insert(&mut self, key: &str, oid: &str) {
        let oid = normalize_oid(oid).to_string();
        if self.entries.iter().any(|(k, _)| k == key) {
            tracing::warn!(key = %key, oid = %oid, "Duplicate OID map key, ignoring");
            return;
        }
        if self.by_oid.contains_key(&oid) {
            tracing::warn!(key = %key, oid = %oid, "OID already mapped to another key, ignoring");
            return;
        }
        self.by_oid.insert(oid.clone(), self.entries.len());
        self.entries.push((key.to_string(), oid));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key names in column order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// OIDs in column order.
    pub fn oids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, o)| o.as_str())
    }

    /// Look up the key requested for an OID. A leading `.` is ignored.
    pub fn key_for(&self, oid: &str) -> Option<&str> {
        self.by_oid
            .get(normalize_oid(oid))
            .map(|&idx| self.entries[idx].0.as_str())
    }
}

impl FromIterator<(String, String)> for OidSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = Self::default();
        for (key, oid) in iter {
            set.insert(&key, &oid);
        }
        set
    }
}

/// Strip the protocol's leading separator from a dotted OID.
pub fn normalize_oid(oid: &str) -> &str {
    let oid = oid.trim();
    oid.strip_prefix('.').unwrap_or(oid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_address_forms_stay_consistent() {
        let addr: HostAddress = "10.1.2.3".parse().unwrap();
        assert_eq!(addr.as_u32(), 0x0A01_0203);
        assert_eq!(HostAddress::from_u32(0x0A01_0203), addr);
        assert_eq!(addr.to_string(), "10.1.2.3");
    }

    #[test]
    fn host_address_rejects_garbage() {
        assert!("10.1.2".parse::<HostAddress>().is_err());
        assert!("not-an-ip".parse::<HostAddress>().is_err());
    }

    #[test]
    fn host_address_serializes_as_string() {
        let addr = HostAddress::from_u32(0xC0A8_0001);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"192.168.0.1\"");
        let back: HostAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn device_status_activity() {
        assert!(!DeviceStatus::UNKNOWN.is_active());
        assert!(DeviceStatus::ACTIVE.is_active());
        assert!(DeviceStatus::RECLASSIFIED.is_active());
    }

    #[test]
    fn reclassified_device_uses_placeholder_mac() {
        let device = Device::reclassified(7, "10.0.0.9".parse().unwrap());
        assert_eq!(device.mac_address, PLACEHOLDER_MAC);
        assert_eq!(device.status, DeviceStatus::RECLASSIFIED);
        assert_eq!(device.network_id, 7);
    }

    #[test]
    fn subnet_from_json_derives_address_from_cidr() {
        let subnet: Subnet =
            serde_json::from_str(r#"{"network_id": 3, "cidr": "10.0.0.0/30"}"#).unwrap();
        assert_eq!(subnet.network_address().unwrap().to_string(), "10.0.0.0");
        assert_eq!(subnet.network_address().unwrap().as_u32(), 0x0A00_0000);
        assert_eq!(subnet.prefix_len().unwrap(), 30);
        assert!(subnet.is_enabled());

        let bad: Subnet =
            serde_json::from_str(r#"{"network_id": 3, "cidr": "not-a-block"}"#).unwrap();
        assert!(bad.block().is_err());
    }

    #[test]
    fn role_type_codes() {
        for role in DeviceRole::ALL {
            assert_eq!(DeviceRole::from_type_code(role.type_code()).unwrap(), role);
        }
        assert!(DeviceRole::from_type_code(9).is_err());
    }

    #[test]
    fn subnet_from_cidr_masks_host_bits() {
        let subnet = Subnet::from_cidr(1, 2, "10.0.0.77/24", 1).unwrap();
        assert_eq!(subnet.cidr, "10.0.0.0/24");
        assert_eq!(subnet.network_address().unwrap().to_string(), "10.0.0.0");
        assert_eq!(subnet.prefix_len().unwrap(), 24);
        assert!(subnet.is_enabled());
    }

    #[test]
    fn subnet_with_bad_cidr_fails_to_parse() {
        let subnet = Subnet {
            id: 1,
            network_id: 1,
            cidr: "10.0.0.0/33".to_string(),
            status: 1,
        };
        assert!(matches!(subnet.block(), Err(CoreError::InvalidCidr { .. })));
        assert!(subnet.network_address().is_err());
        assert!(subnet.prefix_len().is_err());
    }

    #[test]
    fn oid_set_orders_by_declared_order() {
        let maps = vec![
            OidMap {
                id: 1,
                role: DeviceRole::AccessPoint,
                key_name: "uptime".to_string(),
                oid: "1.3.6.1.2.1.1.3.0".to_string(),
                order: 2,
            },
            OidMap {
                id: 2,
                role: DeviceRole::AccessPoint,
                key_name: "descr".to_string(),
                oid: ".1.3.6.1.2.1.1.1.0".to_string(),
                order: 1,
            },
        ];

        let set = OidSet::from_maps(maps);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["descr", "uptime"]);
        assert_eq!(
            set.oids().collect::<Vec<_>>(),
            vec!["1.3.6.1.2.1.1.1.0", "1.3.6.1.2.1.1.3.0"]
        );
        assert_eq!(set.key_for(".1.3.6.1.2.1.1.1.0"), Some("descr"));
        assert_eq!(set.key_for("1.3.6.1.2.1.1.3.0"), Some("uptime"));
        assert_eq!(set.key_for("1.3.6.1.2.1.1.5.0"), None);
    }

    #[test]
    fn oid_set_ignores_duplicate_keys() {
        let set: OidSet = vec![
            ("descr".to_string(), "1.3.6.1.2.1.1.1.0".to_string()),
            ("descr".to_string(), "1.3.6.1.2.1.1.5.0".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 1);
    }
}
