//! Device, target and portal records produced by enumeration.

use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// BusType
// ============================================================================

/// Transport a disk is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    Iscsi,
    FibreChannel,
    Sas,
    #[default]
    Other,
}

impl Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusType::Iscsi => write!(f, "iscsi"),
            BusType::FibreChannel => write!(f, "fc"),
            BusType::Sas => write!(f, "sas"),
            BusType::Other => write!(f, "other"),
        }
    }
}

impl FromStr for BusType {
    type Err = std::convert::Infallible;

    /// Unknown transports map to [`BusType::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "iscsi" => BusType::Iscsi,
            "fc" | "fibrechannel" => BusType::FibreChannel,
            "sas" => BusType::Sas,
            _ => BusType::Other,
        })
    }
}

// ============================================================================
// Raw collaborator records
// ============================================================================

/// A disk as reported by the platform's disk enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskInfo {
    pub serial_number: String,
    pub number: u32,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub bus_type: BusType,
    pub is_offline: bool,
    pub is_read_only: bool,
}

/// SCSI address of a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScsiAddress {
    /// Host adapter (port) number
    pub port_number: u32,
    /// Bus (path/channel) number
    pub path_id: u32,
    pub target_id: u32,
    pub lun: u32,
}

/// An active iSCSI session mapping as reported by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionMapping {
    pub target_name: String,
    pub initiator_name: String,
    /// Host adapter the session is bound to, when the initiator reports one
    pub os_port_number: Option<u32>,
    pub os_bus_number: u32,
    pub os_target_number: u32,
}

impl SessionMapping {
    /// Whether this mapping serves the given SCSI address.
    pub fn matches(&self, address: &ScsiAddress) -> bool {
        self.os_target_number == address.target_id
            && self.os_bus_number == address.path_id
            && self
                .os_port_number
                .is_none_or(|port| port == address.port_number)
    }
}

/// A portal exactly as the initiator reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPortal {
    pub address: String,
    pub port: u16,
}

// ============================================================================
// Resolved records
// ============================================================================

/// An IPv4 target portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Portal {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Portal {
    /// Convert a raw portal, dropping anything that is not an IPv4 literal.
    ///
    /// IPv4-mapped IPv6 literals (`::ffff:a.b.c.d`) are accepted and normalized.
    pub fn from_raw(raw: &RawPortal) -> Option<Self> {
        let address = match raw.address.trim().parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => v6.to_ipv4_mapped()?,
        };
        Some(Self {
            address,
            port: raw.port,
        })
    }
}

impl Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A fully described iSCSI target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Target IQN
    pub name: String,
    /// Scope classification ("volume", "group"); empty when unresolved
    pub scope: String,
    pub portals: Vec<Portal>,
}

impl TargetRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True when both scope and portal enrichment succeeded.
    pub fn is_complete(&self) -> bool {
        !self.scope.is_empty() && !self.portals.is_empty()
    }
}

/// A multipath-managed block device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial_number: String,
    pub pathname: String,
    pub alt_full_pathname: String,
    pub size: u64,
    pub bus_type: BusType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRecord>,
}

/// A partition on a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DevicePartition {
    pub name: String,
    pub partition_type: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(address: &str) -> RawPortal {
        RawPortal {
            address: address.to_string(),
            port: 3260,
        }
    }

    #[test]
    fn test_portal_from_raw_ipv4() {
        let portal = Portal::from_raw(&raw("10.0.0.1")).unwrap();
        assert_eq!(portal.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(portal.to_string(), "10.0.0.1:3260");
    }

    #[test]
    fn test_portal_from_raw_rejects_non_ipv4() {
        assert!(Portal::from_raw(&raw("fe80::1")).is_none());
        assert!(Portal::from_raw(&raw("array.example.com")).is_none());
        assert!(Portal::from_raw(&raw("")).is_none());
    }

    #[test]
    fn test_portal_from_raw_ipv4_mapped() {
        let portal = Portal::from_raw(&raw("::ffff:192.168.1.5")).unwrap();
        assert_eq!(portal.address, Ipv4Addr::new(192, 168, 1, 5));
    }

    #[test]
    fn test_bus_type_from_str() {
        assert_eq!("iscsi".parse::<BusType>().unwrap(), BusType::Iscsi);
        assert_eq!("FC".parse::<BusType>().unwrap(), BusType::FibreChannel);
        assert_eq!("usb".parse::<BusType>().unwrap(), BusType::Other);
    }

    #[test]
    fn test_session_mapping_matches_address() {
        let address = ScsiAddress {
            port_number: 3,
            path_id: 0,
            target_id: 2,
            lun: 1,
        };
        let mut mapping = SessionMapping {
            os_bus_number: 0,
            os_target_number: 2,
            ..Default::default()
        };
        assert!(mapping.matches(&address));

        mapping.os_port_number = Some(4);
        assert!(!mapping.matches(&address));

        mapping.os_port_number = Some(3);
        mapping.os_target_number = 1;
        assert!(!mapping.matches(&address));
    }

    #[test]
    fn test_target_record_completeness() {
        let mut target = TargetRecord::new("iqn.2007-11.com.nimblestorage:vol1");
        assert!(!target.is_complete());
        target.scope = "volume".to_string();
        assert!(!target.is_complete());
        target.portals.push(Portal {
            address: Ipv4Addr::new(10, 0, 0, 1),
            port: 3260,
        });
        assert!(target.is_complete());
    }
}
