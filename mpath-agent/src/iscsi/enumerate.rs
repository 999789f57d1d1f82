//! Device enumeration built on the platform disk source.

use std::collections::HashMap;

use tracing::{error, info, instrument, warn};

use super::cache::{PortalCache, ScopeStore, TargetScopeCache};
use super::error::{IscsiError, Result};
use super::resolver::{IscsiInitiator, TargetResolver};
use super::types::{
    BusType, DeviceRecord, DevicePartition, DiskInfo, SessionMapping, TargetRecord,
};

/// Platform disk and partition enumeration.
pub trait DiskSource: Send + Sync {
    /// Supported-vendor disks, optionally narrowed to one serial number.
    fn disks(&self, serial_number: Option<&str>) -> Result<Vec<DiskInfo>>;

    fn partitions(&self, disk: &DiskInfo) -> Result<Vec<DevicePartition>>;
}

/// Builds [`DeviceRecord`]s, resolving iSCSI targets where applicable.
pub struct DeviceEnumerator<'a, S: ScopeStore = HashMap<String, String>> {
    disks: &'a dyn DiskSource,
    initiator: Option<&'a dyn IscsiInitiator>,
    scopes: &'a TargetScopeCache<S>,
}

impl<'a, S: ScopeStore> DeviceEnumerator<'a, S> {
    pub fn new(
        disks: &'a dyn DiskSource,
        initiator: Option<&'a dyn IscsiInitiator>,
        scopes: &'a TargetScopeCache<S>,
    ) -> Self {
        Self {
            disks,
            initiator,
            scopes,
        }
    }

    /// Devices with only the serial number populated.
    #[instrument(skip(self))]
    pub fn devices(&self, serial_number: Option<&str>) -> Result<Vec<DeviceRecord>> {
        let disks = self.disks.disks(serial_number)?;
        Ok(disks
            .into_iter()
            .map(|disk| {
                info!(
                    serial = %disk.serial_number,
                    number = disk.number,
                    offline = disk.is_offline,
                    read_only = disk.is_read_only,
                    "Found device"
                );
                DeviceRecord {
                    serial_number: disk.serial_number,
                    ..Default::default()
                }
            })
            .collect())
    }

    /// Fully populated devices.
    ///
    /// Session mappings are fetched once, and only when an iSCSI disk is
    /// present. One portal cache is shared by every disk of the pass.
    #[instrument(skip(self))]
    pub fn device_details(&self, serial_number: Option<&str>) -> Result<Vec<DeviceRecord>> {
        let disks = self.disks.disks(serial_number)?;

        let mappings = match self.initiator {
            Some(initiator) if disks.iter().any(|d| d.bus_type == BusType::Iscsi) => {
                initiator.session_mappings().unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to enumerate iSCSI session mappings");
                    Vec::new()
                })
            }
            _ => Vec::new(),
        };
        let mut portal_cache = PortalCache::new();

        let mut devices = Vec::with_capacity(disks.len());
        for (index, disk) in disks.into_iter().enumerate() {
            let mut device = DeviceRecord {
                serial_number: disk.serial_number.clone(),
                pathname: disk.name.clone(),
                alt_full_pathname: disk.path.clone(),
                size: disk.size,
                bus_type: disk.bus_type,
                target: None,
            };

            if disk.bus_type == BusType::Iscsi {
                let Some(initiator) = self.initiator else {
                    error!(
                        number = disk.number,
                        path = %disk.path,
                        "No iSCSI initiator available, skipping iSCSI device"
                    );
                    continue;
                };
                device.target =
                    self.resolve(initiator, &disk.path, &mappings, &mut portal_cache);
            }

            info!(
                index,
                serial = %device.serial_number,
                pathname = %device.pathname,
                bus_type = %device.bus_type,
                size = device.size,
                offline = disk.is_offline,
                read_only = disk.is_read_only,
                "Device details"
            );
            if let Some(target) = &device.target {
                info!(
                    iqn = %target.name,
                    scope = %target.scope,
                    portals = ?target.portals.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "iSCSI target"
                );
            }
            devices.push(device);
        }

        Ok(devices)
    }

    fn resolve(
        &self,
        initiator: &dyn IscsiInitiator,
        path: &str,
        mappings: &[SessionMapping],
        portal_cache: &mut PortalCache,
    ) -> Option<TargetRecord> {
        TargetResolver::new(initiator, self.scopes)
            .resolve_target(path, mappings, portal_cache)
            .inspect_err(|e| warn!(path = %path, error = %e, "Target resolution failed"))
            .ok()
    }

    /// Partitions of the single device carrying `serial_number`.
    #[instrument(skip(self))]
    pub fn partitions(&self, serial_number: &str) -> Result<Vec<DevicePartition>> {
        let mut disks = self.disks.disks(Some(serial_number))?;
        if disks.len() != 1 {
            return Err(IscsiError::VolumeNotFound(serial_number.to_string()));
        }
        let disk = disks.remove(0);
        let partitions = self.disks.partitions(&disk)?;
        for partition in &partitions {
            info!(
                name = %partition.name,
                partition_type = %partition.partition_type,
                size = partition.size,
                "Partition"
            );
        }
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::super::resolver::testing::*;
    use super::*;

    struct FakeDisks(Vec<DiskInfo>);

    impl DiskSource for FakeDisks {
        fn disks(&self, serial_number: Option<&str>) -> Result<Vec<DiskInfo>> {
            Ok(self
                .0
                .iter()
                .filter(|d| serial_number.is_none_or(|s| s == d.serial_number))
                .cloned()
                .collect())
        }

        fn partitions(&self, disk: &DiskInfo) -> Result<Vec<DevicePartition>> {
            Ok(vec![DevicePartition {
                name: format!("{}1", disk.name),
                partition_type: "Linux filesystem".into(),
                size: disk.size,
            }])
        }
    }

    fn disk(serial: &str, name: &str, bus_type: BusType) -> DiskInfo {
        DiskInfo {
            serial_number: serial.into(),
            name: name.into(),
            path: format!("/dev/{name}"),
            size: 1 << 30,
            bus_type,
            ..Default::default()
        }
    }

    fn fixture() -> (FakeDisks, FakeInitiator) {
        let disks = FakeDisks(vec![
            disk("SN1", "sdb", BusType::Iscsi),
            disk("SN2", "sdc", BusType::Iscsi),
            disk("SN3", "sdd", BusType::FibreChannel),
        ]);
        let mut initiator = FakeInitiator::default();
        initiator.addresses.insert("/dev/sdb".into(), address(0, 1));
        initiator.addresses.insert("/dev/sdc".into(), address(0, 1));
        initiator.mappings = vec![mapping("iqn.group", 0, 1)];
        initiator.scopes.insert("iqn.group".into(), "group".into());
        initiator
            .portals
            .insert("iqn.group".into(), vec![raw("10.1.1.1"), raw("10.1.1.2")]);
        (disks, initiator)
    }

    #[test]
    fn test_devices_only_serials() {
        let (disks, _) = fixture();
        let cache = TargetScopeCache::new();
        let enumerator = DeviceEnumerator::new(&disks, None, &cache);

        let devices = enumerator.devices(None).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial_number, "SN1");
        assert!(devices[0].pathname.is_empty());
    }

    #[test]
    fn test_device_details_shares_portal_cache() {
        let (disks, initiator) = fixture();
        let cache = TargetScopeCache::new();
        let enumerator = DeviceEnumerator::new(&disks, Some(&initiator), &cache);

        let devices = enumerator.device_details(None).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].target.as_ref().unwrap().name, "iqn.group");
        assert_eq!(devices[1].target.as_ref().unwrap().portals.len(), 2);
        assert!(devices[2].target.is_none());
        assert_eq!(*initiator.portal_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_device_details_skips_iscsi_without_initiator() {
        let (disks, _) = fixture();
        let cache = TargetScopeCache::new();
        let enumerator = DeviceEnumerator::new(&disks, None, &cache);

        let devices = enumerator.device_details(None).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number, "SN3");
    }

    #[test]
    fn test_partitions_requires_single_match() {
        let (disks, _) = fixture();
        let cache = TargetScopeCache::new();
        let enumerator = DeviceEnumerator::new(&disks, None, &cache);

        assert_eq!(enumerator.partitions("SN2").unwrap()[0].name, "sdc1");
        assert!(matches!(
            enumerator.partitions("missing"),
            Err(IscsiError::VolumeNotFound(_))
        ));
    }
}
