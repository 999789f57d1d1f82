//! Linux initiator and disk collaborators.
//!
//! Uses:
//! - /sys/block/<dev>/device for SCSI addresses
//! - /sys/class/iscsi_session for session mappings (open-iscsi)
//! - iscsiadm for node portals
//! - lsblk for disk and partition enumeration

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::enumerate::DiskSource;
use super::error::{IscsiError, Result};
use super::resolver::IscsiInitiator;
use super::types::{BusType, DevicePartition, DiskInfo, RawPortal, ScsiAddress, SessionMapping};
use crate::exec::CommandRunner;

/// Parse an `H:C:T:L` SCSI address.
pub fn parse_hctl(hctl: &str) -> Option<ScsiAddress> {
    let mut parts = hctl.split(':').map(|p| p.parse::<u32>());
    let address = ScsiAddress {
        port_number: parts.next()?.ok()?,
        path_id: parts.next()?.ok()?,
        target_id: parts.next()?.ok()?,
        lun: parts.next()?.ok()?,
    };
    parts.next().is_none().then_some(address)
}

/// Parse the `target<H>:<C>:<T>` directory name under a session device.
fn parse_session_target(name: &str) -> Option<(u32, u32, u32)> {
    let rest = name.strip_prefix("target")?;
    let mut parts = rest.split(':').map(|p| p.parse::<u32>());
    let host = parts.next()?.ok()?;
    let channel = parts.next()?.ok()?;
    let target = parts.next()?.ok()?;
    parts.next().is_none().then_some((host, channel, target))
}

/// Parse `iscsiadm -m node` output lines (`<addr>:<port>,<tpgt> <iqn>`) for one target.
pub fn parse_node_portals(output: &str, target_name: &str) -> Result<Vec<RawPortal>> {
    let mut portals = Vec::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(portal), Some(iqn)) = (fields.next(), fields.next()) else {
            continue;
        };
        if iqn != target_name {
            continue;
        }
        let portal = portal.split(',').next().unwrap_or(portal);
        let (address, port) = portal.rsplit_once(':').ok_or_else(|| {
            IscsiError::ParseError(format!("portal without port in line '{line}'"))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|e| IscsiError::ParseError(format!("invalid portal port '{port}': {e}")))?;
        portals.push(RawPortal {
            address: address.trim_matches(['[', ']']).to_string(),
            port,
        });
    }
    Ok(portals)
}

/// Read a sysfs attribute, trimming the trailing newline.
fn read_attr(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "(null)" && v != "<NULL>")
}

/// open-iscsi initiator backed by sysfs and iscsiadm.
pub struct SysfsInitiator<R: CommandRunner> {
    runner: R,
    sysfs_root: PathBuf,
}

impl<R: CommandRunner> SysfsInitiator<R> {
    pub fn new(runner: R) -> Self {
        Self::with_root(runner, "/sys")
    }

    /// Use an alternate sysfs mount point.
    pub fn with_root(runner: R, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            sysfs_root: sysfs_root.into(),
        }
    }
}

impl<R: CommandRunner> IscsiInitiator for SysfsInitiator<R> {
    fn scsi_address(&self, device_path_id: &str) -> Result<ScsiAddress> {
        let name = device_path_id.rsplit('/').next().unwrap_or(device_path_id);
        let link = fs::read_link(self.sysfs_root.join("block").join(name).join("device"))?;
        let hctl = link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        parse_hctl(&hctl).ok_or_else(|| {
            IscsiError::ParseError(format!("invalid SCSI address '{hctl}' for {name}"))
        })
    }

    fn session_mappings(&self) -> Result<Vec<SessionMapping>> {
        let sessions = self.sysfs_root.join("class/iscsi_session");
        if !sessions.exists() {
            debug!(path = %sessions.display(), "No iSCSI sessions present");
            return Ok(Vec::new());
        }

        let mut mappings = Vec::new();
        for entry in fs::read_dir(&sessions)?.flatten() {
            let session = entry.path();
            let Some(target_name) = read_attr(&session.join("targetname")) else {
                warn!(session = %session.display(), "Session without target name");
                continue;
            };
            let initiator_name = read_attr(&session.join("initiatorname")).unwrap_or_default();

            let Ok(children) = fs::read_dir(session.join("device")) else {
                continue;
            };
            for child in children.flatten() {
                let name = child.file_name();
                if let Some((host, channel, target)) =
                    parse_session_target(&name.to_string_lossy())
                {
                    mappings.push(SessionMapping {
                        target_name: target_name.clone(),
                        initiator_name: initiator_name.clone(),
                        os_port_number: Some(host),
                        os_bus_number: channel,
                        os_target_number: target,
                    });
                }
            }
        }
        Ok(mappings)
    }

    fn target_scope(&self, target_name: &str) -> Result<String> {
        Err(IscsiError::Unsupported(format!(
            "target scope query for {target_name}"
        )))
    }

    fn target_portals(&self, _initiator_name: &str, target_name: &str) -> Result<Vec<RawPortal>> {
        let output = self.runner.run("iscsiadm", &["-m", "node"])?;
        if !output.success {
            return Err(IscsiError::CommandFailed(
                output.failure_message("iscsiadm -m node"),
            ));
        }
        parse_node_portals(&output.stdout, target_name)
    }
}

// ============================================================================
// lsblk disk source
// ============================================================================

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    size: Option<serde_json::Value>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    ro: Option<serde_json::Value>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    parttypename: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// lsblk prints numbers and booleans as strings on older releases.
fn json_u64(value: &Option<serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn json_bool(value: &Option<serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.trim() == "1",
        Some(serde_json::Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Parse `lsblk -J` disk output into supported-vendor disks.
pub fn parse_lsblk_disks(
    json: &str,
    vendors: &[&str],
    serial_number: Option<&str>,
) -> Result<Vec<DiskInfo>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| IscsiError::ParseError(format!("invalid lsblk output: {e}")))?;

    let mut disks = Vec::new();
    for (number, device) in output.blockdevices.iter().enumerate() {
        let vendor = device.vendor.as_deref().unwrap_or_default().trim();
        if !vendors.contains(&vendor) {
            continue;
        }
        let serial = device.serial.as_deref().unwrap_or_default().trim();
        if serial_number.is_some_and(|s| s != serial) {
            continue;
        }
        disks.push(DiskInfo {
            serial_number: serial.to_string(),
            number: number as u32,
            name: device.name.clone(),
            path: device
                .path
                .clone()
                .unwrap_or_else(|| format!("/dev/{}", device.name)),
            size: json_u64(&device.size),
            bus_type: device
                .tran
                .as_deref()
                .unwrap_or_default()
                .parse()
                .unwrap_or_default(),
            is_offline: device.state.as_deref().is_some_and(|s| s != "running"),
            is_read_only: json_bool(&device.ro),
        });
    }
    Ok(disks)
}

/// Disk source backed by `lsblk`.
pub struct LsblkDiskSource<R: CommandRunner> {
    runner: R,
    vendors: Vec<String>,
}

impl<R: CommandRunner> LsblkDiskSource<R> {
    pub fn new(runner: R, vendors: &[&str]) -> Self {
        Self {
            runner,
            vendors: vendors.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn lsblk(&self, args: &[&str]) -> Result<String> {
        let output = self.runner.run("lsblk", args)?;
        if !output.success {
            return Err(IscsiError::CommandFailed(output.failure_message("lsblk")));
        }
        Ok(output.stdout)
    }
}

impl<R: CommandRunner> DiskSource for LsblkDiskSource<R> {
    fn disks(&self, serial_number: Option<&str>) -> Result<Vec<DiskInfo>> {
        let json = self.lsblk(&[
            "-J",
            "-b",
            "-d",
            "-o",
            "NAME,PATH,SERIAL,SIZE,TRAN,RO,STATE,VENDOR",
        ])?;
        let vendors: Vec<&str> = self.vendors.iter().map(String::as_str).collect();
        parse_lsblk_disks(&json, &vendors, serial_number)
    }

    fn partitions(&self, disk: &DiskInfo) -> Result<Vec<DevicePartition>> {
        let json = self.lsblk(&["-J", "-b", "-o", "NAME,SIZE,PARTTYPENAME", &disk.path])?;
        let output: LsblkOutput = serde_json::from_str(&json)
            .map_err(|e| IscsiError::ParseError(format!("invalid lsblk output: {e}")))?;
        Ok(output
            .blockdevices
            .iter()
            .flat_map(|d| d.children.iter())
            .map(|child| DevicePartition {
                name: child.name.clone(),
                partition_type: child.parttypename.clone().unwrap_or_default(),
                size: json_u64(&child.size),
            })
            .collect())
    }
}
