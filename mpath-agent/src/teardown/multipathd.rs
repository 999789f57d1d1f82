//! Live multipath inventory from `multipathd show multipaths json`.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, trace};

use super::error::{Result, TeardownError};
use super::ops::DeviceOps;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipathPath {
    pub dev: String,
    #[serde(default)]
    pub dm_st: String,
    #[serde(default)]
    pub chk_st: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathGroup {
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub pri: i32,
    #[serde(default)]
    pub dm_st: String,
    #[serde(default)]
    pub paths: Vec<MultipathPath>,
}

/// One multipath map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipathDevice {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub sysfs: String,
    #[serde(default)]
    pub vend: String,
    #[serde(default)]
    pub prod: String,
    #[serde(default)]
    pub size: String,
    /// Active path count
    #[serde(default)]
    pub paths: i32,
    #[serde(default)]
    pub path_faults: i32,
    #[serde(default)]
    pub path_groups: Vec<PathGroup>,
    /// No active paths left after path faults
    #[serde(skip_deserializing, default)]
    pub unhealthy: bool,
}

impl MultipathDevice {
    /// Backing block devices in path-group order.
    pub fn block_devices(&self) -> Vec<&str> {
        self.path_groups
            .iter()
            .flat_map(|group| group.paths.iter())
            .map(|path| path.dev.as_str())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct MultipathInfo {
    #[serde(default)]
    maps: Vec<MultipathDevice>,
}

/// Parse status output, keeping only maps from `vendors`.
pub fn parse_multipath_status(json: &str, vendors: &[&str]) -> Result<Vec<MultipathDevice>> {
    if json.trim().is_empty() {
        return Err(TeardownError::ParseError(
            "multipathd status: empty output".to_string(),
        ));
    }
    let info: MultipathInfo = serde_json::from_str(json)
        .map_err(|e| TeardownError::ParseError(format!("multipathd status: {e}")))?;

    Ok(info
        .maps
        .into_iter()
        .filter(|map| !map.vend.is_empty() && vendors.contains(&map.vend.trim()))
        .map(|mut map| {
            map.unhealthy = map.paths < 1 && map.path_faults > 0;
            trace!(name = %map.name, unhealthy = map.unhealthy, "Multipath device");
            map
        })
        .collect())
}

/// Multipath maps of supported vendors currently known to the daemon.
#[instrument(skip(ops))]
pub fn multipath_devices(ops: &dyn DeviceOps, vendors: &[&str]) -> Result<Vec<MultipathDevice>> {
    let devices = parse_multipath_status(&ops.multipath_status()?, vendors)?;
    info!(count = devices.len(), "Found multipath devices");
    Ok(devices)
}
