use tracing::{debug, trace};

use super::error::{Result, TeardownError};
use super::locks::TeardownLocks;
use super::ops::DeviceOps;

/// Mount points whose source device contains `alias`.
///
/// Lines need at least four fields (`<dev> on <dir> type ...`); the mount
/// point is the third.
pub fn parse_mount_points(mount_table: &str, alias: &str) -> Vec<String> {
    mount_table
        .lines()
        .filter_map(|line| {
            let entry: Vec<&str> = line.split_whitespace().collect();
            (entry.len() > 3 && entry[0].contains(alias)).then(|| entry[2].to_string())
        })
        .collect()
}

/// Query the live mount table for `alias` under the mount-discovery lock.
pub fn find_mount_points(
    ops: &dyn DeviceOps,
    locks: &TeardownLocks,
    alias: &str,
) -> Result<Vec<String>> {
    let _guard = locks.mount_discovery();
    let table = ops
        .mount_table()
        .map_err(|e| TeardownError::MountDiscovery {
            alias: alias.to_string(),
            reason: e.to_string(),
        })?;
    trace!(lines = table.lines().count(), "Read mount table");
    let mount_points = parse_mount_points(&table, alias);
    debug!(alias = %alias, mount_points = ?mount_points, "Found mount points");
    Ok(mount_points)
}
