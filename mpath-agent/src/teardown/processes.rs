//! Holders of a mount point or device, as listed by `fuser -mv`.
//!
//! The listing starts with a header row. Data rows carry the PID in the
//! third column when the first column names the file (five or more fields)
//! and in the second column otherwise (exactly four fields).

use tracing::{debug, error, info, instrument, trace};

use super::error::{Result, TeardownError};
use super::ops::DeviceOps;
use crate::metrics;

/// PIDs holding `target`, parsed from a `fuser -mv` listing.
pub fn parse_holder_pids(output: &str, target: &str) -> Result<Vec<i32>> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    match lines.len() {
        0 => {
            return Err(TeardownError::ParseError(format!(
                "process listing for {target}: no header"
            )));
        }
        1 => {
            debug!(path = %target, "No process is using the mount point/device");
            return Ok(Vec::new());
        }
        _ => {}
    }

    let mut pids = Vec::new();
    for line in &lines[1..] {
        if line.contains("kernel") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= 1 {
            return Err(TeardownError::ParseError(format!(
                "process listing for {target}: unexpected row '{}'",
                line.trim()
            )));
        }
        let pid_field = match fields.len() {
            n if n > 4 => fields[2],
            4 => fields[1],
            _ => continue,
        };
        match pid_field.parse::<i32>() {
            Ok(pid) if pid > 0 => pids.push(pid),
            Ok(_) => {}
            Err(e) => error!(path = %target, field = %pid_field, error = %e, "Unparseable PID"),
        }
    }
    Ok(pids)
}

/// SIGKILL every process holding `mount_point` of `alias`. Returns the
/// number killed.
///
/// The caller must hold the stale-removal lock.
#[instrument(skip(ops))]
pub fn kill_holders(ops: &dyn DeviceOps, alias: &str, mount_point: &str) -> Result<usize> {
    let failed = |reason: String| TeardownError::KillHolders {
        alias: alias.to_string(),
        mount_point: mount_point.to_string(),
        reason,
    };
    let listing = ops
        .list_holders(mount_point)
        .map_err(|e| failed(e.to_string()))?;
    let pids = parse_holder_pids(&listing, mount_point).map_err(|e| failed(e.to_string()))?;

    for &pid in &pids {
        trace!(pid, mount_point = %mount_point, "Killing holder");
        ops.kill(pid).map_err(|e| failed(format!("pid {pid}: {e}")))?;
    }

    if !pids.is_empty() {
        info!(mount_point = %mount_point, pids = ?pids, "Killed processes holding mount point");
        metrics::record_processes_killed(pids.len());
    }
    Ok(pids.len())
}
