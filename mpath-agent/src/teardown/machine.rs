//! Escalating teardown of a multipath device.
//!
//! ```text
//! Active -> Unmounting -> (MountBusy -> Unmounting) -> Unmounted
//!        -> Flushing -> (FlushFailed -> ForceRemoved) -> Gone
//! ```
//!
//! A mount point that refuses to unmount gets its holders killed and exactly
//! one retry. A map that refuses to flush is removed by force. Every visited
//! state is recorded in the returned [`TeardownReport`].

use std::fmt::{self, Display};

use tracing::{debug, error, info, instrument, warn};

use super::error::{Result, TeardownError};
use super::locks::TeardownLocks;
use super::mounts::find_mount_points;
use super::multipathd::{MultipathDevice, multipath_devices};
use super::ops::DeviceOps;
use super::processes::kill_holders;
use crate::metrics::OperationTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownState {
    Active,
    Unmounting,
    MountBusy,
    Unmounted,
    Flushing,
    FlushFailed,
    ForceRemoved,
    Gone,
}

impl TeardownState {
    /// Transition guard.
    pub fn can_transition_to(self, next: TeardownState) -> bool {
        use TeardownState::*;
        matches!(
            (self, next),
            (Active, Unmounting)
                | (Active, Unmounted)
                | (Active, Flushing)
                | (Unmounting, MountBusy)
                | (Unmounting, Unmounted)
                | (MountBusy, Unmounting)
                | (Unmounted, Flushing)
                | (Flushing, Gone)
                | (Flushing, FlushFailed)
                | (FlushFailed, ForceRemoved)
                | (ForceRemoved, Gone)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == TeardownState::Gone
    }
}

impl Display for TeardownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownState::Active => "active",
            TeardownState::Unmounting => "unmounting",
            TeardownState::MountBusy => "mount-busy",
            TeardownState::Unmounted => "unmounted",
            TeardownState::Flushing => "flushing",
            TeardownState::FlushFailed => "flush-failed",
            TeardownState::ForceRemoved => "force-removed",
            TeardownState::Gone => "gone",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful teardown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub alias: String,
    /// Visited states, starting with `Active`
    pub history: Vec<TeardownState>,
    pub mount_points: Vec<String>,
    pub processes_killed: usize,
}

impl TeardownReport {
    fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            history: vec![TeardownState::Active],
            mount_points: Vec::new(),
            processes_killed: 0,
        }
    }

    pub fn state(&self) -> TeardownState {
        self.history
            .last()
            .copied()
            .unwrap_or(TeardownState::Active)
    }

    pub fn visited(&self, state: TeardownState) -> bool {
        self.history.contains(&state)
    }

    fn advance(&mut self, next: TeardownState) -> Result<()> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(TeardownError::InvalidTransition {
                alias: self.alias.clone(),
                from,
                to: next,
            });
        }
        debug!(alias = %self.alias, from = %from, to = %next, "Teardown transition");
        self.history.push(next);
        Ok(())
    }
}

/// Tears multipath devices down through a [`DeviceOps`] implementation.
pub struct DeviceTeardown<'a> {
    ops: &'a dyn DeviceOps,
    locks: &'a TeardownLocks,
}

impl<'a> DeviceTeardown<'a> {
    pub fn new(ops: &'a dyn DeviceOps, locks: &'a TeardownLocks) -> Self {
        Self { ops, locks }
    }

    /// Mount points currently backed by `alias`.
    pub fn find_mount_points(&self, alias: &str) -> Result<Vec<String>> {
        find_mount_points(self.ops, self.locks, alias)
    }

    /// Multipath devices of `vendors` known to the daemon.
    pub fn multipath_devices(&self, vendors: &[&str]) -> Result<Vec<MultipathDevice>> {
        multipath_devices(self.ops, vendors)
    }

    /// Unmount every mount point of `alias`.
    #[instrument(skip(self))]
    pub fn unmount_device(&self, alias: &str) -> Result<TeardownReport> {
        timed("unmount_device", || {
            let mut report = TeardownReport::new(alias);
            self.unmount(&mut report)?;
            Ok(report)
        })
    }

    /// Flush the map of `alias`, forcing removal if the flush fails.
    #[instrument(skip(self))]
    pub fn flush_device(&self, alias: &str) -> Result<TeardownReport> {
        timed("flush_device", || {
            let mut report = TeardownReport::new(alias);
            self.flush(&mut report)?;
            Ok(report)
        })
    }

    /// Unmount then flush `alias`.
    #[instrument(skip(self))]
    pub fn teardown(&self, alias: &str) -> Result<TeardownReport> {
        timed("teardown", || {
            let mut report = TeardownReport::new(alias);
            self.unmount(&mut report)?;
            self.flush(&mut report)?;
            info!(alias = %alias, history = ?report.history, "Multipath device torn down");
            Ok(report)
        })
    }

    /// Delete every backing block device of `device`, in path order.
    ///
    /// Stops at the first failure. Returns the number of devices removed.
    #[instrument(skip(self, device), fields(alias = %device.name))]
    pub fn remove_block_devices(&self, device: &MultipathDevice) -> Result<usize> {
        timed("remove_block_devices", || {
            let block_devices = device.block_devices();
            if block_devices.is_empty() {
                info!(alias = %device.name, "No block devices found for multipath device");
                return Ok(0);
            }
            info!(
                alias = %device.name,
                count = block_devices.len(),
                "Removing block devices of multipath device"
            );

            for block_device in &block_devices {
                debug!(device = %block_device, "Removing block device");
                self.ops.remove_block_device(block_device).map_err(|e| {
                    error!(device = %block_device, alias = %device.name, error = %e, "Block device removal failed");
                    TeardownError::BlockDeviceRemoval {
                        alias: device.name.clone(),
                        device: block_device.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            }
            Ok(block_devices.len())
        })
    }

    fn unmount(&self, report: &mut TeardownReport) -> Result<()> {
        let alias = report.alias.clone();
        let mount_points = self.find_mount_points(&alias)?;
        if mount_points.is_empty() {
            info!(alias = %alias, "No mount points found for multipath device");
            return report.advance(TeardownState::Unmounted);
        }

        let unmount_guard = self.locks.unmount_exec();
        report.advance(TeardownState::Unmounting)?;

        for mount_point in &mount_points {
            let Err(first) = self.ops.unmount(mount_point) else {
                continue;
            };
            warn!(alias = %alias, mount_point = %mount_point, error = %first, "Unmount failed, killing holders");
            report.advance(TeardownState::MountBusy)?;

            let killed = {
                let _stale = unmount_guard.stale_removal();
                kill_holders(self.ops, &alias, mount_point)?
            };
            report.processes_killed += killed;

            debug!(mount_point = %mount_point, "Retrying unmount after killing holders");
            self.ops.unmount(mount_point).map_err(|e| {
                error!(alias = %alias, mount_point = %mount_point, error = %e, "Unmount retry failed");
                TeardownError::Unmount {
                    alias: alias.clone(),
                    mount_point: mount_point.clone(),
                    reason: e.to_string(),
                }
            })?;
            report.advance(TeardownState::Unmounting)?;
        }

        report.mount_points = mount_points;
        report.advance(TeardownState::Unmounted)
    }

    fn flush(&self, report: &mut TeardownReport) -> Result<()> {
        let alias = report.alias.clone();
        let _stale = self.locks.stale_removal();
        report.advance(TeardownState::Flushing)?;

        let flush_err = match self.ops.flush_map(&alias) {
            Ok(()) => {
                debug!(alias = %alias, "Multipath device flushed");
                return report.advance(TeardownState::Gone);
            }
            Err(e) => e,
        };

        error!(alias = %alias, error = %flush_err, "Flush failed, removing by force");
        report.advance(TeardownState::FlushFailed)?;
        self.log_diagnostics(&alias);

        self.ops
            .force_remove_map(&alias)
            .map_err(|force_err| TeardownError::ForceRemove {
                alias: alias.clone(),
                flush: flush_err.to_string(),
                force: force_err.to_string(),
            })?;
        report.advance(TeardownState::ForceRemoved)?;
        report.advance(TeardownState::Gone)
    }

    /// Best-effort dump of the map and its holders before forced removal.
    fn log_diagnostics(&self, alias: &str) {
        match self.ops.device_info(alias) {
            Ok(info) => info!(alias = %alias, info = %info.trim(), "Device info before forced removal"),
            Err(e) => warn!(alias = %alias, error = %e, "Unable to display device info"),
        }
        let node = format!("/dev/mapper/{alias}");
        match self.ops.list_holders(&node) {
            Ok(listing) => info!(alias = %alias, holders = %listing.trim(), "Processes using the multipath device"),
            Err(e) => warn!(alias = %alias, error = %e, "Unable to list processes using the device"),
        }
    }
}

fn timed<T>(operation: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let timer = OperationTimer::new(operation);
    let result = f();
    match &result {
        Ok(_) => timer.success(),
        Err(_) => timer.failure("error"),
    }
    result
}
