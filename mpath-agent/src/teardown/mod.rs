//! Multipath device teardown
//!
//! Unmount, kill blockers, retry once, flush, force-remove. See
//! [`locks`] for the lock hierarchy shared by every teardown in the process.

pub mod error;
pub mod locks;
pub mod machine;
pub mod mounts;
pub mod multipathd;
pub mod ops;
pub mod processes;

pub use error::{Result, TeardownError};
pub use locks::TeardownLocks;
pub use machine::{DeviceTeardown, TeardownReport, TeardownState};
pub use mounts::{find_mount_points, parse_mount_points};
pub use multipathd::{
    MultipathDevice, MultipathPath, PathGroup, multipath_devices, parse_multipath_status,
};
pub use ops::{DeviceOps, LinuxDeviceOps};
pub use processes::{kill_holders, parse_holder_pids};
