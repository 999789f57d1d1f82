//! Host-side multipath storage agent library
//!
//! This library manages the lifecycle of multipath devices on a node that
//! consumes iSCSI-backed volumes.
//!
//! The library is split into several modules:
//! - `iscsi`: resolution of block devices to iSCSI targets and portals
//! - `mpathconf`: multipath.conf recommendations and reconciliation
//! - `teardown`: unmount, flush and removal of multipath devices
//! - `exec`: external command invocation
//! - `metrics`: Prometheus metrics collection

pub mod config;
pub mod exec;
pub mod iscsi;
pub mod metrics;
pub mod mpathconf;
pub mod teardown;

/// Storage vendors whose multipath maps the agent manages.
pub const SUPPORTED_VENDORS: &[&str] = &["Nimble", "3PARdata"];

pub use config::AgentConfig;
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use iscsi::{DeviceEnumerator, IscsiError, TargetResolver, TargetScopeCache};
pub use mpathconf::{ConfigError, MultipathConfigurator};
pub use teardown::{DeviceTeardown, TeardownError, TeardownLocks};
