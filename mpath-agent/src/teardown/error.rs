use thiserror::Error;

use super::machine::TeardownState;

#[derive(Error, Debug)]
pub enum TeardownError {
    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("failed to parse {0}")]
    ParseError(String),

    #[error("failed to read mount points of multipath device {alias}: {reason}")]
    MountDiscovery { alias: String, reason: String },

    #[error("unable to kill processes using {mount_point} of multipath device {alias}: {reason}")]
    KillHolders {
        alias: String,
        mount_point: String,
        reason: String,
    },

    #[error(
        "failed to unmount {mount_point} of multipath device {alias} even though holders were killed: {reason}"
    )]
    Unmount {
        alias: String,
        mount_point: String,
        reason: String,
    },

    #[error(
        "unable to remove multipath device {alias} by force as well: flush failed: {flush}; forced removal failed: {force}"
    )]
    ForceRemove {
        alias: String,
        flush: String,
        force: String,
    },

    #[error("failed to remove block device {device} of multipath device {alias}: {reason}")]
    BlockDeviceRemoval {
        alias: String,
        device: String,
        reason: String,
    },

    #[error("invalid block device name '{0}'")]
    InvalidDevice(String),

    #[error("invalid teardown transition {from:?} -> {to:?} for {alias}")]
    InvalidTransition {
        alias: String,
        from: TeardownState,
        to: TeardownState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TeardownError>;
