use thiserror::Error;

#[derive(Error, Debug)]
pub enum IscsiError {
    #[error("unable to locate iSCSI target for device '{0}'")]
    TargetNotFound(String),

    #[error("volume '{0}' not found")]
    VolumeNotFound(String),

    #[error("iSCSI command failed: {0}")]
    CommandFailed(String),

    #[error("failed to parse iSCSI data: {0}")]
    ParseError(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IscsiError>;
