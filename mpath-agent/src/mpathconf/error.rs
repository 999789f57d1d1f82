use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse multipath configuration: {0}")]
    ParseError(String),

    #[error("invalid recommendation template: {0}")]
    Template(String),

    #[error("host query failed: {0}")]
    Host(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
