use thiserror::Error;

/// Errors raised while building core domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid MAC address: {0:?}")]
    InvalidMac(String),
}
