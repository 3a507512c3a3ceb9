//! Error types for the macsentry-watch crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Nmap not found at path: {path}")]
    NmapNotFound { path: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Nmap requires raw-socket privileges: {0}")]
    InsufficientPrivilege(String),

    #[error("Scan of {target} timed out after {secs}s")]
    ScanTimeout { target: String, secs: u64 },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Whitelist file {path} is malformed: {source}")]
    WhitelistFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
