//! Network probers.
//!
//! A prober sweeps an address range and reports the hardware addresses it
//! saw. The engine only depends on the [`Prober`] trait; [`NmapProber`]
//! is the production implementation and runs `nmap -sn` as a child process.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use macsentry_core::MacAddress;

use crate::error::{Result, WatchError};
use crate::nmap_xml;

/// Devices observed in one sweep.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Unique ID for this sweep, carried into logs and alarm events.
    pub sweep_id: Uuid,
    /// The range that was swept.
    pub target: String,
    pub devices: BTreeSet<MacAddress>,
    /// Wall-clock duration of the sweep.
    pub duration: Duration,
}

impl ScanResult {
    pub fn new(target: &str, devices: impl IntoIterator<Item = MacAddress>) -> Self {
        Self {
            sweep_id: Uuid::new_v4(),
            target: target.to_string(),
            devices: devices.into_iter().collect(),
            duration: Duration::ZERO,
        }
    }
}

/// Sweeps an address range for reachable hardware addresses.
///
/// Implementations must return within a bounded time. Any failure is
/// reported as an error; the engine treats it as an empty sweep.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn scan(&self, target: &str) -> Result<ScanResult>;
}

/// Markers nmap prints when it cannot open raw sockets.
const PRIVILEGE_MARKERS: [&str; 3] = [
    "requires root privileges",
    "Operation not permitted",
    "dnet: Failed to open device",
];

/// Wrapper around the nmap binary.
pub struct NmapProber {
    nmap_path: String,
    timeout: Duration,
}

impl NmapProber {
    pub fn new(nmap_path: &str, timeout: Duration) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
            timeout,
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| WatchError::NmapNotFound {
                path: self.nmap_path.clone(),
            })?;

        String::from_utf8(output.stdout).map_err(|e| WatchError::XmlParse(e.to_string()))
    }

    async fn run_nmap(&self, target: &str) -> Result<std::process::Output> {
        let child = Command::new(&self.nmap_path)
            .arg("-sn")
            .arg("-n")
            .arg("-oX")
            .arg("-")
            .arg("--noninteractive")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WatchError::NmapNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        // Dropping the future on timeout drops the child, which kills nmap.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(WatchError::ScanTimeout {
                target: target.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl Prober for NmapProber {
    async fn scan(&self, target: &str) -> Result<ScanResult> {
        let sweep_id = Uuid::new_v4();
        let start = Instant::now();

        tracing::debug!(sweep_id = %sweep_id, target = %target, "Starting nmap sweep");

        let output = self.run_nmap(target).await?;
        let duration = start.elapsed();

        let stderr = String::from_utf8_lossy(&output.stderr);
        if PRIVILEGE_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(WatchError::InsufficientPrivilege(stderr.trim().to_string()));
        }
        if !output.status.success() {
            return Err(WatchError::NmapFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let nmap_run = nmap_xml::parse_nmap_xml(&output.stdout)?;
        let devices: BTreeSet<MacAddress> = nmap_run.mac_addresses().into_iter().collect();
        let hosts_up = nmap_run.hosts_up();

        if hosts_up > 0 && devices.is_empty() {
            tracing::warn!(
                target = %target,
                hosts_up,
                "Hosts answered but no hardware addresses were reported; ARP sweeps need root or CAP_NET_RAW"
            );
        }

        tracing::debug!(
            sweep_id = %sweep_id,
            target = %target,
            hosts_up,
            devices = devices.len(),
            duration_ms = duration.as_millis(),
            "Nmap sweep complete"
        );

        Ok(ScanResult {
            sweep_id,
            target: target.to_string(),
            devices,
            duration,
        })
    }
}
