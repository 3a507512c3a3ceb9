//! Nmap XML output deserialization.
//!
//! A ping sweep (`nmap -sn -oX -`) reports one `<host>` per responder. On a
//! directly attached segment nmap resolves each responder over ARP and adds
//! an `addrtype="mac"` address, which is all the watch needs.

use serde::Deserialize;

use macsentry_core::MacAddress;

use crate::error::{Result, WatchError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

impl NmapHost {
    pub fn ipv4(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "ipv4")
            .map(|a| a.addr.as_str())
    }

    /// Extract the MAC address, if present.
    pub fn mac(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "mac")
            .map(|a| a.addr.as_str())
    }

    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }
}

impl NmapRun {
    /// Number of hosts nmap reported as up.
    pub fn hosts_up(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_up()).count()
    }

    /// Canonical MAC addresses of every host that is up.
    ///
    /// Addresses nmap prints in a form we cannot parse are skipped with a
    /// warning rather than failing the sweep.
    pub fn mac_addresses(&self) -> Vec<MacAddress> {
        self.hosts
            .iter()
            .filter(|h| h.is_up())
            .filter_map(|h| {
                let raw = h.mac()?;
                match raw.parse::<MacAddress>() {
                    Ok(mac) => Some(mac),
                    Err(e) => {
                        tracing::warn!(ip = h.ipv4().unwrap_or("?"), error = %e, "Skipping host");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| WatchError::XmlParse(format!("{e}")))
}
