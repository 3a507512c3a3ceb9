//! Core domain types for macsentry.
//!
//! A `MacAddress` is the unit of identity for every whitelist and alarm
//! decision. Two addresses are equal iff their canonical forms are equal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Identifier ────────────────────────────────────────────────────

/// A 48-bit hardware address.
///
/// Parsing accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff`,
/// `aabb.ccdd.eeff` and bare `aabbccddeeff`. Display always yields the
/// canonical upper-case, colon-separated form, which is also the form used
/// on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(eui48::MacAddress);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(eui48::MacAddress::new(octets))
    }
}

/// Group lengths of the notations we accept, keyed by separator.
fn has_known_layout(raw: &str) -> bool {
    let groups = |sep: char| raw.split(sep).map(str::len).collect::<Vec<_>>();
    if raw.contains(':') {
        groups(':') == [2; 6]
    } else if raw.contains('-') {
        groups('-') == [2; 6]
    } else if raw.contains('.') {
        groups('.') == [4; 3]
    } else {
        raw.len() == 12
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if !has_known_layout(raw) {
            return Err(CoreError::InvalidMac(s.to_string()));
        }
        eui48::MacAddress::parse_str(raw)
            .map(Self)
            .map_err(|_| CoreError::InvalidMac(s.to_string()))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0.to_array();
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

// ── Phase ─────────────────────────────────────────────────────────

/// The alarm engine's state. Transition is one-way: Learning → Enforcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Learning,
    Enforcing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Learning => f.write_str("learning"),
            Self::Enforcing => f.write_str("enforcing"),
        }
    }
}
