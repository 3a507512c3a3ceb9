//! Whitelist of known-good hardware addresses and its on-disk store.
//!
//! The whitelist keeps insertion order and never holds two entries with the
//! same canonical address. It is persisted as a pretty-printed JSON array of
//! canonical address strings.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use macsentry_core::MacAddress;

use crate::error::{Result, WatchError};

/// Ordered, duplicate-free set of authorized addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: Vec<MacAddress>,
    index: HashSet<MacAddress>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `mac` if absent. Returns whether the whitelist changed.
    pub fn insert(&mut self, mac: MacAddress) -> bool {
        if !self.index.insert(mac) {
            return false;
        }
        self.entries.push(mac);
        tracing::info!(mac = %mac, "Added to whitelist");
        true
    }

    /// Remove `mac` if present. Returns whether the whitelist changed.
    pub fn remove(&mut self, mac: &MacAddress) -> bool {
        if !self.index.remove(mac) {
            return false;
        }
        self.entries.retain(|m| m != mac);
        tracing::info!(mac = %mac, "Removed from whitelist");
        true
    }

    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.index.contains(mac)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MacAddress> {
        self.entries.iter()
    }
}

impl FromIterator<MacAddress> for Whitelist {
    fn from_iter<I: IntoIterator<Item = MacAddress>>(iter: I) -> Self {
        let mut whitelist = Whitelist::new();
        for mac in iter {
            if !whitelist.index.insert(mac) {
                continue;
            }
            whitelist.entries.push(mac);
        }
        whitelist
    }
}

/// File-system backed whitelist persistence.
pub struct WhitelistStore {
    path: PathBuf,
}

impl WhitelistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted whitelist.
    ///
    /// Never fails: a missing file yields an empty whitelist, and an
    /// unreadable or malformed file is logged and also yields an empty one.
    pub fn load(&self) -> Whitelist {
        match self.try_load() {
            Ok(whitelist) => {
                tracing::info!(
                    path = %self.path.display(),
                    devices = whitelist.len(),
                    "Whitelist loaded"
                );
                whitelist
            }
            Err(WatchError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No whitelist yet, starting empty");
                Whitelist::new()
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Whitelist unreadable, starting empty"
                );
                Whitelist::new()
            }
        }
    }

    /// Load the persisted whitelist, surfacing every failure.
    ///
    /// Entries that are not valid addresses are skipped with a warning;
    /// entries that collapse to an earlier canonical address are dropped.
    pub fn try_load(&self) -> Result<Whitelist> {
        let json = fs::read_to_string(&self.path)?;
        let raw: Vec<String> =
            serde_json::from_str(&json).map_err(|source| WatchError::WhitelistFormat {
                path: self.path.display().to_string(),
                source,
            })?;

        let total = raw.len();
        let whitelist: Whitelist = raw
            .into_iter()
            .filter_map(|entry| match entry.parse::<MacAddress>() {
                Ok(mac) => Some(mac),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Skipping whitelist entry");
                    None
                }
            })
            .collect();

        if whitelist.len() < total {
            tracing::warn!(
                path = %self.path.display(),
                stored = total,
                kept = whitelist.len(),
                "Whitelist file contained invalid or duplicate entries"
            );
        }

        Ok(whitelist)
    }

    /// Persist the full whitelist, replacing whatever was stored.
    ///
    /// Written to a sibling temp file first and renamed into place.
    pub fn save(&self, whitelist: &Whitelist) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let entries: Vec<&MacAddress> = whitelist.iter().collect();
        let json = serde_json::to_string_pretty(&entries).map_err(|source| {
            WatchError::WhitelistFormat {
                path: self.path.display().to_string(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            devices = whitelist.len(),
            "Whitelist saved"
        );

        Ok(())
    }
}
