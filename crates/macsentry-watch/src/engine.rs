//! The alarm engine: a two-phase state machine over repeated sweeps.
//!
//! Learning: every address seen before the deadline joins the whitelist,
//! which is saved after each batch of additions and once more when the
//! phase ends. Enforcing: every address not on the whitelist is handed to
//! the alarm sink, sweep after sweep, until shutdown.
//!
//! Time is read from `tokio::time::Instant`, so the whole schedule can be
//! driven by tokio's paused clock in tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use macsentry_core::{AlarmEvent, MacAddress, Phase};

use crate::action::AlarmSink;
use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::scanner::{Prober, ScanResult};
use crate::whitelist::{Whitelist, WhitelistStore};

/// Stand-in for "never" when a configured wait does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + wait`, or [`FAR_FUTURE`] from now if that overflows.
fn after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait).unwrap_or_else(|| now + FAR_FUTURE)
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Shutdown,
}

pub struct AlarmEngine {
    config: WatchConfig,
    store: WhitelistStore,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn AlarmSink>,
    phase: Phase,
    failed_sweeps: u32,
}

impl AlarmEngine {
    pub fn new(
        config: WatchConfig,
        store: WhitelistStore,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn AlarmSink>,
    ) -> Self {
        Self {
            config,
            store,
            prober,
            sink,
            phase: Phase::Learning,
            failed_sweeps: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sweeps that have failed back to back.
    pub fn consecutive_failures(&self) -> u32 {
        self.failed_sweeps
    }

    /// Whether the prober has failed often enough that an empty network
    /// can no longer be told apart from a monitoring outage.
    pub fn is_degraded(&self) -> bool {
        self.failed_sweeps >= self.config.probe_failure_threshold
    }

    /// Load the whitelist, learn, then enforce until `shutdown` flips to true.
    ///
    /// Alarms still in flight are given the sink's flush window, then the
    /// whitelist is saved one last time before returning.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Whitelist {
        tracing::info!(
            network_range = %self.config.network_range,
            whitelist = %self.store.path().display(),
            "Alarm engine started"
        );
        let mut whitelist = self.store.load();

        if self.learn(&mut whitelist, &mut shutdown).await == PhaseOutcome::Completed {
            self.enforce(&whitelist, &mut shutdown).await;
        }

        self.sink.flush().await;
        tracing::info!(devices = whitelist.len(), "Shutting down, saving whitelist");
        self.persist(&whitelist);
        whitelist
    }

    /// Run the learning phase against `whitelist`.
    ///
    /// At least one sweep always happens. The deadline is checked after
    /// every sweep and every wait, and waits never extend past it.
    pub async fn learn(
        &mut self,
        whitelist: &mut Whitelist,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PhaseOutcome {
        self.phase = Phase::Learning;
        let deadline = after(Instant::now(), self.config.learning_timeout());
        tracing::info!(
            timeout_secs = self.config.timeout,
            known = whitelist.len(),
            "Entering learning phase"
        );

        loop {
            let scan = self.sweep().await;
            if self.absorb(whitelist, &scan) > 0 {
                self.persist(whitelist);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wake = after(now, self.config.learning_interval()).min(deadline);
            if pause_until(wake, shutdown).await {
                return PhaseOutcome::Shutdown;
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        tracing::info!(
            devices = whitelist.len(),
            "Learning phase finished, saving final whitelist"
        );
        self.persist(whitelist);
        self.phase = Phase::Enforcing;
        PhaseOutcome::Completed
    }

    /// Run the enforcing phase. Only returns once shutdown is requested.
    pub async fn enforce(&mut self, whitelist: &Whitelist, shutdown: &mut watch::Receiver<bool>) {
        self.phase = Phase::Enforcing;
        tracing::info!(devices = whitelist.len(), "Entering alarm mode");

        loop {
            let scan = self.sweep().await;
            self.check(whitelist, &scan).await;

            let wake = after(Instant::now(), self.config.alarm_interval());
            if pause_until(wake, shutdown).await {
                return;
            }
        }
    }

    /// Sweep the configured range once.
    ///
    /// Prober failures are logged and become an empty result; they are
    /// counted so a run of failures is reported as degraded monitoring
    /// instead of looking like a quiet network.
    pub async fn sweep(&mut self) -> ScanResult {
        let target = self.config.network_range.as_str();
        tracing::info!(phase = %self.phase, target = %target, "Scanning network");

        match self.prober.scan(target).await {
            Ok(scan) => {
                if self.is_degraded() {
                    tracing::info!(
                        failed_sweeps = self.failed_sweeps,
                        "Network probe recovered"
                    );
                }
                self.failed_sweeps = 0;
                tracing::info!(
                    sweep_id = %scan.sweep_id,
                    devices = scan.devices.len(),
                    duration_ms = scan.duration.as_millis(),
                    "Sweep complete"
                );
                scan
            }
            Err(e) => {
                self.failed_sweeps = self.failed_sweeps.saturating_add(1);
                tracing::error!(
                    error = %e,
                    consecutive_failures = self.failed_sweeps,
                    "Network sweep failed, treating it as empty"
                );
                if matches!(e, WatchError::InsufficientPrivilege(_)) {
                    tracing::error!("Try running as root or granting CAP_NET_RAW to nmap");
                }
                if self.failed_sweeps == self.config.probe_failure_threshold {
                    tracing::error!(
                        consecutive_failures = self.failed_sweeps,
                        "Monitoring degraded: empty sweeps can no longer be trusted"
                    );
                }
                ScanResult::new(target, [])
            }
        }
    }

    /// Add every device in `scan` to the whitelist. Returns how many were new.
    pub fn absorb(&self, whitelist: &mut Whitelist, scan: &ScanResult) -> usize {
        scan.devices
            .iter()
            .filter(|mac| whitelist.insert(**mac))
            .count()
    }

    /// Raise an alarm for every device in `scan` that is not whitelisted.
    /// Returns the flagged addresses.
    pub async fn check(&self, whitelist: &Whitelist, scan: &ScanResult) -> Vec<MacAddress> {
        let flagged: Vec<MacAddress> = scan
            .devices
            .iter()
            .filter(|mac| !whitelist.contains(mac))
            .copied()
            .collect();

        for mac in &flagged {
            let event = AlarmEvent::new(*mac, &scan.target, scan.sweep_id);
            self.sink.raise(&event).await;
        }

        if !flagged.is_empty() {
            tracing::warn!(
                sweep_id = %scan.sweep_id,
                unknown = flagged.len(),
                "Unauthorized devices on the network"
            );
        }
        flagged
    }

    /// Save the whitelist; failures leave the in-memory copy authoritative.
    fn persist(&self, whitelist: &Whitelist) {
        if let Err(e) = self.store.save(whitelist) {
            tracing::error!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to save whitelist, keeping in-memory copy"
            );
        }
    }
}

/// Sleep until `deadline` unless shutdown is requested first.
///
/// Returns true if shutdown was requested. A dropped sender means shutdown
/// can no longer be requested, so the full wait is served.
pub async fn pause_until(deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *shutdown.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = sleep_until(deadline) => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    sleep_until(deadline).await;
                    return false;
                }
            }
        }
    }
}
