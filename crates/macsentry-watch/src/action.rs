//! Alarm sinks: what happens when an unknown device shows up.
//!
//! The engine hands every [`AlarmEvent`] to an [`AlarmSink`] and moves on.
//! Sinks absorb their own failures; nothing they do can stall or stop the
//! sweep loop.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use macsentry_core::{AlarmEvent, MacAddress};

use crate::config::{SinkKind, WatchConfig, MAC_PLACEHOLDER};

/// Receives alarms for unrecognized devices.
#[async_trait]
pub trait AlarmSink: Send + Sync {
    /// Handle one alarm. Must return promptly and must not fail the caller.
    async fn raise(&self, event: &AlarmEvent);

    /// Wait, within the sink's own bound, for work started by `raise`.
    /// Called once at shutdown.
    async fn flush(&self) {}
}

/// Substitute the canonical address into an action template.
pub fn render_action(template: &str, mac: &MacAddress) -> String {
    template.replace(MAC_PLACEHOLDER, &mac.to_string())
}

/// Runs the configured shell command for every alarm.
///
/// Each command is spawned on its own task and bounded by a timeout, so a
/// hanging command never blocks the next sweep. Tasks are tracked so that
/// [`AlarmSink::flush`] can wait for them at shutdown.
pub struct CommandSink {
    template: String,
    timeout: Duration,
    tasks: Mutex<JoinSet<()>>,
}

impl CommandSink {
    pub fn new(template: &str, timeout: Duration) -> Self {
        Self {
            template: template.to_string(),
            timeout,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Commands started and not yet reaped.
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Run one rendered command to completion and log its outcome.
    pub async fn execute(command: String, mac: MacAddress, timeout: Duration) {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(mac = %mac, command = %command, error = %e, "Failed to start action command");
                return;
            }
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(mac = %mac, "Action command finished");
            }
            Ok(Ok(status)) => {
                tracing::error!(
                    mac = %mac,
                    command = %command,
                    code = status.code().unwrap_or(-1),
                    "Action command failed"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(mac = %mac, command = %command, error = %e, "Action command could not be awaited");
            }
            Err(_) => {
                tracing::error!(
                    mac = %mac,
                    command = %command,
                    timeout_secs = timeout.as_secs(),
                    "Action command timed out, killing it"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(mac = %mac, error = %e, "Failed to kill action command");
                }
            }
        }
    }
}

#[async_trait]
impl AlarmSink for CommandSink {
    async fn raise(&self, event: &AlarmEvent) {
        let command = render_action(&self.template, &event.mac);
        tracing::warn!(
            mac = %event.mac,
            sweep_id = %event.sweep_id,
            "Executing action for unauthorized device"
        );
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(Self::execute(command, event.mac, self.timeout));
    }

    async fn flush(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        if tasks.is_empty() {
            return;
        }

        let pending = tasks.len();
        tracing::info!(pending, "Waiting for running action commands");
        let drained = tokio::time::timeout(self.timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                timeout_secs = self.timeout.as_secs(),
                "Action commands still running at shutdown, killing them"
            );
            tasks.shutdown().await;
        }
    }
}

/// Emits a structured log event and nothing else.
pub struct LogSink;

#[async_trait]
impl AlarmSink for LogSink {
    async fn raise(&self, event: &AlarmEvent) {
        tracing::warn!(
            mac = %event.mac,
            network_range = %event.network_range,
            sweep_id = %event.sweep_id,
            detected_at = %event.detected_at,
            "Unauthorized device detected"
        );
    }
}

/// Build the sink selected by the configuration.
pub fn sink_from_config(config: &WatchConfig) -> Arc<dyn AlarmSink> {
    match config.sink {
        SinkKind::Command => Arc::new(CommandSink::new(&config.action, config.action_timeout())),
        SinkKind::Log => Arc::new(LogSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use uuid::Uuid;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let rendered = render_action("notify {mac} && block {mac}", &mac("bb:bb:bb:bb:bb:02"));
        assert_eq!(rendered, "notify BB:BB:BB:BB:BB:02 && block BB:BB:BB:BB:BB:02");
    }

    #[test]
    fn render_without_placeholder_is_unchanged() {
        assert_eq!(render_action("true", &mac("bb:bb:bb:bb:bb:02")), "true");
    }

    #[tokio::test]
    async fn command_runs_with_mac_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("alerts.log");
        let template = format!("echo {MAC_PLACEHOLDER} >> {}", out.display());

        CommandSink::execute(
            render_action(&template, &mac("bb:bb:bb:bb:bb:02")),
            mac("bb:bb:bb:bb:bb:02"),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "BB:BB:BB:BB:BB:02");
    }

    #[tokio::test]
    async fn failing_command_does_not_panic() {
        CommandSink::execute(
            "exit 3".to_string(),
            mac("bb:bb:bb:bb:bb:02"),
            Duration::from_secs(5),
        )
        .await;
        CommandSink::execute(
            "definitely-not-a-real-command-xyz".to_string(),
            mac("bb:bb:bb:bb:bb:02"),
            Duration::from_secs(5),
        )
        .await;
    }

    #[tokio::test]
    async fn hanging_command_is_cut_off() {
        let start = std::time::Instant::now();
        CommandSink::execute(
            "sleep 30".to_string(),
            mac("bb:bb:bb:bb:bb:02"),
            Duration::from_millis(200),
        )
        .await;
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    fn event() -> AlarmEvent {
        AlarmEvent::new(mac("bb:bb:bb:bb:bb:02"), "10.0.0.0/30", Uuid::new_v4())
    }

    #[tokio::test]
    async fn raise_returns_before_command_finishes() {
        let sink = CommandSink::new("sleep 30", Duration::from_secs(60));

        let start = std::time::Instant::now();
        sink.raise(&event()).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.pending().await, 1);
    }

    #[tokio::test]
    async fn flush_waits_for_running_commands() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("alerts.log");
        let template = format!("sleep 1; echo {MAC_PLACEHOLDER} > {}", out.display());
        let sink = CommandSink::new(&template, Duration::from_secs(10));

        sink.raise(&event()).await;
        sink.flush().await;

        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "BB:BB:BB:BB:BB:02");
        assert_eq!(sink.pending().await, 0);
    }

    #[tokio::test]
    async fn flush_is_bounded_by_action_timeout() {
        let sink = CommandSink::new("sleep 30", Duration::from_millis(300));
        sink.raise(&event()).await;

        let start = std::time::Instant::now();
        sink.flush().await;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(sink.pending().await, 0);
    }

    #[tokio::test]
    async fn log_sink_never_runs_the_action() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let config = WatchConfig {
            sink: SinkKind::Log,
            action: format!("touch {}", marker.display()),
            ..Default::default()
        };

        let sink = sink_from_config(&config);
        sink.raise(&event()).await;
        sink.flush().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn command_sink_is_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let config = WatchConfig {
            action: format!("touch {}", marker.display()),
            ..Default::default()
        };

        let sink = sink_from_config(&config);
        sink.raise(&event()).await;
        sink.flush().await;

        assert!(marker.exists());
    }
}
