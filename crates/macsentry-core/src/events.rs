//! Alarm events handed from the engine to alarm sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::MacAddress;

/// An unrecognized device seen during an enforcing sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmEvent {
    pub mac: MacAddress,
    /// The address range that was swept.
    pub network_range: String,
    /// Sweep that observed the device.
    pub sweep_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

impl AlarmEvent {
    pub fn new(mac: MacAddress, network_range: &str, sweep_id: Uuid) -> Self {
        Self {
            mac,
            network_range: network_range.to_string(),
            sweep_id,
            detected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_mac_canonically() {
        let mac: MacAddress = "bb:bb:bb:bb:bb:02".parse().unwrap();
        let event = AlarmEvent::new(mac, "10.0.0.0/30", Uuid::nil());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["mac"], "BB:BB:BB:BB:BB:02");
        assert_eq!(json["network_range"], "10.0.0.0/30");

        let back: AlarmEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
