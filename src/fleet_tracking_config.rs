use serde::{Deserialize, Serialize};

/// Default pause between a connection loss and the next attempt.
pub const DEFAULT_RECONNECT_DELAY_IN_MILLISECONDS: u64 = 3000;

#[derive(Deserialize, Serialize, Clone)]
pub struct FleetTrackingConfig {
    /// Telemetry stream address, `scheme://host:port/path`. The reconnect
    /// target is identical to the initial target.
    pub stream_endpoint: String,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_in_milliseconds: u64,
}

fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY_IN_MILLISECONDS
}

impl Default for FleetTrackingConfig {
    fn default() -> Self {
        Self {
            stream_endpoint: "tcp://127.0.0.1:8080/telemetry".to_string(),
            reconnect_delay_in_milliseconds: DEFAULT_RECONNECT_DELAY_IN_MILLISECONDS,
        }
    }
}

#[test]
fn reconnect_delay_defaults_to_three_seconds() {
    let config: FleetTrackingConfig =
        serde_json::from_str(r#"{"stream_endpoint":"tcp://localhost:8080/telemetry"}"#).unwrap();

    assert_eq!(config.reconnect_delay_in_milliseconds, 3000);
}

#[test]
fn explicit_reconnect_delay_is_kept() {
    let raw = r#"{"stream_endpoint":"tcp://localhost:8080/telemetry","reconnect_delay_in_milliseconds":250}"#;
    let config: FleetTrackingConfig = serde_json::from_str(raw).unwrap();

    assert_eq!(config.reconnect_delay_in_milliseconds, 250);
}
