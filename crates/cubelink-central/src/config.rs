//! Central configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default Scratch Link BLE endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://device-manager.scratch.mit.edu:20110/scratch/ble";

/// Configuration for the central adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// WebSocket endpoint every session dials.
    pub endpoint: String,
    /// Optional per-request deadline in seconds. `None` waits forever,
    /// matching the remote protocol's lack of a timeout.
    pub request_timeout_secs: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            request_timeout_secs: None,
        }
    }
}

impl LinkConfig {
    /// The configured request deadline, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn default_has_no_timeout() {
        let cfg = LinkConfig::default();
        assert!(cfg.request_timeout().is_none());
    }

    #[test]
    fn timeout_converts_to_duration() {
        let cfg = LinkConfig {
            endpoint: "ws://localhost:20110/scratch/ble".into(),
            request_timeout_secs: Some(30),
        };
        assert_eq!(cfg.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = LinkConfig {
            endpoint: "ws://10.0.0.1:20110/scratch/ble".into(),
            request_timeout_secs: Some(5),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: LinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.endpoint, cfg.endpoint);
        assert_eq!(back.request_timeout_secs, Some(5));
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"endpoint":"ws://127.0.0.1:1234/ble","request_timeout_secs":null}"#;
        let cfg: LinkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.endpoint, "ws://127.0.0.1:1234/ble");
        assert!(cfg.request_timeout_secs.is_none());
    }
}
