//! Typed events a session reports to its owner.

use serde::Deserialize;
use serde_json::Value;

use cubelink_rpc::errors::ChannelError;

/// Advertisement payload of a `didDiscoverPeripheral` call.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralAdvert {
    /// Remote-assigned peripheral identifier.
    pub peripheral_id: String,
    /// Advertised display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Signal strength at discovery time.
    #[serde(default)]
    pub rssi: Option<i64>,
}

/// Pushed `characteristicDidChange` payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicChange {
    /// Dashed service UUID.
    pub service_id: String,
    /// Dashed characteristic UUID.
    pub characteristic_id: String,
    /// Base64-encoded value.
    pub message: String,
    /// Encoding tag, when the remote sends one.
    #[serde(default)]
    pub encoding: Option<String>,
}

/// A failed remote interaction, converted at the session boundary.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct RequestFailure {
    /// What went wrong.
    pub message: String,
    /// Remote error payload, when one was returned.
    pub detail: Option<Value>,
}

impl From<ChannelError> for RequestFailure {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Remote { error } => Self {
                message: "remote rejected the request".into(),
                detail: Some(error),
            },
            other => Self {
                message: other.to_string(),
                detail: None,
            },
        }
    }
}

/// Events a session reports to its owner. Every variant carries the
/// owner key the session was created with, so a multiplexing owner can
/// resolve it back to a peripheral.
#[derive(Debug)]
pub enum SessionEvent {
    /// An anonymous (scanning) session saw an advertisement.
    Discovered {
        /// Owner key of the reporting session.
        owner_key: u64,
        /// The advertisement.
        advert: PeripheralAdvert,
    },
    /// A targeted session saw the peripheral it was created for; the
    /// owner should begin the deferred connect.
    TargetSighted {
        /// Owner key of the reporting session.
        owner_key: u64,
        /// The sighted peripheral.
        peripheral_id: String,
    },
    /// The remote `connect` request succeeded.
    Connected {
        /// Owner key of the reporting session.
        owner_key: u64,
        /// The connected peripheral.
        peripheral_id: String,
    },
    /// Voluntary disconnect completed; emitted exactly once per
    /// connected transition.
    Disconnected {
        /// Owner key of the reporting session.
        owner_key: u64,
    },
    /// The channel closed while connected (involuntary loss).
    DisconnectError {
        /// Owner key of the reporting session.
        owner_key: u64,
    },
    /// A long-lived request (discover/connect) failed.
    RequestError {
        /// Owner key of the reporting session.
        owner_key: u64,
        /// The converted failure.
        failure: RequestFailure,
    },
    /// The user picked a peripheral in the remote chooser.
    Picked {
        /// Owner key of the reporting session.
        owner_key: u64,
        /// The chosen peripheral.
        advert: PeripheralAdvert,
    },
    /// The user dismissed the remote chooser.
    NotPicked {
        /// Owner key of the reporting session.
        owner_key: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn advert_parses_wire_payload() {
        let advert: PeripheralAdvert = serde_json::from_value(json!({
            "peripheralId": "abc",
            "name": "toio Core Cube",
            "rssi": -42
        }))
        .unwrap();
        assert_eq!(advert.peripheral_id, "abc");
        assert_eq!(advert.name.as_deref(), Some("toio Core Cube"));
        assert_eq!(advert.rssi, Some(-42));
    }

    #[test]
    fn advert_tolerates_missing_optionals() {
        let advert: PeripheralAdvert =
            serde_json::from_value(json!({"peripheralId": "abc"})).unwrap();
        assert!(advert.name.is_none());
        assert!(advert.rssi.is_none());
    }

    #[test]
    fn change_parses_wire_payload() {
        let change: CharacteristicChange = serde_json::from_value(json!({
            "serviceId": "10b20100-5b3b-4571-9508-cf3efcd7bbae",
            "characteristicId": "10b20106-5b3b-4571-9508-cf3efcd7bbae",
            "message": "AQID",
            "encoding": "base64"
        }))
        .unwrap();
        assert_eq!(change.message, "AQID");
        assert_eq!(change.encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn remote_channel_error_keeps_detail() {
        let failure = RequestFailure::from(ChannelError::Remote {
            error: json!({"message": "denied"}),
        });
        assert_eq!(failure.detail.unwrap()["message"], "denied");
    }

    #[test]
    fn closed_channel_error_converts_to_message() {
        let failure = RequestFailure::from(ChannelError::Closed);
        assert_eq!(failure.message, "channel closed");
        assert!(failure.detail.is_none());
    }
}
