//! The binding-compatible event surface.

use cubelink_core::profile::CharacteristicSpec;
use serde_json::Value;

/// Advertisement data attached to a discovery event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised display name.
    pub local_name: Option<String>,
}

/// Power state reported to the binding consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    /// The central is ready for scan and connect calls.
    PoweredOn,
    /// The central has been shut down.
    PoweredOff,
}

/// A fully-identified error surfaced to the binding consumer.
#[derive(Clone, Debug)]
pub struct BindingError {
    /// Peripheral the failure belongs to, when resolvable.
    pub peripheral_id: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Remote error payload, when one was returned.
    pub detail: Option<Value>,
}

/// Events emitted by the central, shaped like a native BLE binding's.
#[derive(Debug)]
pub enum BindingEvent {
    /// Power state transition.
    StateChange(AdapterState),
    /// Scanning began.
    ScanStart,
    /// Scanning stopped.
    ScanStop,
    /// A peripheral was discovered.
    Discover {
        /// Peripheral identifier.
        peripheral_id: String,
        /// Address; this transport has no MAC, so the id doubles up.
        address: String,
        /// Address type; always empty here.
        address_type: String,
        /// Whether the peripheral accepts connections.
        connectable: bool,
        /// Advertisement payload.
        advertisement: Advertisement,
        /// Signal strength.
        rssi: Option<i64>,
    },
    /// A connect request succeeded.
    Connect {
        /// The connected peripheral.
        peripheral_id: String,
    },
    /// A peripheral was disconnected, voluntarily or not.
    Disconnect {
        /// The disconnected peripheral.
        peripheral_id: String,
    },
    /// Services resolved from the static profile.
    ServicesDiscover {
        /// The queried peripheral.
        peripheral_id: String,
        /// Undashed service UUIDs.
        service_uuids: Vec<String>,
    },
    /// Characteristics resolved from the static profile.
    CharacteristicsDiscover {
        /// The queried peripheral.
        peripheral_id: String,
        /// Undashed UUID of the queried service.
        service_uuid: String,
        /// The service's characteristic table.
        characteristics: &'static [CharacteristicSpec],
    },
    /// A read completed, or a subscribed characteristic changed.
    Read {
        /// The source peripheral.
        peripheral_id: String,
        /// Undashed service UUID as the caller passed it.
        service_uuid: String,
        /// Undashed characteristic UUID as the caller passed it.
        characteristic_uuid: String,
        /// Decoded payload bytes.
        data: Vec<u8>,
        /// `true` when delivered by a change notification.
        is_notification: bool,
    },
    /// A write completed.
    Write {
        /// The target peripheral.
        peripheral_id: String,
        /// Undashed service UUID.
        service_uuid: String,
        /// Undashed characteristic UUID.
        characteristic_uuid: String,
    },
    /// Notification subscription state changed.
    Notify {
        /// The target peripheral.
        peripheral_id: String,
        /// Undashed service UUID.
        service_uuid: String,
        /// Undashed characteristic UUID.
        characteristic_uuid: String,
        /// The new subscription state.
        enabled: bool,
    },
    /// A remote interaction failed.
    Error(BindingError),
}
