//! Static service/characteristic profile of the toio Core Cube.
//!
//! The remote service supports exactly one peripheral type, so topology
//! discovery never touches the wire: this table is copied onto every
//! discovered peripheral record and answered from cache.

use serde::Serialize;

use crate::ids;

/// GATT property supported by a characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    /// The value can be read.
    Read,
    /// The value can be written with delivery confirmation.
    Write,
    /// The value can be written without delivery confirmation.
    WriteWithoutResponse,
    /// The value pushes change notifications.
    Notify,
}

/// One characteristic of the cube service.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CharacteristicSpec {
    /// Functional name (`"battery"`, `"motor"`, ...).
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Undashed 128-bit UUID (cache-key form).
    pub uuid: &'static str,
    /// Supported GATT properties.
    pub properties: &'static [Property],
}

/// The cube's single service.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ServiceSpec {
    /// Undashed 128-bit UUID.
    pub uuid: &'static str,
    /// Characteristic table.
    pub characteristics: &'static [CharacteristicSpec],
}

impl ServiceSpec {
    /// Canonical dashed form of the service UUID.
    pub fn dashed_uuid(&self) -> String {
        ids::add_dashes(self.uuid)
    }

    /// Look up a characteristic by undashed UUID.
    pub fn characteristic(&self, uuid: &str) -> Option<&CharacteristicSpec> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Undashed UUID of the cube service.
pub const CUBE_SERVICE_UUID: &str = "10b201005b3b45719508cf3efcd7bbae";

const FULL: &[Property] = &[
    Property::WriteWithoutResponse,
    Property::Write,
    Property::Notify,
    Property::Read,
];

const WRITE_ONLY: &[Property] = &[Property::WriteWithoutResponse, Property::Write];

/// The complete static profile.
pub const CUBE_PROFILE: ServiceSpec = ServiceSpec {
    uuid: CUBE_SERVICE_UUID,
    characteristics: &[
        CharacteristicSpec {
            kind: "battery",
            uuid: "10b201085b3b45719508cf3efcd7bbae",
            properties: FULL,
        },
        CharacteristicSpec {
            kind: "button",
            uuid: "10b201075b3b45719508cf3efcd7bbae",
            properties: FULL,
        },
        CharacteristicSpec {
            kind: "configuration",
            uuid: "10b201ff5b3b45719508cf3efcd7bbae",
            properties: FULL,
        },
        CharacteristicSpec {
            kind: "id",
            uuid: "10b201015b3b45719508cf3efcd7bbae",
            properties: FULL,
        },
        CharacteristicSpec {
            kind: "light",
            uuid: "10b201035b3b45719508cf3efcd7bbae",
            properties: WRITE_ONLY,
        },
        CharacteristicSpec {
            kind: "motor",
            uuid: "10b201025b3b45719508cf3efcd7bbae",
            properties: FULL,
        },
        CharacteristicSpec {
            kind: "sensor",
            uuid: "10b201065b3b45719508cf3efcd7bbae",
            properties: FULL,
        },
        CharacteristicSpec {
            kind: "sound",
            uuid: "10b201045b3b45719508cf3efcd7bbae",
            properties: WRITE_ONLY,
        },
    ],
};
