//! Scan-filter input normalization.
//!
//! Callers of a native binding pass scan targets in several shapes: a
//! bare service list, a single service, or a structured options value
//! with name filters. All of them normalize into the wire's discovery
//! filter list.

use serde::{Deserialize, Serialize};

use crate::ids;

/// One entry of the wire discovery filter list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiscoveryFilter {
    /// Match peripherals advertising all of the listed services.
    Services {
        /// Canonical dashed service UUIDs.
        services: Vec<String>,
    },
    /// Match peripherals by exact advertised name.
    Name {
        /// Exact advertised name.
        name: String,
    },
    /// Match peripherals by advertised-name prefix.
    NamePrefix {
        /// Advertised-name prefix.
        #[serde(rename = "namePrefix")]
        name_prefix: String,
    },
}

/// Caller-facing scan options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    /// Service ids to filter on; aliases and undashed forms accepted.
    pub services: Vec<String>,
    /// Exact-name filter.
    pub name: Option<String>,
    /// Name-prefix filter.
    pub name_prefix: Option<String>,
}

impl ScanOptions {
    /// Normalize into the wire filter list: one `services` entry per
    /// service id (expanded to canonical dashed form), then the
    /// optional name and name-prefix entries.
    pub fn into_filters(self) -> Vec<DiscoveryFilter> {
        let mut filters: Vec<DiscoveryFilter> = self
            .services
            .iter()
            .map(|service| DiscoveryFilter::Services {
                services: vec![ids::expand_uuid(service)],
            })
            .collect();
        if let Some(name) = self.name {
            filters.push(DiscoveryFilter::Name { name });
        }
        if let Some(name_prefix) = self.name_prefix {
            filters.push(DiscoveryFilter::NamePrefix { name_prefix });
        }
        filters
    }
}

impl From<Vec<String>> for ScanOptions {
    fn from(services: Vec<String>) -> Self {
        Self {
            services,
            ..Self::default()
        }
    }
}

impl From<Vec<&str>> for ScanOptions {
    fn from(services: Vec<&str>) -> Self {
        Self {
            services: services.into_iter().map(ToOwned::to_owned).collect(),
            ..Self::default()
        }
    }
}

impl From<&str> for ScanOptions {
    fn from(service: &str) -> Self {
        Self {
            services: vec![service.to_owned()],
            ..Self::default()
        }
    }
}
