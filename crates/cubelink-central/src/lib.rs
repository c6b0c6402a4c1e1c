//! # cubelink-central
//!
//! The binding-compatible façade: session registry, discovered-
//! peripheral cache, and the event surface a native BLE binding
//! consumer expects.

#![deny(unsafe_code)]

pub mod central;
pub mod config;
pub mod events;

pub use central::{BleCentral, DiscoveredPeripheral};
pub use config::{DEFAULT_ENDPOINT, LinkConfig};
pub use events::{AdapterState, Advertisement, BindingError, BindingEvent};
