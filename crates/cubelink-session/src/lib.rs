//! # cubelink-session
//!
//! One peripheral session: domain operations (discover, connect, read,
//! write, change notifications) over one owned RPC channel, reporting
//! typed events to its owner.

#![deny(unsafe_code)]

pub mod events;
pub mod session;

pub use events::{CharacteristicChange, PeripheralAdvert, RequestFailure, SessionEvent};
pub use session::{ChangeCallback, PeripheralSession, ResetHook, SessionConfig};
