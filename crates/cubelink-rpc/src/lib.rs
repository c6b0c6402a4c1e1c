//! # cubelink-rpc
//!
//! JSON-RPC 2.0 over a message-oriented transport: correlated
//! request/response futures plus routed inbound calls, independent of
//! what the calls mean.

#![deny(unsafe_code)]

pub mod channel;
pub mod errors;
pub mod testing;
pub mod transport;
pub mod types;
pub mod ws;

pub use channel::{ChannelObserver, RpcChannel};
pub use errors::{CallError, ChannelError, TransportError};
pub use transport::{Transport, TransportEvent, TransportFactory};
pub use ws::{WsTransport, WsTransportFactory};
