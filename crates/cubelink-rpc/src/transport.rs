//! The transport seam: a message-oriented socket the channel drives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;

/// Lifecycle and traffic transitions reported by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket finished opening.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The socket closed (either side).
    Closed,
    /// The socket failed; a `Closed` usually follows.
    Error(String),
}

/// A message-oriented bidirectional socket.
///
/// Implementations deliver their transitions on the event receiver
/// handed out at construction; the channel never polls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin opening the socket. `Opened` is reported on the event
    /// stream once the connection is live.
    async fn open(&self) -> Result<(), TransportError>;

    /// Close the socket. Idempotent.
    async fn close(&self);

    /// Whether the socket is currently open.
    fn is_open(&self) -> bool;

    /// Send one text frame.
    async fn send(&self, text: String) -> Result<(), TransportError>;
}

/// Produces one fresh socket per session.
pub trait TransportFactory: Send + Sync {
    /// Create an unopened transport and the stream of its transitions.
    fn create(&self) -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>);
}
