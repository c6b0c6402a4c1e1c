//! In-memory transport for exercising channels without a socket.
//!
//! Tests act as the remote peer: read what the channel sent with
//! [`MockRemote::next_sent`], push inbound frames with
//! [`MockRemote::push`], and drive lifecycle transitions explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// Transport half handed to the code under test.
pub struct MockTransport {
    open: AtomicBool,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

/// Peer half held by the test.
pub struct MockRemote {
    transport: Arc<MockTransport>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

/// Create a connected transport/peer pair plus the event stream the
/// channel consumes.
pub fn pair() -> (
    Arc<MockTransport>,
    mpsc::UnboundedReceiver<TransportEvent>,
    MockRemote,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        open: AtomicBool::new(false),
        events_tx,
        outbound_tx,
    });
    let remote = MockRemote {
        transport: transport.clone(),
        outbound_rx,
    };
    (transport, events_rx, remote)
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if !self.open.swap(true, Ordering::SeqCst) {
            let _ = self.events_tx.send(TransportEvent::Opened);
        }
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events_tx.send(TransportEvent::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outbound_tx.send(text).map_err(|_| TransportError::Send {
            message: "peer dropped".into(),
        })
    }
}

impl MockRemote {
    /// Next frame the channel sent, in order.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound_rx.recv().await
    }

    /// Next frame if one is already queued (non-blocking).
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.outbound_rx.try_recv().ok()
    }

    /// Push an inbound text frame to the channel.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self
            .transport
            .events_tx
            .send(TransportEvent::Message(text.into()));
    }

    /// Report a transport error to the channel.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self
            .transport
            .events_tx
            .send(TransportEvent::Error(message.into()));
    }

    /// Drop the connection from the remote side.
    pub fn close(&self) {
        if self.transport.open.swap(false, Ordering::SeqCst) {
            let _ = self.transport.events_tx.send(TransportEvent::Closed);
        }
    }
}

/// Factory yielding mock transports; each created peer half is queued
/// on the receiver returned by [`factory`] for the test to claim.
pub struct MockFactory {
    remotes_tx: mpsc::UnboundedSender<MockRemote>,
}

/// Create a factory and the stream of peer halves it hands out.
pub fn factory() -> (Arc<MockFactory>, mpsc::UnboundedReceiver<MockRemote>) {
    let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
    (Arc::new(MockFactory { remotes_tx }), remotes_rx)
}

impl TransportFactory for MockFactory {
    fn create(&self) -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, events_rx, remote) = pair();
        let _ = self.remotes_tx.send(remote);
        (transport, events_rx)
    }
}
