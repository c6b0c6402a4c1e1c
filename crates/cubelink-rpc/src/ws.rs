//! WebSocket transport speaking to a Scratch-Link-compatible endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// Client WebSocket transport. Created unopened; `open()` dials the
/// URL, then frames and lifecycle transitions flow on the event stream
/// handed out at construction.
pub struct WsTransport {
    url: String,
    open: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl WsTransport {
    /// Create an unopened transport for `url` plus its event stream.
    pub fn new(url: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            url: url.into(),
            open: Arc::new(AtomicBool::new(false)),
            events_tx,
            writer: Mutex::new(None),
        });
        (transport, events_rx)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        debug!(url = self.url, "dialing");
        let (stream, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    message: e.to_string(),
                })?;
        let (mut sink, mut source) = stream.split();

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        *self.writer.lock() = Some(writer_tx);
        self.open.store(true, Ordering::SeqCst);

        // Outbound forwarder; ends when the writer handle is dropped.
        let _ = tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Inbound pump; reports the close when the stream ends.
        let events = self.events_tx.clone();
        let open_flag = self.open.clone();
        let _ = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let _ = events.send(TransportEvent::Message(text.to_string()));
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message(text));
                        }
                        Err(_) => debug!("ignoring non-UTF8 binary frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "socket read failed");
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            open_flag.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Closed);
        });

        let _ = self.events_tx.send(TransportEvent::Opened);
        Ok(())
    }

    async fn close(&self) {
        // Dropping the writer lets the forwarder close the sink; the
        // read half then observes the close and reports `Closed`.
        let _ = self.writer.lock().take();
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        let writer = self.writer.lock().clone();
        match writer {
            Some(tx) => tx
                .send(Message::Text(text.into()))
                .map_err(|_| TransportError::Send {
                    message: "socket closed".into(),
                }),
            None => Err(TransportError::NotOpen),
        }
    }
}

/// Factory dialing the same endpoint for every session.
pub struct WsTransportFactory {
    url: String,
}

impl WsTransportFactory {
    /// Factory for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self) -> (Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, events_rx) = WsTransport::new(self.url.clone());
        (transport, events_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                match frame {
                    Message::Text(text) => ws.send(Message::Text(text)).await.unwrap(),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn dials_sends_and_receives() {
        let (addr, server) = echo_server().await;
        let (transport, mut events) = WsTransport::new(format!("ws://{addr}"));
        transport.open().await.unwrap();
        assert!(transport.is_open());
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        transport.send(r#"{"x":1}"#.into()).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message(r#"{"x":1}"#.into()))
        );

        transport.close().await;
        assert!(!transport.is_open());
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_before_open_fails() {
        let (transport, _events) = WsTransport::new("ws://127.0.0.1:9");
        let err = transport.send("x".into()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn dial_failure_is_reported() {
        // Nothing listens on the discard port.
        let (transport, _events) = WsTransport::new("ws://127.0.0.1:9");
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn factory_creates_unopened_transports() {
        let factory = WsTransportFactory::new("ws://127.0.0.1:9");
        let (transport, _events) = factory.create();
        assert!(!transport.is_open());
    }
}
