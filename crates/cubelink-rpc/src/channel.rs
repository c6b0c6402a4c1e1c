//! JSON-RPC 2.0 request/response correlation over one transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::errors::{CallError, ChannelError, TransportError};
use crate::transport::{Transport, TransportEvent};
use crate::types::{JSONRPC_VERSION, RpcMessage, RpcRequest, RpcResponse};

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, ChannelError>>>>;

/// Receives the transitions and inbound calls a channel cannot handle
/// alone. Implemented by the channel's owner (one session).
#[async_trait]
pub trait ChannelObserver: Send + Sync {
    /// An inbound call the remote initiated. Return `Ok(Some(v))` to
    /// answer with `result: v`, `Ok(None)` to answer with
    /// `result: null`, or `Err` to answer with an `error` payload.
    /// Nothing is sent when the call carried no id.
    async fn on_call(&self, method: &str, params: Value) -> Result<Option<Value>, CallError>;

    /// The transport finished opening.
    async fn on_open(&self);

    /// The transport closed; all pending requests have been rejected.
    async fn on_close(&self);

    /// The transport reported an error.
    async fn on_error(&self, message: String);
}

/// One JSON-RPC 2.0 conversation over one transport.
///
/// Requests get monotonic, never-reused ids; responses settle the
/// matching future regardless of arrival order. Inbound messages that
/// carry a `method` dispatch to the observer instead.
pub struct RpcChannel {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    request_timeout: Option<Duration>,
}

impl RpcChannel {
    /// Wire a channel over `transport`, dispatching transitions and
    /// inbound calls to `observer`. The pump task runs until the
    /// transport closes.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        observer: Arc<dyn ChannelObserver>,
    ) -> Self {
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let pump = Pump {
            transport: transport.clone(),
            pending: pending.clone(),
            closed: closed.clone(),
            observer,
        };
        let _ = tokio::spawn(pump.run(events));
        Self {
            transport,
            next_id: AtomicU64::new(0),
            pending,
            closed,
            request_timeout: None,
        }
    }

    /// Apply a deadline to every subsequent `send_request`. Without
    /// one, an unresponsive peer parks the request forever.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Open the underlying transport.
    pub async fn open(&self) -> Result<(), TransportError> {
        self.transport.open().await
    }

    /// Close the underlying transport. Pending requests are rejected
    /// when the close transition arrives.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// Whether the conversation can still carry requests.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_open()
    }

    /// Send a request and await the matching response.
    ///
    /// Resolves with the remote `result`, or fails with the remote
    /// `error` payload, transport failure, channel closure, or the
    /// configured deadline.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(Some(id), method, Some(params));
        let text =
            serde_json::to_string(&request).map_err(|e| ChannelError::ProtocolViolation {
                message: format!("unserializable request: {e}"),
            })?;

        let (tx, rx) = oneshot::channel();
        if let Some(older) = self.pending.lock().insert(id, tx) {
            // Monotonic allocation makes a collision unreachable in
            // practice; treat it as a violation against the older entry.
            let _ = older.send(Err(ChannelError::ProtocolViolation {
                message: format!("request id {id} reused while pending"),
            }));
        }

        debug!(method, request_id = id, "sending request");
        if let Err(e) = self.transport.send(text).await {
            let _ = self.pending.lock().remove(&id);
            return Err(ChannelError::Transport(e));
        }

        let settled = match self.request_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(settled) => settled,
                Err(_elapsed) => {
                    let _ = self.pending.lock().remove(&id);
                    warn!(method, request_id = id, "request deadline elapsed");
                    return Err(ChannelError::Timeout);
                }
            },
            None => rx.await,
        };
        match settled {
            Ok(outcome) => outcome,
            // The pump dropped the sender without settling it; the
            // conversation is gone.
            Err(_) => Err(ChannelError::Closed),
        }
    }

    /// Send a fire-and-forget notification (no id, no response).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let request = RpcRequest::new(None, method, Some(params));
        let text =
            serde_json::to_string(&request).map_err(|e| ChannelError::ProtocolViolation {
                message: format!("unserializable notification: {e}"),
            })?;
        debug!(method, "sending notification");
        self.transport.send(text).await.map_err(ChannelError::from)
    }
}

/// The task consuming transport transitions for one channel.
struct Pump {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingMap>,
    closed: Arc<AtomicBool>,
    observer: Arc<dyn ChannelObserver>,
}

impl Pump {
    async fn run(self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => self.observer.on_open().await,
                TransportEvent::Message(text) => self.handle_message(&text).await,
                TransportEvent::Error(message) => self.observer.on_error(message).await,
                TransportEvent::Closed => break,
            }
        }
        // Either the transport reported `Closed` or its event stream
        // was dropped; both end the conversation.
        self.closed.store(true, Ordering::SeqCst);
        self.reject_pending();
        self.observer.on_close().await;
    }

    fn reject_pending(&self) {
        let mut pending = self.pending.lock();
        for (id, tx) in pending.drain() {
            debug!(request_id = id, "rejecting request pending at close");
            let _ = tx.send(Err(ChannelError::Closed));
        }
    }

    async fn handle_message(&self, text: &str) {
        let message: RpcMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping unparseable message");
                return;
            }
        };
        if message.version() != JSONRPC_VERSION {
            warn!(version = message.version(), "dropping message with bad JSON-RPC version");
            return;
        }
        match message {
            RpcMessage::Call(call) => self.handle_call(call).await,
            RpcMessage::Response(response) => self.handle_response(response),
        }
    }

    fn handle_response(&self, response: RpcResponse) {
        let Some(id) = response.id else {
            warn!("ignoring response without an id");
            return;
        };
        let Some(tx) = self.pending.lock().remove(&id) else {
            // Late or duplicate response; never raised to the caller.
            warn!(request_id = id, "ignoring response with no pending request");
            return;
        };
        let settled = match response.error {
            Some(error) if !error.is_null() => Err(ChannelError::Remote { error }),
            _ => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(settled);
    }

    async fn handle_call(&self, call: RpcRequest) {
        debug!(method = call.method, "inbound call");
        let params = call.params.unwrap_or(Value::Null);
        let outcome = self.observer.on_call(&call.method, params).await;
        let Some(id) = call.id else {
            // Inbound notification: nothing to answer.
            return;
        };
        let response = match outcome {
            Ok(result) => RpcResponse::result(id, result),
            Err(error) => RpcResponse::error(id, error.to_value()),
        };
        match serde_json::to_string(&response) {
            Ok(text) => {
                if let Err(e) = self.transport.send(text).await {
                    warn!(request_id = id, error = %e, "failed to answer inbound call");
                }
            }
            Err(e) => warn!(request_id = id, error = %e, "failed to serialize response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MockRemote};
    use proptest::prelude::*;
    use serde_json::json;

    // ── Test observers ──────────────────────────────────────────────

    struct NullObserver;

    #[async_trait]
    impl ChannelObserver for NullObserver {
        async fn on_call(&self, _method: &str, _params: Value) -> Result<Option<Value>, CallError> {
            Ok(None)
        }
        async fn on_open(&self) {}
        async fn on_close(&self) {}
        async fn on_error(&self, _message: String) {}
    }

    struct EchoObserver;

    #[async_trait]
    impl ChannelObserver for EchoObserver {
        async fn on_call(&self, method: &str, params: Value) -> Result<Option<Value>, CallError> {
            match method {
                "echo" => Ok(Some(params)),
                "silent" => Ok(None),
                _ => Err(CallError::new(CallError::METHOD_NOT_FOUND, "no such method")),
            }
        }
        async fn on_open(&self) {}
        async fn on_close(&self) {}
        async fn on_error(&self, _message: String) {}
    }

    async fn open_channel(observer: Arc<dyn ChannelObserver>) -> (Arc<RpcChannel>, MockRemote) {
        let (transport, events, remote) = testing::pair();
        let channel = Arc::new(RpcChannel::new(transport, events, observer));
        channel.open().await.unwrap();
        (channel, remote)
    }

    async fn sent_request(remote: &mut MockRemote) -> Value {
        let text = remote.next_sent().await.expect("a frame should be sent");
        serde_json::from_str(&text).unwrap()
    }

    fn respond_result(remote: &MockRemote, id: u64, result: Value) {
        remote.push(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
    }

    // ── Request/response correlation ────────────────────────────────

    #[tokio::test]
    async fn request_resolves_with_result() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("read", json!({"serviceId": "s"})).await }
        });
        let sent = sent_request(&mut remote).await;
        assert_eq!(sent["jsonrpc"], "2.0");
        assert_eq!(sent["method"], "read");
        assert_eq!(sent["params"]["serviceId"], "s");
        respond_result(&remote, sent["id"].as_u64().unwrap(), json!({"message": "AQID"}));
        let result = pending.await.unwrap().unwrap();
        assert_eq!(result["message"], "AQID");
    }

    #[tokio::test]
    async fn request_rejects_with_remote_error() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("connect", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        let id = sent["id"].as_u64().unwrap();
        remote.push(json!({"jsonrpc": "2.0", "id": id, "error": {"message": "denied"}}).to_string());
        let err = pending.await.unwrap().unwrap_err();
        let ChannelError::Remote { error } = err else {
            panic!("expected remote error, got {err:?}");
        };
        assert_eq!(error["message"], "denied");
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        for expected in 0..4u64 {
            let pending = tokio::spawn({
                let channel = channel.clone();
                async move { channel.send_request("noop", json!({})).await }
            });
            let sent = sent_request(&mut remote).await;
            assert_eq!(sent["id"].as_u64(), Some(expected));
            respond_result(&remote, expected, Value::Null);
            pending.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn responses_match_out_of_order() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let mut handles = Vec::new();
        for i in 0..3u64 {
            handles.push(tokio::spawn({
                let channel = channel.clone();
                async move { channel.send_request("slot", json!({"i": i})).await }
            }));
        }
        // Map request id -> the caller index embedded in params.
        let mut by_id = Vec::new();
        for _ in 0..3 {
            let sent = sent_request(&mut remote).await;
            by_id.push((sent["id"].as_u64().unwrap(), sent["params"]["i"].as_u64().unwrap()));
        }
        // Answer in reverse arrival order.
        for (id, i) in by_id.iter().rev() {
            respond_result(&remote, *id, json!(*i));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, json!(i as u64));
        }
    }

    #[test]
    fn correlation_survives_any_response_order() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        proptest!(ProptestConfig::with_cases(16), |(order in Just((0..6u64).collect::<Vec<_>>()).prop_shuffle())| {
            runtime.block_on(async {
                let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
                let mut handles = Vec::new();
                for i in 0..6u64 {
                    handles.push(tokio::spawn({
                        let channel = channel.clone();
                        async move { channel.send_request("slot", json!({"i": i})).await }
                    }));
                }
                let mut id_of_slot = HashMap::new();
                for _ in 0..6 {
                    let sent = sent_request(&mut remote).await;
                    let _ = id_of_slot.insert(
                        sent["params"]["i"].as_u64().unwrap(),
                        sent["id"].as_u64().unwrap(),
                    );
                }
                for slot in &order {
                    respond_result(&remote, id_of_slot[slot], json!(*slot));
                }
                for (i, handle) in handles.into_iter().enumerate() {
                    let result = handle.await.unwrap().unwrap();
                    prop_assert_eq!(result, json!(i as u64));
                }
                Ok(())
            })?;
        });
    }

    // ── Closure ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_rejects_all_pending_requests() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(tokio::spawn({
                let channel = channel.clone();
                async move { channel.send_request("stall", json!({})).await }
            }));
        }
        for _ in 0..3 {
            let _ = sent_request(&mut remote).await;
        }
        remote.close();
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, ChannelError::Closed), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn send_request_after_close_fails_immediately() {
        let (channel, remote) = open_channel(Arc::new(NullObserver)).await;
        remote.close();
        // Wait for the pump to observe the close.
        tokio::task::yield_now().await;
        let mut err = channel.send_request("late", json!({})).await.unwrap_err();
        // The closed flag flips on the pump task; poll until settled.
        for _ in 0..100 {
            if matches!(err, ChannelError::Closed) {
                break;
            }
            tokio::task::yield_now().await;
            err = channel.send_request("late", json!({})).await.unwrap_err();
        }
        assert!(matches!(err, ChannelError::Closed), "got {err:?}");
    }

    #[tokio::test]
    async fn notification_carries_no_id_and_awaits_nothing() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        channel.send_notification("hint", json!({"x": 1})).await.unwrap();
        let sent = sent_request(&mut remote).await;
        assert_eq!(sent["method"], "hint");
        assert!(sent.get("id").is_none());
    }

    // ── Inbound handling ────────────────────────────────────────────

    #[tokio::test]
    async fn inbound_call_with_id_gets_result_response() {
        let (_channel, mut remote) = open_channel(Arc::new(EchoObserver)).await;
        remote.push(r#"{"jsonrpc":"2.0","id":5,"method":"echo","params":{"x":1}}"#);
        let answer = sent_request(&mut remote).await;
        assert_eq!(answer["jsonrpc"], "2.0");
        assert_eq!(answer["id"], 5);
        assert_eq!(answer["result"]["x"], 1);
        assert!(answer.get("error").is_none());
    }

    #[tokio::test]
    async fn inbound_call_without_value_answers_null() {
        let (_channel, mut remote) = open_channel(Arc::new(EchoObserver)).await;
        remote.push(r#"{"jsonrpc":"2.0","id":6,"method":"silent"}"#);
        let answer = sent_request(&mut remote).await;
        assert_eq!(answer["id"], 6);
        assert_eq!(answer["result"], Value::Null);
    }

    #[tokio::test]
    async fn inbound_call_failure_answers_error() {
        let (_channel, mut remote) = open_channel(Arc::new(EchoObserver)).await;
        remote.push(r#"{"jsonrpc":"2.0","id":7,"method":"unknown"}"#);
        let answer = sent_request(&mut remote).await;
        assert_eq!(answer["id"], 7);
        assert_eq!(answer["error"]["code"], -32601);
        assert!(answer.get("result").is_none());
    }

    #[tokio::test]
    async fn inbound_notification_gets_no_response() {
        let (channel, mut remote) = open_channel(Arc::new(EchoObserver)).await;
        remote.push(r#"{"jsonrpc":"2.0","method":"echo","params":{"x":1}}"#);
        // Follow with a request round-trip to prove nothing was sent
        // for the notification.
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("probe", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        assert_eq!(sent["method"], "probe");
        respond_result(&remote, sent["id"].as_u64().unwrap(), Value::Null);
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bad_version_is_dropped() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("probe", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        let id = sent["id"].as_u64().unwrap();
        // Version-mismatched response must not settle the request.
        remote.push(json!({"jsonrpc": "1.0", "id": id, "result": 1}).to_string());
        remote.push(json!({"jsonrpc": "2.0", "id": id, "result": 2}).to_string());
        let result = pending.await.unwrap().unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn unmatched_response_is_ignored() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        remote.push(r#"{"jsonrpc":"2.0","id":999,"result":"stale"}"#);
        remote.push("not json at all");
        // The channel must still be usable.
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("probe", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        respond_result(&remote, sent["id"].as_u64().unwrap(), json!("fresh"));
        assert_eq!(pending.await.unwrap().unwrap(), json!("fresh"));
    }

    #[tokio::test]
    async fn response_without_result_or_error_resolves_null() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("probe", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        let id = sent["id"].as_u64().unwrap();
        remote.push(json!({"jsonrpc": "2.0", "id": id}).to_string());
        assert_eq!(pending.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn null_error_field_resolves_with_result() {
        let (channel, mut remote) = open_channel(Arc::new(NullObserver)).await;
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("probe", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        let id = sent["id"].as_u64().unwrap();
        remote.push(json!({"jsonrpc": "2.0", "id": id, "result": 3, "error": null}).to_string());
        assert_eq!(pending.await.unwrap().unwrap(), json!(3));
    }

    // ── Timeout ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn configured_deadline_fails_silent_requests() {
        let (transport, events, mut remote) = testing::pair();
        let channel = Arc::new(
            RpcChannel::new(transport, events, Arc::new(NullObserver))
                .with_request_timeout(Duration::from_secs(5)),
        );
        channel.open().await.unwrap();
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("stall", json!({})).await }
        });
        let _ = sent_request(&mut remote).await;
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Timeout), "got {err:?}");

        // The pending slot is gone; the next request works normally.
        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_request("probe", json!({})).await }
        });
        let sent = sent_request(&mut remote).await;
        respond_result(&remote, sent["id"].as_u64().unwrap(), json!("ok"));
        assert_eq!(pending.await.unwrap().unwrap(), json!("ok"));
    }
}
