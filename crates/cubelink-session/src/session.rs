//! One logical peripheral connection over one owned RPC channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use cubelink_core::filters::DiscoveryFilter;
use cubelink_rpc::channel::{ChannelObserver, RpcChannel};
use cubelink_rpc::errors::CallError;
use cubelink_rpc::transport::{Transport, TransportEvent};

use crate::events::{CharacteristicChange, PeripheralAdvert, RequestFailure, SessionEvent};

/// Liveness value answered to remote `ping` calls.
const PING_REPLY: i64 = 42;

/// Callback invoked for each change notification on a subscribed
/// characteristic pair.
pub type ChangeCallback = Box<dyn Fn(CharacteristicChange) + Send + Sync>;

/// Hook run when the connection is lost involuntarily, before the
/// `DisconnectError` event is emitted.
pub type ResetHook = Box<dyn Fn() + Send + Sync>;

/// Everything needed to build a session.
pub struct SessionConfig {
    /// Owner-assigned key attached to every event.
    pub owner_key: u64,
    /// Discovery filters sent with the `discover` request on open.
    pub scan_request: Vec<DiscoveryFilter>,
    /// Target peripheral id; `None` for a scanning session.
    pub peripheral_id: Option<String>,
    /// Optional cleanup hook for involuntary loss.
    pub reset_hook: Option<ResetHook>,
    /// Optional per-request deadline.
    pub request_timeout: Option<Duration>,
}

/// One peripheral session: a small async API over one RPC channel,
/// usable whether or not a specific peripheral has been chosen yet.
#[derive(Clone)]
pub struct PeripheralSession {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    me: Weak<SessionShared>,
    owner_key: u64,
    peripheral_id: Option<String>,
    scan_request: Vec<DiscoveryFilter>,
    connected: AtomicBool,
    channel: OnceLock<RpcChannel>,
    change_callbacks: Mutex<HashMap<(String, String), ChangeCallback>>,
    available_peripherals: Mutex<HashMap<String, PeripheralAdvert>>,
    reset_hook: Option<ResetHook>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PeripheralSession {
    /// Build a session over `transport` and open its channel eagerly.
    ///
    /// Once the transport reports open, the session clears its
    /// discovery cache and issues the `discover` request carrying the
    /// configured filters; the targeted connect flow rides the same
    /// discovery round as scanning.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let shared = Arc::new_cyclic(|me| SessionShared {
            me: me.clone(),
            owner_key: config.owner_key,
            peripheral_id: config.peripheral_id,
            scan_request: config.scan_request,
            connected: AtomicBool::new(false),
            channel: OnceLock::new(),
            change_callbacks: Mutex::new(HashMap::new()),
            available_peripherals: Mutex::new(HashMap::new()),
            reset_hook: config.reset_hook,
            events,
        });

        let observer: Arc<dyn ChannelObserver> = shared.clone();
        let mut channel = RpcChannel::new(transport, transport_events, observer);
        if let Some(timeout) = config.request_timeout {
            channel = channel.with_request_timeout(timeout);
        }
        let _ = shared.channel.set(channel);

        let session = Self { shared };
        session.spawn_open();
        session
    }

    /// Owner key attached to every event this session emits.
    pub fn owner_key(&self) -> u64 {
        self.shared.owner_key
    }

    /// Target peripheral id, when this session was created for one.
    pub fn peripheral_id(&self) -> Option<&str> {
        self.shared.peripheral_id.as_deref()
    }

    /// Whether the remote `connect` request has succeeded.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Re-issue discovery. If the channel is not open yet it is opened
    /// first, and the `discover` request rides the open transition.
    pub async fn request_peripheral(&self) {
        let Some(channel) = self.shared.channel.get() else {
            return;
        };
        if channel.is_open() {
            self.shared.send_discover().await;
        } else if let Err(e) = channel.open().await {
            self.shared.report_request_error(RequestFailure {
                message: format!("failed to open socket: {e}"),
                detail: None,
            });
        }
    }

    /// Issue the remote `connect` request for `peripheral_id`.
    ///
    /// Success marks the session connected and emits `Connected`;
    /// failure emits `RequestError`. Like discovery, this is a
    /// long-lived flow: the caller gets events, not a result.
    pub async fn connect(&self, peripheral_id: &str) {
        let shared = &self.shared;
        let Some(channel) = shared.channel.get() else {
            return;
        };
        match channel
            .send_request("connect", json!({ "peripheralId": peripheral_id }))
            .await
        {
            Ok(_) => {
                shared.connected.store(true, Ordering::SeqCst);
                debug!(owner_key = shared.owner_key, peripheral_id, "connected");
                shared.emit(SessionEvent::Connected {
                    owner_key: shared.owner_key,
                    peripheral_id: peripheral_id.to_owned(),
                });
            }
            Err(e) => shared.report_request_error(e.into()),
        }
    }

    /// Tear the session down. Idempotent; `Disconnected` is emitted
    /// exactly once per connected transition, and the channel is
    /// closed if still open.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        if shared.connected.swap(false, Ordering::SeqCst) {
            shared.emit(SessionEvent::Disconnected {
                owner_key: shared.owner_key,
            });
        }
        if let Some(channel) = shared.channel.get() {
            if channel.is_open() {
                channel.close().await;
            }
        }
    }

    /// Read a characteristic. `start_notifications` additionally
    /// subscribes the pair to change notifications as a side effect;
    /// `on_change` registers the callback receiving them.
    pub async fn read(
        &self,
        service_id: &str,
        characteristic_id: &str,
        start_notifications: bool,
        on_change: Option<ChangeCallback>,
    ) -> Result<Value, RequestFailure> {
        let mut params = json!({
            "serviceId": service_id,
            "characteristicId": characteristic_id,
        });
        if start_notifications {
            params["startNotifications"] = json!(true);
        }
        if let Some(on_change) = on_change {
            let _ = self
                .shared
                .change_callbacks
                .lock()
                .insert(pair_key(service_id, characteristic_id), on_change);
        }
        self.shared.request("read", params).await
    }

    /// Write a characteristic, with an optional encoding tag and an
    /// optional delivery-confirmation flag.
    pub async fn write(
        &self,
        service_id: &str,
        characteristic_id: &str,
        message: &str,
        encoding: Option<&str>,
        with_response: Option<bool>,
    ) -> Result<Value, RequestFailure> {
        let mut params = json!({
            "serviceId": service_id,
            "characteristicId": characteristic_id,
            "message": message,
        });
        if let Some(encoding) = encoding {
            params["encoding"] = json!(encoding);
        }
        if let Some(with_response) = with_response {
            params["withResponse"] = json!(with_response);
        }
        self.shared.request("write", params).await
    }

    /// Subscribe to change notifications for a characteristic pair.
    pub async fn start_notifications(
        &self,
        service_id: &str,
        characteristic_id: &str,
        on_change: ChangeCallback,
    ) -> Result<(), RequestFailure> {
        let _ = self
            .shared
            .change_callbacks
            .lock()
            .insert(pair_key(service_id, characteristic_id), on_change);
        let params = json!({
            "serviceId": service_id,
            "characteristicId": characteristic_id,
        });
        self.shared.request("startNotifications", params).await.map(|_| ())
    }

    /// Unsubscribe a characteristic pair. The callback is dropped
    /// before the remote request, so in-flight notifications racing
    /// the unsubscribe are silently ignored.
    pub async fn stop_notifications(
        &self,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<(), RequestFailure> {
        let _ = self
            .shared
            .change_callbacks
            .lock()
            .remove(&pair_key(service_id, characteristic_id));
        let params = json!({
            "serviceId": service_id,
            "characteristicId": characteristic_id,
        });
        self.shared.request("stopNotifications", params).await.map(|_| ())
    }

    fn spawn_open(&self) {
        let shared = self.shared.clone();
        let _ = tokio::spawn(async move {
            let Some(channel) = shared.channel.get() else {
                return;
            };
            if let Err(e) = channel.open().await {
                shared.report_request_error(RequestFailure {
                    message: format!("failed to open socket: {e}"),
                    detail: None,
                });
            }
        });
    }
}

fn pair_key(service_id: &str, characteristic_id: &str) -> (String, String) {
    (service_id.to_owned(), characteristic_id.to_owned())
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!(owner_key = self.owner_key, "session event receiver dropped");
        }
    }

    fn report_request_error(&self, failure: RequestFailure) {
        warn!(owner_key = self.owner_key, error = %failure, "request failed");
        self.emit(SessionEvent::RequestError {
            owner_key: self.owner_key,
            failure,
        });
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RequestFailure> {
        let Some(channel) = self.channel.get() else {
            return Err(RequestFailure {
                message: "channel not wired".into(),
                detail: None,
            });
        };
        channel.send_request(method, params).await.map_err(Into::into)
    }

    async fn send_discover(&self) {
        self.available_peripherals.lock().clear();
        let filters = serde_json::to_value(&self.scan_request).unwrap_or_else(|_| json!([]));
        if let Err(e) = self
            .request("discover", json!({ "filters": filters }))
            .await
        {
            self.report_request_error(e);
        }
    }

    fn handle_discovered(&self, params: Value) {
        let advert: PeripheralAdvert = match serde_json::from_value(params) {
            Ok(advert) => advert,
            Err(e) => {
                warn!(error = %e, "malformed didDiscoverPeripheral payload");
                return;
            }
        };
        match &self.peripheral_id {
            None => {
                let _ = self
                    .available_peripherals
                    .lock()
                    .insert(advert.peripheral_id.clone(), advert.clone());
                self.emit(SessionEvent::Discovered {
                    owner_key: self.owner_key,
                    advert,
                });
            }
            Some(target) if *target == advert.peripheral_id => {
                self.emit(SessionEvent::TargetSighted {
                    owner_key: self.owner_key,
                    peripheral_id: advert.peripheral_id,
                });
            }
            Some(_) => {}
        }
    }

    fn handle_change(&self, params: Value) {
        let change: CharacteristicChange = match serde_json::from_value(params) {
            Ok(change) => change,
            Err(e) => {
                warn!(error = %e, "malformed characteristicDidChange payload");
                return;
            }
        };
        let key = pair_key(&change.service_id, &change.characteristic_id);
        let callbacks = self.change_callbacks.lock();
        match callbacks.get(&key) {
            Some(callback) => callback(change),
            // Late or unsubscribed notification.
            None => debug!(
                service_id = key.0,
                characteristic_id = key.1,
                "no callback registered for change"
            ),
        }
    }

    fn handle_picked(&self, params: Value) {
        let advert: PeripheralAdvert = match serde_json::from_value(params) {
            Ok(advert) => advert,
            Err(e) => {
                warn!(error = %e, "malformed userDidPickPeripheral payload");
                return;
            }
        };
        let _ = self
            .available_peripherals
            .lock()
            .insert(advert.peripheral_id.clone(), advert.clone());
        self.emit(SessionEvent::Picked {
            owner_key: self.owner_key,
            advert,
        });
    }
}

#[async_trait]
impl ChannelObserver for SessionShared {
    async fn on_call(&self, method: &str, params: Value) -> Result<Option<Value>, CallError> {
        match method {
            "didDiscoverPeripheral" => {
                self.handle_discovered(params);
                Ok(None)
            }
            "userDidPickPeripheral" => {
                self.handle_picked(params);
                Ok(None)
            }
            "userDidNotPickPeripheral" => {
                self.emit(SessionEvent::NotPicked {
                    owner_key: self.owner_key,
                });
                Ok(None)
            }
            "characteristicDidChange" => {
                self.handle_change(params);
                Ok(None)
            }
            "ping" => Ok(Some(json!(PING_REPLY))),
            other => {
                debug!(method = other, "ignoring unknown inbound call");
                Ok(None)
            }
        }
    }

    async fn on_open(&self) {
        debug!(owner_key = self.owner_key, "socket open, requesting discovery");
        // Spawned so the channel pump stays free to route the discover
        // response back to us.
        if let Some(me) = self.me.upgrade() {
            let _ = tokio::spawn(async move { me.send_discover().await });
        }
    }

    async fn on_close(&self) {
        // Voluntary `disconnect()` clears the flag before closing the
        // channel, so only involuntary loss lands here connected.
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(reset) = &self.reset_hook {
                reset();
            }
            warn!(owner_key = self.owner_key, "connection lost");
            self.emit(SessionEvent::DisconnectError {
                owner_key: self.owner_key,
            });
        }
    }

    async fn on_error(&self, message: String) {
        self.report_request_error(RequestFailure {
            message,
            detail: None,
        });
    }
}
