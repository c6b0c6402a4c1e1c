//! The central adapter: a native-binding-shaped façade multiplexing
//! peripheral sessions over per-session sockets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cubelink_core::filters::{DiscoveryFilter, ScanOptions};
use cubelink_core::ids;
use cubelink_core::profile::{CUBE_PROFILE, ServiceSpec};
use cubelink_rpc::transport::TransportFactory;
use cubelink_rpc::ws::WsTransportFactory;
use cubelink_session::events::{PeripheralAdvert, RequestFailure, SessionEvent};
use cubelink_session::session::{PeripheralSession, SessionConfig};

use crate::config::LinkConfig;
use crate::events::{AdapterState, Advertisement, BindingError, BindingEvent};

/// A peripheral the central has seen advertise.
#[derive(Clone, Debug)]
pub struct DiscoveredPeripheral {
    /// Remote-assigned identifier (doubles as the address).
    pub peripheral_id: String,
    /// Advertised display name at the latest sighting.
    pub local_name: Option<String>,
    /// Signal strength at the latest sighting.
    pub rssi: Option<i64>,
    /// Static service topology copied at first sighting.
    pub profile: &'static ServiceSpec,
    /// Whether a connect is in progress.
    pub connecting: bool,
    /// Whether the deferred connect request has been issued.
    pub requested_connect: bool,
    /// Owner key of the session dedicated to this peripheral.
    pub owner_key: Option<u64>,
}

/// The process-wide central. Constructed explicitly and bracketed by
/// `init`/`shutdown`; no global instance exists.
#[derive(Clone)]
pub struct BleCentral {
    inner: Arc<CentralInner>,
}

struct CentralInner {
    factory: Arc<dyn TransportFactory>,
    config: LinkConfig,
    keep_scanning: AtomicBool,
    allow_duplicates: AtomicBool,
    scan_request: Mutex<Vec<DiscoveryFilter>>,
    scan_key: Mutex<Option<u64>>,
    sessions: Mutex<BTreeMap<u64, PeripheralSession>>,
    peripherals: Mutex<HashMap<String, DiscoveredPeripheral>>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    events_tx: mpsc::UnboundedSender<BindingEvent>,
    shutdown: CancellationToken,
}

impl BleCentral {
    /// Build a central over `factory` and return it with the stream of
    /// binding events.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<BindingEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(CentralInner {
            factory,
            config,
            keep_scanning: AtomicBool::new(false),
            allow_duplicates: AtomicBool::new(false),
            scan_request: Mutex::new(Vec::new()),
            scan_key: Mutex::new(None),
            sessions: Mutex::new(BTreeMap::new()),
            peripherals: Mutex::new(HashMap::new()),
            session_tx,
            events_tx,
            shutdown: CancellationToken::new(),
        });
        let pump = inner.clone();
        let _ = tokio::spawn(pump.run(session_rx));
        (Self { inner }, events_rx)
    }

    /// Build a central dialing the configured WebSocket endpoint.
    pub fn with_websocket(config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<BindingEvent>) {
        let factory = Arc::new(WsTransportFactory::new(config.endpoint.clone()));
        Self::new(factory, config)
    }

    /// Announce readiness; a conventional binding reports powered-on
    /// before accepting scans.
    pub fn init(&self) {
        info!("central initialized");
        self.inner
            .emit(BindingEvent::StateChange(AdapterState::PoweredOn));
    }

    /// Start scanning. Only one scan can be active at a time; a second
    /// call while active is a logged no-op. With `allow_duplicates`,
    /// repeat sightings of the same peripheral re-emit discovery.
    pub fn start_scanning(&self, options: impl Into<ScanOptions>, allow_duplicates: bool) {
        let inner = &self.inner;
        if inner.keep_scanning.load(Ordering::SeqCst) {
            warn!("scan already active, ignoring start_scanning");
            return;
        }
        let filters = options.into().into_filters();
        debug!(?filters, allow_duplicates, "starting scan");
        *inner.scan_request.lock() = filters;
        inner.allow_duplicates.store(allow_duplicates, Ordering::SeqCst);
        inner.keep_scanning.store(true, Ordering::SeqCst);

        // A restart after stop_scanning gets a fresh scan session; the
        // previous one is torn down first.
        let previous = inner.scan_key.lock().take();
        if let Some(key) = previous {
            let stale = inner.sessions.lock().get(&key).cloned();
            if let Some(stale) = stale {
                let _ = tokio::spawn(async move { stale.disconnect().await });
            }
        }
        let key = inner.spawn_session(None);
        *inner.scan_key.lock() = Some(key);
        inner.emit(BindingEvent::ScanStart);
    }

    /// Stop emitting discovery events. Local only: the remote API has
    /// no unsubscribe, so the request channel stays open.
    pub fn stop_scanning(&self) {
        self.inner.keep_scanning.store(false, Ordering::SeqCst);
        self.inner.emit(BindingEvent::ScanStop);
    }

    /// Begin connecting to a discovered peripheral: marks the record
    /// and allocates its dedicated session. The remote connect request
    /// itself is deferred until the new session sights the target.
    pub fn connect(&self, peripheral_id: &str) {
        let inner = &self.inner;
        {
            let mut peripherals = inner.peripherals.lock();
            match peripherals.get_mut(peripheral_id) {
                Some(record) if record.connecting => {
                    warn!(peripheral_id, "connect already in progress, ignoring");
                    return;
                }
                Some(record) => record.connecting = true,
                None => {
                    warn!(peripheral_id, "connect on unknown peripheral, ignoring");
                    return;
                }
            }
        }
        let key = inner.spawn_session(Some(peripheral_id.to_owned()));
        if let Some(record) = inner.peripherals.lock().get_mut(peripheral_id) {
            record.owner_key = Some(key);
        }
        debug!(peripheral_id, owner_key = key, "session allocated for connect");
    }

    /// Issue the deferred connect request exactly once; later calls hit
    /// the `requested_connect` guard and are no-ops.
    pub fn start_connect(&self, peripheral_id: &str) {
        self.inner.start_connect(peripheral_id);
    }

    /// Disconnect a peripheral. The top-level disconnect event is
    /// emitted regardless of session internal state.
    pub async fn disconnect(&self, peripheral_id: &str) {
        self.inner.disconnect(peripheral_id).await;
    }

    /// Service discovery, answered from the static profile with no
    /// remote round-trip.
    pub fn discover_services(&self, peripheral_id: &str) {
        let inner = &self.inner;
        let Some(profile) = inner
            .peripherals
            .lock()
            .get(peripheral_id)
            .map(|record| record.profile)
        else {
            warn!(peripheral_id, "discover_services on unknown peripheral, ignoring");
            return;
        };
        inner.emit(BindingEvent::ServicesDiscover {
            peripheral_id: peripheral_id.to_owned(),
            service_uuids: vec![profile.uuid.to_owned()],
        });
    }

    /// Characteristic discovery, answered from the static profile with
    /// no remote round-trip.
    pub fn discover_characteristics(&self, peripheral_id: &str, service_uuid: &str) {
        let inner = &self.inner;
        let Some(profile) = inner
            .peripherals
            .lock()
            .get(peripheral_id)
            .map(|record| record.profile)
        else {
            warn!(peripheral_id, "discover_characteristics on unknown peripheral, ignoring");
            return;
        };
        if profile.uuid != ids::strip_dashes(service_uuid) {
            warn!(peripheral_id, service_uuid, "unknown service, ignoring");
            return;
        }
        inner.emit(BindingEvent::CharacteristicsDiscover {
            peripheral_id: peripheral_id.to_owned(),
            service_uuid: service_uuid.to_owned(),
            characteristics: profile.characteristics,
        });
    }

    /// Read a characteristic and emit its decoded payload as a `Read`
    /// event. Failures surface as `Error` events, never as panics or
    /// returned errors; an unknown peripheral is a logged no-op.
    pub async fn read(&self, peripheral_id: &str, service_uuid: &str, characteristic_uuid: &str) {
        let inner = &self.inner;
        let Some(session) = inner.session_for(peripheral_id) else {
            warn!(peripheral_id, "read on peripheral without a session, ignoring");
            return;
        };
        let outcome = session
            .read(
                &ids::add_dashes(service_uuid),
                &ids::add_dashes(characteristic_uuid),
                false,
                None,
            )
            .await;
        match outcome {
            Ok(value) => match decode_message(&value) {
                Ok(data) => inner.emit(BindingEvent::Read {
                    peripheral_id: peripheral_id.to_owned(),
                    service_uuid: service_uuid.to_owned(),
                    characteristic_uuid: characteristic_uuid.to_owned(),
                    data,
                    is_notification: false,
                }),
                Err(message) => inner.emit_error(Some(peripheral_id), message, None),
            },
            Err(failure) => inner.report_failure(Some(peripheral_id), "read failed", failure),
        }
    }

    /// Write a characteristic and emit a `Write` event on completion.
    /// `without_response` selects unconfirmed delivery; the wire's
    /// `withResponse` flag is its inversion.
    pub async fn write(
        &self,
        peripheral_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        data: &[u8],
        without_response: bool,
    ) {
        let inner = &self.inner;
        let Some(session) = inner.session_for(peripheral_id) else {
            warn!(peripheral_id, "write on peripheral without a session, ignoring");
            return;
        };
        let message = BASE64_STANDARD.encode(data);
        let outcome = session
            .write(
                &ids::add_dashes(service_uuid),
                &ids::add_dashes(characteristic_uuid),
                &message,
                Some("base64"),
                Some(!without_response),
            )
            .await;
        match outcome {
            Ok(_) => inner.emit(BindingEvent::Write {
                peripheral_id: peripheral_id.to_owned(),
                service_uuid: service_uuid.to_owned(),
                characteristic_uuid: characteristic_uuid.to_owned(),
            }),
            Err(failure) => inner.report_failure(Some(peripheral_id), "write failed", failure),
        }
    }

    /// Subscribe or unsubscribe a characteristic's change stream.
    /// While subscribed, pushed values re-emit as `Read` events with
    /// the notification flag set.
    pub async fn notify(
        &self,
        peripheral_id: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
        enabled: bool,
    ) {
        let inner = &self.inner;
        let Some(session) = inner.session_for(peripheral_id) else {
            warn!(peripheral_id, "notify on peripheral without a session, ignoring");
            return;
        };
        let dashed_service = ids::add_dashes(service_uuid);
        let dashed_characteristic = ids::add_dashes(characteristic_uuid);
        let outcome = if enabled {
            let events = inner.events_tx.clone();
            let peripheral = peripheral_id.to_owned();
            let service = service_uuid.to_owned();
            let characteristic = characteristic_uuid.to_owned();
            session
                .start_notifications(
                    &dashed_service,
                    &dashed_characteristic,
                    Box::new(move |change| match BASE64_STANDARD.decode(&change.message) {
                        Ok(data) => {
                            let _ = events.send(BindingEvent::Read {
                                peripheral_id: peripheral.clone(),
                                service_uuid: service.clone(),
                                characteristic_uuid: characteristic.clone(),
                                data,
                                is_notification: true,
                            });
                        }
                        Err(e) => warn!(error = %e, "undecodable notification payload"),
                    }),
                )
                .await
        } else {
            session
                .stop_notifications(&dashed_service, &dashed_characteristic)
                .await
        };
        match outcome {
            Ok(()) => inner.emit(BindingEvent::Notify {
                peripheral_id: peripheral_id.to_owned(),
                service_uuid: service_uuid.to_owned(),
                characteristic_uuid: characteristic_uuid.to_owned(),
                enabled,
            }),
            Err(failure) => {
                inner.report_failure(Some(peripheral_id), "notification change failed", failure);
            }
        }
    }

    /// Snapshot of a discovered peripheral record.
    pub fn peripheral(&self, peripheral_id: &str) -> Option<DiscoveredPeripheral> {
        self.inner.peripherals.lock().get(peripheral_id).cloned()
    }

    /// Tear down every session and stop the event pump.
    pub async fn shutdown(&self) {
        info!("central shutting down");
        self.inner.keep_scanning.store(false, Ordering::SeqCst);
        let sessions: Vec<PeripheralSession> =
            self.inner.sessions.lock().values().cloned().collect();
        for session in sessions {
            session.disconnect().await;
        }
        self.inner.shutdown.cancel();
        self.inner
            .emit(BindingEvent::StateChange(AdapterState::PoweredOff));
    }
}

impl CentralInner {
    fn emit(&self, event: BindingEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("binding event receiver dropped");
        }
    }

    fn emit_error(&self, peripheral_id: Option<&str>, message: impl Into<String>, detail: Option<Value>) {
        self.emit(BindingEvent::Error(BindingError {
            peripheral_id: peripheral_id.map(ToOwned::to_owned),
            message: message.into(),
            detail,
        }));
    }

    fn report_failure(&self, peripheral_id: Option<&str>, context: &str, failure: RequestFailure) {
        warn!(?peripheral_id, error = %failure, context, "request failed");
        let RequestFailure { message, detail } = failure;
        self.emit_error(peripheral_id, format!("{context}: {message}"), detail);
    }

    fn spawn_session(&self, peripheral_id: Option<String>) -> u64 {
        let (transport, transport_events) = self.factory.create();
        let mut sessions = self.sessions.lock();
        // Owner keys are never reused for live sessions: next = max + 1.
        let key = sessions.last_key_value().map_or(0, |(key, _)| key + 1);
        let session = PeripheralSession::new(
            SessionConfig {
                owner_key: key,
                scan_request: self.scan_request.lock().clone(),
                peripheral_id,
                reset_hook: None,
                request_timeout: self.config.request_timeout(),
            },
            transport,
            transport_events,
            self.session_tx.clone(),
        );
        let _ = sessions.insert(key, session);
        key
    }

    fn session_for(&self, peripheral_id: &str) -> Option<PeripheralSession> {
        let key = self.peripherals.lock().get(peripheral_id)?.owner_key?;
        self.sessions.lock().get(&key).cloned()
    }

    fn peripheral_for_key(&self, owner_key: u64) -> Option<String> {
        // Targeted sessions know their peripheral; scan sessions do not.
        self.sessions
            .lock()
            .get(&owner_key)
            .and_then(|session| session.peripheral_id().map(ToOwned::to_owned))
    }

    fn start_connect(&self, peripheral_id: &str) {
        let should_request = {
            let mut peripherals = self.peripherals.lock();
            match peripherals.get_mut(peripheral_id) {
                Some(record) if record.requested_connect => false,
                Some(record) => {
                    record.requested_connect = true;
                    true
                }
                None => {
                    warn!(peripheral_id, "start_connect on unknown peripheral, ignoring");
                    false
                }
            }
        };
        if !should_request {
            return;
        }
        let Some(session) = self.session_for(peripheral_id) else {
            warn!(peripheral_id, "start_connect without a session, ignoring");
            return;
        };
        let peripheral_id = peripheral_id.to_owned();
        let _ = tokio::spawn(async move { session.connect(&peripheral_id).await });
    }

    async fn disconnect(&self, peripheral_id: &str) {
        if let Some(session) = self.session_for(peripheral_id) {
            session.disconnect().await;
        }
        self.emit(BindingEvent::Disconnect {
            peripheral_id: peripheral_id.to_owned(),
        });
    }

    async fn run(self: Arc<Self>, mut session_rx: mpsc::UnboundedReceiver<SessionEvent>) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = session_rx.recv() => match event {
                    Some(event) => self.handle_session_event(event).await,
                    None => break,
                },
            }
        }
        debug!("central event pump stopped");
    }

    async fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Discovered { advert, .. } => self.on_discovered(advert),
            SessionEvent::TargetSighted { peripheral_id, .. } => self.start_connect(&peripheral_id),
            SessionEvent::Connected { peripheral_id, .. } => {
                debug!(peripheral_id, "peripheral connected");
                self.emit(BindingEvent::Connect { peripheral_id });
            }
            SessionEvent::Disconnected { owner_key } => {
                debug!(owner_key, "session disconnected");
            }
            SessionEvent::DisconnectError { owner_key } => {
                // Involuntary loss funnels into the regular disconnect
                // path so consumers observe a plain disconnect.
                match self.peripheral_for_key(owner_key) {
                    Some(peripheral_id) => {
                        warn!(owner_key, peripheral_id, "connection lost, disconnecting");
                        self.disconnect(&peripheral_id).await;
                    }
                    None => warn!(owner_key, "connection lost on session with no peripheral"),
                }
            }
            SessionEvent::RequestError { owner_key, failure } => {
                let peripheral_id = self.peripheral_for_key(owner_key);
                warn!(owner_key, ?peripheral_id, error = %failure, "session request error");
                let RequestFailure { message, detail } = failure;
                self.emit_error(peripheral_id.as_deref(), message, detail);
            }
            SessionEvent::Picked { owner_key, advert } => {
                debug!(owner_key, peripheral_id = advert.peripheral_id, "user picked peripheral");
            }
            SessionEvent::NotPicked { owner_key } => {
                debug!(owner_key, "user did not pick a peripheral");
            }
        }
    }

    fn on_discovered(&self, advert: PeripheralAdvert) {
        if !self.keep_scanning.load(Ordering::SeqCst) {
            return;
        }
        let emit = {
            let mut peripherals = self.peripherals.lock();
            match peripherals.get_mut(&advert.peripheral_id) {
                // Records mid-connection are never touched.
                Some(record) if record.connecting => false,
                Some(record) => {
                    record.local_name = advert.name.clone();
                    record.rssi = advert.rssi;
                    self.allow_duplicates.load(Ordering::SeqCst)
                }
                None => {
                    let _ = peripherals.insert(
                        advert.peripheral_id.clone(),
                        DiscoveredPeripheral {
                            peripheral_id: advert.peripheral_id.clone(),
                            local_name: advert.name.clone(),
                            rssi: advert.rssi,
                            profile: &CUBE_PROFILE,
                            connecting: false,
                            requested_connect: false,
                            owner_key: None,
                        },
                    );
                    true
                }
            }
        };
        if !emit {
            return;
        }
        self.emit(BindingEvent::Discover {
            peripheral_id: advert.peripheral_id.clone(),
            address: advert.peripheral_id,
            address_type: String::new(),
            connectable: true,
            advertisement: Advertisement {
                local_name: advert.name,
            },
            rssi: advert.rssi,
        });
    }
}

fn decode_message(value: &Value) -> Result<Vec<u8>, String> {
    let Some(message) = value.get("message").and_then(Value::as_str) else {
        return Err("read result carried no message field".into());
    };
    BASE64_STANDARD
        .decode(message)
        .map_err(|e| format!("undecodable read payload: {e}"))
}
