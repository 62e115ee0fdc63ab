//! In-memory transport and scripted server side for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use curve_events::{
    ClientConfig, Connection, CurveEventClient, EventId, Filter, Frame, NameFilter,
    StreamSettings, SubscribeError, Transport, TransportError,
};

/// How long the server side waits for the client before failing a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Transport whose connections are accepted by the test thread.
pub struct MemoryTransport {
    accepted: std_mpsc::Sender<ServerConn>,
    refuse: AtomicBool,
}

impl MemoryTransport {
    /// Transport plus the listener the test accepts connections from.
    pub fn new() -> (Arc<Self>, Listener) {
        let (tx, rx) = std_mpsc::channel();
        let transport = Arc::new(Self {
            accepted: tx,
            refuse: AtomicBool::new(false),
        });
        (transport, Listener { incoming: rx })
    }

    /// Make every further `open` fail.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Box<dyn Connection>, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_server, from_client) = std_mpsc::channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerConn {
                from_client,
                to_client,
                active: Value::Null,
            })
            .map_err(|_| TransportError::Connect("listener gone".to_string()))?;

        Ok(Box::new(ClientConn {
            to_server,
            from_server,
        }))
    }
}

struct ClientConn {
    to_server: std_mpsc::Sender<Frame>,
    from_server: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl Connection for ClientConn {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.to_server.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.to_server.send(Frame::Close {
            code: Some(1000),
            reason: String::new(),
        });
        Ok(())
    }
}

/// Accepts connections opened by the client.
pub struct Listener {
    incoming: std_mpsc::Receiver<ServerConn>,
}

impl Listener {
    /// Next connection, failing the test if none arrives.
    pub fn accept(&self) -> ServerConn {
        self.incoming
            .recv_timeout(WAIT)
            .expect("client did not connect")
    }
}

/// Server end of one connection. Dropping it drops the connection.
pub struct ServerConn {
    from_client: std_mpsc::Receiver<Frame>,
    to_client: mpsc::UnboundedSender<Frame>,
    active: Value,
}

impl ServerConn {
    /// Next JSON request from the client, skipping control frames.
    pub fn request(&mut self) -> Value {
        self.try_request(WAIT).expect("client sent no request")
    }

    /// Next JSON request if one arrives within `wait`.
    pub fn try_request(&mut self, wait: Duration) -> Option<Value> {
        loop {
            match self.from_client.recv_timeout(wait).ok()? {
                Frame::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                Frame::Close { .. } => return None,
                Frame::Ping(_) | Frame::Pong(_) => {}
            }
        }
    }

    /// Whether the client sent a close frame within `wait`.
    pub fn closed_by_client(&mut self, wait: Duration) -> bool {
        loop {
            match self.from_client.recv_timeout(wait) {
                Ok(Frame::Close { .. }) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    return true;
                }
                Ok(_) => {}
                Err(std_mpsc::RecvTimeoutError::Timeout) => return false,
            }
        }
    }

    /// Read the next request and acknowledge it the way the server would.
    pub fn ack_next(&mut self) -> Value {
        let request = self.request();
        self.ack(&request);
        request
    }

    /// Acknowledge `request` successfully.
    pub fn ack(&mut self, request: &Value) {
        match request["action"].as_str().unwrap() {
            "subscribe" => self.active = request["filters"].clone(),
            "unsubscribe" => self.active = Value::Null,
            _ => {}
        }
        self.send(json!({
            "type": "filters",
            "request_id": request["request_id"],
            "success": true,
            "filters": self.active,
        }));
    }

    /// Reject `request`.
    pub fn reject(&self, request: &Value, message: &str) {
        self.send(json!({
            "type": "filters",
            "request_id": request["request_id"],
            "success": false,
            "message": message,
        }));
    }

    /// Send one curve event per id, in order.
    pub fn events(&self, ids: &[&str]) {
        for id in ids {
            self.send(curve_event(id, "pro de wnd ec00 mwh/h cet min15 f", "CURVE_UPDATE"));
        }
    }

    /// Send a JSON frame.
    pub fn send(&self, value: Value) {
        self.to_client
            .send(Frame::Text(value.to_string()))
            .expect("client connection gone");
    }
}

/// A `curve_event` frame.
pub fn curve_event(id: &str, curve: &str, event_type: &str) -> Value {
    json!({
        "type": "curve_event",
        "id": id,
        "curve": curve,
        "event_type": event_type,
        "begin": "2024-01-01T00:00:00Z",
        "end": "2024-01-02T00:00:00Z",
        "num_values": 96,
    })
}

/// Settings with short delays so reconnect tests run quickly.
pub fn fast_settings() -> StreamSettings {
    StreamSettings {
        reconnect_delay_initial: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(50),
        reconnect_attempts: 3,
        subscribe_timeout: WAIT,
        ..StreamSettings::default()
    }
}

/// Client over a fresh in-memory transport.
pub fn client() -> (CurveEventClient, Arc<MemoryTransport>, Listener) {
    client_with(fast_settings())
}

/// Client with custom stream settings.
pub fn client_with(
    settings: StreamSettings,
) -> (CurveEventClient, Arc<MemoryTransport>, Listener) {
    let (transport, listener) = MemoryTransport::new();
    let config = ClientConfig::new("ws://memory").with_stream_settings(settings);
    let client =
        CurveEventClient::with_transport(config, Arc::clone(&transport) as Arc<dyn Transport>)
            .unwrap();
    (client, transport, listener)
}

/// Subscribe while the server acknowledges; returns the result and the
/// request as the server saw it.
pub fn subscribe(
    client: &CurveEventClient,
    server: &mut ServerConn,
    filters: Vec<Filter>,
    last_id: Option<EventId>,
) -> (Result<Vec<Filter>, SubscribeError>, Value) {
    std::thread::scope(|s| {
        let acked = s.spawn(|| server.ack_next());
        let result = client.subscribe(filters, last_id);
        (result, acked.join().unwrap())
    })
}

/// Curve event ids delivered by the client until nothing arrives for a
/// short while.
pub fn drain_ids(client: &CurveEventClient) -> Vec<String> {
    let mut ids = Vec::new();
    while let Some(event) = client
        .get_next(Some(Duration::from_millis(200)))
        .as_curve()
        .cloned()
    {
        ids.push(event.event_id.to_string());
    }
    ids
}

/// One name filter per curve name.
pub fn names(names: &[&str]) -> Vec<Filter> {
    names
        .iter()
        .map(|name| NameFilter::new([*name]).into())
        .collect()
}
