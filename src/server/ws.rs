//! WebSocket hub for device connectors.
//!
//! One session per connector type. Outbound requests are correlated by id
//! through a per-session table; inbound frames carrying a `method` are
//! connector-initiated requests and go straight to the broker's requests
//! channel. Upgrades are gated on the `x-connector-version` header, which
//! must be tilde-compatible with the core version (same major and minor).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::jsonrpc::{self, RpcError};

pub const VERSION_HEADER: &str = "x-connector-version";

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("wrong version format: {0:?}")]
    BadVersion(String),
}

fn err_not_found() -> RpcError {
    RpcError::server().with_data("msg", "connector not found")
}

fn err_not_available(sid: &str) -> RpcError {
    RpcError::server()
        .with_code(-32001)
        .with_data("msg", "connector not available")
        .with_data("sid", sid)
}

/// Parse `major.minor[.patch][-pre]`, tolerating a leading `v`. Versions
/// with fewer than two components are rejected.
fn parse_version(v: &str) -> Option<(u64, u64, u64)> {
    let v = v.strip_prefix('v').unwrap_or(v);
    let v = v.split(['-', '+']).next()?;

    let mut parts = v.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// The `~major.minor.0` compatibility constraint derived from the core
/// version: a connector is accepted when major and minor match.
#[derive(Debug, Clone, Copy)]
struct VersionGate {
    major: u64,
    minor: u64,
}

impl VersionGate {
    fn new(version: &str) -> Result<Self, HubError> {
        let (major, minor, _) =
            parse_version(version).ok_or_else(|| HubError::BadVersion(version.to_string()))?;
        Ok(Self { major, minor })
    }

    fn allows(&self, connector_version: &str) -> Option<bool> {
        let (major, minor, _) = parse_version(connector_version)?;
        Some(major == self.major && minor == self.minor)
    }
}

struct Session {
    name: String,
    sid: String,
    frames: mpsc::UnboundedSender<Message>,
    /// `None` once the session is closed; pending senders are dropped with
    /// the table.
    requests: Mutex<Option<HashMap<String, oneshot::Sender<Vec<u8>>>>>,
}

pub struct Hub {
    gate: VersionGate,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    requests_tx: mpsc::Sender<Vec<u8>>,
}

impl Hub {
    pub fn new(version: &str, requests_tx: mpsc::Sender<Vec<u8>>) -> Result<Arc<Self>, HubError> {
        Ok(Arc::new(Self {
            gate: VersionGate::new(version)?,
            sessions: RwLock::new(HashMap::new()),
            requests_tx,
        }))
    }

    /// The connector-facing router: exactly `/<connector_type>`, anything
    /// else is a 400.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/:connector", get(upgrade_handler))
            .fallback(bad_path)
            .with_state(self.clone())
    }

    /// Dispatch a request to a connector. The returned receiver yields the
    /// correlated response; the caller owns the timeout. Failures preload
    /// the receiver with the matching error envelope.
    pub fn call(&self, name: &str, id: &str, payload: Vec<u8>) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();

        let session = self.sessions.read().get(name).cloned();
        let Some(session) = session else {
            let _ = tx.send(jsonrpc::build_err_resp(id, &err_not_found()));
            return rx;
        };

        // register before queueing the frame so the response cannot win the
        // race against table insertion
        let rejected = {
            let mut guard = session.requests.lock();
            match guard.as_mut() {
                Some(table) => {
                    table.insert(id.to_string(), tx);
                    None
                }
                None => Some(tx),
            }
        };
        if let Some(tx) = rejected {
            let _ = tx.send(jsonrpc::build_err_resp(id, &err_not_available(&session.sid)));
            return rx;
        }

        let frame = Message::Text(String::from_utf8_lossy(&payload).into_owned());
        if session.frames.send(frame).is_err() {
            error!(connector = %name, sid = %session.sid, "ws write failed");
            let pending = session
                .requests
                .lock()
                .as_mut()
                .and_then(|table| table.remove(id));
            self.close_session(&session);
            if let Some(tx) = pending {
                let _ = tx.send(jsonrpc::build_err_resp(id, &err_not_available(&session.sid)));
            }
        }

        rx
    }

    /// Send a normal-closure frame to every session. The HTTP drain is the
    /// caller's responsibility.
    pub fn close(&self) {
        let sessions = self.sessions.read();
        for session in sessions.values() {
            let _ = session.frames.send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "shutdown".into(),
            })));
        }
    }

    async fn run_session(
        self: Arc<Self>,
        socket: WebSocket,
        session: Arc<Session>,
        mut frames_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        while let Some(next) = stream.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(_) => break,
            };
            match msg {
                Message::Text(text) => {
                    if self
                        .handle_frame(&session, text.into_bytes())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Message::Binary(payload) => {
                    error!(
                        connector = %session.name,
                        len = payload.len(),
                        "unknown message type"
                    );
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        self.close_session(&session);
        writer.abort();
        info!(connector = %session.name, sid = %session.sid, "client disconnect");
    }

    /// Route one inbound text frame. `Err` means a protocol violation that
    /// closes the session.
    async fn handle_frame(&self, session: &Arc<Session>, bytes: Vec<u8>) -> Result<(), ()> {
        let parsed: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(err) => {
                error!(connector = %session.name, %err, "unparseable frame");
                return Ok(());
            }
        };

        if parsed.get("method").is_some() {
            // connector-initiated request or notification
            if self.requests_tx.send(bytes).await.is_err() {
                debug!("requests channel closed");
            }
            return Ok(());
        }

        let id = match parsed.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                error!(connector = %session.name, "response without usable id");
                return Ok(());
            }
        };

        let sender = {
            let mut guard = session.requests.lock();
            guard.as_mut().and_then(|table| table.remove(&id))
        };

        match sender {
            Some(tx) => {
                // the caller may have timed out already; a dropped receiver
                // is fine
                let _ = tx.send(bytes);
                Ok(())
            }
            None => {
                error!(
                    connector = %session.name,
                    id = %id,
                    "response correlates to no in-flight request"
                );
                Err(())
            }
        }
    }

    fn close_session(&self, session: &Arc<Session>) {
        session.requests.lock().take();

        let mut sessions = self.sessions.write();
        let is_current = sessions
            .get(&session.name)
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if is_current {
            sessions.remove(&session.name);
        }
    }
}

async fn upgrade_handler(
    State(hub): State<Arc<Hub>>,
    Path(connector): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let version = headers
        .get(VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match hub.gate.allows(version) {
        None => return error_response(StatusCode::BAD_REQUEST, "broken connector version"),
        Some(false) => {
            return error_response(StatusCode::BAD_REQUEST, "incompatible connector/core version")
        }
        Some(true) => {}
    }

    let sid = Uuid::new_v4().to_string();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session {
        name: connector.clone(),
        sid: sid.clone(),
        frames: frames_tx,
        requests: Mutex::new(Some(HashMap::new())),
    });

    {
        let mut sessions = hub.sessions.write();
        if sessions.contains_key(&connector) {
            return error_response(StatusCode::BAD_REQUEST, "connector already exists");
        }
        sessions.insert(connector.clone(), session.clone());
    }

    info!(connector = %connector, sid = %sid, "new connection");

    let hub = hub.clone();
    ws.on_upgrade(move |socket| hub.run_session(socket, session, frames_rx))
}

async fn bad_path() -> Response {
    error_response(StatusCode::BAD_REQUEST, "path should be /<connector_type>")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let tag = format!(
        "error_{}",
        status
            .canonical_reason()
            .unwrap_or("unknown")
            .to_lowercase()
            .replace(' ', "_")
    );

    (
        status,
        Json(json!({
            "success": false,
            "code": status.as_u16(),
            "message": message,
            "tags": [tag],
        })),
    )
        .into_response()
}
