//! The broker: routes cloud commands to connectors and device state back.
//!
//! One `call` runs the full interception chain: template fill, envelope
//! validation, id stamping, the optional write pre-transform, dispatch with
//! timeout, and the optional read post-transform that updates the state
//! store and emits a state delta. Connector-initiated notifications reuse
//! the same state-update path through the requests listener.

pub mod template;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};
use uuid::Uuid;

use crate::cloud::{ActionConfig, EdgeObject, Model};
use crate::cron::{Cron, CronParseError};
use crate::dom;
use crate::jsonrpc::{self, RpcError};
use crate::scripts::{ScriptEngine, ScriptError, ScriptValue};
use crate::server::Hub;
use crate::store::state::StateStore;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("spawn [{id}]: {source}")]
    Spawn {
        id: String,
        source: CronParseError,
    },
    #[error("spawn: wrong type {kind:?} for action {id}")]
    WrongJobType { id: String, kind: String },
}

/// How requests reach connectors. The hub is the WebSocket variant; tests
/// and in-process plugin connectors provide their own.
pub trait Transport: Send + Sync {
    /// Dispatch `payload` and return the receiver the correlated response
    /// will arrive on. Transport-level failures preload the receiver with
    /// an error envelope.
    fn call(&self, connector: &str, id: &str, payload: Vec<u8>) -> oneshot::Receiver<Vec<u8>>;
}

impl Transport for Hub {
    fn call(&self, connector: &str, id: &str, payload: Vec<u8>) -> oneshot::Receiver<Vec<u8>> {
        Hub::call(self, connector, id, payload)
    }
}

/// In-process transport: the handler produces the response synchronously.
pub struct InProc<F>
where
    F: Fn(&str, Vec<u8>) -> Vec<u8> + Send + Sync,
{
    handler: F,
}

impl<F> InProc<F>
where
    F: Fn(&str, Vec<u8>) -> Vec<u8> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Transport for InProc<F>
where
    F: Fn(&str, Vec<u8>) -> Vec<u8> + Send + Sync,
{
    fn call(&self, connector: &str, _id: &str, payload: Vec<u8>) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send((self.handler)(connector, payload));
        rx
    }
}

fn err_timeout() -> RpcError {
    RpcError::server().with_data("msg", "timeout")
}

fn err_unmarshal() -> RpcError {
    RpcError::parse_error().with_data("msg", "json unmarshal error")
}

fn err_bad_id() -> RpcError {
    RpcError::internal().with_data("msg", "id should be string or null")
}

fn err_not_available() -> RpcError {
    RpcError::server()
        .with_code(-32001)
        .with_data("msg", "connector not available")
}

fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn to_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("json value always serializes")
}

/// Try base64 first: connectors ship binary payloads as base64 strings, and
/// transforms want the raw bytes.
fn decode_value(value: Value) -> ScriptValue {
    if let Value::String(s) = &value {
        use base64::Engine as _;
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(s) {
            return ScriptValue::Bytes(decoded);
        }
    }
    ScriptValue::from_json(value)
}

pub struct Broker {
    transport: Arc<dyn Transport>,
    scripts: Arc<dyn ScriptEngine>,
    state: Arc<StateStore>,
    object: EdgeObject,
    model: Model,
    timeout: Duration,
    state_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Broker {
    /// Wire the broker together: register the model's transformation
    /// sources and spawn the notification listener. Jobs are spawned
    /// separately with [`Broker::spawn_jobs`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        object: EdgeObject,
        model: Model,
        scripts: Arc<dyn ScriptEngine>,
        state: Arc<StateStore>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
        state_tx: mpsc::UnboundedSender<Vec<u8>>,
        requests_rx: mpsc::Receiver<Vec<u8>>,
    ) -> Result<Arc<Self>, BrokerError> {
        for (name, source) in model.expressions() {
            scripts.add(name, source)?;
        }

        let broker = Arc::new(Self {
            transport,
            scripts,
            state,
            object,
            model,
            timeout,
            state_tx,
        });

        tokio::spawn(Self::requests_listener(broker.clone(), requests_rx));

        Ok(broker)
    }

    pub fn edge_id(&self) -> &str {
        &self.object.id
    }

    /// Register every model action: `schedule` actions become cron entries,
    /// `subscribe` actions fire once immediately.
    pub fn spawn_jobs(self: &Arc<Self>, cron: &Cron) -> Result<(), BrokerError> {
        for action in self.model.actions().values() {
            match action.kind.as_str() {
                "schedule" => {
                    let broker = self.clone();
                    let job_action = action.clone();
                    let id = action.id.clone();
                    cron.add_fn(&action.interval, move || {
                        let broker = broker.clone();
                        let action = job_action.clone();
                        tokio::spawn(async move {
                            let resp = broker.call(&action.connector, &action.payload).await;
                            debug!(
                                response = %String::from_utf8_lossy(&resp),
                                "cron job response"
                            );
                        });
                    })
                    .map_err(|source| BrokerError::Spawn { id, source })?;
                }
                "subscribe" => {
                    let broker = self.clone();
                    let action = action.clone();
                    tokio::spawn(async move { broker.subscribe(action).await });
                }
                other => {
                    return Err(BrokerError::WrongJobType {
                        id: action.id.clone(),
                        kind: other.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, action: ActionConfig) {
        let resp = self.call(&action.connector, &action.payload).await;

        let parsed: Value = match serde_json::from_slice(&resp) {
            Ok(v) => v,
            Err(err) => {
                error!(action = %action.id, %err, "subscribe: unparseable response");
                return;
            }
        };

        match dom::get(&parsed, "result.process_id") {
            Some(pid) => debug!(process_id = %pid, "start subscribe"),
            None => error!(action = %action.id, "process_id not found"),
        }
    }

    /// Run one request through the interception chain. Never fails: every
    /// error becomes a JSON-RPC error envelope.
    pub async fn call(&self, connector: &str, payload: &[u8]) -> Vec<u8> {
        let payload = match template::fill(payload, &self.object.config) {
            Ok(p) => p,
            Err(err) => {
                return jsonrpc::build_err_resp(
                    "",
                    &err_unmarshal().with_data("err", err.to_string()),
                )
            }
        };

        let mut envelope: Value = match serde_json::from_slice(&payload) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                return jsonrpc::build_err_resp(
                    "",
                    &err_unmarshal().with_data("err", "payload is not an object"),
                )
            }
            Err(err) => {
                return jsonrpc::build_err_resp(
                    "",
                    &err_unmarshal().with_data("err", err.to_string()),
                )
            }
        };

        let mut changed = false;

        let id = match envelope.get("id").cloned() {
            None | Some(Value::Null) => {
                let id = new_request_id();
                dom::set(&mut envelope, "id", Value::String(id.clone()));
                changed = true;
                id
            }
            Some(Value::String(id)) => id,
            Some(other) => {
                return jsonrpc::build_err_resp("", &err_bad_id().with_data("current_id", other))
            }
        };

        let kind = dom::get_str(&envelope, "params._type").map(str::to_string);
        let parent = non_empty(dom::get_str(&envelope, "params._parent")).map(str::to_string);

        if kind.as_deref() == Some("write") {
            if let Some(parent) = &parent {
                let input = ScriptValue::from_json(
                    dom::get(&envelope, "params.value").cloned().unwrap_or(Value::Null),
                );
                match self.scripts.execute(&format!("write.{parent}"), input) {
                    Ok(result) => {
                        dom::set(&mut envelope, "params.value", result.into_json());
                        changed = true;
                    }
                    Err(err) => debug!(parent, %err, "write transform failed"),
                }
            }
        }

        let payload = if changed { to_bytes(&envelope) } else { payload };

        let receiver = self.transport.call(connector, &id, payload);

        let response = match tokio::time::timeout(self.timeout, receiver).await {
            Err(_) => return jsonrpc::build_err_resp(&id, &err_timeout()),
            // the session died with the request in flight
            Ok(Err(_)) => return jsonrpc::build_err_resp(&id, &err_not_available()),
            Ok(Ok(resp)) => resp,
        };

        if kind.as_deref() == Some("read") {
            self.update_state(&envelope, response)
        } else {
            response
        }
    }

    /// Read post-transform: run the `read.<parent>` script over the result,
    /// persist it, emit a state delta and rewrite the response.
    fn update_state(&self, request: &Value, response: Vec<u8>) -> Vec<u8> {
        let Some(parent) = non_empty(dom::get_str(request, "params._parent")) else {
            return response;
        };

        let mut parsed: Value = match serde_json::from_slice(&response) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                error!(
                    parent,
                    value = %String::from_utf8_lossy(&response),
                    "update state: unparseable response"
                );
                return response;
            }
        };

        let result = match dom::get(&parsed, "result") {
            None | Some(Value::Null) => return response,
            Some(r) => r.clone(),
        };

        // notification acks carry no device value
        if dom::get(&parsed, "result.notification")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return response;
        }

        let value = self.apply_read_transform(parent, decode_value(result));
        let json_value = value.into_json();

        if let Err(err) = self.state.set(parent, to_bytes(&json_value)) {
            error!(parent, %err, "update state: set");
        }
        self.send_state(parent, &json_value);

        dom::set(&mut parsed, "result", json_value);
        to_bytes(&parsed)
    }

    fn apply_read_transform(&self, parent: &str, value: ScriptValue) -> ScriptValue {
        match self.scripts.execute(&format!("read.{parent}"), value.clone()) {
            Ok(result) if !result.is_null() => result,
            Ok(_) => value,
            Err(err) => {
                debug!(parent, %err, "read transform failed");
                value
            }
        }
    }

    /// Emit `{ <parent-without-edge-prefix>: <value> }` on the state
    /// channel; the MQTT session publishes it.
    fn send_state(&self, parent: &str, value: &Value) {
        let key = parent.strip_prefix("edge.").unwrap_or(parent);

        let mut delta = Value::Object(Map::new());
        dom::set(&mut delta, key, value.clone());

        if self.state_tx.send(to_bytes(&delta)).is_err() {
            debug!("state channel closed");
        }
    }

    async fn requests_listener(broker: Arc<Self>, mut requests_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(msg) = requests_rx.recv().await {
            broker.handle_notification(&msg);
        }
        debug!("requests channel closed");
    }

    fn handle_notification(&self, msg: &[u8]) {
        let request: Value = match serde_json::from_slice(msg) {
            Ok(v) => v,
            Err(err) => {
                error!(%err, value = %String::from_utf8_lossy(msg), "notification: unmarshal json");
                return;
            }
        };

        let value = match dom::get(&request, "params.value") {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                error!(value = %String::from_utf8_lossy(msg), "notification: empty value");
                return;
            }
        };

        let Some(parent) = non_empty(dom::get_str(&request, "params.__request_params._parent"))
        else {
            error!(value = %String::from_utf8_lossy(msg), "notification: empty _parent");
            return;
        };

        debug!(parent, "new notification");

        let value = self.apply_read_transform(parent, decode_value(value));
        let json_value = value.into_json();

        if let Err(err) = self.state.set(parent, to_bytes(&json_value)) {
            error!(parent, %err, "notification: set state");
            return;
        }
        self.send_state(parent, &json_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::engine::RhaiEngine;
    use crate::store::Kv;
    use serde_json::json;

    struct Never;

    impl Transport for Never {
        fn call(&self, _: &str, _: &str, _: Vec<u8>) -> oneshot::Receiver<Vec<u8>> {
            let (tx, rx) = oneshot::channel();
            // keep the sender alive so the receiver never resolves
            std::mem::forget(tx);
            rx
        }
    }

    struct Fixture {
        broker: Arc<Broker>,
        state: Arc<StateStore>,
        state_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        requests_tx: mpsc::Sender<Vec<u8>>,
        _dir: tempfile::TempDir,
    }

    fn fixture(transport: Arc<dyn Transport>, timeout: Duration, model: Model) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(Kv::open(&dir.path().join("t.db")).unwrap());
        let state = Arc::new(StateStore::new(kv, false).unwrap());
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::channel(8);

        let broker = Broker::new(
            EdgeObject::default(),
            model,
            Arc::new(RhaiEngine::new()),
            state.clone(),
            transport,
            timeout,
            state_tx,
            requests_rx,
        )
        .unwrap();

        Fixture {
            broker,
            state,
            state_rx,
            requests_tx,
            _dir: dir,
        }
    }

    fn model_with_expressions(expressions: Value) -> Model {
        let mut model: Model =
            serde_json::from_value(json!({ "data": { "expressions": expressions } })).unwrap();
        model.prepare().unwrap();
        model
    }

    fn echo_result(result: Value) -> Arc<dyn Transport> {
        Arc::new(InProc::new(move |_conn, payload: Vec<u8>| {
            let req: Value = serde_json::from_slice(&payload).unwrap();
            jsonrpc::build_resp(req["id"].as_str().unwrap(), &result)
        }))
    }

    #[tokio::test]
    async fn stamps_missing_id() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        let transport = Arc::new(InProc::new(move |_c, payload: Vec<u8>| {
            let req: Value = serde_json::from_slice(&payload).unwrap();
            *seen2.lock() = Some(req["id"].clone());
            jsonrpc::build_resp(req["id"].as_str().unwrap(), &json!(true))
        }));
        let f = fixture(transport, Duration::from_secs(1), Model::default());

        let resp = f
            .broker
            .call("modbus", br#"{"jsonrpc":"2.0","method":"m","params":{}}"#)
            .await;

        let stamped = seen.lock().clone().expect("request dispatched");
        let stamped = stamped.as_str().expect("id is a string").to_string();
        assert!(!stamped.is_empty());

        let v: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(v["id"], stamped.as_str());
    }

    #[tokio::test]
    async fn rejects_numeric_id() {
        let f = fixture(
            Arc::new(Never),
            Duration::from_secs(1),
            Model::default(),
        );

        let resp = f
            .broker
            .call("modbus", br#"{"jsonrpc":"2.0","id":5,"method":"m"}"#)
            .await;

        let v: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(v["error"]["code"], -32603);
        assert_eq!(v["error"]["data"]["msg"], "id should be string or null");
        assert_eq!(v["error"]["data"]["current_id"], 5);
    }

    #[tokio::test]
    async fn times_out() {
        let f = fixture(
            Arc::new(Never),
            Duration::from_millis(100),
            Model::default(),
        );

        let start = std::time::Instant::now();
        let resp = f
            .broker
            .call(
                "opcua",
                br#"{"jsonrpc":"2.0","id":"req3","method":"opcua-read","params":{"node_id":"ns=2;s=x"}}"#,
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(2));
        let v: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(v["id"], "req3");
        assert_eq!(v["error"]["code"], -32000);
        assert_eq!(v["error"]["message"], "Server error");
        assert_eq!(v["error"]["data"]["msg"], "timeout");
    }

    #[tokio::test]
    async fn write_pre_transform_rewrites_value() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        let transport = Arc::new(InProc::new(move |_c, payload: Vec<u8>| {
            let req: Value = serde_json::from_slice(&payload).unwrap();
            *seen2.lock() = Some(req["params"]["value"].clone());
            jsonrpc::build_resp(req["id"].as_str().unwrap(), &json!(true))
        }));
        let model = model_with_expressions(json!({ "write.edge.setpoint": "param + 100" }));
        let f = fixture(transport, Duration::from_secs(1), model);

        f.broker
            .call(
                "modbus",
                br#"{"jsonrpc":"2.0","id":"req2","method":"modbus-write-register","params":{"address":10,"value":50,"_type":"write","_parent":"edge.setpoint"}}"#,
            )
            .await;

        assert_eq!(seen.lock().clone(), Some(json!(150)));
    }

    #[tokio::test]
    async fn read_transform_chain() {
        let model = model_with_expressions(json!({ "read.p": "param * 2" }));
        let mut f = fixture(echo_result(json!(10)), Duration::from_secs(1), model);

        let resp = f
            .broker
            .call(
                "modbus",
                br#"{"jsonrpc":"2.0","id":"r","method":"m","params":{"_type":"read","_parent":"p"}}"#,
            )
            .await;

        let v: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(v["result"], json!(20));

        let delta = f.state_rx.recv().await.unwrap();
        let delta: Value = serde_json::from_slice(&delta).unwrap();
        assert_eq!(delta, json!({"p": 20}));

        assert_eq!(f.state.get("p"), Some(b"20".to_vec()));
    }

    #[tokio::test]
    async fn read_without_transform_passes_through() {
        let mut f = fixture(
            echo_result(json!([23])),
            Duration::from_secs(1),
            Model::default(),
        );

        let req = br#"{"jsonrpc":"2.0","id":"req1","method":"modbus-read-holding","params":{"address":0,"quantity":1,"_type":"read","_parent":"edge.temperature"}}"#;
        let resp = f.broker.call("modbus", req).await;

        let v: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(v["id"], "req1");
        assert_eq!(v["result"], json!([23]));

        let delta: Value = serde_json::from_slice(&f.state_rx.recv().await.unwrap()).unwrap();
        assert_eq!(delta, json!({"temperature": [23]}));

        assert_eq!(f.state.get("edge.temperature"), Some(b"[23]".to_vec()));
    }

    #[tokio::test]
    async fn notification_result_is_untouched() {
        let mut f = fixture(
            echo_result(json!({"process_id": "abc", "notification": true})),
            Duration::from_secs(1),
            Model::default(),
        );

        let resp = f
            .broker
            .call(
                "ble",
                br#"{"jsonrpc":"2.0","id":"s1","method":"sub","params":{"_type":"read","_parent":"edge.x"}}"#,
            )
            .await;

        let v: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(v["result"]["notification"], true);
        assert!(f.state.get("edge.x").is_none());
        assert!(f.state_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsolicited_notification_decodes_base64() {
        let mut f = fixture(Arc::new(Never), Duration::from_secs(1), Model::default());

        f.requests_tx
            .send(
                br#"{"jsonrpc":"2.0","method":"notification","params":{"value":"SGVsbG8=","__request_params":{"_parent":"edge.msg"}}}"#
                    .to_vec(),
            )
            .await
            .unwrap();

        let delta = tokio::time::timeout(Duration::from_secs(2), f.state_rx.recv())
            .await
            .expect("delta within timeout")
            .unwrap();
        let delta: Value = serde_json::from_slice(&delta).unwrap();
        assert_eq!(delta, json!({"msg": "Hello"}));

        assert_eq!(f.state.get("edge.msg"), Some(b"\"Hello\"".to_vec()));
    }

    #[tokio::test]
    async fn notification_without_parent_is_skipped() {
        let mut f = fixture(Arc::new(Never), Duration::from_secs(1), Model::default());

        f.requests_tx
            .send(br#"{"jsonrpc":"2.0","method":"notification","params":{"value":1}}"#.to_vec())
            .await
            .unwrap();
        // a valid one afterwards proves the listener survived
        f.requests_tx
            .send(
                br#"{"jsonrpc":"2.0","method":"notification","params":{"value":2,"__request_params":{"_parent":"edge.ok"}}}"#
                    .to_vec(),
            )
            .await
            .unwrap();

        let delta = tokio::time::timeout(Duration::from_secs(2), f.state_rx.recv())
            .await
            .expect("delta within timeout")
            .unwrap();
        let delta: Value = serde_json::from_slice(&delta).unwrap();
        assert_eq!(delta, json!({"ok": 2}));
    }

    #[tokio::test]
    async fn template_fill_from_object_config() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        let transport = Arc::new(InProc::new(move |_c, payload: Vec<u8>| {
            let req: Value = serde_json::from_slice(&payload).unwrap();
            *seen2.lock() = Some(req["params"]["device"].clone());
            jsonrpc::build_resp(req["id"].as_str().unwrap(), &json!(true))
        }));

        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(Kv::open(&dir.path().join("t.db")).unwrap());
        let state = Arc::new(StateStore::new(kv, false).unwrap());
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        let (_requests_tx, requests_rx) = mpsc::channel(8);

        let object: EdgeObject = serde_json::from_value(json!({
            "id": "edge-1",
            "config": { "devs": { "d1": "00:11:22:33:44:55" } }
        }))
        .unwrap();

        let broker = Broker::new(
            object,
            Model::default(),
            Arc::new(RhaiEngine::new()),
            state,
            transport,
            Duration::from_secs(1),
            state_tx,
            requests_rx,
        )
        .unwrap();

        broker
            .call(
                "ble",
                br#"{"jsonrpc":"2.0","id":"e1","method":"ble-read","params":{"device":"{{object.config.devs.d1}}"}}"#,
            )
            .await;

        assert_eq!(seen.lock().clone(), Some(json!("00:11:22:33:44:55")));
        assert_eq!(broker.edge_id(), "edge-1");
    }

    #[tokio::test]
    async fn broken_expression_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(Kv::open(&dir.path().join("t.db")).unwrap());
        let state = Arc::new(StateStore::new(kv, false).unwrap());
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        let (_requests_tx, requests_rx) = mpsc::channel(8);

        let mut model: Model =
            serde_json::from_value(json!({ "data": { "expressions": { "read.x": "param +" } } }))
                .unwrap();
        model.prepare().unwrap();

        let result = Broker::new(
            EdgeObject::default(),
            model,
            Arc::new(RhaiEngine::new()),
            state,
            Arc::new(Never),
            Duration::from_secs(1),
            state_tx,
            requests_rx,
        );
        assert!(matches!(result, Err(BrokerError::Script(_))));
    }

    #[tokio::test]
    async fn wrong_job_type_fails_spawn() {
        let mut model: Model = serde_json::from_value(json!({
            "data": { "children": [{
                "id": "s1", "name": "s1", "type": "subsystem", "active": true,
                "children": [{
                    "id": "s2", "name": "modbus", "type": "subsystem", "active": true,
                    "children": [{
                        "id": "n1", "name": "bad", "active": true,
                        "edge": { "read": { "type": "stream", "command": "c1" } },
                        "children": [{
                            "id": "c1", "name": "c", "active": true,
                            "command": "a1", "params": {}
                        }]
                    }, {
                        "id": "a1", "name": "a", "type": "action", "active": true,
                        "params": { "payload": "{\"jsonrpc\":\"2.0\",\"method\":\"m\",\"params\":{}}" }
                    }]
                }]
            }]}
        }))
        .unwrap();
        model.prepare().unwrap();

        let f = fixture(Arc::new(Never), Duration::from_secs(1), model);
        let cron = Cron::new();
        let result = f.broker.spawn_jobs(&cron);
        assert!(matches!(result, Err(BrokerError::WrongJobType { .. })));
        cron.close();
    }
}
