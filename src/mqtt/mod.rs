//! Persistent MQTT session to the cloud broker.
//!
//! Subscribes to `ric-edge/+/command` and hands every command to the broker,
//! publishing the result on the matching response topic. State deltas from
//! the broker's state channel go out on `ric-edge/sys/state`. Everything is
//! QoS 1; every publish is recorded in the KV-backed queue first and pruned
//! on PubAck, so unacknowledged publishes survive a restart and are sent
//! again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration,
    Transport as ConnectionTransport,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

use crate::broker::Broker;
use crate::config::MqttConfig;
use crate::jsonrpc::{self, RpcError};
use crate::store::mqtt::MqttQueue;
use crate::store::StoreError;

pub const COMMAND_TOPIC: &str = "ric-edge/+/command";
pub const STATE_TOPIC: &str = "ric-edge/sys/state";

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("mqtt: invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("mqtt: url has no host")]
    NoHost,
    #[error("mqtt: {0}")]
    Io(#[from] std::io::Error),
    #[error("mqtt: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("mqtt: no connack within connect timeout")]
    ConnectTimeout,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn connector_from_topic(topic: &str) -> &str {
    topic.split('/').nth(1).unwrap_or_default()
}

fn response_topic(connector: &str) -> String {
    format!("ric-edge/{connector}/response")
}

/// Shared publish path: record in the durable queue, then hand to the
/// client. The `unassigned` deque keeps queue keys in client-submission
/// order so the event loop can pair them with outgoing packet ids.
struct Publisher {
    client: AsyncClient,
    queue: Arc<MqttQueue>,
    unassigned: Mutex<VecDeque<Option<String>>>,
}

impl Publisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) {
        let mut unassigned = self.unassigned.lock().await;

        match self.queue.insert(topic, &payload) {
            Ok(key) => unassigned.push_back(Some(key)),
            Err(err) => {
                error!(topic, %err, "mqtt queue: record publish");
                // keep the deque aligned with outgoing events
                unassigned.push_back(None);
            }
        }

        if let Err(err) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            error!(topic, %err, "err publish");
        }
    }
}

pub struct MqttSession {
    client: AsyncClient,
    tasks: Vec<JoinHandle<()>>,
}

impl MqttSession {
    /// Connect, subscribe to the command topic and re-publish queue
    /// survivors. Fails startup when no ConnAck arrives.
    pub async fn connect(
        cfg: &MqttConfig,
        client_id: &str,
        queue: MqttQueue,
        broker: Arc<Broker>,
        state_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<Self, MqttError> {
        let url = Url::parse(&cfg.url)?;
        let host = url.host_str().ok_or(MqttError::NoHost)?.to_string();

        let tls = !cfg.cert_file.is_empty() && !cfg.key_path.is_empty();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(KEEP_ALIVE);
        opts.set_clean_session(false);

        if tls {
            let cert = std::fs::read(&cfg.cert_file)?;
            let key = std::fs::read(&cfg.key_path)?;
            let ca = if cfg.ca_file.is_empty() {
                cert.clone()
            } else {
                std::fs::read(&cfg.ca_file)?
            };
            opts.set_transport(ConnectionTransport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: Some((cert, key)),
            }));
            debug!("mqtt tls enabled");
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        // drive the handshake here so a dead broker fails startup
        tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(MqttError::Connection(err)),
                }
            }
        })
        .await
        .map_err(|_| MqttError::ConnectTimeout)??;

        client.subscribe(COMMAND_TOPIC, QoS::AtLeastOnce).await?;

        let publisher = Arc::new(Publisher {
            client: client.clone(),
            queue: Arc::new(queue),
            unassigned: Mutex::new(VecDeque::new()),
        });

        // unacknowledged publishes from previous runs go out again
        let survivors = publisher.queue.all()?;
        if !survivors.is_empty() {
            info!(count = survivors.len(), "re-publishing surviving queue entries");
            let mut unassigned = publisher.unassigned.lock().await;
            for (key, pending) in survivors {
                unassigned.push_back(Some(key));
                if let Err(err) = client
                    .publish(
                        pending.topic.as_str(),
                        QoS::AtLeastOnce,
                        false,
                        pending.payload,
                    )
                    .await
                {
                    error!(topic = %pending.topic, %err, "err publish");
                }
            }
        }

        let tasks = vec![
            tokio::spawn(run_event_loop(eventloop, publisher.clone(), broker)),
            tokio::spawn(publish_state(publisher, state_rx)),
        ];

        info!("mqtt ready");

        Ok(Self { client, tasks })
    }

    pub async fn close(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(%err, "mqtt disconnect");
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_event_loop(mut eventloop: EventLoop, publisher: Arc<Publisher>, broker: Arc<Broker>) {
    let mut inflight: HashMap<u16, String> = HashMap::new();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = publish.topic.clone();
                if topic.ends_with("/command") {
                    tokio::spawn(handle_command(
                        publisher.clone(),
                        broker.clone(),
                        topic,
                        publish.payload.to_vec(),
                    ));
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                debug!("mqtt reconnected");
                let client = publisher.client.clone();
                tokio::spawn(async move {
                    if let Err(err) = client.subscribe(COMMAND_TOPIC, QoS::AtLeastOnce).await {
                        error!(%err, "err subscribe");
                    }
                });
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                if let Some(Some(key)) = publisher.unassigned.lock().await.pop_front() {
                    inflight.insert(pkid, key);
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                if let Some(key) = inflight.remove(&ack.pkid) {
                    publisher.queue.remove(&key);
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(%err, "mqtt connection error");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// One inbound cloud command: dispatch through the broker (panics isolated
/// and converted to a -32099 envelope) and publish the response.
async fn handle_command(
    publisher: Arc<Publisher>,
    broker: Arc<Broker>,
    topic: String,
    payload: Vec<u8>,
) {
    let connector = connector_from_topic(&topic).to_string();

    let call_connector = connector.clone();
    let handle = tokio::spawn(async move { broker.call(&call_connector, &payload).await });

    let resp = match handle.await {
        Ok(resp) => resp,
        Err(err) => {
            if !err.is_panic() {
                return;
            }
            let panic = err.into_panic();
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!(connector = %connector, msg, "panic in command dispatch");
            jsonrpc::build_err_resp(
                "",
                &RpcError::server()
                    .with_code(-32099)
                    .with_data("msg", msg)
                    .with_data("panic", true),
            )
        }
    };

    publisher.publish(&response_topic(&connector), resp).await;
}

async fn publish_state(publisher: Arc<Publisher>, mut state_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(delta) = state_rx.recv().await {
        publisher.publish(STATE_TOPIC, delta).await;
    }
    debug!("state channel closed");
}
