use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use edgelink::broker::Broker;
use edgelink::cli::{self, Cli};
use edgelink::cloud::CloudClient;
use edgelink::config::Config;
use edgelink::cron::Cron;
use edgelink::logging;
use edgelink::mqtt::MqttSession;
use edgelink::scripts::engine::RhaiEngine;
use edgelink::server::Hub;
use edgelink::store::mqtt::MqttQueue;
use edgelink::store::state::StateStore;
use edgelink::store::Kv;

/// Grace period for connectors to re-dial after a core restart before jobs
/// start firing.
const RECONNECT_GRACE: Duration = Duration::from_secs(2);

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.default_config {
        cli::print_default_config();
        return Ok(());
    }
    if cli.min_config {
        cli::print_min_config();
        return Ok(());
    }

    let cfg = Config::load(&cli.config)?;
    logging::init(&cfg.log_level, cfg.log_format.parse()?)?;

    info!(version = %cfg.version, "starting core");

    run(cfg).await.map_err(|err| {
        error!(%err, "fatal");
        err
    })
}

async fn run(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let kv = Arc::new(Kv::open(&cfg.core.db.path)?);

    let cloud = CloudClient::new(&cfg.core.cloud.url, &cfg.core.cloud.token, &cfg.version).await?;

    // connector requests/notifications flow hub -> broker on this channel
    let (requests_tx, requests_rx) = mpsc::channel(16);
    // state deltas flow broker -> mqtt on this one
    let (state_tx, state_rx) = mpsc::unbounded_channel();

    let hub = Hub::new(&cfg.version, requests_tx)?;
    let listener = TcpListener::bind(("127.0.0.1", cfg.ws_port)).await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let serve = axum::serve(listener, hub.router().into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
    let server = tokio::spawn(async move { serve.await });
    info!(port = cfg.ws_port, "ws ready");

    // wait while connectors reconnect before jobs start firing
    tokio::time::sleep(RECONNECT_GRACE).await;

    let object = cloud.load_object(&cfg.core.id).await?;
    let model = cloud.load_model(&object.models.id).await?;

    let state = Arc::new(StateStore::new(kv.clone(), cfg.core.db.clean_state)?);
    let broker = Broker::new(
        object,
        model,
        Arc::new(RhaiEngine::new()),
        state,
        hub.clone(),
        cfg.core.rpc_timeout,
        state_tx,
        requests_rx,
    )?;

    let cron = Cron::new();
    broker.spawn_jobs(&cron)?;

    let queue = MqttQueue::new(kv)?;
    let mqtt = MqttSession::connect(
        &cfg.core.mqtt,
        &cfg.core.id,
        queue,
        broker.clone(),
        state_rx,
    )
    .await?;

    let reason = await_shutdown_trigger().await;
    info!(reason, "shutdown signal received");

    mqtt.close().await;
    cron.close();
    hub.close();
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_DRAIN, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(%err, "ws server error during shutdown"),
        Ok(Err(err)) => warn!(%err, "ws server task error"),
        Err(_) => warn!("ws server did not drain in time"),
    }

    info!("core shut down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(err) => {
            warn!(%err, "failed to install SIGTERM handler; falling back to Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            "ctrl-c"
        }
    }
}

#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
