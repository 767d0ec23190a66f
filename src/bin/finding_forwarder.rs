//! finding-forwarder: replicated finding fan-out
//!
//! Consumes findings from NATS JetStream and forwards them to Telegram,
//! Discord and Opsgenie per the routing table. Run several replicas against
//! the same Redis; quorum consumers send each finding once.
//!
//! ## Architecture
//! ```text
//! [JetStream] -> [Worker] -> [Consumer per (consumer, subject)] -> [Channel API]
//!                                   |
//!                                   v
//!                          [Redis count/status]
//! ```
//!
//! ## Configuration
//! - First argument or FORWARDER_CONFIG: YAML config file
//! - FORWARDER__<SECTION>__<KEY>: overrides
//! - FORWARDER_LOG: log filter (default "info")
//! - FORWARDER_LOG_FORMAT=json: JSON log lines

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use finding_forwarder::bus::{self, ensure_stream};
use finding_forwarder::config::Config;
use finding_forwarder::consumer::build_consumers;
use finding_forwarder::formatter::Formatter;
use finding_forwarder::metrics::Metrics;
use finding_forwarder::routing::RoutingTable;
use finding_forwarder::sender::{build_http_client, SenderContext};
use finding_forwarder::server;
use finding_forwarder::store::{CoordinationStore, RedisCoordinationStore};
use finding_forwarder::utils::bootstrap::{connect_with_retry, init_tracing};
use finding_forwarder::worker::Worker;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    // An invalid routing table is fatal before anything connects.
    let routing = RoutingTable::load(&config.forwarder.routing_path)?;

    let metrics = Arc::new(Metrics::new()?);
    let ctx = SenderContext {
        client: build_http_client(config.forwarder.http_timeout())?,
        formatter: Arc::new(Formatter::new(
            config.forwarder.source.as_str(),
            config.forwarder.block_explorer.as_str(),
        )),
        metrics: metrics.clone(),
        endpoints: config.forwarder.endpoints(),
    };

    let redis_url = config.redis.url.clone();
    let store = connect_with_retry("redis", &redis_url, || RedisCoordinationStore::new(&redis_url))
        .await?;
    let store: Arc<dyn CoordinationStore> = Arc::new(store);

    let nats_url = config.nats.url.clone();
    let nats = connect_with_retry("nats", &nats_url, || bus::connect(&nats_url)).await?;
    let js = async_nats::jetstream::new(nats);
    let stream = ensure_stream(&js, &config.nats.stream).await?;

    let consumers = build_consumers(
        &routing,
        config.forwarder.quorum_size,
        &ctx,
        store,
        metrics.clone(),
    )?;
    info!(
        consumers = consumers.len(),
        quorum = config.forwarder.quorum_size,
        "Starting forwarder"
    );

    let listener = TcpListener::bind(config.server.bind_address()).await?;
    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<(&'static str, Result<(), BoxError>)> = JoinSet::new();

    let worker = Worker::new(stream, consumers);
    let worker_cancel = cancel.clone();
    tasks.spawn(async move {
        ("worker", worker.run(worker_cancel).await.map_err(BoxError::from))
    });

    let server_cancel = cancel.clone();
    tasks.spawn(async move {
        (
            "admin server",
            server::serve(listener, metrics, server_cancel)
                .await
                .map_err(BoxError::from),
        )
    });

    // Any component stopping, or a shutdown signal, stops everything.
    let mut failure: Option<String> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        Some(joined) = tasks.join_next() => {
            failure = component_exit(joined);
        }
    }
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Some(message) = component_exit(joined) {
            failure.get_or_insert(message);
        }
    }

    match failure {
        Some(message) => Err(message.into()),
        None => {
            info!("Forwarder stopped");
            Ok(())
        }
    }
}

/// Log a component's exit, returning a message when it failed.
fn component_exit(
    joined: Result<(&'static str, Result<(), BoxError>), tokio::task::JoinError>,
) -> Option<String> {
    match joined {
        Ok((name, Ok(()))) => {
            info!(component = name, "Component stopped");
            None
        }
        Ok((name, Err(e))) => {
            error!(component = name, error = %e, "Component failed");
            Some(format!("{} failed: {}", name, e))
        }
        Err(e) => {
            error!(error = %e, "Component panicked");
            Some(format!("component panicked: {}", e))
        }
    }
}
