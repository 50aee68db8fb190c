//! swift-search -- indexing proxy for a storage service.
//!
//! Forwards every request to the upstream storage endpoint and publishes an
//! index event for object writes and deletes in opted-in accounts or
//! containers.  SIGTERM/SIGINT stop accepting connections, then the
//! background dispatcher (if any) gets `server.shutdown_timeout` seconds to
//! drain.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use swift_search::broker::amqp::AmqpConnector;
use swift_search::config::{Config, LoggingConfig, MetadataSource};
use swift_search::metadata::fixed::StaticMetadata;
use swift_search::metadata::lookup::MetadataLookup;
use swift_search::metadata::remote::HttpMetadataLookup;
use swift_search::middleware::Queuer;
use swift_search::publisher::EventPublisher;

/// Command-line arguments for the swift-search proxy.
#[derive(Parser, Debug)]
#[command(
    name = "swift-search",
    version,
    about = "Object metadata queuer for search indexing"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "swift-search.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_lookup(config: &Config) -> anyhow::Result<Arc<dyn MetadataLookup>> {
    let lookup: Arc<dyn MetadataLookup> = match config.metadata.source {
        MetadataSource::Static => {
            info!(
                "Static metadata table: {} accounts, {} containers",
                config.metadata.fixed.accounts.len(),
                config.metadata.fixed.containers.len()
            );
            Arc::new(StaticMetadata::from_config(&config.metadata.fixed))
        }
        MetadataSource::Http => {
            let (endpoint, token) = match &config.metadata.http {
                Some(http) => (http.endpoint.as_str(), http.auth_token.clone()),
                None => (config.upstream.url.as_str(), None),
            };
            info!("Metadata lookups via HEAD on {}", endpoint);
            Arc::new(HttpMetadataLookup::new(
                endpoint,
                token,
                config.queue.connection_timeout(),
            )?)
        }
    };
    Ok(lookup)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = swift_search::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        swift_search::metrics::init_metrics()?;
        swift_search::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let lookup = build_lookup(&config)?;

    let connector = AmqpConnector::new(&config.queue);
    info!(
        "Index events go to queue {} on {}",
        config.queue.name,
        connector.address()
    );
    let publisher = Arc::new(EventPublisher::new(
        Arc::new(connector),
        config.queue.name.clone(),
    ));

    let queuer = Arc::new(Queuer::from_config(&config, lookup, publisher));
    info!(
        "Dispatch mode {:?}, opt-in key {}",
        config.dispatch.mode,
        queuer.opt_in_key()
    );

    let state = Arc::new(swift_search::AppState {
        config: config.clone(),
        queuer: Arc::clone(&queuer),
        client: reqwest::Client::new(),
    });

    let app = swift_search::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        "swift-search listening on {}, forwarding to {}",
        bind_addr, config.upstream.url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let drain = Duration::from_secs(config.server.shutdown_timeout);
    if tokio::time::timeout(drain, queuer.shutdown()).await.is_err() {
        warn!("Pending index events not drained within {:?}", drain);
    }

    info!("swift-search shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
