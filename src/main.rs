//! REST automation gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                              ┌──────────────────────────────────────────────────────────┐
//!                              │                   REST GATEWAY                           │
//!                              │                                                          │
//!     Client Request           │  ┌─────────┐    ┌──────────┐    ┌──────────────┐        │
//!     ─────────────────────────┼─▶│  http   │───▶│ routing  │───▶│  dispatch    │        │
//!                              │  │ server  │    │  table   │    │ auth+forward │        │
//!                              │  └─────────┘    └──────────┘    └──────┬───────┘        │
//!                              │                                        │                 │
//!                              │                                        ▼                 │
//!                              │                                ┌──────────────┐  event  │
//!                              │                                │  event bus   │─────────┼──▶ Services
//!                              │                                └──────┬───────┘         │
//!                              │                                       │ reply           │
//!     Client Response          │  ┌─────────┐    ┌──────────┐    ┌─────▼────────┐        │
//!     ◀────────────────────────┼──│response │◀───│  http    │◀───│ correlator   │        │
//!                              │  │ render  │    │ handler  │    │              │        │
//!                              │  └─────────┘    └──────────┘    └──────────────┘        │
//!                              │                                                          │
//!                              │  ┌────────────────────────────────────────────────────┐ │
//!                              │  │              Cross-Cutting Concerns                 │ │
//!                              │  │  config + hot reload │ observability │ lifecycle    │ │
//!                              │  │  admin API           │ http relay    │              │ │
//!                              │  └────────────────────────────────────────────────────┘ │
//!                              └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpListener;

use rest_gateway::admin::{setup_admin_router, AdminState};
use rest_gateway::bus::{EventEnvelope, LocalBus, Payload, ServiceError, ServiceHandler, StreamRegistry};
use rest_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use rest_gateway::http::HttpServer;
use rest_gateway::lifecycle::{wait_for_signal, Shutdown};
use rest_gateway::observability::{logging, metrics};
use rest_gateway::relay::HttpRelay;
use rest_gateway::routing::route::HTTP_RELAY;

#[derive(Parser)]
#[command(name = "rest-gateway")]
#[command(about = "REST automation gateway", long_about = None)]
struct Args {
    /// Configuration file (TOML). Defaults are used when it does not exist.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Register the `hello.world` demo service.
    #[arg(long)]
    demo: bool,
}

/// Replies with the request descriptor it received.
struct HelloWorld;

#[async_trait]
impl ServiceHandler for HelloWorld {
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        match event.body {
            Payload::HttpRequest(req) => {
                let json = serde_json::to_value(&*req).map_err(|e| ServiceError::new(500, e.to_string()))?;
                Ok(EventEnvelope::reply(Payload::Json(json)))
            }
            other => Ok(EventEnvelope::reply(other)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (config, watch) = if args.config.exists() {
        (load_config(&args.config)?, true)
    } else {
        (GatewayConfig::default(), false)
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rest-gateway starting");
    if !watch {
        tracing::warn!(path = ?args.config, "Config file not found, using defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rest_entries = config.rest.len(),
        cors_entries = config.cors.len(),
        header_entries = config.headers.len(),
        "Configuration loaded"
    );

    // Initialize metrics server
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let streams = Arc::new(match &config.gateway.stream_dir {
        Some(dir) => StreamRegistry::with_dir(dir),
        None => StreamRegistry::new(),
    });

    let bus = LocalBus::new();
    if config.relay.enabled {
        bus.register(HTTP_RELAY, Arc::new(HttpRelay::new(Arc::clone(&streams))?));
    }
    if args.demo {
        bus.register("hello.world", Arc::new(HelloWorld));
    }

    let server = HttpServer::new(&config, Arc::new(bus.clone()), Arc::clone(&streams));
    bus.register(server.reply_address(), server.correlator());

    let shutdown = Arc::new(Shutdown::new());

    // Hot reload of the route table
    let mut _watcher = None;
    let mut updates = None;
    if watch {
        let (watcher, rx) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(w) => {
                _watcher = Some(w);
                updates = Some(rx);
            }
            Err(e) => tracing::error!(error = %e, "Config watcher failed to start"),
        }
    }

    if config.admin.enabled {
        let admin = setup_admin_router(AdminState::from_server(&server, &config.admin.api_key));
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { wait_for_signal(&shutdown).await });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    server.run(listener, updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
