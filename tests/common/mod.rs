//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use rest_gateway::bus::{EventEnvelope, LocalBus, Payload, ServiceError, ServiceHandler, StreamRegistry};
use rest_gateway::config::GatewayConfig;
use rest_gateway::http::HttpServer;
use rest_gateway::lifecycle::Shutdown;
use rest_gateway::routing::SharedRouteTable;

/// A gateway served on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub bus: LocalBus,
    pub streams: Arc<StreamRegistry>,
    pub routes: SharedRouteTable,
    pub config_tx: mpsc::UnboundedSender<GatewayConfig>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Build a config from `rest`, `cors` and `headers` JSON arrays.
pub fn config(rest: serde_json::Value, cors: serde_json::Value, headers: serde_json::Value) -> GatewayConfig {
    let list = |v: serde_json::Value| v.as_array().cloned().unwrap_or_default();
    GatewayConfig {
        rest: list(rest),
        cors: list(cors),
        headers: list(headers),
        ..Default::default()
    }
}

/// Start the gateway. `register` adds services to the bus before traffic starts.
pub async fn spawn_gateway<F>(config: GatewayConfig, register: F) -> TestGateway
where
    F: FnOnce(&LocalBus, &Arc<StreamRegistry>),
{
    let streams = Arc::new(StreamRegistry::new());
    let bus = LocalBus::new();
    register(&bus, &streams);

    let server = HttpServer::new(&config, Arc::new(bus.clone()), Arc::clone(&streams));
    bus.register(server.reply_address(), server.correlator());
    let routes = server.routes();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    let (config_tx, config_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let _ = server.run(listener, Some(config_rx), stop).await;
    });

    TestGateway {
        addr,
        bus,
        streams,
        routes,
        config_tx,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

/// Replies with the request descriptor it received.
pub struct Echo;

#[async_trait]
impl ServiceHandler for Echo {
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        match event.body {
            Payload::HttpRequest(req) => {
                let json = serde_json::to_value(&*req).map_err(|e| ServiceError::new(500, e.to_string()))?;
                Ok(EventEnvelope::reply(Payload::Json(json)))
            }
            _ => Err(ServiceError::new(400, "not an http request")),
        }
    }
}

/// Forwards every event to a channel and replies `{"service": <name>}`.
pub struct Recorder {
    pub name: &'static str,
    pub tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl Recorder {
    pub fn new(name: &'static str) -> (Arc<Self>, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { name, tx }), rx)
    }
}

#[async_trait]
impl ServiceHandler for Recorder {
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        let _ = self.tx.send(event);
        Ok(EventEnvelope::reply(Payload::Json(serde_json::json!({"service": self.name}))))
    }
}

/// Never answers within a test's patience.
pub struct Slow(pub Duration);

#[async_trait]
impl ServiceHandler for Slow {
    async fn handle(&self, _event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        tokio::time::sleep(self.0).await;
        Ok(EventEnvelope::reply(Payload::Text("late".into())))
    }
}

/// Authentication service with a fixed verdict. Allowed requests get a `user` session header.
pub struct Auth(pub bool);

#[async_trait]
impl ServiceHandler for Auth {
    async fn handle(&self, _event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        Ok(EventEnvelope::reply(Payload::Bool(self.0)).with_header("user", "demo"))
    }
}

/// Consumes the request stream and reports its size.
pub struct StreamProbe(pub Arc<StreamRegistry>);

#[async_trait]
impl ServiceHandler for StreamProbe {
    async fn handle(&self, event: EventEnvelope) -> Result<EventEnvelope, ServiceError> {
        let Payload::HttpRequest(req) = event.body else {
            return Err(ServiceError::new(400, "not an http request"));
        };
        let received = match req.stream.as_deref().and_then(|id| self.0.take(id)) {
            Some(stream) => stream
                .read_all()
                .await
                .map_err(|e| ServiceError::new(500, e.to_string()))?
                .len(),
            None => 0,
        };
        Ok(EventEnvelope::reply(Payload::Json(serde_json::json!({
            "streamed": req.stream.is_some(),
            "filename": req.filename,
            "size": req.size,
            "received": received,
        }))))
    }
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
