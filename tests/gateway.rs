//! End-to-end tests: real sockets, reqwest client, in-process bus.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use rest_gateway::routing::route::HTTP_RELAY;
use rest_gateway::routing::RouteMatch;
use rest_gateway::HttpRelay;

mod common;

use common::{client, config, spawn_gateway, Auth, Echo, Recorder, Slow, StreamProbe};

#[tokio::test]
async fn test_json_body_and_path_parameters() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/hello/{name}", "service": "hello.world", "methods": ["GET", "POST"]}]),
            json!([]),
            json!([]),
        ),
        |bus, _| bus.register("hello.world", Arc::new(Echo)),
    )
    .await;

    let res = client()
        .post(gw.url("/api/hello/world?x=1&x=2"))
        .json(&json!({"a": 1, "b": [true]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["url"], "/api/hello/world");
    assert_eq!(body["body"], json!({"a": 1, "b": [true]}));
    assert_eq!(body["parameters"]["path"]["name"], "world");
    assert_eq!(body["parameters"]["query"]["x"], json!(["1", "2"]));
    assert_eq!(body["ip"], "127.0.0.1");

    let res = client()
        .post(gw.url("/api/hello/world"))
        .header("content-type", "application/json")
        .body("")
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["body"], json!({}));
}

#[tokio::test]
async fn test_large_body_streamed_small_body_buffered() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/upload", "service": "v1.stream.probe", "methods": ["PUT"]}]),
            json!([]),
            json!([]),
        ),
        |bus, streams| bus.register("v1.stream.probe", Arc::new(StreamProbe(Arc::clone(streams)))),
    )
    .await;

    let res = client()
        .put(gw.url("/api/upload"))
        .header("content-type", "application/octet-stream")
        .body(vec![7u8; 3_000_000])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["streamed"], true);
    assert_eq!(body["size"], 3_000_000);
    assert_eq!(body["received"], 3_000_000);

    let res = client()
        .put(gw.url("/api/upload"))
        .header("content-type", "application/octet-stream")
        .body(vec![7u8; 100])
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["streamed"], false);
    assert_eq!(body["size"], 100);
    assert!(gw.streams.is_empty());
}

fn multipart_upload(filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--gateway-boundary\r\n\
         Content-Disposition: form-data; name=\"note\"\r\n\r\n\
         quarterly\r\n\
         --gateway-boundary\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        filename
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n--gateway-boundary--\r\n");
    body
}

#[tokio::test]
async fn test_multipart_upload_streamed() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/files", "service": "v1.stream.probe", "methods": ["POST"]}]),
            json!([]),
            json!([]),
        ),
        |bus, streams| bus.register("v1.stream.probe", Arc::new(StreamProbe(Arc::clone(streams)))),
    )
    .await;

    let content = vec![42u8; 5_000_000];
    let res = client()
        .post(gw.url("/api/files"))
        .header("content-type", "multipart/form-data; boundary=gateway-boundary")
        .body(multipart_upload("report.bin", &content))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["streamed"], true);
    assert_eq!(body["filename"], "report.bin");
    assert_eq!(body["size"], 5_000_000);
    assert_eq!(body["received"], 5_000_000);
    assert!(gw.streams.is_empty());
}

#[tokio::test]
async fn test_truncated_multipart_leaves_no_stream() {
    let (recorder, mut rx) = Recorder::new("v1.files");
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/files", "service": "v1.files", "methods": ["POST"]}]),
            json!([]),
            json!([]),
        ),
        move |bus, _| bus.register("v1.files", recorder),
    )
    .await;

    let mut body = b"--gateway-boundary\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\r\n"
        .to_vec();
    body.extend_from_slice(&[1u8; 10_000]);
    body.extend_from_slice(
        b"\r\n--gateway-boundary\r\n\
        Content-Disposition: form-data; name=\"note\"\r\n\r\n\
        cut",
    );
    let res = client()
        .post(gw.url("/api/files"))
        .header("content-type", "multipart/form-data; boundary=gateway-boundary")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(gw.streams.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_cors_preflight_and_response_headers() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/cors", "service": "hello.world", "methods": ["GET"], "cors": "cors_1"}]),
            json!([{
                "id": "cors_1",
                "options": [
                    "Access-Control-Allow-Origin: *",
                    "Access-Control-Allow-Methods: GET, OPTIONS"
                ],
                "headers": ["Access-Control-Allow-Origin: *"]
            }]),
            json!([]),
        ),
        |bus, _| bus.register("hello.world", Arc::new(Echo)),
    )
    .await;

    let res = client()
        .request(reqwest::Method::OPTIONS, gw.url("/api/cors"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert_eq!(res.headers()["access-control-allow-methods"], "GET, OPTIONS");

    let res = client().get(gw.url("/api/cors")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert!(res.headers().get("access-control-allow-methods").is_none());
}

#[tokio::test]
async fn test_unreachable_auth_service() {
    let (primary, mut calls) = Recorder::new("v1.protected");
    let gw = spawn_gateway(
        config(
            json!([{
                "url": "/api/protected",
                "service": "v1.protected",
                "methods": ["GET"],
                "authentication": "v1.api.auth"
            }]),
            json!([]),
            json!([]),
        ),
        |bus, _| bus.register("v1.protected", primary),
    )
    .await;

    let res = client().get(gw.url("/api/protected")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], 503);
    assert_eq!(body["type"], "error");
    assert!(body["message"].as_str().unwrap().contains("v1.api.auth"));
    assert!(calls.try_recv().is_err());
}

#[tokio::test]
async fn test_auth_verdicts_and_session() {
    let gw = spawn_gateway(
        config(
            json!([{
                "url": "/api/private",
                "service": "hello.world",
                "methods": ["GET"],
                "authentication": ["default: v1.deny.auth", "x-app-name: demo: v1.allow.auth"]
            }]),
            json!([]),
            json!([]),
        ),
        |bus, _| {
            bus.register("hello.world", Arc::new(Echo));
            bus.register("v1.deny.auth", Arc::new(Auth(false)));
            bus.register("v1.allow.auth", Arc::new(Auth(true)));
        },
    )
    .await;

    let res = client().get(gw.url("/api/private")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client()
        .get(gw.url("/api/private"))
        .header("x-app-name", "demo")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["session"]["user"], "demo");
}

#[tokio::test]
async fn test_request_header_transform() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/headers", "service": "hello.world", "methods": ["GET"], "headers": "header_1"}]),
            json!([]),
            json!([{
                "id": "header_1",
                "request": {"add": ["x-trace: abc"], "drop": ["user-agent"]},
                "response": {"add": ["x-powered-by: gateway"]}
            }]),
        ),
        |bus, _| bus.register("hello.world", Arc::new(Echo)),
    )
    .await;

    let res = client()
        .get(gw.url("/api/headers"))
        .header("user-agent", "test-agent")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-powered-by"], "gateway");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["headers"]["x-trace"], "abc");
    assert!(body["headers"].get("user-agent").is_none());
}

#[tokio::test]
async fn test_not_found_and_method_not_allowed() {
    let gw = spawn_gateway(
        config(
            json!([
                {"url": "/api/items/{id}", "service": "hello.world", "methods": ["GET"]},
                {"url": "/api/items", "service": "hello.world", "methods": ["POST"]}
            ]),
            json!([]),
            json!([]),
        ),
        |bus, _| bus.register("hello.world", Arc::new(Echo)),
    )
    .await;

    let res = client().get(gw.url("/api/unknown")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Resource not found");
    assert_eq!(body["path"], "/api/unknown");

    let res = client().delete(gw.url("/api/items/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    let res = client().get(gw.url("/api/items")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    let res = client().get(gw.url("/api/items/42")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_timeout() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/slow", "service": "v1.slow", "methods": ["GET"], "timeout": "5s"}]),
            json!([]),
            json!([]),
        ),
        |bus, _| bus.register("v1.slow", Arc::new(Slow(Duration::from_secs(20)))),
    )
    .await;

    let res = client().get(gw.url("/api/slow")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Timeout for 5 seconds");
}

#[tokio::test]
async fn test_fan_out_to_secondary_services() {
    let (primary, mut primary_calls) = Recorder::new("v1.primary");
    let (copy, mut copy_calls) = Recorder::new("v1.copy");
    let gw = spawn_gateway(
        config(
            json!([{
                "url": "/api/fanout",
                "service": ["v1.primary", "v1.missing", "v1.copy"],
                "methods": ["POST"]
            }]),
            json!([]),
            json!([]),
        ),
        |bus, _| {
            bus.register("v1.primary", primary);
            bus.register("v1.copy", copy);
        },
    )
    .await;

    let res = client()
        .post(gw.url("/api/fanout"))
        .json(&json!({"n": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["service"], "v1.primary");

    let first = primary_calls.recv().await.unwrap();
    assert!(first.correlation_id.is_some());
    let copied = tokio::time::timeout(Duration::from_secs(5), copy_calls.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(copied.reply_to.is_none());
}

#[tokio::test]
async fn test_trace_header_returned() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/traced", "service": "hello.world", "methods": ["GET"], "tracing": true}]),
            json!([]),
            json!([]),
        ),
        |bus, _| bus.register("hello.world", Arc::new(Echo)),
    )
    .await;

    let res = client()
        .get(gw.url("/api/traced"))
        .header("X-Trace-Id", "trace-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-trace-id"], "trace-123");

    let res = client().get(gw.url("/api/traced")).send().await.unwrap();
    assert_eq!(res.headers()["x-trace-id"].len(), 32);
}

#[tokio::test]
async fn test_static_fallback_with_etag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>hello</h1>").unwrap();

    let mut cfg = config(json!([]), json!([]), json!([]));
    cfg.gateway.static_root = Some(dir.path().to_string_lossy().into_owned());
    let gw = spawn_gateway(cfg, |_, _| {}).await;

    let res = client().get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/html");
    let etag = res.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(res.text().await.unwrap(), "<h1>hello</h1>");

    let res = client()
        .get(gw.url("/index.html"))
        .header("If-None-Match", etag)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);

    let res = client().get(gw.url("/missing.css")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_relay_route() {
    let backend = common::start_mock_backend("hello from backend").await;
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/relay/{path}", "service": format!("http://{}", backend), "methods": ["GET"]}]),
            json!([]),
            json!([]),
        ),
        |bus, streams| {
            bus.register(HTTP_RELAY, Arc::new(HttpRelay::new(Arc::clone(streams)).unwrap()));
        },
    )
    .await;

    let res = client().get(gw.url("/api/relay/item")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hello from backend");
}

#[tokio::test]
async fn test_route_table_reload() {
    let gw = spawn_gateway(
        config(
            json!([{"url": "/api/v1", "service": "hello.world", "methods": ["GET"]}]),
            json!([]),
            json!([]),
        ),
        |bus, _| bus.register("hello.world", Arc::new(Echo)),
    )
    .await;

    assert_eq!(
        client().get(gw.url("/api/v2")).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );

    gw.config_tx
        .send(config(
            json!([{"url": "/api/v2", "service": "hello.world", "methods": ["GET"]}]),
            json!([]),
            json!([]),
        ))
        .unwrap();

    let swapped = tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(gw.routes.load().find("GET", "/api/v2"), RouteMatch::Matched(_)) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(swapped.is_ok());

    assert_eq!(
        client().get(gw.url("/api/v2")).send().await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        client().get(gw.url("/api/v1")).send().await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}
