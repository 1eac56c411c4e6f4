//! Integration Tests for the HTTP shim
//!
//! Start a real listener backed by the in-memory broker and drive it over
//! TCP with a hyper client, the way a test suite would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use pulsar_http_shim::broker::{OutboundMessage, Properties};
use pulsar_http_shim::{AppState, Bridge, BridgeOptions, HttpServer, MemoryBroker};

// Atomic port counter to avoid port conflicts between tests
static PORT_COUNTER: AtomicU16 = AtomicU16::new(28000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(broker: &MemoryBroker, reply_timeout: Duration) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], next_port()));
        let listener = TcpListener::bind(addr).await.expect("Failed to bind");

        let bridge = Bridge::new(
            Arc::new(broker.clone()),
            BridgeOptions {
                reply_timeout,
                ..Default::default()
            },
        );
        let server = HttpServer::new(AppState::new(bridge), addr);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn post(&self, path: &str, body: &'static str) -> (StatusCode, hyper::HeaderMap, Bytes) {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("Failed to connect");
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .expect("Handshake failed");
        tokio::spawn(conn);

        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("host", self.addr.to_string())
            .header("x-request-id", "it-1")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();

        let response = sender.send_request(req).await.expect("Request failed");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("Server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Answer the first request seen on `request_topic` with `reply` on `reply_topic`
fn spawn_responder(broker: &MemoryBroker, request_topic: &'static str, reply_topic: &'static str) {
    let broker = broker.clone();
    tokio::spawn(async move {
        for _ in 0..500 {
            if !broker.messages(request_topic).is_empty() {
                let mut properties = Properties::new();
                properties.insert("X-Status".to_string(), "ok".to_string());
                broker.publish(
                    reply_topic,
                    OutboundMessage::new(Bytes::from_static(b"pong"), properties),
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
}

#[tokio::test]
async fn test_send_round_trip() {
    let broker = MemoryBroker::new();
    let server = TestServer::start(&broker, Duration::from_secs(5)).await;
    spawn_responder(&broker, "req", "resp");

    let (status, headers, body) = server
        .post("/pulsar/send?writeQueueName=req&readQueueName=resp", "ping")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"pong"));
    assert_eq!(headers.get("x-status").unwrap(), "ok");

    let requests = broker.messages("req");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload, Bytes::from_static(b"ping"));
    assert_eq!(
        requests[0].properties.get("x-request-id").map(String::as_str),
        Some("it-1")
    );
    // Host is hop-level and never forwarded
    assert!(!requests[0].properties.contains_key("host"));

    let stats = broker.stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_send_without_reply_times_out() {
    let broker = MemoryBroker::new();
    let server = TestServer::start(&broker, Duration::from_millis(100)).await;

    let (status, _, body) = server
        .post("/pulsar/send?writeQueueName=req&readQueueName=silent", "ping")
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
    assert_eq!(broker.messages("req").len(), 1);
    assert_eq!(broker.stats().consumers, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_write_publishes_once() {
    let broker = MemoryBroker::new();
    let server = TestServer::start(&broker, Duration::from_secs(5)).await;

    let (status, _, body) = server.post("/pulsar/write?queueName=logs", "event-1").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    let log = broker.messages("logs");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].payload, Bytes::from_static(b"event-1"));
    assert_eq!(broker.stats().connections, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_missing_topic_is_bad_request() {
    let broker = MemoryBroker::new();
    let server = TestServer::start(&broker, Duration::from_secs(5)).await;

    let (status, _, _) = server.post("/pulsar/write", "event-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = server
        .post("/pulsar/send?readQueueName=resp", "ping")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn test_sequential_sends_reuse_subscription() {
    let broker = MemoryBroker::new();
    let server = TestServer::start(&broker, Duration::from_secs(5)).await;

    spawn_responder(&broker, "req-a", "resp");
    let (status, _, _) = server
        .post("/pulsar/send?writeQueueName=req-a&readQueueName=resp", "one")
        .await;
    assert_eq!(status, StatusCode::OK);

    spawn_responder(&broker, "req-b", "resp");
    let (status, _, body) = server
        .post("/pulsar/send?writeQueueName=req-b&readQueueName=resp", "two")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"pong"));

    server.stop().await;
}

#[tokio::test]
async fn test_reply_content_length_property_keeps_framing() {
    let broker = MemoryBroker::new();
    let server = TestServer::start(&broker, Duration::from_secs(5)).await;

    let responder = broker.clone();
    tokio::spawn(async move {
        for _ in 0..500 {
            if !responder.messages("req").is_empty() {
                let mut properties = Properties::new();
                properties.insert("content-length".to_string(), "100".to_string());
                properties.insert("X-Status".to_string(), "ok".to_string());
                responder.publish(
                    "resp",
                    OutboundMessage::new(Bytes::from_static(b"pong"), properties),
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let (status, headers, body) = server
        .post("/pulsar/send?writeQueueName=req&readQueueName=resp", "ping")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-length").unwrap(), "4");
    assert_eq!(headers.get("x-status").unwrap(), "ok");
    assert_eq!(body, Bytes::from_static(b"pong"));

    server.stop().await;
}
