//! Node Client Integration Tests
//!
//! Runs `NodeClient` against an in-process broker and sends caller requests
//! through the broker's HTTP front door.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hndr_broker::{Broker, BrokerConfig, HttpServer, NodeServer};
use hndr_common::protocol::{
    BrokerError, EmbedResult, EmbedSchema, PayloadSchema, WorkerSchema, WorkerResult,
    EMBEDDING_DENSE_BYTES,
};
use hndr_common::transport::tls::{self, TlsMaterial};
use hndr_common::transport::MsgpackCodec;
use hndr_node::{NodeClient, NodeClientConfig};
use http_body_util::BodyExt;
use rmpv::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOKEN: &str = "node-test-token";

async fn start_broker<S: PayloadSchema>() -> (Arc<Broker<S>>, String) {
    let broker = Arc::new(Broker::<S>::new(BrokerConfig::new(TOKEN)));
    let server = NodeServer::bind("127.0.0.1:0".parse().unwrap(), broker.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    (broker, addr)
}

async fn wait_for_nodes<S: PayloadSchema>(broker: &Arc<Broker<S>>, count: usize) {
    for _ in 0..200 {
        if broker.node_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} nodes, have {}", count, broker.node_count());
}

async fn post<S: PayloadSchema>(broker: &Arc<Broker<S>>, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let app = HttpServer::new(broker.clone()).router();
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, body)
}

#[tokio::test]
async fn test_worker_node_serves_tasks() {
    let (broker, addr) = start_broker::<WorkerSchema>().await;
    let client = NodeClient::<WorkerSchema>::new(NodeClientConfig::new(addr, TOKEN, "10.0.0.9"));
    tokio::spawn(async move {
        client
            .run(|input: Value| async move {
                let n = input.as_u64().unwrap_or(0);
                Ok::<_, BrokerError>(WorkerResult::output(n + 1))
            })
            .await
    });
    wait_for_nodes(&broker, 1).await;

    for n in 0..5u64 {
        let (status, body) = post(&broker, MsgpackCodec::encode(&Value::from(n)).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let reply: Value = MsgpackCodec::decode(&body).unwrap();
        assert_eq!(reply, Value::from(n + 1));
    }
}

#[tokio::test]
async fn test_worker_handler_error_is_reported() {
    let (broker, addr) = start_broker::<WorkerSchema>().await;
    let client = NodeClient::<WorkerSchema>::new(NodeClientConfig::new(addr, TOKEN, "10.0.0.9"));
    tokio::spawn(async move {
        client
            .run(|_: Value| async move {
                Err::<WorkerResult, _>(BrokerError::Handler("out of memory".to_string()))
            })
            .await
    });
    wait_for_nodes(&broker, 1).await;

    let (status, body) = post(&broker, MsgpackCodec::encode(&Value::Nil).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let reply: Value = MsgpackCodec::decode(&body).unwrap();
    assert_eq!(reply, Value::from("out of memory"));

    // The session survives a reported error.
    assert_eq!(broker.node_count(), 1);
}

#[tokio::test]
async fn test_embed_node_serves_tasks() {
    let (broker, addr) = start_broker::<EmbedSchema>().await;
    let client = NodeClient::<EmbedSchema>::new(NodeClientConfig::new(addr, TOKEN, "10.0.0.9"));
    tokio::spawn(async move {
        client
            .run(|text: String| async move {
                Ok::<_, BrokerError>(EmbedResult {
                    dense: vec![0; EMBEDDING_DENSE_BYTES],
                    sparse: HashMap::from([(text, 1.0)]),
                })
            })
            .await
    });
    wait_for_nodes(&broker, 1).await;

    let (status, body) = post(&broker, b"the quick brown fox".to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = MsgpackCodec::decode(&body).unwrap();
    assert!(reply.as_map().is_some());
}

#[tokio::test]
async fn test_embed_handler_error_closes_session_and_reconnects() {
    let (broker, addr) = start_broker::<EmbedSchema>().await;
    let config = NodeClientConfig::new(addr, TOKEN, "10.0.0.9")
        .with_reconnect_delay(Duration::from_millis(50));
    let client = NodeClient::<EmbedSchema>::new(config);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    tokio::spawn(async move {
        client
            .run(move |_: String| {
                let first = seen.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        Err(BrokerError::Handler("model not loaded".to_string()))
                    } else {
                        Ok(EmbedResult {
                            dense: vec![0; EMBEDDING_DENSE_BYTES],
                            sparse: HashMap::new(),
                        })
                    }
                }
            })
            .await
    });
    wait_for_nodes(&broker, 1).await;

    // Embeddings cannot carry an error, so the node hangs up instead.
    let (status, body) = post(&broker, b"first".to_vec()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"Node disconnected");

    wait_for_nodes(&broker, 1).await;
    let (status, _) = post(&broker, b"second".to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_wrong_token_never_joins_pool() {
    let (broker, addr) = start_broker::<WorkerSchema>().await;
    let client = NodeClient::<WorkerSchema>::new(NodeClientConfig::new(addr, "wrong", "10.0.0.9"));

    let handler = |_: Value| async move { Ok::<_, BrokerError>(WorkerResult::output(Value::Nil)) };
    let session = client.connect_once(&handler);
    let outcome = tokio::time::timeout(Duration::from_secs(2), session).await;
    assert!(outcome.is_ok(), "broker should hang up on a bad token");
    assert_eq!(broker.node_count(), 0);
}

/// Self-signed broker certificate for `localhost`.
fn self_signed() -> TlsMaterial {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    TlsMaterial::new(certified.cert.pem(), certified.key_pair.serialize_pem())
}

async fn start_tls_broker<S: PayloadSchema>(material: &TlsMaterial) -> (Arc<Broker<S>>, String) {
    let broker = Arc::new(Broker::<S>::new(BrokerConfig::new(TOKEN)));
    let server = NodeServer::bind("127.0.0.1:0".parse().unwrap(), broker.clone())
        .await
        .unwrap()
        .with_tls(tls::server_config(material).unwrap());
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    (broker, addr)
}

#[tokio::test]
async fn test_node_joins_over_tls() {
    let material = self_signed();
    let (broker, addr) = start_tls_broker::<WorkerSchema>(&material).await;

    let config = NodeClientConfig::new(addr, TOKEN, "10.0.0.9")
        .with_tls(tls::client_config_trusting(&material.cert_pem).unwrap())
        .with_server_name("localhost");
    assert!(config.url().starts_with("wss://"));
    let client = NodeClient::<WorkerSchema>::new(config);
    tokio::spawn(async move {
        client
            .run(|input: Value| async move {
                Ok::<_, BrokerError>(WorkerResult::output(Value::Array(vec![input])))
            })
            .await
    });
    wait_for_nodes(&broker, 1).await;

    let (status, body) = post(&broker, MsgpackCodec::encode(&Value::from("secure")).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = MsgpackCodec::decode(&body).unwrap();
    assert_eq!(reply, Value::Array(vec![Value::from("secure")]));
}

#[tokio::test]
async fn test_plaintext_node_cannot_join_tls_broker() {
    let material = self_signed();
    let (broker, addr) = start_tls_broker::<WorkerSchema>(&material).await;
    let client = NodeClient::<WorkerSchema>::new(NodeClientConfig::new(addr, TOKEN, "10.0.0.9"));

    let handler = |_: Value| async move { Ok::<_, BrokerError>(WorkerResult::output(Value::Nil)) };
    let outcome = tokio::time::timeout(Duration::from_secs(2), client.connect_once(&handler)).await;
    assert!(matches!(outcome, Ok(Err(_))));
    assert_eq!(broker.node_count(), 0);
}

#[tokio::test]
async fn test_node_rejects_untrusted_certificate() {
    let (broker, addr) = start_tls_broker::<WorkerSchema>(&self_signed()).await;
    let other = self_signed();
    let config = NodeClientConfig::new(addr, TOKEN, "10.0.0.9")
        .with_tls(tls::client_config_trusting(&other.cert_pem).unwrap())
        .with_server_name("localhost");
    let client = NodeClient::<WorkerSchema>::new(config);

    let handler = |_: Value| async move { Ok::<_, BrokerError>(WorkerResult::output(Value::Nil)) };
    let outcome = tokio::time::timeout(Duration::from_secs(2), client.connect_once(&handler)).await;
    assert!(matches!(outcome, Ok(Err(BrokerError::Tls(_)))));
    assert_eq!(broker.node_count(), 0);
}
