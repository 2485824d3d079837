//! HTTP front door for callers.
//!
//! Every path accepts `POST` with a MessagePack (or, for embeddings, UTF-8
//! text) body. One request becomes one task; the reply is the node's result.
//!
//! | Outcome                          | Status | Body                      |
//! |----------------------------------|--------|---------------------------|
//! | result                           | 200    | msgpack reply             |
//! | worker result carrying an error  | 502    | msgpack error value       |
//! | body unreadable or undecodable   | 400    | error text                |
//! | no node / node disconnected      | 500    | error text                |
//! | method other than `POST`         | 405    | empty                     |

use crate::broker::Broker;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use hndr_common::protocol::{BrokerError, PayloadSchema, ReplyStatus, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Content type of every successful reply.
pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

/// HTTP server in front of one broker.
pub struct HttpServer<S: PayloadSchema> {
    broker: Arc<Broker<S>>,
}

impl<S: PayloadSchema> HttpServer<S> {
    /// Creates a new HTTP server.
    ///
    /// # Arguments
    /// * `broker` - Arc-wrapped broker that requests are dispatched through
    pub fn new(broker: Arc<Broker<S>>) -> Self {
        Self { broker }
    }

    /// Builds the axum app.
    ///
    /// Exposed so tests can drive it without a socket.
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .fallback(front_door::<S>)
            .layer(DefaultBodyLimit::max(self.broker.config().max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self.broker.clone())
    }

    /// Runs the HTTP server.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "0.0.0.0:6050")
    ///
    /// # Returns
    /// - `Ok(())` - Server shut down
    /// - `Err(BrokerError::Transport)` - Server failed to bind or run
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrokerError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| BrokerError::Transport(format!("Failed to get local addr: {}", e)))?;
        info!("{} HTTP server listening on {}", S::NAME, local);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| BrokerError::Transport(format!("Server error: {}", e)))
    }
}

/// Handles every caller request regardless of path.
async fn front_door<S: PayloadSchema>(
    State(broker): State<Arc<Broker<S>>>,
    method: Method,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!("Unreadable request body: {}", rejection);
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    let task = match S::decode_caller_request(&body) {
        Ok(task) => task,
        Err(e) => {
            let status = if e.is_caller_fault() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return (status, e.to_string()).into_response();
        }
    };

    let output = match broker.call(task).await {
        Ok(output) => output,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    match S::encode_caller_reply(output) {
        Ok(reply) => {
            let status = match reply.status {
                ReplyStatus::Ok => StatusCode::OK,
                ReplyStatus::NodeError => StatusCode::BAD_GATEWAY,
            };
            (status, [(header::CONTENT_TYPE, MSGPACK_CONTENT_TYPE)], reply.body).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
