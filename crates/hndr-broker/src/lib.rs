pub mod broker;
pub mod config;
pub mod correlation;
pub mod handshake;
pub mod http_server;
pub mod node;
pub mod node_pool;
pub mod node_server;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use correlation::{PendingRequest, RequestTable};
pub use http_server::HttpServer;
pub use node::{ConnectionId, ConnectionState, NodeConnection};
pub use node_pool::NodePool;
pub use node_server::NodeServer;
