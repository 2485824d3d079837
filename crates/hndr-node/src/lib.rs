pub mod client;
pub mod config;

pub use client::NodeClient;
pub use config::NodeClientConfig;
