//! # hndr Broker Entry Point
//!
//! Runs a compute broker: worker nodes dial in over WebSocket (TLS) and
//! authenticate with a shared token; HTTP callers POST tasks that are handed
//! to a random connected node.
//!
//! ## Usage
//!
//! ```bash
//! # Embedding broker, TLS material from API_EMBED_NODE_CERT_B64 / _KEY_B64
//! API_EMBED_NODE_TOKEN=secret hndr-broker embed
//!
//! # Generic worker broker with PEM files
//! hndr-broker worker --token secret --cert broker.crt --key broker.key
//!
//! # Local development without TLS
//! hndr-broker worker --token dev --insecure --api-bind 127.0.0.1:6050
//! ```

use anyhow::Result;
use argh::FromArgs;
use hndr_cli::{ServeOptions, EMBED_ENV_PREFIX, WORKER_ENV_PREFIX};
use hndr_common::protocol::{EmbedSchema, WorkerSchema};
use std::path::PathBuf;


#[derive(FromArgs)]
/// hndr - compute broker for ephemeral worker nodes
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

// One subcommand per payload schema.
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Embed(EmbedArgs),
    Worker(WorkerArgs),
}

// Callers POST raw UTF-8 text and receive
// `{embeddingDense, embeddingSparse}` as MessagePack.
#[derive(FromArgs)]
#[argh(subcommand, name = "embed")]
/// run the text embedding broker
struct EmbedArgs {
    /// address the node WebSocket listener binds to
    #[argh(option, long = "node-bind", default = "\"0.0.0.0:6000\".into()")]
    node_bind: String,

    /// address the caller HTTP server binds to
    #[argh(option, long = "api-bind", default = "\"0.0.0.0:6050\".into()")]
    api_bind: String,

    /// path to the PEM certificate chain for the node listener
    #[argh(option)]
    cert: Option<PathBuf>,

    /// path to the PEM private key for the node listener
    #[argh(option)]
    key: Option<PathBuf>,

    /// shared node token (defaults to $API_EMBED_NODE_TOKEN)
    #[argh(option)]
    token: Option<String>,

    /// prefix of the TOKEN / CERT_B64 / KEY_B64 environment variables
    #[argh(option, long = "env-prefix", default = "EMBED_ENV_PREFIX.into()")]
    env_prefix: String,

    /// serve nodes over plain ws:// (development only)
    #[argh(switch)]
    insecure: bool,

    /// how long a node may take to authenticate, in milliseconds
    #[argh(option, long = "handshake-timeout-ms", default = "15000")]
    handshake_timeout_ms: u64,

    /// largest accepted caller request body, in bytes
    #[argh(option, long = "max-body-bytes", default = "100 * 1024 * 1024")]
    max_body_bytes: usize,
}

// Callers POST any MessagePack value and receive the node's `output`
// (200) or `error` (502), MessagePack-encoded.
#[derive(FromArgs)]
#[argh(subcommand, name = "worker")]
/// run the generic worker broker
struct WorkerArgs {
    /// address the node WebSocket listener binds to
    #[argh(option, long = "node-bind", default = "\"0.0.0.0:6000\".into()")]
    node_bind: String,

    /// address the caller HTTP server binds to
    #[argh(option, long = "api-bind", default = "\"0.0.0.0:6050\".into()")]
    api_bind: String,

    /// path to the PEM certificate chain for the node listener
    #[argh(option)]
    cert: Option<PathBuf>,

    /// path to the PEM private key for the node listener
    #[argh(option)]
    key: Option<PathBuf>,

    /// shared node token (defaults to $API_WORKER_NODE_TOKEN)
    #[argh(option)]
    token: Option<String>,

    /// prefix of the TOKEN / CERT_B64 / KEY_B64 environment variables
    #[argh(option, long = "env-prefix", default = "WORKER_ENV_PREFIX.into()")]
    env_prefix: String,

    /// serve nodes over plain ws:// (development only)
    #[argh(switch)]
    insecure: bool,

    /// how long a node may take to authenticate, in milliseconds
    #[argh(option, long = "handshake-timeout-ms", default = "15000")]
    handshake_timeout_ms: u64,

    /// largest accepted caller request body, in bytes
    #[argh(option, long = "max-body-bytes", default = "100 * 1024 * 1024")]
    max_body_bytes: usize,
}

impl From<EmbedArgs> for ServeOptions {
    fn from(args: EmbedArgs) -> Self {
        ServeOptions {
            node_bind: args.node_bind,
            api_bind: args.api_bind,
            cert: args.cert,
            key: args.key,
            token: args.token,
            env_prefix: args.env_prefix,
            insecure: args.insecure,
            handshake_timeout_ms: args.handshake_timeout_ms,
            max_body_bytes: args.max_body_bytes,
        }
    }
}

impl From<WorkerArgs> for ServeOptions {
    fn from(args: WorkerArgs) -> Self {
        ServeOptions {
            node_bind: args.node_bind,
            api_bind: args.api_bind,
            cert: args.cert,
            key: args.key,
            token: args.token,
            env_prefix: args.env_prefix,
            insecure: args.insecure,
            handshake_timeout_ms: args.handshake_timeout_ms,
            max_body_bytes: args.max_body_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, but allow RUST_LOG to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let env = |name: &str| std::env::var(name).ok();
    match cli.command {
        Commands::Embed(args) => {
            let settings = ServeOptions::from(args).resolve(env)?;
            hndr_cli::serve::<EmbedSchema>(settings).await
        }
        Commands::Worker(args) => {
            let settings = ServeOptions::from(args).resolve(env)?;
            hndr_cli::serve::<WorkerSchema>(settings).await
        }
    }
}
