// Copyright 2025 hndr Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # hndr CLI
//!
//! Settings resolution and server wiring behind the `hndr-broker` binary.
//!
//! Each subcommand runs one broker for one payload schema:
//!
//! - **embed**: text in, dense + sparse embedding out
//! - **worker**: arbitrary MessagePack in and out
//!
//! Flags win over environment variables. The environment is read through a
//! lookup function so resolution can be tested without touching the process
//! environment.

use anyhow::{anyhow, bail, Context, Result};
use hndr_broker::{Broker, BrokerConfig, HttpServer, NodeServer};
use hndr_common::protocol::PayloadSchema;
use hndr_common::transport::tls::{server_config, TlsMaterial};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment prefix of the embedding broker.
pub const EMBED_ENV_PREFIX: &str = "API_EMBED_NODE";
/// Environment prefix of the generic worker broker.
pub const WORKER_ENV_PREFIX: &str = "API_WORKER_NODE";

/// Raw options shared by every subcommand, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub node_bind: String,
    pub api_bind: String,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub token: Option<String>,
    pub env_prefix: String,
    pub insecure: bool,
    pub handshake_timeout_ms: u64,
    pub max_body_bytes: usize,
}

/// Fully resolved, immutable process settings.
#[derive(Debug)]
pub struct Settings {
    pub node_bind: SocketAddr,
    pub api_bind: SocketAddr,
    pub broker: BrokerConfig,
    /// `None` only when TLS was explicitly disabled
    pub tls: Option<TlsMaterial>,
}

impl ServeOptions {
    /// Resolves options against an environment lookup.
    ///
    /// # Arguments
    /// * `env` - Returns the value of an environment variable, if set
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A bind address does not parse
    /// - No token was given by flag or `{prefix}_TOKEN`
    /// - Only one of `--cert` / `--key` was given
    /// - TLS is required but no certificate was found
    pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
        let node_bind: SocketAddr = self
            .node_bind
            .parse()
            .map_err(|e| anyhow!("Invalid node bind address {}: {}", self.node_bind, e))?;
        let api_bind: SocketAddr = self
            .api_bind
            .parse()
            .map_err(|e| anyhow!("Invalid API bind address {}: {}", self.api_bind, e))?;

        let token_var = format!("{}_TOKEN", self.env_prefix);
        let token = match &self.token {
            Some(token) => token.clone(),
            None => env(&token_var)
                .ok_or_else(|| anyhow!("No token: pass --token or set {}", token_var))?,
        };
        if token.is_empty() {
            bail!("Token must not be empty");
        }

        let tls = if self.insecure {
            None
        } else {
            Some(self.resolve_tls(&env)?)
        };

        let broker = BrokerConfig::new(token)
            .with_handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .with_max_body_bytes(self.max_body_bytes);

        Ok(Settings {
            node_bind,
            api_bind,
            broker,
            tls,
        })
    }

    fn resolve_tls(&self, env: &impl Fn(&str) -> Option<String>) -> Result<TlsMaterial> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => TlsMaterial::from_files(cert, key)
                .with_context(|| format!("Failed to load TLS material from {}", cert.display())),
            (Some(_), None) | (None, Some(_)) => bail!("--cert and --key must be given together"),
            (None, None) => TlsMaterial::from_env(&self.env_prefix, env).with_context(|| {
                format!(
                    "No TLS material: pass --cert/--key, set {0}_CERT_B64 and {0}_KEY_B64, or use --insecure",
                    self.env_prefix
                )
            }),
        }
    }
}

/// Runs the node listener and the HTTP front door until either fails.
pub async fn serve<S: PayloadSchema>(settings: Settings) -> Result<()> {
    info!(
        "Starting {} broker (node listener {}, API {})",
        S::NAME,
        settings.node_bind,
        settings.api_bind
    );
    info!("Handshake timeout: {:?}", settings.broker.handshake_timeout);

    let broker = Arc::new(Broker::<S>::new(settings.broker));

    let mut node_server = NodeServer::bind(settings.node_bind, broker.clone()).await?;
    match &settings.tls {
        Some(material) => node_server = node_server.with_tls(server_config(material)?),
        None => warn!("TLS disabled; nodes connect over plain ws://"),
    }
    let http_server = HttpServer::new(broker);

    tokio::try_join!(node_server.run(), http_server.run(settings.api_bind))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::collections::HashMap;

    fn options() -> ServeOptions {
        ServeOptions {
            node_bind: "0.0.0.0:6000".to_string(),
            api_bind: "0.0.0.0:6050".to_string(),
            cert: None,
            key: None,
            token: None,
            env_prefix: WORKER_ENV_PREFIX.to_string(),
            insecure: false,
            handshake_timeout_ms: 15_000,
            max_body_bytes: 1024,
        }
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_token_from_environment() {
        let opts = ServeOptions { insecure: true, ..options() };
        let settings = opts.resolve(env(&[("API_WORKER_NODE_TOKEN", "from-env")])).unwrap();
        assert_eq!(settings.broker.token, "from-env");
        assert_eq!(settings.node_bind.port(), 6000);
        assert_eq!(settings.api_bind.port(), 6050);
        assert_eq!(settings.broker.handshake_timeout, Duration::from_secs(15));
        assert_eq!(settings.broker.max_body_bytes, 1024);
    }

    #[test]
    fn test_flag_token_wins() {
        let opts = ServeOptions {
            token: Some("from-flag".to_string()),
            insecure: true,
            ..options()
        };
        let settings = opts.resolve(env(&[("API_WORKER_NODE_TOKEN", "from-env")])).unwrap();
        assert_eq!(settings.broker.token, "from-flag");
    }

    #[test]
    fn test_missing_token() {
        let opts = ServeOptions { insecure: true, ..options() };
        let err = opts.resolve(env(&[])).unwrap_err();
        assert!(err.to_string().contains("API_WORKER_NODE_TOKEN"));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let opts = ServeOptions {
            token: Some(String::new()),
            insecure: true,
            ..options()
        };
        assert!(opts.resolve(env(&[])).is_err());
    }

    #[test]
    fn test_tls_required_by_default() {
        let opts = ServeOptions {
            token: Some("T".to_string()),
            ..options()
        };
        let err = opts.resolve(env(&[])).unwrap_err();
        assert!(err.to_string().contains("API_WORKER_NODE_CERT_B64"));
    }

    #[test]
    fn test_tls_from_environment() {
        let opts = ServeOptions {
            token: Some("T".to_string()),
            env_prefix: EMBED_ENV_PREFIX.to_string(),
            ..options()
        };
        let cert = BASE64.encode("CERT");
        let key = BASE64.encode("KEY");
        let settings = opts
            .resolve(env(&[
                ("API_EMBED_NODE_CERT_B64", cert.as_str()),
                ("API_EMBED_NODE_KEY_B64", key.as_str()),
            ]))
            .unwrap();
        let tls = settings.tls.unwrap();
        assert_eq!(tls.cert_pem, b"CERT");
        assert_eq!(tls.key_pem, b"KEY");
    }

    #[test]
    fn test_cert_without_key() {
        let opts = ServeOptions {
            token: Some("T".to_string()),
            cert: Some(PathBuf::from("cert.pem")),
            ..options()
        };
        let err = opts.resolve(env(&[])).unwrap_err();
        assert!(err.to_string().contains("together"));
    }

    #[test]
    fn test_invalid_bind_address() {
        let opts = ServeOptions {
            token: Some("T".to_string()),
            insecure: true,
            node_bind: "not-an-address".to_string(),
            ..options()
        };
        assert!(opts.resolve(env(&[])).is_err());
    }
}
