//! hndr Common Types and Transport
//!
//! This crate provides the protocol definitions, wire codec and shared-secret
//! authentication used by the hndr compute broker and the worker nodes that
//! connect to it.
//!
//! # Overview
//!
//! The broker sits between stateless HTTP callers and a fleet of ephemeral
//! worker nodes (GPU machines running ML models). Nodes hold a persistent
//! WebSocket connection to the broker; every caller request becomes one task
//! message sent to one node, and the node's reply is correlated back to the
//! caller by request ID.
//!
//! - **Protocol Layer**: request IDs, the init message, payload schemas and the error taxonomy
//! - **Transport Layer**: MessagePack codec and TLS material loading
//!
//! # Wire Format
//!
//! - **Transport**: WebSocket over TLS, binary frames only
//! - **Serialization**: MessagePack with named fields
//! - **Node → Broker (first frame)**: `{ip, token}`
//! - **Broker → Node**: `{id, <task payload fields>}`
//! - **Node → Broker**: `{id, <result payload fields>}`
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types ([`NodeInit`], [`PayloadSchema`], [`BrokerError`])
//! - [`transport`] - [`MsgpackCodec`](transport::MsgpackCodec) and TLS helpers
//! - [`auth`] - Shared token validation
//!
//! # Example
//!
//! ```
//! use hndr_common::protocol::{EmbedSchema, NodeInit};
//! use hndr_common::transport::MsgpackCodec;
//!
//! let init = NodeInit::new("10.0.0.1", "secret");
//! let frame = MsgpackCodec::encode_init(&init).unwrap();
//! assert_eq!(MsgpackCodec::decode_init(&frame).unwrap(), init);
//!
//! let task = MsgpackCodec::encode_task::<EmbedSchema>(0, "hello".to_string()).unwrap();
//! let (id, text) = MsgpackCodec::decode_task::<EmbedSchema>(&task).unwrap();
//! assert_eq!((id, text.as_str()), (0, "hello"));
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
