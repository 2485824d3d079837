//! hndr Transport Layer
//!
//! Node connections are WebSockets carrying binary MessagePack frames,
//! terminated with TLS at the broker.
//!
//! # Components
//!
//! - **[`MsgpackCodec`]**: Encode/decode init, task and result messages
//! - **[`tls`]**: Load certificate/key material and build rustls configs
//!
//! # Example
//!
//! ```
//! use hndr_common::protocol::{WorkerResult, WorkerSchema};
//! use hndr_common::transport::MsgpackCodec;
//!
//! let frame = MsgpackCodec::encode_result::<WorkerSchema>(0, WorkerResult::output("world")).unwrap();
//! let (id, result) = MsgpackCodec::decode_result::<WorkerSchema>(&frame).unwrap();
//! assert_eq!(id, 0);
//! assert_eq!(result.output, Some("world".into()));
//! ```

pub mod codec;
pub mod tls;

pub use codec::MsgpackCodec;
pub use tls::TlsMaterial;
